//! Persisted session document.
//!
//! The on-disk shape is a single JSON object:
//! `{version, claimed_user_id, chats: {<session_id>: SessionRecord}}`.
//! Maps are ordered so that serializing an unmodified document reproduces
//! the same bytes.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Current document format version.
pub const STATE_VERSION: u32 = 1;

/// Preference key for elevated trust mode.
pub const PREF_ELEVATED_TRUST: &str = "agent_yolo";
/// Preference key for the sandbox mode override.
pub const PREF_SANDBOX_MODE: &str = "agent_sandbox";
/// Preference key recording the last detected authorization URL.
pub const PREF_PENDING_AUTH_URL: &str = "pending_auth_url";

/// Author of a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Operator message.
    User,
    /// Agent reply or system diagnostic shown to the operator.
    Assistant,
}

/// One history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author.
    pub role: Role,
    /// Message body.
    pub text: String,
    /// Unix epoch milliseconds.
    #[serde(default)]
    pub ts_ms: i64,
}

/// Durable per-session record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Unix epoch milliseconds of first write.
    #[serde(default)]
    pub created_at_ms: i64,
    /// Unix epoch milliseconds of last write.
    #[serde(default)]
    pub updated_at_ms: i64,
    /// Full append-only history.
    #[serde(default, deserialize_with = "known_messages")]
    pub messages: Vec<ChatMessage>,
    /// Open preference map.
    #[serde(default, deserialize_with = "null_as_default")]
    pub prefs: BTreeMap<String, Value>,
}

impl SessionRecord {
    /// Last `max_turns` turns (two messages per turn) of history.
    #[must_use]
    pub fn recent(&self, max_turns: usize) -> &[ChatMessage] {
        let keep = max_turns.saturating_mul(2);
        let start = self.messages.len().saturating_sub(keep);
        &self.messages[start..]
    }

    /// Typed view over the preference map.
    #[must_use]
    pub fn session_prefs(&self) -> SessionPrefs {
        SessionPrefs::from_map(&self.prefs)
    }
}

/// Top-level persisted document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDocument {
    /// Format version.
    #[serde(default = "default_version")]
    pub version: u32,
    /// Identity set by the first successful claim.
    #[serde(default, deserialize_with = "user_id_text")]
    pub claimed_user_id: Option<String>,
    /// Session ID to record.
    #[serde(default, deserialize_with = "null_as_default")]
    pub chats: BTreeMap<String, SessionRecord>,
}

/// `null` reads as the empty value.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// History entries, skipping any that do not fit [`ChatMessage`]
/// (an unknown role, a missing body).
fn known_messages<'de, D>(deserializer: D) -> Result<Vec<ChatMessage>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<Value> = null_as_default(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|entry| ChatMessage::deserialize(entry).ok())
        .collect())
}

/// Claimed identity written either as a string or as a bare number.
fn user_id_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum UserId {
        Text(String),
        Signed(i64),
        Unsigned(u64),
    }

    Ok(
        Option::<UserId>::deserialize(deserializer)?.map(|id| match id {
            UserId::Text(text) => text,
            UserId::Signed(n) => n.to_string(),
            UserId::Unsigned(n) => n.to_string(),
        }),
    )
}

fn default_version() -> u32 {
    STATE_VERSION
}

impl Default for StateDocument {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            claimed_user_id: None,
            chats: BTreeMap::new(),
        }
    }
}

impl StateDocument {
    /// Record for a session, created on first use.
    pub fn session_mut(&mut self, session_id: &str, now_ms: i64) -> &mut SessionRecord {
        self.chats
            .entry(session_id.to_owned())
            .or_insert_with(|| SessionRecord {
                created_at_ms: now_ms,
                updated_at_ms: now_ms,
                ..SessionRecord::default()
            })
    }

    /// Record for a session, if it exists.
    #[must_use]
    pub fn session(&self, session_id: &str) -> Option<&SessionRecord> {
        self.chats.get(session_id)
    }
}

/// Typed preferences read from a session's preference map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionPrefs {
    /// Whether the agent runs without approvals or sandbox.
    pub elevated_trust: bool,
    /// Sandbox override; `None` falls back to the configured default.
    pub sandbox_mode: Option<String>,
    /// Last authorization URL detected during an agent call.
    pub pending_auth_url: Option<String>,
}

impl SessionPrefs {
    /// Extract typed values, ignoring entries of the wrong JSON type.
    #[must_use]
    pub fn from_map(prefs: &BTreeMap<String, Value>) -> Self {
        let text = |key: &str| {
            prefs
                .get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
        };
        Self {
            elevated_trust: prefs
                .get(PREF_ELEVATED_TRUST)
                .and_then(Value::as_bool)
                .unwrap_or(false),
            sandbox_mode: text(PREF_SANDBOX_MODE),
            pending_auth_url: text(PREF_PENDING_AUTH_URL),
        }
    }
}

/// A single typed preference update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preference {
    /// Toggle elevated trust.
    ElevatedTrust(bool),
    /// Set the sandbox mode.
    SandboxMode(String),
    /// Record a detected authorization URL.
    PendingAuthUrl(String),
}

impl Preference {
    /// Map key and JSON value for this preference.
    #[must_use]
    pub fn into_entry(self) -> (&'static str, Value) {
        match self {
            Self::ElevatedTrust(on) => (PREF_ELEVATED_TRUST, Value::Bool(on)),
            Self::SandboxMode(mode) => (PREF_SANDBOX_MODE, Value::String(mode)),
            Self::PendingAuthUrl(url) => (PREF_PENDING_AUTH_URL, Value::String(url)),
        }
    }
}
