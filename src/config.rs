//! Global configuration parsing, validation, and credential loading.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::{AppError, Result};

/// Keychain service name used for Slack credentials.
const KEYRING_SERVICE: &str = "agent-courier";

/// Shortest liveness interval accepted, in seconds.
const MIN_HEARTBEAT_SECONDS: u64 = 5;

/// Nested Slack configuration for Socket Mode connectivity.
///
/// Tokens are loaded at runtime via OS keychain or environment variables,
/// never from the TOML config file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SlackConfig {
    /// Channel used for server-level notices (startup, shutdown).
    #[serde(default)]
    pub channel_id: Option<String>,
    /// App-level token used for Socket Mode (populated at runtime).
    #[serde(skip)]
    pub app_token: String,
    /// Bot user token used for posting messages (populated at runtime).
    #[serde(skip)]
    pub bot_token: String,
}

/// Which agent collaborator answers prompts.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// `codex exec --json` with authorization-URL detection.
    #[default]
    Codex,
    /// Arbitrary argv; prompt on stdin, reply on stdout.
    Shell,
}

/// Agent invocation settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Agent implementation.
    #[serde(default)]
    pub kind: AgentKind,
    /// Argv for the `shell` agent; for `codex`, replaces the `codex` executable.
    #[serde(default)]
    pub command: Vec<String>,
    /// Working directory for the agent and relative detach `cwd` values.
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,
    /// Agent call timeout; 0 means no timeout.
    #[serde(default)]
    pub timeout_seconds: u64,
    /// Default sandbox mode when the session has no preference.
    #[serde(default = "default_sandbox")]
    pub sandbox: String,
    /// Optional model override passed to codex.
    #[serde(default)]
    pub model: Option<String>,
    /// Extra codex arguments appended verbatim.
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Interpreter used for string commands (`<shell> -lc <cmd>`).
    #[serde(default = "default_shell")]
    pub shell: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            kind: AgentKind::default(),
            command: Vec::new(),
            workdir: default_workdir(),
            timeout_seconds: 0,
            sandbox: default_sandbox(),
            model: None,
            extra_args: Vec::new(),
            shell: default_shell(),
        }
    }
}

impl AgentConfig {
    /// Agent call timeout, `None` when unbounded.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_seconds > 0).then(|| Duration::from_secs(self.timeout_seconds))
    }

    /// Wrap a shell-interpreted command string into an argv.
    #[must_use]
    pub fn shell_argv(&self, command: &str) -> Vec<String> {
        vec![self.shell.clone(), "-lc".into(), command.to_owned()]
    }
}

/// Speech-to-text settings for audio jobs.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SttConfig {
    /// Whether audio jobs are transcribed at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Whisper model name.
    #[serde(default = "default_stt_model")]
    pub model: String,
    /// Optional language hint.
    #[serde(default)]
    pub language: Option<String>,
    /// Optional prompt hint.
    #[serde(default)]
    pub prompt: Option<String>,
    /// Transcriptions longer than this are truncated with a marker.
    #[serde(default = "default_stt_max_chars")]
    pub max_chars: usize,
    /// Per-step timeout.
    #[serde(default = "default_stt_timeout")]
    pub timeout_seconds: u64,
    /// Keep downloaded audio after transcription.
    #[serde(default)]
    pub keep_files: bool,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: default_stt_model(),
            language: None,
            prompt: None,
            max_chars: default_stt_max_chars(),
            timeout_seconds: default_stt_timeout(),
            keep_files: false,
        }
    }
}

/// Local markdown notes used as prompt context.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct NotesConfig {
    /// Whether notes context is added to prompts.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Notes directory; defaults to `<data_dir>/notes`.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Maximum snippets included.
    #[serde(default = "default_max_snippets")]
    pub max_snippets: usize,
    /// Maximum characters per snippet.
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
}

impl Default for NotesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            max_snippets: default_max_snippets(),
            snippet_chars: default_snippet_chars(),
        }
    }
}

/// Authorization-URL side flow settings.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct OAuthConfig {
    /// Whether detected URLs trigger the side flow.
    #[serde(default)]
    pub enabled: bool,
    /// Command run with the URL appended (e.g. `["xdg-open"]`).
    #[serde(default)]
    pub open_command: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_workdir() -> PathBuf {
    env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

fn default_sandbox() -> String {
    "workspace-write".into()
}

fn default_shell() -> String {
    "/bin/sh".into()
}

fn default_stt_model() -> String {
    "whisper-large-v3".into()
}

fn default_stt_max_chars() -> usize {
    6000
}

fn default_stt_timeout() -> u64 {
    180
}

fn default_max_snippets() -> usize {
    6
}

fn default_snippet_chars() -> usize {
    500
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_max_turns() -> usize {
    20
}

fn default_heartbeat_seconds() -> u64 {
    45
}

fn default_bg_heartbeat_seconds() -> u64 {
    180
}

fn default_bg_kill_grace_seconds() -> u64 {
    10
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Base directory for background job logs and downloaded audio.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Persisted session document; defaults to `<data_dir>/state.json`.
    #[serde(default)]
    pub state_path: Option<PathBuf>,
    /// Statically authorized user IDs.
    #[serde(default)]
    pub authorized_user_ids: Vec<String>,
    /// One-time claim code used when no static operators are configured.
    #[serde(default)]
    pub claim_code: Option<String>,
    /// Turns of history included in each prompt.
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    /// Liveness display interval while the agent works.
    #[serde(default = "default_heartbeat_seconds")]
    pub heartbeat_seconds: u64,
    /// Background job status display interval; 0 disables the display.
    #[serde(default = "default_bg_heartbeat_seconds")]
    pub bg_heartbeat_seconds: u64,
    /// Window between graceful and forced termination of a background job.
    #[serde(default = "default_bg_kill_grace_seconds")]
    pub bg_kill_grace_seconds: u64,
    /// HTTP port for the health endpoint; 0 disables it.
    #[serde(default)]
    pub http_port: u16,
    /// Agent invocation settings.
    #[serde(default)]
    pub agent: AgentConfig,
    /// Transcription settings.
    #[serde(default)]
    pub stt: SttConfig,
    /// Notes context settings.
    #[serde(default)]
    pub notes: NotesConfig,
    /// Authorization-URL flow settings.
    #[serde(default)]
    pub oauth: OAuthConfig,
    /// Slack connectivity settings.
    #[serde(default)]
    pub slack: SlackConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load Slack credentials from OS keychain with env-var fallback.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if neither keychain nor env vars provide
    /// the required tokens.
    pub async fn load_credentials(&mut self) -> Result<()> {
        self.slack.app_token = load_credential("slack_app_token", "SLACK_APP_TOKEN").await?;
        self.slack.bot_token = load_credential("slack_bot_token", "SLACK_BOT_TOKEN").await?;
        Ok(())
    }

    /// Path of the persisted session document.
    #[must_use]
    pub fn state_path(&self) -> PathBuf {
        self.state_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("state.json"))
    }

    /// Directory holding one log file per background job.
    #[must_use]
    pub fn bg_jobs_dir(&self) -> PathBuf {
        self.data_dir.join("bg-jobs")
    }

    /// Directory where downloaded audio is staged.
    #[must_use]
    pub fn inbox_dir(&self) -> PathBuf {
        self.data_dir.join("inbox")
    }

    /// Directory of markdown notes.
    #[must_use]
    pub fn notes_dir(&self) -> PathBuf {
        self.notes
            .dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("notes"))
    }

    /// Liveness display interval, never below the minimum.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_seconds.max(MIN_HEARTBEAT_SECONDS))
    }

    /// Background job display interval; `None` when disabled.
    #[must_use]
    pub fn bg_heartbeat_interval(&self) -> Option<Duration> {
        (self.bg_heartbeat_seconds > 0).then(|| Duration::from_secs(self.bg_heartbeat_seconds))
    }

    /// Graceful termination window for background jobs.
    #[must_use]
    pub fn bg_kill_grace(&self) -> Duration {
        Duration::from_secs(self.bg_kill_grace_seconds)
    }

    /// Whether a user appears in the static operator list.
    #[must_use]
    pub fn is_static_operator(&self, user_id: &str) -> bool {
        self.authorized_user_ids.iter().any(|id| id == user_id)
    }

    /// Validate that a user is statically authorized.
    ///
    /// Claimed identities live in the state document and are checked by
    /// the command router, not here.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Unauthorized` if the user is not in the allowed list.
    pub fn ensure_authorized(&self, user_id: &str) -> Result<()> {
        if self.is_static_operator(user_id) {
            Ok(())
        } else {
            Err(AppError::Unauthorized("user is not authorized".into()))
        }
    }

    fn validate(&mut self) -> Result<()> {
        if self.authorized_user_ids.is_empty() && self.claim_code.is_none() {
            return Err(AppError::Config(
                "set authorized_user_ids, or claim_code for /claim onboarding".into(),
            ));
        }

        if self.max_turns == 0 {
            return Err(AppError::Config("max_turns must be greater than zero".into()));
        }

        if self.agent.kind == AgentKind::Shell && self.agent.command.is_empty() {
            return Err(AppError::Config(
                "agent.kind = \"shell\" requires agent.command".into(),
            ));
        }

        if self.oauth.enabled && self.oauth.open_command.is_empty() {
            warn!("oauth.enabled is set without oauth.open_command; urls will only be logged");
        }

        let workdir = self
            .agent
            .workdir
            .canonicalize()
            .map_err(|err| AppError::Config(format!("agent.workdir invalid: {err}")))?;
        self.agent.workdir = workdir;

        Ok(())
    }
}

/// Load a single credential from OS keychain with env-var fallback.
async fn load_credential(keyring_key: &str, env_key: &str) -> Result<String> {
    let key = keyring_key.to_owned();

    // keyring is synchronous I/O.
    let keychain_result = tokio::task::spawn_blocking(move || {
        keyring::Entry::new(KEYRING_SERVICE, &key).and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.is_empty() => return Ok(value),
        Ok(_) => {
            warn!(key = keyring_key, "keychain entry is empty, trying env var");
        }
        Err(err) => {
            warn!(
                key = keyring_key,
                ?err,
                "keychain lookup failed, trying env var"
            );
        }
    }

    env::var(env_key).map_err(|_| {
        AppError::Config(format!(
            "credential {keyring_key} not found in keychain or {env_key} env var"
        ))
    })
}
