//! Job, background job, and session document models.

use std::collections::BTreeMap;
use std::path::PathBuf;

use agent_courier::models::background::BackgroundJob;
use agent_courier::models::job::{Job, JobKind, JobPayload};
use agent_courier::models::state::{
    ChatMessage, Preference, Role, SessionPrefs, SessionRecord, StateDocument,
    PREF_ELEVATED_TRUST, PREF_SANDBOX_MODE, STATE_VERSION,
};
use chrono::Utc;
use serde_json::{json, Value};

fn background(exit_code: Option<i32>, ended: bool) -> BackgroundJob {
    BackgroundJob {
        job_id: 3,
        session_id: "C1".into(),
        label: "build".into(),
        command: vec!["/bin/sh".into(), "-lc".into(), "make".into()],
        cwd: PathBuf::from("/tmp"),
        log_path: PathBuf::from("/tmp/3.log"),
        created_at: Utc::now(),
        started_at: Some(Utc::now()),
        ended_at: ended.then(Utc::now),
        pid: Some(42),
        exit_code,
        display: None,
    }
}

#[test]
fn text_preview_is_trimmed_and_flattened() {
    let job = Job::new(1, JobPayload::Text("  line one\nline two  ".into()));
    assert_eq!(job.kind(), JobKind::Text);
    assert_eq!(job.preview(), "line one line two");
}

#[test]
fn long_preview_is_cut_with_ellipsis() {
    let job = Job::new(1, JobPayload::Text("x".repeat(100)));
    let preview = job.preview();
    assert_eq!(preview.chars().count(), 61);
    assert!(preview.ends_with('…'));
}

#[test]
fn audio_preview_prefers_caption() {
    let captioned = Job::new(
        2,
        JobPayload::Audio {
            file_ref: "https://files/1.ogg".into(),
            caption: Some("standup notes".into()),
        },
    );
    let bare = Job::new(
        3,
        JobPayload::Audio {
            file_ref: "https://files/2.ogg".into(),
            caption: None,
        },
    );
    assert_eq!(captioned.kind().as_str(), "audio");
    assert_eq!(captioned.preview(), "standup notes");
    assert_eq!(bare.preview(), "audio");
}

#[test]
fn background_job_labels() {
    let running = background(None, false);
    assert!(running.is_running());
    assert_eq!(running.status_label(), "running");
    assert_eq!(running.command_line(), "/bin/sh -lc make");

    let done = background(Some(0), true);
    assert_eq!(done.status_label(), "done exit=0");

    let killed = background(None, true);
    assert_eq!(killed.status_label(), "done exit=signal");
}

#[test]
fn recent_keeps_two_messages_per_turn() {
    let mut record = SessionRecord::default();
    for i in 0..7 {
        record.messages.push(ChatMessage {
            role: if i % 2 == 0 { Role::User } else { Role::Assistant },
            text: format!("m{i}"),
            ts_ms: i,
        });
    }
    let recent: Vec<&str> = record.recent(2).iter().map(|m| m.text.as_str()).collect();
    assert_eq!(recent, vec!["m3", "m4", "m5", "m6"]);
    assert_eq!(record.recent(10).len(), 7);
    assert!(record.recent(0).is_empty());
}

#[test]
fn prefs_ignore_wrong_types() {
    let mut map = BTreeMap::new();
    map.insert(PREF_ELEVATED_TRUST.to_owned(), json!("yes"));
    map.insert(PREF_SANDBOX_MODE.to_owned(), json!(7));
    map.insert("unrelated".to_owned(), json!({"a": 1}));

    assert_eq!(SessionPrefs::from_map(&map), SessionPrefs::default());
}

#[test]
fn preference_entries_round_into_prefs() {
    let mut map = BTreeMap::new();
    for pref in [
        Preference::ElevatedTrust(true),
        Preference::SandboxMode("read-only".into()),
        Preference::PendingAuthUrl("https://accounts.google.com/o/oauth2/x".into()),
    ] {
        let (key, value) = pref.into_entry();
        map.insert(key.to_owned(), value);
    }
    let prefs = SessionPrefs::from_map(&map);

    assert!(prefs.elevated_trust);
    assert_eq!(prefs.sandbox_mode.as_deref(), Some("read-only"));
    assert_eq!(
        prefs.pending_auth_url.as_deref(),
        Some("https://accounts.google.com/o/oauth2/x")
    );
}

#[test]
fn document_tolerates_missing_fields_and_keeps_unknown_prefs() {
    let doc: StateDocument = serde_json::from_str(
        r#"{"chats":{"42":{"messages":[{"role":"user","text":"hi","ts_ms":1}],"prefs":{"theme":"dark"}}}}"#,
    )
    .expect("parse");

    assert_eq!(doc.version, STATE_VERSION);
    assert_eq!(doc.claimed_user_id, None);
    let record = doc.session("42").expect("session");
    assert_eq!(record.messages[0].role, Role::User);
    assert_eq!(record.prefs.get("theme"), Some(&Value::String("dark".into())));
}

#[test]
fn session_mut_creates_once() {
    let mut doc = StateDocument::default();
    doc.session_mut("a", 10).messages.push(ChatMessage {
        role: Role::User,
        text: "x".into(),
        ts_ms: 10,
    });
    let record = doc.session_mut("a", 99);
    assert_eq!(record.created_at_ms, 10);
    assert_eq!(record.messages.len(), 1);
}
