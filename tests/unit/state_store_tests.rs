//! Durable session document store.

use agent_courier::models::state::{Preference, Role, StateDocument};
use agent_courier::persistence::state_store::append_message;
use agent_courier::persistence::{SessionStateStore, SharedStateStore};

#[test]
fn missing_file_loads_fresh_document() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = SessionStateStore::new(temp.path().join("state.json"));

    assert_eq!(store.load().expect("load"), StateDocument::default());
    assert!(!store.path().exists(), "load must not create the file");
}

#[test]
fn saved_document_survives_a_new_store() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("state.json");
    let mut doc = StateDocument::default();
    append_message(&mut doc, "7", Role::User, "hello", 1);
    append_message(&mut doc, "7", Role::Assistant, "hi there", 2);
    doc.claimed_user_id = Some("U1".into());

    SessionStateStore::new(&path).save(&doc).expect("save");
    let reloaded = SessionStateStore::new(&path).load().expect("load");

    assert_eq!(reloaded, doc);
}

#[test]
fn rewriting_unmodified_document_is_byte_identical() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = SessionStateStore::new(temp.path().join("state.json"));
    store
        .modify(|doc| {
            append_message(doc, "b", Role::User, "two", 2);
            append_message(doc, "a", Role::User, "one", 1);
        })
        .expect("modify");
    let first = std::fs::read(store.path()).expect("read");

    store.modify(|_| ()).expect("noop modify");

    assert_eq!(std::fs::read(store.path()).expect("read"), first);
}

#[test]
fn corrupt_document_is_quarantined() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("state.json");
    std::fs::write(&path, "{not json").expect("write");
    let store = SessionStateStore::new(&path);

    assert_eq!(store.load().expect("load"), StateDocument::default());

    let quarantined: Vec<_> = std::fs::read_dir(temp.path())
        .expect("read_dir")
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("state.json.corrupt."))
        .collect();
    assert_eq!(quarantined.len(), 1, "expected one quarantined file");
    assert!(!path.exists());
}

fn load_raw(raw: &str) -> (StateDocument, bool) {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("state.json");
    std::fs::write(&path, raw).expect("write");
    let doc = SessionStateStore::new(&path).load().expect("load");
    (doc, !path.exists())
}

#[test]
fn numeric_claimed_user_id_keeps_history() {
    let (doc, moved) = load_raw(
        r#"{"version":1,"claimed_user_id":12345,
            "chats":{"7":{"messages":[{"role":"user","text":"hi","ts_ms":1}]}}}"#,
    );

    assert!(!moved, "a readable document must not be moved aside");
    assert_eq!(doc.claimed_user_id.as_deref(), Some("12345"));
    let record = doc.session("7").expect("session kept");
    assert_eq!(record.messages.len(), 1);
    assert_eq!(record.messages[0].text, "hi");
}

#[test]
fn null_prefs_and_messages_read_as_empty() {
    let (doc, moved) = load_raw(
        r#"{"version":1,"claimed_user_id":null,"chats":{
            "7":{"prefs":null,"messages":[{"role":"assistant","text":"ok","ts_ms":2}]},
            "8":{"prefs":{"agent_yolo":true},"messages":null}}}"#,
    );

    assert!(!moved);
    assert_eq!(doc.claimed_user_id, None);
    let seven = doc.session("7").expect("7");
    assert!(seven.prefs.is_empty());
    assert_eq!(seven.messages.len(), 1);
    let eight = doc.session("8").expect("8");
    assert!(eight.messages.is_empty());
    assert!(eight.session_prefs().elevated_trust);
}

#[test]
fn unknown_roles_are_skipped_not_fatal() {
    let (doc, moved) = load_raw(
        r#"{"version":1,"chats":{"7":{"prefs":null,"messages":[
            {"role":"system","text":"boot","ts_ms":1},
            {"role":"user","text":"hello","ts_ms":2},
            {"role":"assistant","text":"hi","ts_ms":3}]}}}"#,
    );

    assert!(!moved);
    let texts: Vec<_> = doc
        .session("7")
        .expect("7")
        .messages
        .iter()
        .map(|m| (m.role, m.text.as_str()))
        .collect();
    assert_eq!(
        texts,
        vec![(Role::User, "hello"), (Role::Assistant, "hi")]
    );
}

#[test]
fn saved_file_is_pretty_json_with_trailing_newline() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = SessionStateStore::new(temp.path().join("state.json"));
    store.save(&StateDocument::default()).expect("save");

    let raw = std::fs::read_to_string(store.path()).expect("read");
    assert!(raw.ends_with('\n'));
    assert!(raw.contains("\n  \"version\": 1"));
}

#[tokio::test]
async fn claim_succeeds_once() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = SharedStateStore::new(SessionStateStore::new(temp.path().join("state.json")));

    assert!(store.claim("U1").await.expect("claim"));
    assert!(!store.claim("U2").await.expect("claim"));
    assert_eq!(store.claimed_user_id().await.expect("read"), Some("U1".into()));
}

#[tokio::test]
async fn append_and_recent_messages() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = SharedStateStore::new(SessionStateStore::new(temp.path().join("state.json")));

    for i in 0..6 {
        let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
        store.append("7", role, &format!("m{i}")).await.expect("append");
    }
    let recent = store.recent_messages("7", 2).await.expect("recent");
    let texts: Vec<&str> = recent.iter().map(|m| m.text.as_str()).collect();

    assert_eq!(texts, vec!["m2", "m3", "m4", "m5"]);
    assert!(store.recent_messages("other", 2).await.expect("recent").is_empty());
}

#[tokio::test]
async fn prefs_are_per_session() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = SharedStateStore::new(SessionStateStore::new(temp.path().join("state.json")));

    store
        .set_pref("7", Preference::ElevatedTrust(true))
        .await
        .expect("set");
    store
        .set_pref("7", Preference::SandboxMode("read-only".into()))
        .await
        .expect("set");

    let seven = store.prefs("7").await.expect("prefs");
    let eight = store.prefs("8").await.expect("prefs");
    assert!(seven.elevated_trust);
    assert_eq!(seven.sandbox_mode.as_deref(), Some("read-only"));
    assert!(!eight.elevated_trust);
    assert_eq!(eight.sandbox_mode, None);
}

#[tokio::test]
async fn reset_clears_history_and_prefs_of_one_session() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = SharedStateStore::new(SessionStateStore::new(temp.path().join("state.json")));
    store.append("7", Role::User, "keep?").await.expect("append");
    store.append("8", Role::User, "keep").await.expect("append");
    store
        .set_pref("7", Preference::ElevatedTrust(true))
        .await
        .expect("set");

    store.reset_session("7").await.expect("reset");

    assert!(store.recent_messages("7", 10).await.expect("recent").is_empty());
    assert!(!store.prefs("7").await.expect("prefs").elevated_trust);
    assert_eq!(store.recent_messages("8", 10).await.expect("recent").len(), 1);
}

#[tokio::test]
async fn concurrent_appends_are_all_kept() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = SharedStateStore::new(SessionStateStore::new(temp.path().join("state.json")));

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                let session = if i % 2 == 0 { "a" } else { "b" };
                store
                    .append(session, Role::User, &format!("m{i}"))
                    .await
                    .expect("append");
            })
        })
        .collect();
    for task in tasks {
        task.await.expect("join");
    }

    let reloaded = SessionStateStore::new(temp.path().join("state.json"))
        .load()
        .expect("load");
    let total: usize = reloaded.chats.values().map(|r| r.messages.len()).sum();
    assert_eq!(total, 20);
}
