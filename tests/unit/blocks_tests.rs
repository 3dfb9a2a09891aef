//! Slack Block Kit builders.

use agent_courier::commands::{job_actions, ACTION_CANCEL, ACTION_TAIL};
use agent_courier::models::background::BackgroundJob;
use agent_courier::slack::blocks;
use agent_courier::transport::JobAction;
use chrono::Utc;
use serde_json::Value;
use slack_morphism::prelude::SlackBlock;

fn running(job_id: u64) -> BackgroundJob {
    BackgroundJob {
        job_id,
        session_id: "C1".into(),
        label: "job".into(),
        command: vec!["true".into()],
        cwd: std::path::PathBuf::from("/tmp"),
        log_path: std::path::PathBuf::from("/tmp/x.log"),
        created_at: Utc::now(),
        started_at: None,
        ended_at: None,
        pid: None,
        exit_code: None,
        display: None,
    }
}

fn action_ids(block: &SlackBlock) -> Vec<String> {
    let json = serde_json::to_value(block).expect("serialise block");
    json["elements"]
        .as_array()
        .map(|elements| {
            elements
                .iter()
                .filter_map(|e| e["action_id"].as_str().map(str::to_owned))
                .collect()
        })
        .unwrap_or_default()
}

#[test]
fn text_section_is_markdown() {
    let json = serde_json::to_value(blocks::text_section("*hi*")).expect("serialise");
    assert_eq!(json["type"], Value::from("section"));
    assert_eq!(json["text"]["type"], Value::from("mrkdwn"));
    assert_eq!(json["text"]["text"], Value::from("*hi*"));
}

#[test]
fn buttons_carry_action_id_and_value() {
    let action = JobAction::new(ACTION_TAIL, "Tail #3", "3");
    let json = serde_json::to_value(blocks::action_buttons("row", &[&action])).expect("serialise");

    assert_eq!(json["type"], Value::from("actions"));
    assert_eq!(json["block_id"], Value::from("row"));
    assert_eq!(json["elements"][0]["action_id"], Value::from(ACTION_TAIL));
    assert_eq!(json["elements"][0]["value"], Value::from("3"));
    assert_eq!(json["elements"][0]["text"]["text"], Value::from("Tail #3"));
}

#[test]
fn repeated_action_ids_split_into_rows() {
    let actions = job_actions(&[running(1), running(2)]);
    let rows = blocks::job_action_blocks(&actions);

    assert_eq!(rows.len(), 2);
    for row in &rows {
        let ids = action_ids(row);
        let mut deduped = ids.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(ids.len(), deduped.len(), "duplicate action ids in {ids:?}");
    }
    assert_eq!(action_ids(&rows[1]), vec![ACTION_TAIL, ACTION_CANCEL]);
}

#[test]
fn message_blocks_lead_with_text() {
    let actions = job_actions(&[running(1)]);
    let all = blocks::message_with_actions("done", &actions);

    assert_eq!(all.len(), 2);
    assert!(matches!(all[0], SlackBlock::Section(_)));
    assert!(matches!(all[1], SlackBlock::Actions(_)));
}
