//! Job buttons and reply helpers.

use std::path::PathBuf;

use agent_courier::commands::{
    cancel_confirm_actions, job_actions, CommandReply, ACTION_CANCEL, ACTION_CANCEL_ABORT,
    ACTION_CANCEL_CONFIRM, ACTION_JOBS, ACTION_TAIL,
};
use agent_courier::models::background::BackgroundJob;
use chrono::Utc;

fn running(job_id: u64) -> BackgroundJob {
    BackgroundJob {
        job_id,
        session_id: "C1".into(),
        label: format!("job {job_id}"),
        command: vec!["sleep".into(), "60".into()],
        cwd: PathBuf::from("/tmp"),
        log_path: PathBuf::from(format!("/tmp/{job_id}.log")),
        created_at: Utc::now(),
        started_at: Some(Utc::now()),
        ended_at: None,
        pid: Some(1),
        exit_code: None,
        display: None,
    }
}

#[test]
fn no_active_jobs_means_no_buttons() {
    assert!(job_actions(&[]).is_empty());
}

#[test]
fn buttons_cover_at_most_two_jobs() {
    let actions = job_actions(&[running(4), running(5), running(6)]);
    let ids: Vec<(&str, &str)> = actions
        .iter()
        .map(|a| (a.action_id.as_str(), a.value.as_str()))
        .collect();

    assert_eq!(
        ids,
        vec![
            (ACTION_JOBS, ""),
            (ACTION_TAIL, "4"),
            (ACTION_CANCEL, "4"),
            (ACTION_TAIL, "5"),
            (ACTION_CANCEL, "5"),
        ]
    );
    assert_eq!(actions[1].label, "Tail #4");
    assert_eq!(actions[2].label, "Cancel #4");
}

#[test]
fn confirm_step_carries_job_id() {
    let actions = cancel_confirm_actions(9);
    assert_eq!(actions.len(), 2);
    assert_eq!(actions[0].action_id, ACTION_CANCEL_CONFIRM);
    assert_eq!(actions[1].action_id, ACTION_CANCEL_ABORT);
    assert!(actions.iter().all(|a| a.value == "9"));
}

#[test]
fn plain_reply_has_no_actions() {
    let reply = CommandReply::text("ok");
    assert_eq!(reply.text, "ok");
    assert!(reply.actions.is_empty());
}
