//! Session cancellation.

use std::sync::atomic::Ordering;
use std::time::Duration;

use agent_courier::models::job::JobPayload;
use agent_courier::models::state::Role;
use agent_courier::orchestrator::SessionJobQueue;

use super::test_helpers::{wait_until, Harness, Outbound, RecordingRunner, Step};

fn text(value: &str) -> JobPayload {
    JobPayload::Text(value.to_owned())
}

#[tokio::test]
async fn cancel_interrupts_in_flight_job_and_clears_pending() {
    let runner = RecordingRunner::new();
    let queue = SessionJobQueue::new(runner.clone());

    let _ = queue.enqueue("7", text("hang"));
    let _ = queue.enqueue("7", text("x"));
    wait_until("first job running", || runner.saw("run:7:1")).await;

    queue.cancel_and_clear("7").await;

    assert!(runner.saw("finish:7:1:canceled"));
    assert_eq!(*runner.interrupted.lock().unwrap(), vec![1]);
    let (current, pending) = queue.snapshot("7");
    assert!(current.is_none());
    assert!(pending.is_empty());
    assert!(!runner.saw("run:7:2"));
}

#[tokio::test]
async fn queue_is_usable_after_cancel() {
    let runner = RecordingRunner::new();
    let queue = SessionJobQueue::new(runner.clone());

    let _ = queue.enqueue("7", text("hang"));
    wait_until("job running", || runner.saw("run:7:1")).await;
    queue.cancel_and_clear("7").await;

    let next = queue.enqueue("7", text("x"));
    assert_eq!((next.job_id, next.position, next.started_worker), (2, 1, true));
    wait_until("new job finished", || runner.saw("finish:7:2:completed")).await;
}

#[tokio::test]
async fn cancel_of_idle_or_unknown_session_is_a_no_op() {
    let runner = RecordingRunner::new();
    let queue = SessionJobQueue::new(runner.clone());

    queue.cancel_and_clear("nobody").await;

    let _ = queue.enqueue("7", text("x"));
    wait_until("job finished", || runner.saw("finish:7:1:completed")).await;
    queue.cancel_and_clear("7").await;
    assert!(!runner.events().iter().any(|e| e.ends_with(":canceled")));
}

#[tokio::test]
async fn cancel_is_scoped_to_one_session() {
    let runner = RecordingRunner::new();
    let queue = SessionJobQueue::new(runner.clone());

    let _ = queue.enqueue("7", text("hang"));
    let _ = queue.enqueue("8", text("wait"));
    wait_until("both running", || runner.saw("run:7:1") && runner.saw("run:8:1")).await;

    queue.cancel_and_clear("7").await;

    assert_eq!(queue.snapshot("8").0.map(|job| job.job_id), Some(1));
    runner.gate.notify_one();
    wait_until("session 8 finished", || runner.saw("finish:8:1:completed")).await;
}

#[tokio::test]
async fn cancel_all_stops_every_session() {
    let runner = RecordingRunner::new();
    let queue = SessionJobQueue::new(runner.clone());

    let _ = queue.enqueue("7", text("hang"));
    let _ = queue.enqueue("8", text("hang"));
    wait_until("both running", || runner.saw("run:7:1") && runner.saw("run:8:1")).await;

    queue.cancel_all().await;

    assert!(runner.saw("finish:7:1:canceled"));
    assert!(runner.saw("finish:8:1:canceled"));
}

#[tokio::test]
async fn canceled_agent_call_is_dropped_and_reported() {
    let harness = Harness::new(vec![Step::Hang]);

    let _ = harness.router.accept_text("7", "U1", "long task").await;
    wait_until("agent called", || harness.agent.calls().len() == 1).await;

    let reply = harness.router.dispatch("7", "U1", "cancel", "").await;

    assert_eq!(reply.text, "Canceled current job and cleared queue.");
    assert!(harness.agent.dropped.load(Ordering::SeqCst));
    assert!(harness.transport.saw("7", "Canceled."));
    let history = harness.store.recent_messages("7", 10).await.expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].role, Role::User);
}

#[tokio::test(start_paused = true)]
async fn cancel_returns_after_liveness_display_is_removed() {
    let harness = Harness::new(vec![Step::Hang]);

    let _ = harness.router.accept_text("7", "U1", "long task").await;
    wait_until("agent called", || harness.agent.calls().len() == 1).await;
    // Past one heartbeat so the status line is on screen.
    tokio::time::sleep(harness.config.heartbeat_interval() + Duration::from_secs(1)).await;
    let ping = harness.transport.sent_id("working…").expect("status line posted");

    harness.queue.cancel_and_clear("7").await;

    let log = harness.transport.outbound();
    let deleted_at = log
        .iter()
        .position(|entry| matches!(entry, Outbound::Delete { id, .. } if *id == ping))
        .expect("status line deleted before cancel returned");
    let canceled_at = log
        .iter()
        .position(|entry| matches!(entry, Outbound::Send { text, .. } if text == "Canceled."))
        .expect("cancel notice sent");
    assert!(deleted_at < canceled_at, "display removed before the cancel notice");
}
