//! Per-session FIFO execution and positions.

use std::sync::Arc;
use std::time::Duration;

use agent_courier::models::job::JobPayload;
use agent_courier::orchestrator::SessionJobQueue;

use super::test_helpers::{wait_until, RecordingRunner};

fn text(value: &str) -> JobPayload {
    JobPayload::Text(value.to_owned())
}

fn session_events(runner: &RecordingRunner, session: &str) -> Vec<String> {
    runner
        .events()
        .into_iter()
        .filter(|e| e.split(':').nth(1) == Some(session))
        .collect()
}

#[tokio::test]
async fn jobs_run_in_enqueue_order() {
    let runner = RecordingRunner::new();
    let queue = SessionJobQueue::new(runner.clone());

    for value in ["a", "b", "c"] {
        let _ = queue.enqueue("7", text(value));
    }
    wait_until("third job finished", || runner.saw("finish:7:3:completed")).await;

    assert_eq!(
        session_events(&runner, "7"),
        vec![
            "start:7:1",
            "run:7:1",
            "finish:7:1:completed",
            "start:7:2",
            "run:7:2",
            "finish:7:2:completed",
            "start:7:3",
            "run:7:3",
            "finish:7:3:completed",
        ]
    );
}

#[tokio::test]
async fn positions_count_the_in_flight_job() {
    let runner = RecordingRunner::new();
    let queue = SessionJobQueue::new(runner.clone());

    let first = queue.enqueue("7", text("wait"));
    assert_eq!((first.job_id, first.position, first.started_worker), (1, 1, true));
    wait_until("first job running", || runner.saw("run:7:1")).await;

    let second = queue.enqueue("7", text("x"));
    let third = queue.enqueue("7", text("y"));
    assert_eq!((second.job_id, second.position, second.started_worker), (2, 2, false));
    assert_eq!((third.job_id, third.position, third.started_worker), (3, 3, false));

    let (current, pending) = queue.snapshot("7");
    assert_eq!(current.map(|job| job.job_id), Some(1));
    assert_eq!(pending.iter().map(|job| job.job_id).collect::<Vec<_>>(), vec![2, 3]);

    runner.gate.notify_one();
    wait_until("queue drained", || runner.saw("finish:7:3:completed")).await;
}

#[tokio::test]
async fn sessions_do_not_block_each_other() {
    let runner = RecordingRunner::new();
    let queue = SessionJobQueue::new(runner.clone());

    let _ = queue.enqueue("7", text("wait"));
    wait_until("session 7 running", || runner.saw("run:7:1")).await;

    let other = queue.enqueue("8", text("quick"));
    assert_eq!((other.job_id, other.position, other.started_worker), (1, 1, true));
    wait_until("session 8 finished", || runner.saw("finish:8:1:completed")).await;

    assert!(!runner.saw("finish:7:1:completed"), "session 7 still blocked");
    assert_eq!(queue.snapshot("7").0.map(|job| job.job_id), Some(1));

    runner.gate.notify_one();
    wait_until("session 7 finished", || runner.saw("finish:7:1:completed")).await;
}

#[tokio::test]
async fn failed_job_does_not_stop_the_worker() {
    let runner = RecordingRunner::new();
    let queue = SessionJobQueue::new(runner.clone());

    let _ = queue.enqueue("7", text("fail"));
    let _ = queue.enqueue("7", text("ok"));
    wait_until("second job finished", || runner.saw("finish:7:2:completed")).await;

    assert!(runner.saw("finish:7:1:errored"));
}

#[tokio::test]
async fn idle_worker_exits_and_restarts_on_demand() {
    let runner = RecordingRunner::new();
    let queue = SessionJobQueue::new(runner.clone());

    let first = queue.enqueue("7", text("a"));
    assert!(first.started_worker);
    wait_until("first job finished", || runner.saw("finish:7:1:completed")).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = queue.enqueue("7", text("b"));
    assert!(second.started_worker, "worker should have exited while idle");
    assert_eq!(second.position, 1);
    wait_until("second job finished", || runner.saw("finish:7:2:completed")).await;
}

#[tokio::test]
async fn drop_pending_keeps_current_and_ids_are_never_reused() {
    let runner = RecordingRunner::new();
    let queue = SessionJobQueue::new(runner.clone());

    let _ = queue.enqueue("7", text("wait"));
    wait_until("first job running", || runner.saw("run:7:1")).await;
    let _ = queue.enqueue("7", text("x"));
    let _ = queue.enqueue("7", text("y"));

    assert_eq!(queue.drop_pending("7"), 2);
    assert_eq!(queue.snapshot("7").0.map(|job| job.job_id), Some(1));

    let next = queue.enqueue("7", text("z"));
    assert_eq!(next.job_id, 4);
    assert_eq!(next.position, 2);

    runner.gate.notify_one();
    wait_until("job 4 finished", || runner.saw("finish:7:4:completed")).await;
    assert!(runner.saw("finish:7:1:completed"));
    assert!(!runner.saw("run:7:2"));
    assert!(!runner.saw("run:7:3"));
}

#[tokio::test]
async fn drop_pending_on_unknown_session_is_zero() {
    let runner = RecordingRunner::new();
    let queue = SessionJobQueue::new(Arc::clone(&runner) as _);

    assert_eq!(queue.drop_pending("nobody"), 0);
    let (current, pending) = queue.snapshot("nobody");
    assert!(current.is_none());
    assert!(pending.is_empty());
}
