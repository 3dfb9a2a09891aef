//! Per-session FIFO job queues.
//!
//! Every session owns a pending list, at most one current job, and at
//! most one worker task. [`SessionJobQueue::enqueue`] starts the worker
//! lazily; the worker drains the list one job at a time and removes
//! itself once the list is empty. Sessions run independently of each
//! other.
//!
//! Cancellation fires the worker's token. The runner observes the same
//! token, finishes its own cleanup (liveness display removal, child
//! process kill) and returns; the worker then reports the job as
//! canceled and exits, so `cancel_and_clear` returns only after that
//! cleanup is done.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

use crate::models::job::{Enqueued, Job, JobOutcome, JobPayload};
use crate::transport::BoxFuture;
use crate::Result;

/// Lifecycle notifications emitted by the worker for each job.
#[derive(Debug)]
pub enum JobEvent {
    /// Job became current and is about to run.
    Started,
    /// Job reached a terminal state.
    Finished(JobOutcome),
}

/// Executes and reports session jobs on behalf of the worker loop.
pub trait JobRunner: Send + Sync + 'static {
    /// Run the full pipeline for one job.
    ///
    /// Must return promptly once `cancel` fires; whatever it returns
    /// after that point is reported as a cancellation.
    ///
    /// # Errors
    ///
    /// Any error ends the job as errored; the worker continues with the
    /// next pending job.
    fn run<'a>(
        &'a self,
        session_id: &'a str,
        job: &'a Job,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<()>>;

    /// Surface a lifecycle event to the session. Must not fail.
    fn report<'a>(&'a self, session_id: &'a str, job: &'a Job, event: JobEvent)
        -> BoxFuture<'a, ()>;
}

struct WorkerHandle {
    generation: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct SessionQueue {
    next_id: u64,
    generation: u64,
    pending: VecDeque<Job>,
    current: Option<Job>,
    worker: Option<WorkerHandle>,
}

impl SessionQueue {
    fn worker_alive(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.task.is_finished())
    }
}

type SessionSlot = Arc<Mutex<SessionQueue>>;

fn lock(slot: &SessionSlot) -> MutexGuard<'_, SessionQueue> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

struct QueueInner {
    runner: Arc<dyn JobRunner>,
    sessions: Mutex<HashMap<String, SessionSlot>>,
}

impl QueueInner {
    fn slot(&self, session_id: &str) -> SessionSlot {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            sessions
                .entry(session_id.to_owned())
                .or_insert_with(|| Arc::new(Mutex::new(SessionQueue::default()))),
        )
    }

    fn existing(&self, session_id: &str) -> Option<SessionSlot> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
    }
}

/// Registry of per-session queues and their workers.
#[derive(Clone)]
pub struct SessionJobQueue {
    inner: Arc<QueueInner>,
}

impl SessionJobQueue {
    /// Create an empty registry that runs jobs through `runner`.
    #[must_use]
    pub fn new(runner: Arc<dyn JobRunner>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                runner,
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Append a job and start the session worker if it is idle.
    ///
    /// `position` counts the in-flight job and everything pending ahead
    /// of the new job, so the first job of an idle session is position 1
    /// and the next one enqueued behind it is position 2.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn enqueue(&self, session_id: &str, payload: JobPayload) -> Enqueued {
        let slot = self.inner.slot(session_id);
        let mut queue = lock(&slot);

        queue.next_id += 1;
        let job = Job::new(queue.next_id, payload);
        let job_id = job.job_id;
        queue.pending.push_back(job);
        let position = queue.pending.len() + usize::from(queue.current.is_some());

        let started_worker = if queue.worker_alive() {
            false
        } else {
            queue.generation += 1;
            let generation = queue.generation;
            let cancel = CancellationToken::new();
            let span = info_span!("session_worker", session_id, generation);
            let task = tokio::spawn(
                worker_loop(
                    Arc::clone(&self.inner.runner),
                    Arc::clone(&slot),
                    session_id.to_owned(),
                    generation,
                    cancel.clone(),
                )
                .instrument(span),
            );
            queue.worker = Some(WorkerHandle {
                generation,
                cancel,
                task,
            });
            true
        };

        debug!(session_id, job_id, position, started_worker, "job enqueued");
        Enqueued {
            job_id,
            position,
            started_worker,
        }
    }

    /// Current job and a copy of the pending list.
    #[must_use]
    pub fn snapshot(&self, session_id: &str) -> (Option<Job>, Vec<Job>) {
        let Some(slot) = self.inner.existing(session_id) else {
            return (None, Vec::new());
        };
        let queue = lock(&slot);
        (queue.current.clone(), queue.pending.iter().cloned().collect())
    }

    /// Remove queued jobs without touching the in-flight one.
    #[must_use]
    pub fn drop_pending(&self, session_id: &str) -> usize {
        let Some(slot) = self.inner.existing(session_id) else {
            return 0;
        };
        let mut queue = lock(&slot);
        let dropped = queue.pending.len();
        queue.pending.clear();
        info!(session_id, dropped, "pending jobs dropped");
        dropped
    }

    /// Clear the pending list and cancel the worker, waiting until it has
    /// exited.
    pub async fn cancel_and_clear(&self, session_id: &str) {
        let Some(slot) = self.inner.existing(session_id) else {
            return;
        };

        let worker = {
            let mut queue = lock(&slot);
            queue.pending.clear();
            let worker = queue.worker.take();
            if let Some(worker) = worker.as_ref() {
                worker.cancel.cancel();
            }
            worker
        };

        if let Some(worker) = worker {
            if let Err(err) = worker.task.await {
                error!(session_id, %err, "session worker panicked");
            }
        }

        // A worker that panicked never cleared its job.
        let mut queue = lock(&slot);
        if !queue.worker_alive() {
            queue.current = None;
        }
        info!(session_id, "session canceled and cleared");
    }

    /// Cancel every session worker; used on shutdown.
    pub async fn cancel_all(&self) {
        let ids: Vec<String> = self
            .inner
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        for session_id in ids {
            self.cancel_and_clear(&session_id).await;
        }
    }
}

async fn worker_loop(
    runner: Arc<dyn JobRunner>,
    slot: SessionSlot,
    session_id: String,
    generation: u64,
    cancel: CancellationToken,
) {
    debug!("session worker started");
    loop {
        let job = {
            let mut queue = lock(&slot);
            if cancel.is_cancelled() {
                return;
            }
            match queue.pending.pop_front() {
                Some(job) => {
                    queue.current = Some(job.clone());
                    job
                }
                None => {
                    queue.current = None;
                    if queue.worker.as_ref().is_some_and(|w| w.generation == generation) {
                        queue.worker = None;
                    }
                    debug!("session worker idle, exiting");
                    return;
                }
            }
        };

        let job_id = job.job_id;
        tokio::select! {
            biased;
            () = cancel.cancelled() => {}
            () = runner.report(&session_id, &job, JobEvent::Started) => {}
        }

        let outcome = if cancel.is_cancelled() {
            JobOutcome::Canceled
        } else {
            let result = runner.run(&session_id, &job, &cancel).await;
            if cancel.is_cancelled() {
                JobOutcome::Canceled
            } else {
                match result {
                    Ok(()) => JobOutcome::Completed,
                    Err(err) => JobOutcome::Errored(err),
                }
            }
        };

        {
            let mut queue = lock(&slot);
            if queue.current.as_ref().is_some_and(|c| c.job_id == job_id) {
                queue.current = None;
            }
        }

        match &outcome {
            JobOutcome::Errored(err) => error!(job_id, %err, "job failed"),
            other => info!(job_id, outcome = other.as_str(), "job finished"),
        }

        let canceled = matches!(outcome, JobOutcome::Canceled);
        runner
            .report(&session_id, &job, JobEvent::Finished(outcome))
            .await;
        if canceled {
            return;
        }
    }
}
