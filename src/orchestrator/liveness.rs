//! "Still working" display kept alive while an agent call runs.
//!
//! [`LivenessReporter::attach`] spawns a task that sleeps one interval,
//! then posts a status line and edits it in place on every following
//! tick. The task removes its display on exit. Callers stop it with
//! [`LivenessReporter::detach`], which waits for that removal; dropping
//! the reporter only signals the task.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

use crate::transport::{MessageRef, Transport};

/// Prefix of every liveness status line.
pub const PING_TEXT: &str = "working…";

/// Render the status line for the current local time.
#[must_use]
pub fn ping_text() -> String {
    format!("{PING_TEXT} (ping {})", Local::now().format("%H:%M:%S"))
}

/// Handle to a running liveness task.
///
/// Dropping the handle without [`detach`](Self::detach) cancels the task,
/// which then removes its display in the background.
pub struct LivenessReporter {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl LivenessReporter {
    /// Start reporting for `session_id` every `interval`.
    #[must_use]
    pub fn attach(
        transport: Arc<dyn Transport>,
        session_id: impl Into<String>,
        interval: Duration,
    ) -> Self {
        let session_id = session_id.into();
        let cancel = CancellationToken::new();
        let span = info_span!("liveness", session_id = %session_id);
        let task = tokio::spawn(run(transport, session_id, interval, cancel.clone()).instrument(span));

        Self {
            cancel,
            task: Some(task),
        }
    }

    /// Stop reporting and wait until the display has been removed.
    ///
    /// Safe to call more than once.
    pub async fn detach(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                debug!(%err, "liveness task ended abnormally");
            }
        }
    }
}

impl Drop for LivenessReporter {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    transport: Arc<dyn Transport>,
    session_id: String,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut display: Option<MessageRef> = None;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }

        let text = ping_text();
        match display.as_ref() {
            None => match transport.send(&session_id, &text, &[]).await {
                Ok(message) => display = Some(message),
                Err(err) => info!(%err, "liveness send failed"),
            },
            Some(message) => {
                if let Err(err) = transport.edit(&session_id, message, &text).await {
                    info!(%err, "liveness edit failed");
                    display = None;
                }
            }
        }
    }

    if let Some(message) = display {
        if let Err(err) = transport.delete(&session_id, &message).await {
            info!(%err, "liveness display delete failed");
        }
    }
}
