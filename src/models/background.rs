//! Detached background job model.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::transport::MessageRef;

/// Snapshot of a supervised background process.
///
/// The supervisor owns the live process handle; callers only ever see
/// point-in-time copies of this record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackgroundJob {
    /// Process-wide identifier, independent of session job IDs.
    pub job_id: u64,
    /// Session that owns the job and receives its notices.
    pub session_id: String,
    /// Human label.
    pub label: String,
    /// Argv executed.
    pub command: Vec<String>,
    /// Working directory.
    pub cwd: PathBuf,
    /// Combined stdout/stderr log.
    pub log_path: PathBuf,
    /// Registration timestamp.
    pub created_at: DateTime<Utc>,
    /// Set once the process has been spawned.
    pub started_at: Option<DateTime<Utc>>,
    /// Set once the process has exited (or failed to spawn).
    pub ended_at: Option<DateTime<Utc>>,
    /// OS process ID while known.
    pub pid: Option<u32>,
    /// Exit code; `None` when killed by a signal or never started.
    pub exit_code: Option<i32>,
    /// Liveness display currently shown for this job.
    pub display: Option<MessageRef>,
}

impl BackgroundJob {
    /// Whether the job has not finished yet.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Command rendered as a single line.
    #[must_use]
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }

    /// `running` or `done exit=<code>`.
    #[must_use]
    pub fn status_label(&self) -> String {
        if self.is_running() {
            "running".to_owned()
        } else {
            format!("done exit={}", self.exit_code_label())
        }
    }

    /// Exit code for display; `signal` when the process had none.
    #[must_use]
    pub fn exit_code_label(&self) -> String {
        self.exit_code
            .map_or_else(|| "signal".to_owned(), |code| code.to_string())
    }
}
