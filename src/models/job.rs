//! Session job model.

use chrono::{DateTime, Utc};

use crate::AppError;

/// Characters of a text job shown in queue previews.
const PREVIEW_CHARS: usize = 60;

/// Kind of work a job carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Plain text prompt.
    Text,
    /// Audio message that must be transcribed first.
    Audio,
}

impl JobKind {
    /// Stable lowercase label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Audio => "audio",
        }
    }
}

/// Work submitted to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPayload {
    /// Raw prompt text.
    Text(String),
    /// Reference to an audio blob held by the transport.
    Audio {
        /// Transport-specific file reference used for download.
        file_ref: String,
        /// Optional caption sent with the audio.
        caption: Option<String>,
    },
}

impl JobPayload {
    /// Kind of this payload.
    #[must_use]
    pub fn kind(&self) -> JobKind {
        match self {
            Self::Text(_) => JobKind::Text,
            Self::Audio { .. } => JobKind::Audio,
        }
    }
}

/// One unit of work in a session queue. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Per-session identifier; strictly increasing, never reused.
    pub job_id: u64,
    /// What to run.
    pub payload: JobPayload,
    /// Enqueue timestamp.
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Construct a job stamped with the current time.
    #[must_use]
    pub fn new(job_id: u64, payload: JobPayload) -> Self {
        Self {
            job_id,
            payload,
            created_at: Utc::now(),
        }
    }

    /// Kind of this job.
    #[must_use]
    pub fn kind(&self) -> JobKind {
        self.payload.kind()
    }

    /// Short single-line label for queue listings.
    #[must_use]
    pub fn preview(&self) -> String {
        let label = match &self.payload {
            JobPayload::Text(text) if !text.trim().is_empty() => text.trim(),
            JobPayload::Audio {
                caption: Some(caption),
                ..
            } if !caption.trim().is_empty() => caption.trim(),
            _ => self.kind().as_str(),
        };
        let mut preview: String = label.chars().take(PREVIEW_CHARS).collect();
        if label.chars().count() > PREVIEW_CHARS {
            preview.push('…');
        }
        preview.replace('\n', " ")
    }
}

/// Result of [`crate::orchestrator::queue::SessionJobQueue::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enqueued {
    /// Identifier assigned to the new job.
    pub job_id: u64,
    /// 1-based position at enqueue time, counting the in-flight job.
    pub position: usize,
    /// Whether this enqueue started an idle session's worker.
    pub started_worker: bool,
}

/// Terminal state of a session job.
#[derive(Debug)]
pub enum JobOutcome {
    /// Pipeline ran to completion.
    Completed,
    /// Pipeline failed; the error is reported to the session.
    Errored(AppError),
    /// Worker was canceled while the job was in flight.
    Canceled,
}

impl JobOutcome {
    /// Stable lowercase label for logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Errored(_) => "errored",
            Self::Canceled => "canceled",
        }
    }
}
