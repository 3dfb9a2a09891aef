//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
///
/// Cancellation of a session job is deliberately absent: it is a normal
/// terminal state (see [`crate::models::job::JobOutcome`]), not a failure.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing, validation, or credential failure.
    Config(String),
    /// State document I/O failure that could not be recovered locally.
    State(String),
    /// Chat transport failure (send, edit, delete, download).
    Transport(String),
    /// Agent collaborator failure (process missing, spawn or read error).
    Agent(String),
    /// Agent call exceeded its configured timeout, in seconds.
    AgentTimeout(u64),
    /// Audio transcription failure.
    Transcription(String),
    /// Detach directive present but malformed.
    Directive(String),
    /// Background job launch or supervision failure.
    Job(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// Caller is not authorized to perform the requested action.
    Unauthorized(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::State(msg) => write!(f, "state: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Agent(msg) => write!(f, "agent: {msg}"),
            Self::AgentTimeout(secs) => write!(f, "agent timed out after {secs}s"),
            Self::Transcription(msg) => write!(f, "transcription: {msg}"),
            Self::Directive(msg) => write!(f, "directive: {msg}"),
            Self::Job(msg) => write!(f, "job: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::State(format!("json: {err}"))
    }
}
