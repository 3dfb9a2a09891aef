//! Agent collaborator abstraction.
//!
//! The pipeline hands a rendered prompt to an [`Agent`] and receives the
//! reply text. Side observations made while the agent runs (currently
//! only authorization URLs) travel over an [`mpsc`] channel so the
//! pipeline can react while the call is still in flight.

pub mod codex;
pub mod shell;

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::{AgentConfig, AgentKind};
use crate::transport::BoxFuture;
use crate::{AppError, Result};

/// Per-call options derived from session preferences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AskOptions {
    /// Run without approvals or sandbox.
    pub elevated_trust: bool,
    /// Sandbox mode when not elevated.
    pub sandbox_mode: String,
}

/// Final answer of one agent call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentReply {
    /// Reply text shown to the operator.
    pub text: String,
    /// Raw stdout of the agent process.
    pub raw_stdout: String,
    /// Raw stderr of the agent process.
    pub raw_stderr: String,
}

impl AgentReply {
    /// Pick the reply text: `primary`, else stdout, else stderr, else a
    /// placeholder.
    #[must_use]
    pub fn from_outputs(primary: &str, raw_stdout: String, raw_stderr: String) -> Self {
        let text = [primary, raw_stdout.as_str(), raw_stderr.as_str()]
            .into_iter()
            .map(str::trim)
            .find(|candidate| !candidate.is_empty())
            .unwrap_or("(no output)")
            .to_owned();
        Self {
            text,
            raw_stdout,
            raw_stderr,
        }
    }
}

/// Side events emitted during an agent call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    /// The agent printed an external authorization URL.
    AuthorizationUrl(String),
}

/// Prompt-answering collaborator.
pub trait Agent: Send + Sync {
    /// Answer `prompt`.
    ///
    /// Dropping the returned future must stop any work it started.
    ///
    /// # Errors
    ///
    /// Returns `AppError::AgentTimeout` when the configured timeout
    /// elapses and `AppError::Agent` when the agent cannot be run.
    fn ask<'a>(
        &'a self,
        prompt: &'a str,
        options: &'a AskOptions,
        events: mpsc::Sender<AgentEvent>,
    ) -> BoxFuture<'a, Result<AgentReply>>;
}

/// Construct the configured agent.
///
/// # Errors
///
/// Returns `AppError::Config` if the agent cannot be built from `config`.
pub fn build_agent(config: &AgentConfig) -> Result<Arc<dyn Agent>> {
    match config.kind {
        AgentKind::Shell => Ok(Arc::new(shell::ShellAgent::new(config)?)),
        AgentKind::Codex => Ok(Arc::new(codex::CodexAgent::new(config)?)),
    }
}

/// Await `work`, failing with `AgentTimeout` once `timeout` elapses.
pub(crate) async fn with_timeout<T>(
    timeout: Option<Duration>,
    work: impl Future<Output = T>,
) -> Result<T> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, work)
            .await
            .map_err(|_| AppError::AgentTimeout(limit.as_secs())),
        None => Ok(work.await),
    }
}

/// Map a spawn failure, calling out a missing executable.
pub(crate) fn spawn_error(program: &str, err: &io::Error) -> AppError {
    if err.kind() == io::ErrorKind::NotFound {
        AppError::Agent(format!("{program} not found on PATH"))
    } else {
        AppError::Agent(format!("failed to start {program}: {err}"))
    }
}
