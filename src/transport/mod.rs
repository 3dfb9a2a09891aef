//! Chat transport abstraction.
//!
//! The orchestrator only ever talks to the chat platform through
//! [`Transport`]. Every call may fail with `AppError::Transport`; callers
//! that run in the background (liveness displays, job monitors) log and
//! swallow those failures.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use crate::Result;

/// Boxed future returned by collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Opaque handle to a message previously sent through a transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageRef(pub String);

impl MessageRef {
    /// Raw platform identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Interactive button attached to an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobAction {
    /// Routing identifier handled by the command router.
    pub action_id: String,
    /// Button label.
    pub label: String,
    /// Argument carried back when pressed.
    pub value: String,
}

impl JobAction {
    /// Build an action.
    #[must_use]
    pub fn new(action_id: &str, label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            action_id: action_id.to_owned(),
            label: label.into(),
            value: value.into(),
        }
    }
}

/// Outbound chat operations consumed by the core.
pub trait Transport: Send + Sync {
    /// Post a message, optionally with action buttons.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the platform rejects the message.
    fn send<'a>(
        &'a self,
        session_id: &'a str,
        text: &'a str,
        actions: &'a [JobAction],
    ) -> BoxFuture<'a, Result<MessageRef>>;

    /// Replace the text of a previously sent message.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the update fails.
    fn edit<'a>(
        &'a self,
        session_id: &'a str,
        message: &'a MessageRef,
        text: &'a str,
    ) -> BoxFuture<'a, Result<()>>;

    /// Remove a previously sent message.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the delete fails.
    fn delete<'a>(&'a self, session_id: &'a str, message: &'a MessageRef)
        -> BoxFuture<'a, Result<()>>;

    /// Fetch an attached file into `dest_dir`, returning the local path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the fetch fails.
    fn download<'a>(&'a self, file_ref: &'a str, dest_dir: &'a Path)
        -> BoxFuture<'a, Result<PathBuf>>;
}
