//! Shared application state handed to transport adapters.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::commands::CommandRouter;
use crate::transport::Transport;
use crate::{AppError, GlobalConfig, Result};

/// Inbound messages buffered ahead of the intake task.
pub const INTAKE_CAPACITY: usize = 256;

/// State reachable from every inbound event handler.
pub struct AppState {
    /// Validated configuration.
    pub config: Arc<GlobalConfig>,
    /// Command and message router.
    pub router: CommandRouter,
    /// Outbound chat transport used for replies.
    pub transport: Arc<dyn Transport>,
    /// Ordered hand-off for chat messages that become jobs.
    pub intake: MessageIntake,
    /// Process-wide shutdown signal.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Whether `session_id` is a conversation this process serves.
    ///
    /// Direct messages are always served; other channels only when they
    /// match the configured channel.
    #[must_use]
    pub fn serves_channel(&self, session_id: &str, is_direct: bool) -> bool {
        is_direct
            || self
                .config
                .slack
                .channel_id
                .as_deref()
                .is_some_and(|channel| channel == session_id)
    }
}

/// What an operator sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundBody {
    /// Plain text prompt.
    Text(String),
    /// Uploaded audio with an optional caption.
    Audio {
        /// Transport-specific file reference.
        file_ref: String,
        /// Text sent alongside the upload.
        caption: Option<String>,
    },
}

/// A chat message reduced to what the router needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Conversation the message belongs to.
    pub session_id: String,
    /// Sender identity.
    pub user_id: String,
    /// Message content.
    pub body: InboundBody,
}

/// Single consumer that turns chat messages into jobs in arrival order.
///
/// Transport callbacks may run concurrently; routing every message
/// through one channel keeps per-session enqueue order equal to delivery
/// order.
#[derive(Clone)]
pub struct MessageIntake {
    tx: mpsc::Sender<InboundMessage>,
}

impl MessageIntake {
    /// Start the intake task. It stops when `shutdown` fires.
    #[must_use]
    pub fn spawn(
        router: CommandRouter,
        transport: Arc<dyn Transport>,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(INTAKE_CAPACITY);
        let task = tokio::spawn(intake_loop(router, transport, rx, shutdown));
        (Self { tx }, task)
    }

    /// Hand a message to the intake task.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` once the intake task has stopped.
    pub async fn submit(&self, message: InboundMessage) -> Result<()> {
        self.tx
            .send(message)
            .await
            .map_err(|err| AppError::Transport(format!("message intake closed: {err}")))
    }
}

async fn intake_loop(
    router: CommandRouter,
    transport: Arc<dyn Transport>,
    mut rx: mpsc::Receiver<InboundMessage>,
    shutdown: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            message = rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let InboundMessage {
            session_id,
            user_id,
            body,
        } = message;
        debug!(%session_id, %user_id, "inbound message");
        let response = match body {
            InboundBody::Text(text) => router.accept_text(&session_id, &user_id, &text).await,
            InboundBody::Audio { file_ref, caption } => {
                router
                    .accept_audio(&session_id, &user_id, &file_ref, caption.as_deref())
                    .await
            }
        };
        if let Err(err) = transport
            .send(&session_id, &response.text, &response.actions)
            .await
        {
            warn!(%session_id, %err, "failed to post reply");
        }
    }
    info!("message intake exiting");
}
