//! Side flow for authorization URLs surfaced by the agent.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{info, warn};

use crate::config::OAuthConfig;
use crate::transport::BoxFuture;

/// Upper bound on the opener command.
const OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Handles an authorization URL detected during an agent call.
pub trait AuthFlow: Send + Sync {
    /// Drive the flow for `url`. Failures are logged, never returned.
    fn handle<'a>(&'a self, url: &'a str) -> BoxFuture<'a, ()>;
}

/// Runs `open_command <url>` when configured; otherwise only logs.
#[derive(Debug, Clone)]
pub struct CommandAuthFlow {
    config: OAuthConfig,
}

impl CommandAuthFlow {
    /// Build from settings.
    #[must_use]
    pub fn new(config: OAuthConfig) -> Self {
        Self { config }
    }

    async fn open(&self, url: &str) {
        let Some((program, args)) = self
            .config
            .open_command
            .split_first()
            .filter(|_| self.config.enabled)
        else {
            info!("authorization url noted; no opener configured");
            return;
        };

        let child = Command::new(program)
            .args(args)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();
        let mut child = match child {
            Ok(child) => child,
            Err(err) => {
                warn!(%program, %err, "failed to start authorization opener");
                return;
            }
        };

        match tokio::time::timeout(OPEN_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) if status.success() => info!(%program, "authorization opener finished"),
            Ok(Ok(status)) => warn!(%program, code = ?status.code(), "authorization opener failed"),
            Ok(Err(err)) => warn!(%program, %err, "authorization opener wait failed"),
            Err(_) => warn!(%program, "authorization opener timed out"),
        }
    }
}

impl AuthFlow for CommandAuthFlow {
    fn handle<'a>(&'a self, url: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(self.open(url))
    }
}
