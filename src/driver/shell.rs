//! Generic subprocess agent: prompt on stdin, reply on stdout.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{spawn_error, with_timeout, Agent, AgentEvent, AgentReply, AskOptions};
use crate::config::AgentConfig;
use crate::transport::BoxFuture;
use crate::{AppError, Result};

/// Environment variable carrying the sandbox mode to the child.
pub const ENV_SANDBOX: &str = "AGENT_COURIER_SANDBOX";
/// Environment variable set to `1` when elevated trust is on.
pub const ENV_ELEVATED: &str = "AGENT_COURIER_ELEVATED";

/// Runs a configured argv once per prompt.
#[derive(Debug, Clone)]
pub struct ShellAgent {
    argv: Vec<String>,
    workdir: PathBuf,
    timeout: Option<Duration>,
}

impl ShellAgent {
    /// Build from agent settings.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if no command is configured.
    pub fn new(config: &AgentConfig) -> Result<Self> {
        if config.command.is_empty() {
            return Err(AppError::Config("shell agent requires agent.command".into()));
        }
        Ok(Self {
            argv: config.command.clone(),
            workdir: config.workdir.clone(),
            timeout: config.timeout(),
        })
    }

    async fn run(&self, prompt: &str, options: &AskOptions) -> Result<AgentReply> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| AppError::Agent("empty agent command".into()))?;

        let mut child = Command::new(program)
            .args(args)
            .current_dir(&self.workdir)
            .env(ENV_SANDBOX, &options.sandbox_mode)
            .env(ENV_ELEVATED, if options.elevated_trust { "1" } else { "0" })
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| spawn_error(program, &err))?;

        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // The agent may exit without reading its input.
                if let Err(err) = stdin.write_all(prompt.as_bytes()).await {
                    debug!(%err, "agent stdin closed early");
                }
                let _ = stdin.shutdown().await;
            }
        };

        let ((), output) = tokio::join!(feed, child.wait_with_output());
        let output = output.map_err(|err| AppError::Agent(format!("agent wait failed: {err}")))?;

        info!(
            exit_code = ?output.status.code(),
            stdout_bytes = output.stdout.len(),
            "shell agent finished"
        );
        Ok(AgentReply::from_outputs(
            "",
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ))
    }
}

impl Agent for ShellAgent {
    fn ask<'a>(
        &'a self,
        prompt: &'a str,
        options: &'a AskOptions,
        _events: mpsc::Sender<AgentEvent>,
    ) -> BoxFuture<'a, Result<AgentReply>> {
        Box::pin(async move { with_timeout(self.timeout, self.run(prompt, options)).await? })
    }
}
