//! `codex exec --json` agent.
//!
//! Streams the JSONL event log line by line, forwarding any OAuth
//! authorization URL it sees, and takes the final reply from the
//! `--output-last-message` file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use futures_util::StreamExt;
use regex::Regex;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

use super::{spawn_error, with_timeout, Agent, AgentEvent, AgentReply, AskOptions};
use crate::config::AgentConfig;
use crate::transport::BoxFuture;
use crate::{AppError, Result};

/// Longest JSONL event line accepted: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Authorization URLs worth surfacing to the operator.
const AUTH_URL_PATTERN: &str = r#"https://accounts\.google\.com/o/oauth2/[^\s"']+"#;

/// Event fields scanned for authorization URLs.
const SCANNED_FIELDS: [&str; 2] = ["text", "aggregated_output"];

/// Codex CLI agent.
#[derive(Debug, Clone)]
pub struct CodexAgent {
    program: Vec<String>,
    workdir: PathBuf,
    model: Option<String>,
    extra_args: Vec<String>,
    timeout: Option<Duration>,
    auth_url: Regex,
}

impl CodexAgent {
    /// Build from agent settings. A non-empty `agent.command` replaces the
    /// `codex` executable (and any leading arguments).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the URL pattern fails to compile.
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let program = if config.command.is_empty() {
            vec!["codex".to_owned()]
        } else {
            config.command.clone()
        };
        let auth_url = Regex::new(AUTH_URL_PATTERN)
            .map_err(|err| AppError::Config(format!("invalid auth url pattern: {err}")))?;
        Ok(Self {
            program,
            workdir: config.workdir.clone(),
            model: config.model.clone(),
            extra_args: config.extra_args.clone(),
            timeout: config.timeout(),
            auth_url,
        })
    }

    /// Arguments following the executable for one call.
    #[must_use]
    pub fn exec_args(&self, options: &AskOptions, last_message: &Path) -> Vec<String> {
        let mut args: Vec<String> = self.program[1..].to_vec();
        args.extend(
            ["exec", "--json", "--skip-git-repo-check", "--color", "never"]
                .map(str::to_owned),
        );
        if options.elevated_trust {
            args.push("--dangerously-bypass-approvals-and-sandbox".into());
        } else {
            args.push("--sandbox".into());
            args.push(options.sandbox_mode.clone());
        }
        args.push("--output-last-message".into());
        args.push(last_message.display().to_string());
        args.push("-C".into());
        args.push(self.workdir.display().to_string());
        if let Some(model) = &self.model {
            args.push("-m".into());
            args.push(model.clone());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }

    /// Authorization URLs mentioned in one JSONL event line.
    #[must_use]
    pub fn authorization_urls(&self, line: &str) -> Vec<String> {
        let Ok(event) = serde_json::from_str::<Value>(line) else {
            return Vec::new();
        };
        let Some(item) = event.get("item").and_then(Value::as_object) else {
            return Vec::new();
        };
        SCANNED_FIELDS
            .iter()
            .filter_map(|key| item.get(*key).and_then(Value::as_str))
            .flat_map(|blob| self.auth_url.find_iter(blob))
            .map(|found| found.as_str().to_owned())
            .collect()
    }

    async fn run(
        &self,
        prompt: &str,
        options: &AskOptions,
        events: mpsc::Sender<AgentEvent>,
    ) -> Result<AgentReply> {
        let scratch = tempfile::Builder::new()
            .prefix("agent-courier-codex-")
            .tempdir()
            .map_err(|err| AppError::Agent(format!("failed to create scratch dir: {err}")))?;
        let last_message = scratch.path().join("last_message.txt");
        let program = &self.program[0];

        let mut child = Command::new(program)
            .args(self.exec_args(options, &last_message))
            .current_dir(&self.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| spawn_error(program, &err))?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Agent("codex stdout unavailable".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Agent("codex stderr unavailable".into()))?;

        let feed = async move {
            if let Some(mut stdin) = stdin {
                if let Err(err) = stdin.write_all(prompt.as_bytes()).await {
                    debug!(%err, "codex stdin closed early");
                }
                let _ = stdin.shutdown().await;
            }
        };

        let ((), raw_stdout, raw_stderr) = tokio::join!(
            feed,
            self.pump_events(stdout, &events),
            read_all(stderr)
        );
        let status = child
            .wait()
            .await
            .map_err(|err| AppError::Agent(format!("codex wait failed: {err}")))?;

        let last = tokio::fs::read(&last_message)
            .await
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default();

        info!(exit_code = ?status.code(), "codex finished");
        Ok(AgentReply::from_outputs(&last, raw_stdout, raw_stderr))
    }

    /// Collect stdout while forwarding each new authorization URL once.
    async fn pump_events<R>(&self, stdout: R, events: &mpsc::Sender<AgentEvent>) -> String
    where
        R: AsyncRead + Unpin,
    {
        let mut framed = FramedRead::new(stdout, LinesCodec::new_with_max_length(MAX_LINE_BYTES));
        let mut raw = String::new();
        let mut seen: HashSet<String> = HashSet::new();

        while let Some(item) = framed.next().await {
            match item {
                Ok(line) => {
                    for url in self.authorization_urls(&line) {
                        if seen.insert(url.clone()) {
                            info!("authorization url detected");
                            // Receiver gone means nobody cares; keep draining.
                            let _ = events.send(AgentEvent::AuthorizationUrl(url)).await;
                        }
                    }
                    raw.push_str(&line);
                    raw.push('\n');
                }
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    warn!("codex event line too long, skipping");
                }
                Err(LinesCodecError::Io(err)) => {
                    warn!(%err, "codex stdout read failed");
                    break;
                }
            }
        }
        raw
    }
}

async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> String {
    let mut bytes = Vec::new();
    if let Err(err) = reader.read_to_end(&mut bytes).await {
        warn!(%err, "agent stderr read failed");
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

impl Agent for CodexAgent {
    fn ask<'a>(
        &'a self,
        prompt: &'a str,
        options: &'a AskOptions,
        events: mpsc::Sender<AgentEvent>,
    ) -> BoxFuture<'a, Result<AgentReply>> {
        Box::pin(async move { with_timeout(self.timeout, self.run(prompt, options, events)).await? })
    }
}
