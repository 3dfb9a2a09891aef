//! Operator commands and inbound message intake.
//!
//! [`CommandRouter`] is transport independent: adapters hand it a session
//! ID, the acting user, and the command name plus arguments, and post
//! whatever [`CommandReply`] comes back.

use std::sync::Arc;

use tracing::{info, warn};

use crate::models::background::BackgroundJob;
use crate::models::job::JobPayload;
use crate::models::state::Preference;
use crate::orchestrator::supervisor::read_log_tail;
use crate::orchestrator::{DetachedJobSupervisor, SessionJobQueue};
use crate::persistence::SharedStateStore;
use crate::transport::JobAction;
use crate::{GlobalConfig, Result};

/// Show the recent background job list.
pub const ACTION_JOBS: &str = "bg_jobs";
/// Show a job's log tail.
pub const ACTION_TAIL: &str = "bg_tail";
/// Ask to cancel a job.
pub const ACTION_CANCEL: &str = "bg_cancel";
/// Confirm a pending cancel.
pub const ACTION_CANCEL_CONFIRM: &str = "bg_cancel_confirm";
/// Abandon a pending cancel.
pub const ACTION_CANCEL_ABORT: &str = "bg_cancel_abort";

/// Active jobs that get their own Tail/Cancel buttons.
const ACTION_JOB_LIMIT: usize = 2;
/// Entries shown by `jobs`.
const JOBS_LIST_LIMIT: usize = 20;
/// Characters shown by `job_tail`.
const JOB_TAIL_CHARS: usize = 2800;
/// Pending jobs previewed by `queue`.
const QUEUE_PREVIEW: usize = 5;
/// Characters of a `bg` command used as its label.
const BG_LABEL_CHARS: usize = 80;

const HELP: &str = "\
Send a message to queue it for the agent. Audio files are transcribed first.

help - this text
whoami - show your user and session ids
status - show effective settings
claim <code> - claim this bot (when no operators are configured)
reset - cancel work and clear this session's history
queue - show the current and pending jobs
cancel - cancel the current job and clear the queue
drop - drop pending jobs, keep the current one
yolo on|off - toggle elevated trust for the agent
sandbox rw|ro - workspace-write or read-only sandbox
bg <command> - run a shell command as a background job
jobs - list recent background jobs
job <id> - show one background job
job_tail <id> - show the end of a job's log
job_cancel <id> - stop a background job";

/// Buttons for the session's active background jobs.
#[must_use]
pub fn job_actions(active: &[BackgroundJob]) -> Vec<JobAction> {
    if active.is_empty() {
        return Vec::new();
    }
    let mut actions = vec![JobAction::new(ACTION_JOBS, "Jobs", "")];
    for job in active.iter().take(ACTION_JOB_LIMIT) {
        let id = job.job_id.to_string();
        actions.push(JobAction::new(ACTION_TAIL, format!("Tail #{id}"), id.clone()));
        actions.push(JobAction::new(ACTION_CANCEL, format!("Cancel #{id}"), id));
    }
    actions
}

/// Confirm/abort buttons for a cancel request.
#[must_use]
pub fn cancel_confirm_actions(job_id: u64) -> Vec<JobAction> {
    vec![
        JobAction::new(ACTION_CANCEL_CONFIRM, "Confirm cancel", job_id.to_string()),
        JobAction::new(ACTION_CANCEL_ABORT, "Keep running", job_id.to_string()),
    ]
}

/// Text plus optional buttons returned to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    /// Message body.
    pub text: String,
    /// Buttons to attach.
    pub actions: Vec<JobAction>,
}

impl CommandReply {
    /// Reply without buttons.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            actions: Vec::new(),
        }
    }
}

/// Routes commands, button presses, and inbound messages.
#[derive(Clone)]
pub struct CommandRouter {
    config: Arc<GlobalConfig>,
    store: SharedStateStore,
    queue: SessionJobQueue,
    supervisor: DetachedJobSupervisor,
}

impl CommandRouter {
    /// Wire the router.
    #[must_use]
    pub fn new(
        config: Arc<GlobalConfig>,
        store: SharedStateStore,
        queue: SessionJobQueue,
        supervisor: DetachedJobSupervisor,
    ) -> Self {
        Self {
            config,
            store,
            queue,
            supervisor,
        }
    }

    /// Whether `user_id` is a static operator or the claimed identity.
    pub async fn is_authorized(&self, user_id: &str) -> bool {
        if self.config.is_static_operator(user_id) {
            return true;
        }
        match self.store.claimed_user_id().await {
            Ok(claimed) => claimed.as_deref() == Some(user_id),
            Err(err) => {
                warn!(%err, "failed to read claimed identity");
                false
            }
        }
    }

    fn unauthorized(&self) -> CommandReply {
        if self.config.authorized_user_ids.is_empty() && self.config.claim_code.is_some() {
            CommandReply::text("Not authorized. Use /claim <code> first.")
        } else {
            CommandReply::text("Not authorized.")
        }
    }

    /// Queue a text message for the agent.
    pub async fn accept_text(&self, session_id: &str, user_id: &str, text: &str) -> CommandReply {
        if !self.is_authorized(user_id).await {
            warn!(session_id, user_id, "message from unauthorized user ignored");
            return self.unauthorized();
        }
        let text = text.trim();
        if text.is_empty() {
            return CommandReply::text("Nothing to do.");
        }
        let queued = self
            .queue
            .enqueue(session_id, JobPayload::Text(text.to_owned()));
        info!(session_id, job_id = queued.job_id, chars = text.len(), "text job queued");
        if queued.started_worker && queued.position == 1 {
            CommandReply::text(format!("Queued as #{}. Starting now.", queued.job_id))
        } else {
            CommandReply::text(format!(
                "Queued as #{} (position {}).",
                queued.job_id, queued.position
            ))
        }
    }

    /// Queue an audio attachment for transcription and the agent.
    pub async fn accept_audio(
        &self,
        session_id: &str,
        user_id: &str,
        file_ref: &str,
        caption: Option<&str>,
    ) -> CommandReply {
        if !self.is_authorized(user_id).await {
            warn!(session_id, user_id, "audio from unauthorized user ignored");
            return self.unauthorized();
        }
        let queued = self.queue.enqueue(
            session_id,
            JobPayload::Audio {
                file_ref: file_ref.to_owned(),
                caption: caption.map(str::to_owned),
            },
        );
        info!(session_id, job_id = queued.job_id, "audio job queued");
        CommandReply::text(format!(
            "Queued audio as #{} (position {}).",
            queued.job_id, queued.position
        ))
    }

    /// Run one command. `name` may carry a leading `/`.
    pub async fn dispatch(
        &self,
        session_id: &str,
        user_id: &str,
        name: &str,
        args: &str,
    ) -> CommandReply {
        let name = name.trim().trim_start_matches('/').to_ascii_lowercase();
        let args = args.trim();
        info!(session_id, user_id, command = %name, "command received");

        match name.as_str() {
            "help" | "start" => return CommandReply::text(HELP),
            "whoami" => {
                return CommandReply::text(format!("user_id: {user_id}\nsession_id: {session_id}"))
            }
            "claim" => return self.claim(user_id, args).await,
            _ => {}
        }

        if !self.is_authorized(user_id).await {
            warn!(session_id, user_id, command = %name, "unauthorized command");
            return self.unauthorized();
        }

        let result = match name.as_str() {
            "status" => self.status(session_id).await,
            "reset" => self.reset(session_id).await,
            "queue" => Ok(self.queue_view(session_id)),
            "cancel" => {
                self.queue.cancel_and_clear(session_id).await;
                Ok(CommandReply::text("Canceled current job and cleared queue."))
            }
            "drop" => {
                let dropped = self.queue.drop_pending(session_id);
                Ok(CommandReply::text(format!("Dropped {dropped} pending job(s).")))
            }
            "yolo" => self.yolo(session_id, args).await,
            "sandbox" => self.sandbox(session_id, args).await,
            "bg" => Ok(self.bg(session_id, args).await),
            "jobs" => Ok(self.jobs(session_id)),
            "job" => Ok(self.job(session_id, args)),
            "job_tail" => Ok(self.job_tail(session_id, args).await),
            "job_cancel" => Ok(self.job_cancel(session_id, args)),
            other => Ok(CommandReply::text(format!(
                "Unknown command: {other}. Try help."
            ))),
        };

        result.unwrap_or_else(|err| {
            warn!(session_id, %err, "command failed");
            CommandReply::text(format!("Error: {err}"))
        })
    }

    /// Handle a button press.
    pub async fn handle_action(
        &self,
        session_id: &str,
        user_id: &str,
        action_id: &str,
        value: &str,
    ) -> CommandReply {
        if !self.is_authorized(user_id).await {
            warn!(session_id, user_id, action_id, "unauthorized action");
            return self.unauthorized();
        }
        info!(session_id, user_id, action_id, "action received");

        match action_id {
            ACTION_JOBS => self.jobs(session_id),
            ACTION_TAIL => self.job_tail(session_id, value).await,
            ACTION_CANCEL => match value.trim().parse::<u64>() {
                Ok(job_id) => CommandReply {
                    text: format!("Cancel background job #{job_id}? Confirm to stop it."),
                    actions: cancel_confirm_actions(job_id),
                },
                Err(_) => CommandReply::text("Bad job id."),
            },
            ACTION_CANCEL_CONFIRM => self.job_cancel(session_id, value),
            ACTION_CANCEL_ABORT => self.with_actions(session_id, "OK, leaving it running."),
            other => {
                warn!(action_id = other, "unknown action");
                CommandReply::text("Unknown action.")
            }
        }
    }

    fn with_actions(&self, session_id: &str, text: impl Into<String>) -> CommandReply {
        CommandReply {
            text: text.into(),
            actions: job_actions(&self.supervisor.active_for_session(session_id)),
        }
    }

    async fn claim(&self, user_id: &str, code: &str) -> CommandReply {
        if !self.config.authorized_user_ids.is_empty() {
            return CommandReply::text("Already locked via authorized_user_ids.");
        }
        let Some(expected) = self.config.claim_code.as_deref() else {
            return CommandReply::text("Claim disabled (no claim_code configured).");
        };
        match self.store.claimed_user_id().await {
            Ok(Some(current)) => {
                return CommandReply::text(format!("Already claimed by user {current}."))
            }
            Ok(None) => {}
            Err(err) => return CommandReply::text(format!("Error: {err}")),
        }
        if code.is_empty() {
            return CommandReply::text("Usage: claim <code>");
        }
        if code != expected {
            warn!(user_id, "bad claim code");
            return CommandReply::text("Bad claim code.");
        }
        match self.store.claim(user_id).await {
            Ok(true) => {
                info!(user_id, "bot claimed");
                CommandReply::text(format!("Claimed. Authorized user: {user_id}"))
            }
            Ok(false) => CommandReply::text("Already claimed."),
            Err(err) => CommandReply::text(format!("Error: {err}")),
        }
    }

    async fn status(&self, session_id: &str) -> Result<CommandReply> {
        let prefs = self.store.prefs(session_id).await?;
        let claimed = self.store.claimed_user_id().await?;
        let config = &self.config;
        let operators = if config.authorized_user_ids.is_empty() {
            claimed.unwrap_or_else(|| "(unclaimed)".into())
        } else {
            config.authorized_user_ids.join(", ")
        };
        let sandbox = prefs
            .sandbox_mode
            .unwrap_or_else(|| config.agent.sandbox.clone());

        let lines = [
            format!("agent: {:?}", config.agent.kind).to_lowercase(),
            format!("workdir: {}", config.agent.workdir.display()),
            format!("state: {}", config.state_path().display()),
            format!("operators: {operators}"),
            format!("sandbox: {sandbox}"),
            format!("elevated_trust: {}", prefs.elevated_trust),
            format!("heartbeat_seconds: {}", config.heartbeat_interval().as_secs()),
            format!("bg_heartbeat_seconds: {}", config.bg_heartbeat_seconds),
            format!("data_dir: {}", config.data_dir.display()),
            format!("notes: {} ({})", config.notes.enabled, config.notes_dir().display()),
            format!("stt: {} ({})", config.stt.enabled, config.stt.model),
            format!("oauth: {}", config.oauth.enabled),
            format!(
                "background jobs running: {}",
                self.supervisor.active_for_session(session_id).len()
            ),
        ];
        Ok(CommandReply::text(lines.join("\n")))
    }

    async fn reset(&self, session_id: &str) -> Result<CommandReply> {
        self.queue.cancel_and_clear(session_id).await;
        self.store.reset_session(session_id).await?;
        info!(session_id, "session reset");
        Ok(CommandReply::text("Reset chat history (and canceled queue)."))
    }

    fn queue_view(&self, session_id: &str) -> CommandReply {
        let (current, pending) = self.queue.snapshot(session_id);
        if current.is_none() && pending.is_empty() {
            return CommandReply::text("Queue empty.");
        }
        let mut lines = Vec::new();
        if let Some(current) = current {
            lines.push(format!(
                "Current: #{} ({})",
                current.job_id,
                current.kind().as_str()
            ));
        }
        if !pending.is_empty() {
            lines.push(format!("Pending: {}", pending.len()));
            for job in pending.iter().take(QUEUE_PREVIEW) {
                lines.push(format!("- #{}: {}", job.job_id, job.preview()));
            }
            if pending.len() > QUEUE_PREVIEW {
                lines.push(format!("(+{} more)", pending.len() - QUEUE_PREVIEW));
            }
        }
        CommandReply::text(lines.join("\n"))
    }

    async fn yolo(&self, session_id: &str, args: &str) -> Result<CommandReply> {
        let on = match args.to_ascii_lowercase().as_str() {
            "on" => true,
            "off" => false,
            _ => return Ok(CommandReply::text("Usage: yolo on|off")),
        };
        self.store
            .set_pref(session_id, Preference::ElevatedTrust(on))
            .await?;
        Ok(CommandReply::text(if on {
            "Elevated trust: ON"
        } else {
            "Elevated trust: OFF"
        }))
    }

    async fn sandbox(&self, session_id: &str, args: &str) -> Result<CommandReply> {
        let mode = match args.to_ascii_lowercase().as_str() {
            "rw" => "workspace-write",
            "ro" => "read-only",
            _ => return Ok(CommandReply::text("Usage: sandbox rw|ro")),
        };
        self.store
            .set_pref(session_id, Preference::SandboxMode(mode.to_owned()))
            .await?;
        Ok(CommandReply::text(format!("Sandbox: {mode}")))
    }

    async fn bg(&self, session_id: &str, command: &str) -> CommandReply {
        if command.is_empty() {
            return CommandReply::text("Usage: bg <command> (runs detached; the chat stays usable)");
        }
        let mut label: String = command.chars().take(BG_LABEL_CHARS).collect();
        if command.chars().count() > BG_LABEL_CHARS {
            label.push('…');
        }
        let agent = &self.config.agent;
        let launched = self
            .supervisor
            .start(session_id, &label, agent.shell_argv(command), agent.workdir.clone())
            .await;
        match launched {
            Ok(job) => self.with_actions(
                session_id,
                format!(
                    "Launched background job #{}. Log: {}",
                    job.job_id,
                    job.log_path.display()
                ),
            ),
            Err(err) => CommandReply::text(format!("Failed to launch: {err}")),
        }
    }

    fn jobs(&self, session_id: &str) -> CommandReply {
        let jobs = self.supervisor.list_for_session(session_id, JOBS_LIST_LIMIT);
        if jobs.is_empty() {
            return self.with_actions(session_id, "No background jobs yet.");
        }
        let mut lines = vec!["Background jobs:".to_owned()];
        lines.extend(
            jobs.iter()
                .map(|job| format!("- #{}: {} - {}", job.job_id, job.status_label(), job.label)),
        );
        self.with_actions(session_id, lines.join("\n"))
    }

    fn owned_job(
        &self,
        session_id: &str,
        args: &str,
        usage: &str,
    ) -> std::result::Result<BackgroundJob, CommandReply> {
        let raw = args.split_whitespace().next().unwrap_or_default();
        if raw.is_empty() {
            return Err(CommandReply::text(format!("Usage: {usage} <id>")));
        }
        let Ok(job_id) = raw.trim_start_matches('#').parse::<u64>() else {
            return Err(CommandReply::text(format!(
                "Usage: {usage} <id> (id must be an integer)"
            )));
        };
        self.supervisor
            .get(job_id)
            .filter(|job| job.session_id == session_id)
            .ok_or_else(|| CommandReply::text(format!("Job #{job_id} not found.")))
    }

    fn job(&self, session_id: &str, args: &str) -> CommandReply {
        let job = match self.owned_job(session_id, args, "job") {
            Ok(job) => job,
            Err(reply) => return reply,
        };
        let lines = [
            format!("job: #{}", job.job_id),
            format!("status: {}", job.status_label()),
            format!(
                "pid: {}",
                job.pid.map_or_else(|| "(none)".to_owned(), |pid| pid.to_string())
            ),
            format!("cwd: {}", job.cwd.display()),
            format!("log: {}", job.log_path.display()),
            format!("title: {}", job.label),
            format!("cmd: {}", job.command_line()),
        ];
        self.with_actions(session_id, lines.join("\n"))
    }

    async fn job_tail(&self, session_id: &str, args: &str) -> CommandReply {
        let job = match self.owned_job(session_id, args, "job_tail") {
            Ok(job) => job,
            Err(reply) => return reply,
        };
        if !job.log_path.exists() {
            return self.with_actions(session_id, format!("No log yet for job #{}.", job.job_id));
        }
        let tail = read_log_tail(&job.log_path, JOB_TAIL_CHARS).await;
        self.with_actions(
            session_id,
            format!("Tail for #{}:\n```\n{}\n```", job.job_id, tail.trim()),
        )
    }

    fn job_cancel(&self, session_id: &str, args: &str) -> CommandReply {
        let job = match self.owned_job(session_id, args, "job_cancel") {
            Ok(job) => job,
            Err(reply) => return reply,
        };
        let text = if self.supervisor.cancel(job.job_id) {
            "Cancel requested."
        } else {
            "Not running (or already finished)."
        };
        self.with_actions(session_id, text)
    }
}
