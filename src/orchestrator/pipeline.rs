//! The per-job pipeline run by each session worker.
//!
//! Steps for one job: transcribe audio if needed, gather notes context,
//! record the user turn and read preferences in one store transaction,
//! call the agent while a liveness display runs, then either launch a
//! detached job (when the reply carries a directive) or deliver the reply.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::directive::{parse_detach, DetachCommand, DetachParse, DetachSpec};
use super::liveness::LivenessReporter;
use super::prompt::{render_prompt, SYSTEM_PROMPT};
use super::queue::{JobEvent, JobRunner};
use super::supervisor::DetachedJobSupervisor;
use crate::commands::job_actions;
use crate::driver::{Agent, AgentEvent, AskOptions};
use crate::integrations::stt::truncate_with_marker;
use crate::integrations::{AuthFlow, NotesProvider, Transcriber};
use crate::models::background::BackgroundJob;
use crate::models::job::{Job, JobOutcome, JobPayload};
use crate::models::state::{Preference, Role};
use crate::persistence::state_store::{append_message, now_ms};
use crate::persistence::SharedStateStore;
use crate::transport::{BoxFuture, JobAction, Transport};
use crate::{AppError, GlobalConfig, Result};

/// Characters of a transcription echoed back to the operator.
pub const TRANSCRIPT_PREVIEW_CHARS: usize = 1200;

/// Buffered agent side events.
const EVENT_BUFFER: usize = 8;

/// Collaborators the pipeline drives.
pub struct PipelineDeps {
    /// Validated configuration.
    pub config: Arc<GlobalConfig>,
    /// Chat transport.
    pub transport: Arc<dyn Transport>,
    /// Session history and preferences.
    pub store: SharedStateStore,
    /// Prompt-answering agent.
    pub agent: Arc<dyn Agent>,
    /// Audio transcription.
    pub transcriber: Arc<dyn Transcriber>,
    /// Optional notes context.
    pub notes: Option<Arc<dyn NotesProvider>>,
    /// Authorization-URL side flow.
    pub auth_flow: Arc<dyn AuthFlow>,
    /// Background job launcher.
    pub supervisor: DetachedJobSupervisor,
}

/// [`JobRunner`] implementation backing every session queue.
pub struct JobPipeline {
    deps: PipelineDeps,
    // One authorization flow at a time, process-wide.
    auth_lock: Mutex<()>,
}

impl JobPipeline {
    /// Wire the pipeline.
    #[must_use]
    pub fn new(deps: PipelineDeps) -> Self {
        Self {
            deps,
            auth_lock: Mutex::new(()),
        }
    }

    async fn execute(
        &self,
        session_id: &str,
        job: &Job,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let deps = &self.deps;
        let config = &deps.config;

        let user_text = match &job.payload {
            JobPayload::Text(text) => text.clone(),
            JobPayload::Audio { file_ref, caption } => {
                let transcription =
                    self.transcribe(session_id, job.job_id, file_ref, caption.as_deref());
                let transcribed = tokio::select! {
                    biased;
                    () = cancel.cancelled() => None,
                    text = transcription => Some(text),
                };
                match transcribed {
                    Some(text) => text?,
                    None => return Ok(()),
                }
            }
        };

        let context = deps
            .notes
            .as_ref()
            .filter(|_| config.notes.enabled)
            .and_then(|notes| notes.build_context(&user_text));

        let max_turns = config.max_turns;
        let now = now_ms();
        let (history, prefs) = deps
            .store
            .modify(|doc| {
                let record = doc.session_mut(session_id, now);
                let history = record.recent(max_turns).to_vec();
                let prefs = record.session_prefs();
                append_message(doc, session_id, Role::User, &user_text, now);
                (history, prefs)
            })
            .await?;

        let prompt = render_prompt(SYSTEM_PROMPT, context.as_deref(), &history, &user_text);
        let options = AskOptions {
            elevated_trust: prefs.elevated_trust,
            sandbox_mode: prefs
                .sandbox_mode
                .unwrap_or_else(|| config.agent.sandbox.clone()),
        };

        info!(
            job_id = job.job_id,
            prompt_chars = prompt.len(),
            history = history.len(),
            elevated = options.elevated_trust,
            "asking agent"
        );

        let mut liveness = LivenessReporter::attach(
            Arc::clone(&deps.transport),
            session_id,
            config.heartbeat_interval(),
        );
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let answered = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            (reply, ()) = async {
                tokio::join!(
                    deps.agent.ask(&prompt, &options, events_tx),
                    self.drain_events(session_id, events_rx)
                )
            } => Some(reply),
        };
        liveness.detach().await;
        let reply = match answered {
            Some(reply) if !cancel.is_cancelled() => reply?,
            _ => {
                info!(job_id = job.job_id, "agent call canceled");
                return Ok(());
            }
        };

        match parse_detach(&reply.text) {
            DetachParse::Absent => {
                info!(job_id = job.job_id, chars = reply.text.len(), "agent replied");
                deps.store
                    .append(session_id, Role::Assistant, &reply.text)
                    .await?;
                self.deliver(session_id, &reply.text).await
            }
            DetachParse::Directive { spec, remainder } => {
                let background = self.launch(session_id, spec).await?;
                info!(
                    job_id = job.job_id,
                    bg_job_id = background.job_id,
                    "agent reply launched background job"
                );
                let notice = launch_notice(&background, &remainder);
                deps.store
                    .append(session_id, Role::Assistant, &notice)
                    .await?;
                self.deliver(session_id, &notice).await
            }
            DetachParse::Malformed(diagnostic) => {
                deps.store
                    .append(session_id, Role::Assistant, &diagnostic)
                    .await?;
                Err(AppError::Directive(diagnostic))
            }
        }
    }

    async fn transcribe(
        &self,
        session_id: &str,
        job_id: u64,
        file_ref: &str,
        caption: Option<&str>,
    ) -> Result<String> {
        let deps = &self.deps;
        let stt = &deps.config.stt;
        if !stt.enabled {
            return Err(AppError::Transcription("transcription is disabled".into()));
        }

        self.notify(session_id, &format!("#{job_id}: downloading audio…"))
            .await;
        let dest = deps.config.inbox_dir().join(session_id);
        tokio::fs::create_dir_all(&dest)
            .await
            .map_err(|err| AppError::Io(format!("failed to create inbox dir: {err}")))?;
        let staged = StagedFile {
            path: deps.transport.download(file_ref, &dest).await?,
            keep: stt.keep_files,
        };

        self.notify(session_id, &format!("#{job_id}: transcribing…"))
            .await;
        let transcript = deps.transcriber.transcribe(&staged.path).await?;
        drop(staged);

        let transcript = truncate_with_marker(transcript.trim(), stt.max_chars);
        let preview = truncate_with_marker(&transcript, TRANSCRIPT_PREVIEW_CHARS);
        self.notify(session_id, &format!("Transcription (preview):\n{preview}"))
            .await;

        Ok(match caption.map(str::trim).filter(|c| !c.is_empty()) {
            Some(caption) => format!("{caption}\n\n{transcript}"),
            None => transcript,
        })
    }

    async fn drain_events(&self, session_id: &str, mut events: mpsc::Receiver<AgentEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                AgentEvent::AuthorizationUrl(url) => self.authorize(session_id, &url).await,
            }
        }
    }

    async fn authorize(&self, session_id: &str, url: &str) {
        let _flow = self.auth_lock.lock().await;
        info!(session_id, "authorization url detected");

        if let Err(err) = self
            .deps
            .store
            .set_pref(session_id, Preference::PendingAuthUrl(url.to_owned()))
            .await
        {
            warn!(session_id, %err, "failed to record authorization url");
        }

        let oauth = &self.deps.config.oauth;
        let text = if oauth.enabled && !oauth.open_command.is_empty() {
            format!("Authorization link detected; opening it for sign-in.\n{url}")
        } else {
            format!("Authorization link detected. Open it to continue:\n{url}")
        };
        self.notify(session_id, &text).await;
        self.deps.auth_flow.handle(url).await;
    }

    async fn launch(&self, session_id: &str, spec: DetachSpec) -> Result<BackgroundJob> {
        let agent = &self.deps.config.agent;
        let cwd = resolve_cwd(&agent.workdir, spec.cwd.as_deref());
        let command = match spec.cmd {
            DetachCommand::Shell(line) => agent.shell_argv(&line),
            DetachCommand::Argv(argv) => argv,
        };
        self.deps
            .supervisor
            .start(session_id, &spec.title, command, cwd)
            .await
    }

    fn actions(&self, session_id: &str) -> Vec<JobAction> {
        job_actions(&self.deps.supervisor.active_for_session(session_id))
    }

    async fn deliver(&self, session_id: &str, text: &str) -> Result<()> {
        let actions = self.actions(session_id);
        self.deps
            .transport
            .send(session_id, text, &actions)
            .await
            .map(|_| ())
    }

    /// Best-effort progress message.
    async fn notify(&self, session_id: &str, text: &str) {
        if let Err(err) = self.deps.transport.send(session_id, text, &[]).await {
            warn!(session_id, %err, "failed to send notice");
        }
    }
}

impl JobRunner for JobPipeline {
    fn run<'a>(
        &'a self,
        session_id: &'a str,
        job: &'a Job,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.execute(session_id, job, cancel))
    }

    fn report<'a>(
        &'a self,
        session_id: &'a str,
        job: &'a Job,
        event: JobEvent,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let text = match event {
                JobEvent::Started => format!("Working on #{}…", job.job_id),
                JobEvent::Finished(JobOutcome::Completed) => return,
                JobEvent::Finished(JobOutcome::Canceled) => "Canceled.".to_owned(),
                JobEvent::Finished(JobOutcome::Errored(err)) => failure_text(job.job_id, &err),
            };
            self.notify(session_id, &text).await;
        })
    }
}

/// Operator-facing text for a failed job.
#[must_use]
pub fn failure_text(job_id: u64, err: &AppError) -> String {
    match err {
        AppError::Transcription(msg) => format!("Transcription failed: {msg}"),
        AppError::AgentTimeout(secs) => format!(
            "Agent timed out after {secs}s. Set agent.timeout_seconds = 0 (no limit) \
             or raise it to allow longer runs."
        ),
        AppError::Directive(msg) => msg.clone(),
        other => format!("Job #{job_id} error: {other}"),
    }
}

/// Reply sent in place of a detach directive.
#[must_use]
pub fn launch_notice(job: &BackgroundJob, remainder: &str) -> String {
    let id = job.job_id;
    let notice = format!(
        "Launched background job #{id}. {}\nLog: {}\nUse /jobs, /job {id}, /job_tail {id}, /job_cancel {id}.",
        job.label,
        job.log_path.display()
    );
    match remainder.trim() {
        "" => notice,
        prefix => format!("{prefix}\n\n{notice}"),
    }
}

/// Resolve a directive `cwd` against the agent working directory.
///
/// `~` expands to `$HOME`; relative paths are joined onto `workdir`.
#[must_use]
pub fn resolve_cwd(workdir: &Path, requested: Option<&str>) -> PathBuf {
    let Some(requested) = requested.map(str::trim).filter(|c| !c.is_empty()) else {
        return workdir.to_path_buf();
    };
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let expanded = match (requested.strip_prefix('~'), home) {
        (Some(""), Some(home)) => home,
        (Some(rest), Some(home)) if rest.starts_with('/') => home.join(&rest[1..]),
        _ => PathBuf::from(requested),
    };
    if expanded.is_absolute() {
        expanded
    } else {
        workdir.join(expanded)
    }
}

/// Downloaded audio removed on drop unless configured to keep it.
struct StagedFile {
    path: PathBuf,
    keep: bool,
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.keep {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
