//! Detached background job supervision.
//!
//! [`DetachedJobSupervisor::start`] launches a child process with its
//! combined output going to `<log_dir>/<id>.log` and returns at once. One
//! monitor task per job waits for the exit, keeps an optional status
//! display fresh, and posts a completion notice with the log tail.
//!
//! Cancellation is two-phase: SIGTERM immediately, then a forced kill
//! once the grace window elapses if the process is still alive.

use std::collections::{BTreeMap, HashMap};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::models::background::BackgroundJob;
use crate::transport::{MessageRef, Transport};
use crate::{AppError, Result};

/// Characters of log tail shown in the running-status display.
pub const STATUS_TAIL_CHARS: usize = 600;

/// Characters of log tail included in the completion notice.
pub const COMPLETION_TAIL_CHARS: usize = 2600;

/// Supervisor tuning.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Directory that receives one log file per job.
    pub log_dir: PathBuf,
    /// Status display refresh interval; `None` disables the display.
    pub heartbeat: Option<Duration>,
    /// Window between SIGTERM and the forced kill.
    pub kill_grace: Duration,
}

struct JobEntry {
    job: BackgroundJob,
    force_kill: CancellationToken,
    cancel_requested: bool,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    jobs: BTreeMap<u64, JobEntry>,
    by_session: HashMap<String, Vec<u64>>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    settings: SupervisorSettings,
    registry: Mutex<Registry>,
}

impl Inner {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, job_id: u64, apply: impl FnOnce(&mut BackgroundJob)) -> Option<BackgroundJob> {
        let mut registry = self.registry();
        let entry = registry.jobs.get_mut(&job_id)?;
        apply(&mut entry.job);
        Some(entry.job.clone())
    }
}

/// Process-wide registry and launcher of background jobs.
///
/// Jobs stay in the registry for the lifetime of the process.
#[derive(Clone)]
pub struct DetachedJobSupervisor {
    inner: Arc<Inner>,
}

impl DetachedJobSupervisor {
    /// Create an empty supervisor.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, settings: SupervisorSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                settings,
                registry: Mutex::new(Registry {
                    next_id: 1,
                    ..Registry::default()
                }),
            }),
        }
    }

    /// Launch `command` in `cwd` on behalf of `session_id`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Job` if the command is empty, the log file
    /// cannot be created, or the process fails to spawn. A job that
    /// failed to spawn stays registered as ended.
    pub async fn start(
        &self,
        session_id: &str,
        label: &str,
        command: Vec<String>,
        cwd: PathBuf,
    ) -> Result<BackgroundJob> {
        let Some((program, args)) = command.split_first() else {
            return Err(AppError::Job("empty command".into()));
        };
        let program = program.clone();
        let args = args.to_vec();

        let label = match label.trim() {
            "" => "(background job)".to_owned(),
            trimmed => trimmed.to_owned(),
        };

        let force_kill = CancellationToken::new();
        let job = {
            let mut registry = self.inner.registry();
            let job_id = registry.next_id;
            registry.next_id += 1;
            let job = BackgroundJob {
                job_id,
                session_id: session_id.to_owned(),
                label,
                command,
                cwd,
                log_path: self.inner.settings.log_dir.join(format!("{job_id}.log")),
                created_at: Utc::now(),
                started_at: None,
                ended_at: None,
                pid: None,
                exit_code: None,
                display: None,
            };
            registry.jobs.insert(
                job_id,
                JobEntry {
                    job: job.clone(),
                    force_kill: force_kill.clone(),
                    cancel_requested: false,
                },
            );
            registry
                .by_session
                .entry(session_id.to_owned())
                .or_default()
                .push(job_id);
            job
        };

        let child = match spawn_logged(&job, &program, &args).await {
            Ok(child) => child,
            Err(err) => {
                warn!(bg_job_id = job.job_id, session_id, %err, "background job launch failed");
                self.inner.update(job.job_id, |job| job.ended_at = Some(Utc::now()));
                return Err(err);
            }
        };

        let pid = child.id();
        let job = self
            .inner
            .update(job.job_id, |job| {
                job.pid = pid;
                job.started_at = Some(Utc::now());
            })
            .unwrap_or(job);

        info!(
            bg_job_id = job.job_id,
            session_id,
            cwd = %job.cwd.display(),
            command = %job.command_line(),
            "background job started"
        );

        let span = info_span!("bg_job", bg_job_id = job.job_id, session_id = %job.session_id);
        tokio::spawn(monitor(Arc::clone(&self.inner), job.clone(), child, force_kill).instrument(span));

        Ok(job)
    }

    /// Unfinished jobs of a session, in ID order.
    #[must_use]
    pub fn active_for_session(&self, session_id: &str) -> Vec<BackgroundJob> {
        let registry = self.inner.registry();
        registry
            .by_session
            .get(session_id)
            .into_iter()
            .flatten()
            .filter_map(|id| registry.jobs.get(id))
            .filter(|entry| entry.job.is_running())
            .map(|entry| entry.job.clone())
            .collect()
    }

    /// Most recent jobs of a session, newest first, at most `limit`.
    #[must_use]
    pub fn list_for_session(&self, session_id: &str, limit: usize) -> Vec<BackgroundJob> {
        let registry = self.inner.registry();
        registry
            .by_session
            .get(session_id)
            .into_iter()
            .flatten()
            .rev()
            .take(limit.max(1))
            .filter_map(|id| registry.jobs.get(id))
            .map(|entry| entry.job.clone())
            .collect()
    }

    /// Snapshot of one job.
    #[must_use]
    pub fn get(&self, job_id: u64) -> Option<BackgroundJob> {
        self.inner.registry().jobs.get(&job_id).map(|entry| entry.job.clone())
    }

    /// Number of unfinished jobs across all sessions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner
            .registry()
            .jobs
            .values()
            .filter(|entry| entry.job.is_running())
            .count()
    }

    /// Request termination of a running job.
    ///
    /// Returns `true` exactly once per running job; `false` for unknown
    /// or finished jobs and for repeated requests.
    #[must_use]
    pub fn cancel(&self, job_id: u64) -> bool {
        let (pid, force_kill) = {
            let mut registry = self.inner.registry();
            let Some(entry) = registry.jobs.get_mut(&job_id) else {
                return false;
            };
            if !entry.job.is_running() || entry.cancel_requested {
                return false;
            }
            let Some(pid) = entry.job.pid else {
                return false;
            };
            entry.cancel_requested = true;
            (pid, entry.force_kill.clone())
        };

        if !terminate(pid, &force_kill) {
            return false;
        }

        info!(bg_job_id = job_id, pid, "background job termination requested");
        let grace = self.inner.settings.kill_grace;
        tokio::spawn(
            async move {
                tokio::time::sleep(grace).await;
                force_kill.cancel();
            }
            .instrument(info_span!("bg_kill_timer", bg_job_id = job_id)),
        );
        true
    }
}

/// Open the log, write the command header, and spawn the process.
async fn spawn_logged(job: &BackgroundJob, program: &str, args: &[String]) -> Result<Child> {
    if let Some(dir) = job.log_path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|err| AppError::Job(format!("failed to create log dir: {err}")))?;
    }

    let mut log = File::create(&job.log_path)
        .await
        .map_err(|err| AppError::Job(format!("failed to create log file: {err}")))?;
    let header = format!("$ {}\n", job.command_line());
    log.write_all(header.as_bytes())
        .await
        .map_err(|err| AppError::Job(format!("failed to write log header: {err}")))?;
    log.flush()
        .await
        .map_err(|err| AppError::Job(format!("failed to write log header: {err}")))?;
    let log = log.into_std().await;
    let stderr_log = log
        .try_clone()
        .map_err(|err| AppError::Job(format!("failed to share log file: {err}")))?;

    Command::new(program)
        .args(args)
        .current_dir(&job.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(stderr_log))
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| AppError::Job(format!("failed to launch {program}: {err}")))
}

#[cfg(unix)]
fn terminate(pid: u32, _force_kill: &CancellationToken) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(err) => {
            warn!(pid, %err, "failed to signal background job");
            false
        }
    }
}

#[cfg(not(unix))]
fn terminate(_pid: u32, force_kill: &CancellationToken) -> bool {
    // No graceful signal available; go straight to the forced kill.
    force_kill.cancel();
    true
}

async fn monitor(
    inner: Arc<Inner>,
    job: BackgroundJob,
    mut child: Child,
    force_kill: CancellationToken,
) {
    let started = Instant::now();
    let transport = Arc::clone(&inner.transport);
    let mut display: Option<MessageRef> = None;
    let mut ticker: Option<Interval> = inner.settings.heartbeat.map(|period| {
        let mut ticker = tokio::time::interval_at(started + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    if ticker.is_some() {
        refresh_display(&*transport, &job, started, &mut display).await;
        inner.update(job.job_id, |job| job.display.clone_from(&display));
    }

    let mut killed = false;
    let status: std::io::Result<ExitStatus> = loop {
        tokio::select! {
            status = child.wait() => break status,
            () = force_kill.cancelled(), if !killed => {
                killed = true;
                warn!("grace window elapsed, killing background job");
                if let Err(err) = child.start_kill() {
                    warn!(%err, "forced kill failed");
                }
            }
            () = next_tick(ticker.as_mut()) => {
                refresh_display(&*transport, &job, started, &mut display).await;
                inner.update(job.job_id, |job| job.display.clone_from(&display));
            }
        }
    };

    let exit_code = match status {
        Ok(status) => status.code(),
        Err(err) => {
            warn!(%err, "failed to wait for background job");
            None
        }
    };
    let job = inner
        .update(job.job_id, |job| {
            job.exit_code = exit_code;
            job.ended_at = Some(Utc::now());
            job.display = None;
        })
        .unwrap_or(job);

    info!(exit_code = %job.exit_code_label(), "background job finished");

    if let Some(message) = display {
        if let Err(err) = transport.delete(&job.session_id, &message).await {
            info!(%err, "background status delete failed");
        }
    }

    let notice = completion_text(&job, &read_log_tail(&job.log_path, COMPLETION_TAIL_CHARS).await);
    if let Err(err) = transport.send(&job.session_id, &notice, &[]).await {
        warn!(%err, "background completion notice failed");
    }
}

async fn next_tick(ticker: Option<&mut Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Post or edit the status display. Failures drop the display so the next
/// tick posts a fresh one.
async fn refresh_display(
    transport: &dyn Transport,
    job: &BackgroundJob,
    started: Instant,
    display: &mut Option<MessageRef>,
) {
    let tail = read_log_tail(&job.log_path, STATUS_TAIL_CHARS).await;
    let text = status_text(job, started.elapsed(), &tail);

    match display.as_ref() {
        Some(message) => {
            if let Err(err) = transport.edit(&job.session_id, message, &text).await {
                info!(%err, "background status edit failed");
                *display = None;
            }
        }
        None => match transport.send(&job.session_id, &text, &[]).await {
            Ok(message) => *display = Some(message),
            Err(err) => info!(%err, "background status send failed"),
        },
    }
}

/// Running-status display text.
#[must_use]
pub fn status_text(job: &BackgroundJob, elapsed: Duration, tail: &str) -> String {
    let secs = elapsed.as_secs();
    let mut text = format!(
        "⏳ Background job #{} running ({}m {}s)\n{}",
        job.job_id,
        secs / 60,
        secs % 60,
        job.label
    );
    if !tail.trim().is_empty() {
        text.push_str("\n```\n");
        text.push_str(tail.trim());
        text.push_str("\n```");
    }
    text
}

/// Completion notice text.
#[must_use]
pub fn completion_text(job: &BackgroundJob, tail: &str) -> String {
    let mut text = format!(
        "Background job #{} finished (exit={}).\n{}\nLog: {}",
        job.job_id,
        job.exit_code_label(),
        job.label,
        job.log_path.display()
    );
    if !tail.trim().is_empty() {
        text.push_str("\n\nTail:\n```\n");
        text.push_str(tail.trim());
        text.push_str("\n```");
    }
    text
}

/// Last `max_chars` characters of a log, prefixed with `…` when cut.
///
/// Only the final `4 * max_chars` bytes are read, enough for any UTF-8
/// text. A missing or unreadable log yields an empty string.
pub async fn read_log_tail(path: &Path, max_chars: usize) -> String {
    let Ok(mut file) = File::open(path).await else {
        return String::new();
    };
    let Ok(len) = file.metadata().await.map(|meta| meta.len()) else {
        return String::new();
    };
    let window = u64::try_from(max_chars)
        .unwrap_or(u64::MAX)
        .saturating_mul(4);
    let start = len.saturating_sub(window);
    if start > 0 && file.seek(SeekFrom::Start(start)).await.is_err() {
        return String::new();
    }
    let mut bytes = Vec::new();
    if file.read_to_end(&mut bytes).await.is_err() {
        return String::new();
    }

    let data = String::from_utf8_lossy(&bytes);
    // A seek can land inside a multi-byte character.
    let text: &str = if start > 0 {
        data.trim_start_matches('\u{fffd}')
    } else {
        &data
    };
    let total = text.chars().count();
    if start == 0 && total <= max_chars {
        return text.to_owned();
    }
    let tail: String = text.chars().skip(total.saturating_sub(max_chars)).collect();
    format!("…\n{tail}")
}
