#![forbid(unsafe_code)]

//! `agent-courier`: chat front end for long-running coding agents.
//!
//! Bootstraps configuration, the session job queues, the background job
//! supervisor, the Slack Socket Mode transport, and the optional health
//! endpoint.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use agent_courier::app::{AppState, MessageIntake};
use agent_courier::commands::CommandRouter;
use agent_courier::driver::build_agent;
use agent_courier::health::serve_health;
use agent_courier::integrations::{
    CommandAuthFlow, CommandTranscriber, MarkdownNotes, NotesProvider,
};
use agent_courier::orchestrator::{
    DetachedJobSupervisor, JobPipeline, PipelineDeps, SessionJobQueue, SupervisorSettings,
};
use agent_courier::persistence::{SessionStateStore, SharedStateStore};
use agent_courier::slack::client::SlackService;
use agent_courier::transport::Transport;
use agent_courier::{AppError, GlobalConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-courier", about = "Chat front end for coding agents", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the agent working directory.
    #[arg(long)]
    workdir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-courier bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;

    if let Some(workdir) = args.workdir {
        let canonical = workdir
            .canonicalize()
            .map_err(|err| AppError::Config(format!("invalid workdir override: {err}")))?;
        config.agent.workdir = canonical;
    }

    // Load Slack credentials from keyring / env vars.
    config.load_credentials().await?;

    for dir in [config.data_dir.clone(), config.bg_jobs_dir(), config.inbox_dir()] {
        tokio::fs::create_dir_all(&dir).await.map_err(|err| {
            AppError::Config(format!("cannot create {}: {err}", dir.display()))
        })?;
    }

    let config = Arc::new(config);
    info!(data_dir = %config.data_dir.display(), "configuration loaded");

    // ── Build collaborators ─────────────────────────────
    let slack = Arc::new(SlackService::new(&config.slack)?);
    let transport: Arc<dyn Transport> = slack.clone();

    let store = SharedStateStore::new(SessionStateStore::new(config.state_path()));
    let supervisor = DetachedJobSupervisor::new(
        Arc::clone(&transport),
        SupervisorSettings {
            log_dir: config.bg_jobs_dir(),
            heartbeat: config.bg_heartbeat_interval(),
            kill_grace: config.bg_kill_grace(),
        },
    );

    let notes: Option<Arc<dyn NotesProvider>> = config.notes.enabled.then(|| {
        Arc::new(MarkdownNotes::new(config.notes_dir(), &config.notes)) as Arc<dyn NotesProvider>
    });

    let pipeline = JobPipeline::new(PipelineDeps {
        config: Arc::clone(&config),
        transport: Arc::clone(&transport),
        store: store.clone(),
        agent: build_agent(&config.agent)?,
        transcriber: Arc::new(CommandTranscriber::new(config.stt.clone())),
        notes,
        auth_flow: Arc::new(CommandAuthFlow::new(config.oauth.clone())),
        supervisor: supervisor.clone(),
    });
    let queue = SessionJobQueue::new(Arc::new(pipeline));
    let router = CommandRouter::new(
        Arc::clone(&config),
        store,
        queue.clone(),
        supervisor.clone(),
    );

    let ct = CancellationToken::new();
    let (intake, intake_handle) =
        MessageIntake::spawn(router.clone(), Arc::clone(&transport), ct.clone());
    let state = Arc::new(AppState {
        config: Arc::clone(&config),
        router,
        transport: Arc::clone(&transport),
        intake,
        shutdown: ct.clone(),
    });

    // ── Start listeners ─────────────────────────────────
    let socket_handle = slack.spawn_socket_mode(Arc::clone(&state));
    info!("slack socket mode started");

    let health_handle = (config.http_port > 0).then(|| {
        let health_ct = ct.clone();
        let health_supervisor = supervisor.clone();
        let port = config.http_port;
        tokio::spawn(async move {
            if let Err(err) = serve_health(port, health_supervisor, health_ct).await {
                error!(%err, "health endpoint failed");
            }
        })
    });

    info!("agent-courier ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    // ── Graceful shutdown ───────────────────────────────
    queue.cancel_all().await;
    if let Some(channel) = config.slack.channel_id.as_deref() {
        let notice = format!(
            "⚠️ agent-courier shutting down. {} background job(s) still running.",
            supervisor.active_count()
        );
        if let Err(err) = transport.send(channel, &notice, &[]).await {
            error!(%err, "failed to post shutdown notification");
        }
    }

    if let Err(err) = socket_handle.await {
        error!(%err, "socket mode task panicked");
    }
    if let Err(err) = intake_handle.await {
        error!(%err, "message intake task panicked");
    }
    if let Some(handle) = health_handle {
        if let Err(err) = handle.await {
            error!(%err, "health task panicked");
        }
    }
    info!("agent-courier shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
