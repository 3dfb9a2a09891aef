//! Agent collaborators: reply selection, codex arguments, shell runs.

use std::path::Path;

use agent_courier::config::{AgentConfig, AgentKind};
use agent_courier::driver::codex::CodexAgent;
use agent_courier::driver::shell::ShellAgent;
use agent_courier::driver::{build_agent, Agent, AgentEvent, AgentReply, AskOptions};
use agent_courier::AppError;
use tokio::sync::mpsc;

fn options(elevated_trust: bool) -> AskOptions {
    AskOptions {
        elevated_trust,
        sandbox_mode: "read-only".into(),
    }
}

fn agent_config(kind: AgentKind, command: &[&str]) -> AgentConfig {
    AgentConfig {
        kind,
        command: command.iter().map(|s| (*s).to_owned()).collect(),
        workdir: std::env::temp_dir(),
        ..AgentConfig::default()
    }
}

#[test]
fn reply_prefers_primary_then_stdout_then_stderr() {
    let reply = AgentReply::from_outputs("  final  ", "out".into(), "err".into());
    assert_eq!(reply.text, "final");
    assert_eq!(reply.raw_stdout, "out");

    assert_eq!(AgentReply::from_outputs("", " out\n".into(), "err".into()).text, "out");
    assert_eq!(AgentReply::from_outputs("", "\n".into(), "err".into()).text, "err");
    assert_eq!(AgentReply::from_outputs("", String::new(), String::new()).text, "(no output)");
}

#[test]
fn codex_args_follow_trust_mode() {
    let mut config = agent_config(AgentKind::Codex, &[]);
    config.model = Some("o4-mini".into());
    config.extra_args = vec!["--profile".into(), "fast".into()];
    let agent = CodexAgent::new(&config).expect("agent");
    let last = Path::new("/tmp/last.txt");

    let sandboxed = agent.exec_args(&options(false), last);
    assert_eq!(&sandboxed[..2], ["exec", "--json"]);
    let pos = sandboxed.iter().position(|a| a == "--sandbox").expect("sandbox flag");
    assert_eq!(sandboxed[pos + 1], "read-only");
    assert!(!sandboxed.contains(&"--dangerously-bypass-approvals-and-sandbox".to_owned()));
    let pos = sandboxed
        .iter()
        .position(|a| a == "--output-last-message")
        .expect("last message flag");
    assert_eq!(sandboxed[pos + 1], "/tmp/last.txt");
    assert!(sandboxed.windows(2).any(|w| w == ["-m", "o4-mini"]));
    assert_eq!(&sandboxed[sandboxed.len() - 2..], ["--profile", "fast"]);

    let elevated = agent.exec_args(&options(true), last);
    assert!(elevated.contains(&"--dangerously-bypass-approvals-and-sandbox".to_owned()));
    assert!(!elevated.contains(&"--sandbox".to_owned()));
}

#[test]
fn codex_command_override_keeps_leading_args() {
    let agent = CodexAgent::new(&agent_config(AgentKind::Codex, &["npx", "codex"])).expect("agent");
    let args = agent.exec_args(&options(false), Path::new("/tmp/x"));
    assert_eq!(&args[..3], ["codex", "exec", "--json"]);
}

#[test]
fn authorization_urls_come_from_item_text_fields() {
    let agent = CodexAgent::new(&agent_config(AgentKind::Codex, &[])).expect("agent");

    let line = r#"{"type":"item.completed","item":{"text":"open https://accounts.google.com/o/oauth2/auth?client_id=1&scope=x now"}}"#;
    assert_eq!(
        agent.authorization_urls(line),
        vec!["https://accounts.google.com/o/oauth2/auth?client_id=1&scope=x"]
    );

    let output = r#"{"item":{"aggregated_output":"visit https://accounts.google.com/o/oauth2/v2/auth?a=b"}}"#;
    assert_eq!(agent.authorization_urls(output).len(), 1);

    assert!(agent
        .authorization_urls(r#"{"item":{"text":"https://example.com/o/oauth2/auth"}}"#)
        .is_empty());
    assert!(agent.authorization_urls("not json").is_empty());
    assert!(agent
        .authorization_urls(r#"{"msg":"https://accounts.google.com/o/oauth2/auth"}"#)
        .is_empty());
}

#[test]
fn shell_agent_requires_a_command() {
    let err = build_agent(&agent_config(AgentKind::Shell, &[])).err().expect("error");
    assert!(matches!(err, AppError::Config(_)));
}

#[cfg(unix)]
#[tokio::test]
async fn shell_agent_answers_from_stdout() {
    let agent = ShellAgent::new(&agent_config(AgentKind::Shell, &["cat"])).expect("agent");
    let (tx, mut rx) = mpsc::channel::<AgentEvent>(1);

    let reply = agent.ask("echo me", &options(false), tx).await.expect("reply");
    assert_eq!(reply.text, "echo me");
    assert!(rx.recv().await.is_none());
}

#[cfg(unix)]
#[tokio::test]
async fn shell_agent_sees_session_preferences() {
    let agent = ShellAgent::new(&agent_config(
        AgentKind::Shell,
        &["sh", "-c", "echo $AGENT_COURIER_SANDBOX $AGENT_COURIER_ELEVATED"],
    ))
    .expect("agent");
    let (tx, _rx) = mpsc::channel(1);

    let reply = agent.ask("", &options(true), tx).await.expect("reply");
    assert_eq!(reply.text, "read-only 1");
}

#[cfg(unix)]
#[tokio::test]
async fn shell_agent_times_out() {
    let mut config = agent_config(AgentKind::Shell, &["sleep", "30"]);
    config.timeout_seconds = 1;
    let agent = ShellAgent::new(&config).expect("agent");
    let (tx, _rx) = mpsc::channel(1);

    let err = agent.ask("", &options(false), tx).await.expect_err("timeout");
    assert!(matches!(err, AppError::AgentTimeout(1)));
}

#[tokio::test]
async fn missing_agent_program_is_named() {
    let agent = ShellAgent::new(&agent_config(
        AgentKind::Shell,
        &["definitely-not-a-real-agent-xyz"],
    ))
    .expect("agent");
    let (tx, _rx) = mpsc::channel(1);

    let err = agent.ask("hi", &options(false), tx).await.expect_err("missing");
    match err {
        AppError::Agent(msg) => assert_eq!(msg, "definitely-not-a-real-agent-xyz not found on PATH"),
        other => panic!("unexpected error: {other}"),
    }
}
