//! Prompt rendering.

use agent_courier::models::state::{ChatMessage, Role};
use agent_courier::orchestrator::directive::DETACH_SENTINEL;
use agent_courier::orchestrator::prompt::{render_prompt, SYSTEM_PROMPT};

fn message(role: Role, text: &str) -> ChatMessage {
    ChatMessage {
        role,
        text: text.into(),
        ts_ms: 0,
    }
}

#[test]
fn renders_history_then_new_turn() {
    let history = [
        message(Role::User, "hi"),
        message(Role::Assistant, "hello"),
    ];
    let prompt = render_prompt("Be brief.", None, &history, "what now?");

    assert_eq!(
        prompt,
        "Be brief.\n\nUser: hi\n\nAssistant: hello\n\nUser: what now?\n\nAssistant:\n"
    );
}

#[test]
fn context_follows_preamble() {
    let prompt = render_prompt("Be brief.", Some("Memory notes:\n- a"), &[], "go");

    assert!(prompt.starts_with("Be brief.\n\nMemory notes:\n- a\n\nUser: go"));
}

#[test]
fn blank_context_and_preamble_are_skipped() {
    let prompt = render_prompt("", Some("   "), &[], "go");
    assert_eq!(prompt, "User: go\n\nAssistant:\n");
}

#[test]
fn system_prompt_teaches_the_detach_directive() {
    assert!(SYSTEM_PROMPT.contains(DETACH_SENTINEL));
    assert!(SYSTEM_PROMPT.contains("\"cmd\""));
}
