//! Prompt assembly.

use crate::models::state::{ChatMessage, Role};

/// Preamble sent ahead of every conversation.
pub const SYSTEM_PROMPT: &str = "\
You are a helpful assistant running as a local command-line agent.
Keep answers short and actionable. No emojis.

When a request would run a command likely to take more than five minutes, \
launch it as a detached background job so the chat stays responsive. \
To do that, reply with exactly this directive and nothing sensitive:

TG_COURIER_TOOL: DETACH
{\"title\":\"short label\",\"cmd\":\"shell command or [\\\"argv\\\", \\\"list\\\"]\",\"cwd\":\"optional working directory\"}
";

/// Render the full prompt for one agent call.
///
/// Layout: preamble (plus notes context), one `User:`/`Assistant:` block
/// per history entry, the new user turn, and a trailing `Assistant:` cue.
#[must_use]
pub fn render_prompt(
    system_prompt: &str,
    context: Option<&str>,
    history: &[ChatMessage],
    user_text: &str,
) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(history.len() * 2 + 6);

    let mut preamble = system_prompt.trim().to_owned();
    if let Some(context) = context.map(str::trim).filter(|c| !c.is_empty()) {
        if !preamble.is_empty() {
            preamble.push_str("\n\n");
        }
        preamble.push_str(context);
    }
    if !preamble.is_empty() {
        parts.push(preamble);
        parts.push(String::new());
    }

    for message in history {
        let speaker = match message.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        parts.push(format!("{speaker}: {}", message.text).trim_end().to_owned());
        parts.push(String::new());
    }

    parts.push(format!("User: {user_text}").trim_end().to_owned());
    parts.push(String::new());
    parts.push("Assistant:".to_owned());

    let mut prompt = parts.join("\n").trim().to_owned();
    prompt.push('\n');
    prompt
}
