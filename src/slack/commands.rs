//! Slack slash command router.
//!
//! Two shapes are accepted: a single umbrella command (`/courier jobs`)
//! whose first word names the operation, or one slash command per
//! operation (`/jobs`).

use std::sync::Arc;

use slack_morphism::prelude::{
    SlackClient, SlackClientEventsUserState, SlackClientHyperHttpsConnector, SlackCommandEvent,
    SlackCommandEventResponse, SlackMessageContent, SlackMessageResponseType,
};
use tracing::{info, warn};

use crate::commands::CommandReply;
use crate::slack::{app_state, blocks};

/// Name of the umbrella slash command.
pub const UMBRELLA_COMMAND: &str = "courier";

/// Resolve a slash command and its text into an operation name and args.
#[must_use]
pub fn split_command(command: &str, text: &str) -> (String, String) {
    let command = command.trim().trim_start_matches('/');
    let text = text.trim();
    if command.eq_ignore_ascii_case(UMBRELLA_COMMAND) {
        let (name, args) = text.split_once(char::is_whitespace).unwrap_or((text, ""));
        let name = if name.is_empty() { "help" } else { name };
        (name.to_owned(), args.trim().to_owned())
    } else {
        (command.to_owned(), text.to_owned())
    }
}

fn ephemeral(reply: &CommandReply) -> SlackCommandEventResponse {
    let blocks = (!reply.actions.is_empty())
        .then(|| blocks::message_with_actions(&reply.text, &reply.actions));
    SlackCommandEventResponse {
        content: SlackMessageContent {
            text: Some(reply.text.clone()),
            blocks,
            attachments: None,
            upload: None,
            files: None,
            reactions: None,
            metadata: None,
        },
        response_type: Some(SlackMessageResponseType::Ephemeral),
    }
}

/// Handle incoming slash commands routed via Socket Mode.
///
/// # Errors
///
/// Returns an error if the command response cannot be constructed.
pub async fn handle_command(
    event: SlackCommandEvent,
    _client: Arc<SlackClient<SlackClientHyperHttpsConnector>>,
    state: SlackClientEventsUserState,
) -> slack_morphism::AnyStdResult<SlackCommandEventResponse> {
    let session_id = event.channel_id.to_string();
    let user_id = event.user_id.to_string();
    let (name, args) = split_command(
        &event.command.to_string(),
        event.text.as_deref().unwrap_or_default(),
    );
    info!(%session_id, %user_id, command = %name, "received slash command");

    let Some(app) = app_state(&state).await else {
        warn!("app state not available; cannot process command");
        return Ok(ephemeral(&CommandReply::text("Not ready yet, try again shortly.")));
    };

    let reply = app.router.dispatch(&session_id, &user_id, &name, &args).await;
    Ok(ephemeral(&reply))
}
