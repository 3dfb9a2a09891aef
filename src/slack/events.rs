//! Slack push-event and interaction handlers.

use std::sync::Arc;

use slack_morphism::prelude::{
    SlackClient, SlackClientEventsUserState, SlackClientHyperHttpsConnector,
    SlackEventCallbackBody, SlackFile, SlackInteractionEvent, SlackMessageEvent,
    SlackMessageEventType, SlackPushEventCallback,
};
use tracing::{debug, info, warn};

use crate::app::{AppState, InboundBody, InboundMessage};
use crate::commands::CommandReply;
use crate::slack::app_state;

const AUDIO_EXTENSIONS: &[&str] = &[
    "aac", "flac", "m4a", "mp3", "mp4", "oga", "ogg", "opus", "wav", "webm",
];

/// Whether an uploaded file looks like a voice note or audio clip.
#[must_use]
pub fn is_audio(mimetype: Option<&str>, name: Option<&str>) -> bool {
    if mimetype.is_some_and(|mime| mime.to_ascii_lowercase().starts_with("audio/")) {
        return true;
    }
    name.and_then(|name| name.rsplit_once('.'))
        .is_some_and(|(_, ext)| AUDIO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

fn audio_url(file: &SlackFile) -> Option<String> {
    let mimetype = file.mimetype.as_ref().map(ToString::to_string);
    if !is_audio(mimetype.as_deref(), file.name.as_deref()) {
        return None;
    }
    file.url_private_download
        .as_ref()
        .or(file.url_private.as_ref())
        .map(ToString::to_string)
}

async fn reply(app: &AppState, session_id: &str, reply: CommandReply) {
    if let Err(err) = app
        .transport
        .send(session_id, &reply.text, &reply.actions)
        .await
    {
        warn!(session_id, %err, "failed to post reply");
    }
}

/// Reduce a Slack message to an inbound job request.
///
/// Bot posts, edits and other subtypes, messages outside the served
/// channels, and empty texts without audio yield `None`.
fn inbound_message(app: &AppState, message: &SlackMessageEvent) -> Option<InboundMessage> {
    if message.sender.bot_id.is_some() {
        return None;
    }
    if !matches!(message.subtype, None | Some(SlackMessageEventType::FileShare)) {
        debug!(subtype = ?message.subtype, "message subtype ignored");
        return None;
    }
    let user_id = message.sender.user.as_ref()?.to_string();
    let session_id = message.origin.channel.as_ref()?.to_string();
    let is_direct = message
        .origin
        .channel_type
        .as_ref()
        .is_some_and(|kind| kind.0 == "im");
    if !app.serves_channel(&session_id, is_direct) {
        debug!(%session_id, "message outside served channels ignored");
        return None;
    }

    let text = message
        .content
        .as_ref()
        .and_then(|content| content.text.clone())
        .unwrap_or_default();
    let audio = message
        .content
        .as_ref()
        .and_then(|content| content.files.as_ref())
        .and_then(|files| files.iter().find_map(audio_url));

    let body = match audio {
        Some(file_ref) => InboundBody::Audio {
            file_ref,
            caption: Some(text.trim().to_owned()).filter(|caption| !caption.is_empty()),
        },
        None if text.trim().is_empty() => return None,
        None => InboundBody::Text(text),
    };
    Some(InboundMessage {
        session_id,
        user_id,
        body,
    })
}

/// Handle Events API pushes delivered via Socket Mode.
///
/// Messages are handed to the intake task in delivery order; the envelope
/// is acknowledged without waiting for the job to be queued.
///
/// # Errors
///
/// Never fails; unusable events are logged and dropped.
pub async fn handle_push(
    event: SlackPushEventCallback,
    _client: Arc<SlackClient<SlackClientHyperHttpsConnector>>,
    state: SlackClientEventsUserState,
) -> slack_morphism::UserCallbackResult<()> {
    let SlackEventCallbackBody::Message(message) = event.event else {
        debug!("push event ignored");
        return Ok(());
    };
    let Some(app) = app_state(&state).await else {
        warn!("app state not available; cannot process message");
        return Ok(());
    };
    if let Some(inbound) = inbound_message(&app, &message) {
        if let Err(err) = app.intake.submit(inbound).await {
            warn!(%err, "inbound message dropped");
        }
    }
    Ok(())
}

/// Handle button presses delivered via Socket Mode.
///
/// # Errors
///
/// Never fails; unusable interactions are logged and dropped.
pub async fn handle_interaction(
    event: SlackInteractionEvent,
    _client: Arc<SlackClient<SlackClientHyperHttpsConnector>>,
    state: SlackClientEventsUserState,
) -> slack_morphism::UserCallbackResult<()> {
    let SlackInteractionEvent::BlockActions(block_event) = event else {
        debug!("interaction ignored");
        return Ok(());
    };
    let Some(app) = app_state(&state).await else {
        warn!("app state not available; cannot process interaction");
        return Ok(());
    };

    let user_id = block_event
        .user
        .as_ref()
        .map(|u| u.id.to_string())
        .unwrap_or_default();
    let Some(session_id) = block_event.channel.as_ref().map(|c| c.id.to_string()) else {
        warn!("block action without channel; ignoring");
        return Ok(());
    };
    if user_id.is_empty() {
        warn!("block action with empty user ID; ignoring");
        return Ok(());
    }

    let actions: Vec<(String, String)> = block_event
        .actions
        .iter()
        .flatten()
        .map(|action| {
            (
                action.action_id.to_string(),
                action.value.clone().unwrap_or_default(),
            )
        })
        .collect();

    tokio::spawn(async move {
        for (action_id, value) in actions {
            info!(%session_id, %user_id, %action_id, "block action");
            let response = app
                .router
                .handle_action(&session_id, &user_id, &action_id, &value)
                .await;
            reply(&app, &session_id, response).await;
        }
    });
    Ok(())
}
