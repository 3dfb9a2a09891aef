//! Slack Web API client and Socket Mode listener.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use slack_morphism::prelude::{
    SlackApiChatDeleteRequest, SlackApiChatPostMessageRequest, SlackApiChatUpdateRequest,
    SlackApiToken, SlackApiTokenType, SlackApiTokenValue, SlackBlock, SlackChannelId,
    SlackClient, SlackClientEventsListenerEnvironment, SlackClientHyperHttpsConnector,
    SlackClientSession, SlackClientSocketModeConfig, SlackClientSocketModeListener,
    SlackMessageContent, SlackSocketModeListenerCallbacks, SlackTs,
};
use tokio::{task::JoinHandle, time::sleep};
use tracing::{error, info, warn};

use crate::app::AppState;
use crate::slack::{blocks, commands, events};
use crate::transport::{BoxFuture, JobAction, MessageRef, Transport};
use crate::{config::SlackConfig, AppError, Result};

/// Maximum characters per posted message.
pub const MAX_MESSAGE_CHARS: usize = 3900;
/// Section blocks cap their text lower than plain messages.
pub const MAX_SECTION_CHARS: usize = 3000;

const MAX_POST_ATTEMPTS: u32 = 5;
const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Split `text` into chunks of at most `max_chars` characters.
///
/// Splits prefer the last newline inside the window so lines stay intact.
#[must_use]
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    if max_chars == 0 || text.chars().count() <= max_chars {
        return vec![text.to_owned()];
    }
    let mut chunks = Vec::new();
    let mut rest: Vec<char> = text.chars().collect();
    while rest.len() > max_chars {
        let window = &rest[..max_chars];
        let cut = window
            .iter()
            .rposition(|c| *c == '\n')
            .filter(|pos| *pos > 0)
            .map_or(max_chars, |pos| pos + 1);
        chunks.push(rest[..cut].iter().collect::<String>());
        rest.drain(..cut);
    }
    if !rest.is_empty() {
        chunks.push(rest.iter().collect());
    }
    chunks
}

fn content(text: String, blocks: Option<Vec<SlackBlock>>) -> SlackMessageContent {
    SlackMessageContent {
        text: Some(text),
        blocks,
        attachments: None,
        upload: None,
        files: None,
        reactions: None,
        metadata: None,
    }
}

fn post_request(channel: &str, content: SlackMessageContent) -> SlackApiChatPostMessageRequest {
    SlackApiChatPostMessageRequest {
        channel: SlackChannelId(channel.to_owned()),
        content,
        as_user: None,
        icon_emoji: None,
        icon_url: None,
        link_names: Some(true),
        parse: None,
        thread_ts: None,
        username: None,
        reply_broadcast: None,
        unfurl_links: Some(false),
        unfurl_media: None,
    }
}

/// Slack-backed [`Transport`]. Sessions are Slack channel IDs.
pub struct SlackService {
    client: Arc<SlackClient<SlackClientHyperHttpsConnector>>,
    bot_token: SlackApiToken,
    app_token: SlackApiToken,
    http: reqwest::Client,
}

impl SlackService {
    /// Create the Slack client. Nothing connects until
    /// [`SlackService::spawn_socket_mode`] is called.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the HTTPS connector cannot be created.
    pub fn new(config: &SlackConfig) -> Result<Self> {
        let connector = SlackClientHyperHttpsConnector::new()
            .map_err(|err| AppError::Transport(format!("failed to init slack connector: {err}")))?;
        let bot_token = SlackApiToken {
            token_value: SlackApiTokenValue(config.bot_token.clone()),
            cookie: None,
            team_id: None,
            scope: None,
            token_type: Some(SlackApiTokenType::Bot),
        };
        let app_token = SlackApiToken {
            token_value: SlackApiTokenValue(config.app_token.clone()),
            cookie: None,
            team_id: None,
            scope: None,
            token_type: Some(SlackApiTokenType::App),
        };
        Ok(Self {
            client: Arc::new(SlackClient::new(connector)),
            bot_token,
            app_token,
            http: reqwest::Client::new(),
        })
    }

    fn http_session(&self) -> SlackClientSession<'_, SlackClientHyperHttpsConnector> {
        self.client.open_session(&self.bot_token)
    }

    /// Start the Socket Mode listener. It stops when `state.shutdown` fires.
    pub fn spawn_socket_mode(&self, state: Arc<AppState>) -> JoinHandle<()> {
        let shutdown = state.shutdown.clone();
        let listener_env = Arc::new(
            SlackClientEventsListenerEnvironment::new(Arc::clone(&self.client))
                .with_error_handler(|err, _client, _state| {
                    error!(?err, "socket mode error");
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR
                })
                .with_user_state(state),
        );
        let callbacks = SlackSocketModeListenerCallbacks::new()
            .with_hello_events(|event, _client, _state| async move {
                info!(?event, "socket hello");
            })
            .with_command_events(commands::handle_command)
            .with_interaction_events(events::handle_interaction)
            .with_push_events(events::handle_push);
        let config = SlackClientSocketModeConfig {
            max_connections_count: SlackClientSocketModeConfig::DEFAULT_CONNECTIONS_COUNT,
            debug_connections: SlackClientSocketModeConfig::DEFAULT_DEBUG_CONNECTIONS,
            initial_backoff_in_seconds:
                SlackClientSocketModeConfig::DEFAULT_INITIAL_BACKOFF_IN_SECONDS,
            reconnect_timeout_in_seconds:
                SlackClientSocketModeConfig::DEFAULT_RECONNECT_TIMEOUT_IN_SECONDS,
            ping_interval_in_seconds: SlackClientSocketModeConfig::DEFAULT_PING_INTERVAL_IN_SECONDS,
            ping_failure_threshold_times:
                SlackClientSocketModeConfig::DEFAULT_PING_FAILURE_THRESHOLD_TIMES,
        };

        let listener = SlackClientSocketModeListener::new(&config, listener_env, callbacks);
        let app_token = self.app_token.clone();
        tokio::spawn(async move {
            if let Err(error) = listener.listen_for(&app_token).await {
                error!(?error, "socket mode listen failed");
                return;
            }
            tokio::select! {
                _ = listener.serve() => {}
                () = shutdown.cancelled() => {
                    listener.shutdown().await;
                }
            }
            info!("socket mode listener exited");
        })
    }

    async fn post(&self, request: &SlackApiChatPostMessageRequest) -> Result<SlackTs> {
        let mut backoff = INITIAL_RETRY_DELAY;
        let mut attempt = 1;
        loop {
            match self.http_session().chat_post_message(request).await {
                Ok(response) => return Ok(response.ts),
                Err(err) if attempt < MAX_POST_ATTEMPTS => {
                    let delay = match &err {
                        slack_morphism::errors::SlackClientError::RateLimitError(rate) => {
                            rate.retry_after.unwrap_or(backoff)
                        }
                        _ => backoff,
                    };
                    warn!(?err, attempt, delay = ?delay, "slack post failed; retrying");
                    sleep(delay).await;
                    backoff = (backoff * 2).min(MAX_RETRY_DELAY);
                    attempt += 1;
                }
                Err(err) => {
                    return Err(AppError::Transport(format!("failed to post message: {err}")));
                }
            }
        }
    }

    async fn send_chunks(
        &self,
        channel: &str,
        text: &str,
        actions: &[JobAction],
    ) -> Result<MessageRef> {
        let limit = if actions.is_empty() {
            MAX_MESSAGE_CHARS
        } else {
            MAX_SECTION_CHARS
        };
        let chunks = chunk_text(text, limit);
        let last = chunks.len().saturating_sub(1);
        let mut ts = None;
        for (index, chunk) in chunks.into_iter().enumerate() {
            let blocks = (index == last && !actions.is_empty())
                .then(|| blocks::message_with_actions(&chunk, actions));
            let request = post_request(channel, content(chunk, blocks));
            ts = Some(self.post(&request).await?);
        }
        ts.map(|ts| MessageRef(ts.0))
            .ok_or_else(|| AppError::Transport("nothing to send".into()))
    }

    async fn update(&self, channel: &str, message: &MessageRef, text: &str) -> Result<()> {
        let request = SlackApiChatUpdateRequest::new(
            SlackChannelId(channel.to_owned()),
            content(text.to_owned(), None),
            SlackTs(message.0.clone()),
        );
        self.http_session()
            .chat_update(&request)
            .await
            .map_err(|err| AppError::Transport(format!("failed to update message: {err}")))?;
        Ok(())
    }

    async fn remove(&self, channel: &str, message: &MessageRef) -> Result<()> {
        let request = SlackApiChatDeleteRequest::new(
            SlackChannelId(channel.to_owned()),
            SlackTs(message.0.clone()),
        );
        self.http_session()
            .chat_delete(&request)
            .await
            .map_err(|err| AppError::Transport(format!("failed to delete message: {err}")))?;
        Ok(())
    }

    async fn fetch_file(&self, url: &str, dest_dir: &Path) -> Result<PathBuf> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.bot_token.token_value.0)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| AppError::Transport(format!("failed to download file: {err}")))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|err| AppError::Transport(format!("failed to read file body: {err}")))?;

        tokio::fs::create_dir_all(dest_dir).await?;
        let dest = dest_dir.join(download_name(url));
        tokio::fs::write(&dest, &bytes).await?;
        info!(path = %dest.display(), bytes = bytes.len(), "downloaded attachment");
        Ok(dest)
    }
}

/// Local file name for a downloaded attachment URL.
#[must_use]
pub fn download_name(url: &str) -> String {
    let base = url
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .filter(|segment| !segment.contains(':'))
        .unwrap_or("attachment.bin");
    let safe: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}-{safe}", chrono::Utc::now().timestamp_millis())
}

impl Transport for SlackService {
    fn send<'a>(
        &'a self,
        session_id: &'a str,
        text: &'a str,
        actions: &'a [JobAction],
    ) -> BoxFuture<'a, Result<MessageRef>> {
        Box::pin(self.send_chunks(session_id, text, actions))
    }

    fn edit<'a>(
        &'a self,
        session_id: &'a str,
        message: &'a MessageRef,
        text: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.update(session_id, message, text))
    }

    fn delete<'a>(
        &'a self,
        session_id: &'a str,
        message: &'a MessageRef,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.remove(session_id, message))
    }

    fn download<'a>(
        &'a self,
        file_ref: &'a str,
        dest_dir: &'a Path,
    ) -> BoxFuture<'a, Result<PathBuf>> {
        Box::pin(self.fetch_file(file_ref, dest_dir))
    }
}
