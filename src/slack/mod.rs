//! Slack Socket Mode transport adapter.

pub mod blocks;
pub mod client;
pub mod commands;
pub mod events;

use std::sync::Arc;

use slack_morphism::prelude::SlackClientEventsUserState;

use crate::app::AppState;

/// Fetch the shared [`AppState`] injected into the listener environment.
pub(crate) async fn app_state(state: &SlackClientEventsUserState) -> Option<Arc<AppState>> {
    let guard = state.read().await;
    guard.get_user_state::<Arc<AppState>>().cloned()
}
