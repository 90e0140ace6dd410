//! Optional desktop notification side effect.
//!
//! The connection manager never displays anything itself. When a [`Notifier`] is
//! attached, every delivered message is also handed to [`dispatch`] on a background
//! task; whatever happens there is logged and otherwise ignored.

use std::sync::Arc;

use async_trait::async_trait;
use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::types::InboundMessage;

pub const DEFAULT_TITLE: &str = "Evolve Engine";
pub const DEFAULT_ICON: &str = "/favicon.svg";
pub const DEFAULT_BADGE: &str = "/favicon-192.png";
/// Grouping tag used when a message has no `kind`.
pub const DEFAULT_TAG: &str = "websocket-notification";

/// Permission state of the notification capability.
#[non_exhaustive]
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Permission {
    /// The user has not decided yet
    #[default]
    Default,
    Granted,
    Denied,
}

/// Display options for one notification.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationOptions {
    #[builder(into)]
    pub body: String,
    /// De-duplication / grouping tag
    #[builder(into)]
    pub tag: String,
    #[builder(into)]
    pub icon: Option<String>,
    #[builder(into)]
    pub badge: Option<String>,
    #[builder(default)]
    pub require_interaction: bool,
    #[builder(default)]
    pub silent: bool,
}

impl NotificationOptions {
    /// Options for `message`: the body is the message text followed by the compact JSON
    /// payload on its own line, the tag is the message kind or `config.fallback_tag`.
    #[must_use]
    pub fn for_message(message: &InboundMessage, config: &NotificationConfig) -> Self {
        let body = match &message.payload {
            Some(payload) => format!("{}\n{payload}", message.text),
            None => message.text.clone(),
        };

        Self::builder()
            .body(body)
            .tag(
                message
                    .kind
                    .clone()
                    .unwrap_or_else(|| config.fallback_tag.clone()),
            )
            .maybe_icon(config.icon.clone())
            .maybe_badge(config.badge.clone())
            .build()
    }
}

/// Presentation settings applied to every notification.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct NotificationConfig {
    #[builder(into, default = DEFAULT_TITLE.to_owned())]
    pub title: String,
    #[builder(into, default = DEFAULT_TAG.to_owned())]
    pub fallback_tag: String,
    #[builder(into)]
    pub icon: Option<String>,
    #[builder(into)]
    pub badge: Option<String>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self::builder()
            .icon(DEFAULT_ICON)
            .badge(DEFAULT_BADGE)
            .build()
    }
}

/// OS or browser level notification capability.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    /// Permission as currently known, without prompting.
    fn permission(&self) -> Permission;

    /// Ask the user for permission. May wait on user interaction.
    async fn request_permission(&self) -> Result<Permission>;

    /// Display a notification. `Ok(false)` means the capability declined to show it.
    async fn notify(&self, title: &str, options: NotificationOptions) -> Result<bool>;
}

/// Show `message` through `notifier`, requesting permission first when needed.
///
/// Never fails: every problem is logged and swallowed.
pub async fn dispatch(
    notifier: Arc<dyn Notifier>,
    config: NotificationConfig,
    message: InboundMessage,
) {
    let mut permission = notifier.permission();
    if permission != Permission::Granted {
        permission = match notifier.request_permission().await {
            Ok(permission) => permission,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "Notification permission request failed");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                return;
            }
        };
    }

    if permission != Permission::Granted {
        #[cfg(feature = "tracing")]
        tracing::debug!(%permission, "Notification permission not granted, skipping");
        return;
    }

    let options = NotificationOptions::for_message(&message, &config);
    match notifier.notify(&config.title, options).await {
        Ok(true) => {
            #[cfg(feature = "tracing")]
            tracing::debug!(text = %message.text, "Desktop notification shown");
        }
        Ok(false) => {
            #[cfg(feature = "tracing")]
            tracing::debug!(text = %message.text, "Desktop notification declined");
        }
        Err(e) => {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %e, "Failed to show desktop notification");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
        }
    }
}
