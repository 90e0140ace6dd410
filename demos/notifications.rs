//! Listen for notifications on a live server.
//!
//! This demo:
//! 1. Builds a connection config from the environment
//! 2. Subscribes a callback that branches on the message kind
//! 3. Attaches a notifier that logs instead of showing a desktop popup
//! 4. Follows the message stream and connection state until Ctrl-C
//!
//! Run with tracing enabled:
//! ```sh
//! EVOLVE_USER_ID=5976080378 RUST_LOG=info cargo run --example notifications --features tracing
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use evolve_notify::notification::{NotificationConfig, NotificationOptions, Notifier, Permission};
use evolve_notify::ws::ConnectionManager;
use evolve_notify::ws::config::ConnectionConfig;
use futures::StreamExt as _;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Notifier for terminals: every notification becomes a log line.
struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn permission(&self) -> Permission {
        Permission::Granted
    }

    async fn request_permission(&self) -> evolve_notify::Result<Permission> {
        Ok(Permission::Granted)
    }

    async fn notify(
        &self,
        title: &str,
        options: NotificationOptions,
    ) -> evolve_notify::Result<bool> {
        info!(title, tag = %options.tag, body = %options.body, "notification");
        Ok(true)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = ConnectionConfig::from_env()?;
    info!(endpoint = %config.endpoint()?, "Connecting");

    let manager = ConnectionManager::new()?;
    manager.subscribe(|message| match message.kind.as_deref() {
        Some("reminder") => info!(text = %message.text, "Reminder"),
        Some("task_completed") => info!(text = %message.text, "Task completed"),
        kind => debug!(?kind, text = %message.text, "Message"),
    });
    manager.attach_notifier(Arc::new(LogNotifier), NotificationConfig::default());

    let mut messages = Box::pin(manager.stream());
    let mut state = manager.state_receiver();
    manager.connect(config)?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = manager.status();
                info!(state = ?status.state, attempts = status.reconnect_attempts, "Connection state");
            }
            Some(result) = messages.next() => match result {
                Ok(message) => debug!(received_at = %message.received_at, "Streamed message"),
                Err(e) => warn!(error = %e, "Stream error"),
            },
        }
    }

    manager.shutdown();
    info!("Disconnected");
    Ok(())
}
