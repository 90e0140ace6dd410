#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::env;
use std::time::Duration;

use bon::Builder;
use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};
use url::Url;

use super::error::WsError;
use crate::error::Error;
use crate::{API_BASE_URL_VAR, Result, USER_ID_VAR, WEBSOCKET_URL_VAR};

pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(5000);
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Endpoint used by [`crate::ws::ConnectionManager::initialize`] when none is given.
pub const DEFAULT_ENDPOINT_BASE: &str = "ws://localhost:8000/api/v1/ws";
/// API base assumed when neither endpoint variable is set.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";

/// Where and how to connect.
///
/// Immutable for one attempt sequence; a new [`crate::ws::ConnectionManager::connect`]
/// call is needed to change it.
///
/// ```
/// use std::time::Duration;
/// use evolve_notify::ws::config::ConnectionConfig;
///
/// let config = ConnectionConfig::builder()
///     .endpoint_base("ws://localhost:8000/api/v1/ws")
///     .subscriber_id("5976080378")
///     .reconnect_interval(Duration::from_secs(2))
///     .build();
///
/// assert_eq!(config.max_reconnect_attempts, 10);
/// assert_eq!(
///     config.endpoint().unwrap().as_str(),
///     "ws://localhost:8000/api/v1/ws/5976080378"
/// );
/// ```
#[serde_as]
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    /// Base address of the server-side channel
    #[builder(into)]
    pub endpoint_base: String,
    /// Logical stream / session to attach to
    #[builder(into)]
    pub subscriber_id: String,
    /// Delay before each reconnection attempt
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "reconnectIntervalMs", default = "default_reconnect_interval")]
    #[builder(default = DEFAULT_RECONNECT_INTERVAL)]
    pub reconnect_interval: Duration,
    /// Upper bound on consecutive automatic reconnection attempts
    #[serde(default = "default_max_reconnect_attempts")]
    #[builder(default = DEFAULT_MAX_RECONNECT_ATTEMPTS)]
    pub max_reconnect_attempts: u32,
}

fn default_reconnect_interval() -> Duration {
    DEFAULT_RECONNECT_INTERVAL
}

fn default_max_reconnect_attempts() -> u32 {
    DEFAULT_MAX_RECONNECT_ATTEMPTS
}

impl ConnectionConfig {
    /// Config with default reconnection settings.
    #[must_use]
    pub fn new<E: Into<String>, S: Into<String>>(endpoint_base: E, subscriber_id: S) -> Self {
        Self::builder()
            .endpoint_base(endpoint_base)
            .subscriber_id(subscriber_id)
            .build()
    }

    /// Build a config from the process environment.
    ///
    /// The endpoint comes from [`WEBSOCKET_URL_VAR`], else from [`API_BASE_URL_VAR`] with its
    /// `http`/`https` scheme swapped for `ws`/`wss`, else from [`DEFAULT_API_BASE_URL`].
    /// The subscriber id comes from [`USER_ID_VAR`] and is required.
    pub fn from_env() -> Result<Self> {
        let endpoint_base =
            resolve_endpoint_base(env::var(WEBSOCKET_URL_VAR).ok(), env::var(API_BASE_URL_VAR).ok())?;
        let subscriber_id = env::var(USER_ID_VAR)
            .map_err(|_e| Error::validation(format!("{USER_ID_VAR} must be set")))?;

        let config = Self::new(endpoint_base, subscriber_id);
        config.validate()?;
        Ok(config)
    }

    /// Reject configs missing a required field.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint_base.trim().is_empty() {
            return Err(Error::validation("endpoint_base must not be empty"));
        }
        if self.subscriber_id.trim().is_empty() {
            return Err(Error::validation("subscriber_id must not be empty"));
        }
        Ok(())
    }

    /// The concrete connection target: `{endpoint_base}/{subscriber_id}`.
    pub fn endpoint(&self) -> Result<Url> {
        let endpoint = format!("{}/{}", self.endpoint_base, self.subscriber_id);
        let url = Url::parse(&endpoint)
            .map_err(|source| WsError::InvalidEndpoint { endpoint, source })?;
        Ok(url)
    }

    /// Whether `other` points at the same stream as `self`.
    #[must_use]
    pub fn same_target(&self, other: &Self) -> bool {
        self.endpoint_base == other.endpoint_base && self.subscriber_id == other.subscriber_id
    }
}

/// Pick the endpoint base from an explicit WebSocket URL or an HTTP API base.
pub fn resolve_endpoint_base(
    websocket_url: Option<String>,
    api_base_url: Option<String>,
) -> Result<String> {
    if let Some(url) = websocket_url.filter(|url| !url.trim().is_empty()) {
        return Ok(url);
    }

    let api_base = api_base_url
        .filter(|url| !url.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_owned());
    websocket_base_from_api(&api_base)
}

/// Swap an `http(s)` scheme for the matching `ws(s)` scheme, leaving the rest untouched.
pub fn websocket_base_from_api(api_base_url: &str) -> Result<String> {
    let converted = if let Some(rest) = api_base_url.strip_prefix("https") {
        format!("wss{rest}")
    } else if let Some(rest) = api_base_url.strip_prefix("http") {
        format!("ws{rest}")
    } else {
        api_base_url.to_owned()
    };

    let parsed = Url::parse(&converted)?;
    if !matches!(parsed.scheme(), "ws" | "wss") {
        return Err(Error::validation(format!(
            "unsupported scheme {} in {api_base_url}",
            parsed.scheme()
        )));
    }

    Ok(converted)
}
