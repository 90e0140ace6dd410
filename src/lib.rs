#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod error;
pub mod notification;
pub(crate) mod serde_helpers;
pub mod types;
pub mod ws;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Overrides the WebSocket endpoint base, e.g. `wss://example.com/api/v1/ws`
pub const WEBSOCKET_URL_VAR: &str = "EVOLVE_WEBSOCKET_URL";

/// HTTP API base the WebSocket endpoint is derived from when [`WEBSOCKET_URL_VAR`] is unset
pub const API_BASE_URL_VAR: &str = "EVOLVE_API_BASE_URL";

pub const USER_ID_VAR: &str = "EVOLVE_USER_ID";
