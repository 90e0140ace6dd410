#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;

/// WebSocket error variants.
#[non_exhaustive]
#[derive(Debug)]
pub enum WsError {
    /// Error connecting to or communicating with the WebSocket server
    #[cfg(feature = "ws")]
    Connection(tokio_tungstenite::tungstenite::Error),
    /// Error parsing an inbound frame
    MessageParse(serde_json::Error),
    /// The endpoint derived from the connection config is not a valid URL
    InvalidEndpoint {
        /// The rejected endpoint string
        endpoint: String,
        /// Underlying URL parse failure
        source: url::ParseError,
    },
    /// WebSocket connection was closed
    ConnectionClosed,
    /// Opening handshake did not finish in time
    Timeout,
    /// Message stream lagged and missed messages
    Lagged {
        /// Number of messages that were missed
        count: u64,
    },
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(feature = "ws")]
            Self::Connection(e) => write!(f, "WebSocket connection error: {e}"),
            Self::MessageParse(e) => write!(f, "Failed to parse WebSocket message: {e}"),
            Self::InvalidEndpoint { endpoint, source } => {
                write!(f, "Invalid WebSocket endpoint {endpoint}: {source}")
            }
            Self::ConnectionClosed => write!(f, "WebSocket connection closed"),
            Self::Timeout => write!(f, "WebSocket operation timed out"),
            Self::Lagged { count } => write!(f, "Message stream lagged, missed {count} messages"),
        }
    }
}

impl StdError for WsError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            #[cfg(feature = "ws")]
            Self::Connection(e) => Some(e),
            Self::MessageParse(e) => Some(e),
            Self::InvalidEndpoint { source, .. } => Some(source),
            _ => None,
        }
    }
}

// Integration with main Error type
impl From<WsError> for crate::error::Error {
    fn from(e: WsError) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, e)
    }
}

#[cfg(feature = "ws")]
impl From<tokio_tungstenite::tungstenite::Error> for crate::error::Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, WsError::Connection(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Kind};

    #[test]
    fn lagged_display_reports_count() {
        let error: Error = WsError::Lagged { count: 7 }.into();

        assert_eq!(error.kind(), Kind::WebSocket);
        assert_eq!(
            error.to_string(),
            "WebSocket: Message stream lagged, missed 7 messages"
        );
    }

    #[test]
    fn invalid_endpoint_exposes_source() {
        let source = url::Url::parse("::").unwrap_err();
        let error = WsError::InvalidEndpoint {
            endpoint: "::/u1".to_owned(),
            source,
        };

        assert!(error.source().is_some());
        assert!(error.to_string().starts_with("Invalid WebSocket endpoint ::/u1"));
    }
}
