//! Ports the connection state machine is written against.
//!
//! The manager never touches a socket or a timer directly. A [`Transport`] opens
//! connections and reports what happens to them through an [`EventSink`]; a [`Scheduler`]
//! runs the single pending reconnect timer and supplies the clock. Production code uses
//! [`super::TungsteniteTransport`] and [`super::TokioScheduler`]; tests substitute
//! recording fakes.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_repr::{Deserialize_repr, Serialize_repr};
use url::Url;

use super::connection::EventSink;
use crate::Result;
use crate::error::Error;

/// Readiness of a single transport connection.
///
/// Serialized as the numeric codes browsers use for `WebSocket.readyState`.
#[non_exhaustive]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr, strum_macros::Display,
)]
#[repr(u8)]
#[strum(serialize_all = "lowercase")]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ReadyState {
    /// Decode a stored readiness code; unknown codes read as [`ReadyState::Closed`].
    #[must_use]
    pub const fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Lifecycle event reported by a transport connection.
#[non_exhaustive]
#[derive(Debug)]
pub enum TransportEvent {
    /// Handshake completed
    Open,
    /// One inbound text frame
    Message(String),
    /// Connection ended, for whatever reason. Always follows a fatal [`TransportEvent::Error`].
    Close,
    /// Something went wrong; informational only
    Error(Error),
}

/// Opens transport connections.
///
/// `open` must return without delivering any event on `events`: events are reported
/// later, from whatever task or thread drives the connection. An `Err` means the
/// connection could not even be constructed.
pub trait Transport: Send + Sync + 'static {
    fn open(&self, endpoint: &Url, events: EventSink) -> Result<Box<dyn TransportHandle>>;
}

/// Owner's handle on one live transport connection. Dropping it closes the connection.
pub trait TransportHandle: Send {
    fn ready_state(&self) -> ReadyState;

    /// Begin closing. Any `Close` event this produces is reported through the sink as usual,
    /// and may be reported before `close` returns.
    fn close(self: Box<Self>);
}

/// Runs delayed tasks and tells the time.
pub trait Scheduler: Send + Sync + 'static {
    /// Run `task` once after `delay`. Must not run it before returning.
    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce() + Send>) -> Box<dyn TimerHandle>;

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A pending scheduled task.
pub trait TimerHandle: Send {
    /// Prevent the task from running if it has not started yet.
    fn cancel(self: Box<Self>);
}
