//! Real-time connection management.
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: owns the single connection, its reconnection policy and the
//!   subscriber list
//! - [`Transport`] / [`Scheduler`]: ports the manager drives; [`TungsteniteTransport`] and
//!   [`TokioScheduler`] are the production implementations
//! - [`config::ConnectionConfig`]: where to connect and how hard to retry
//!
//! # Example
//!
//! ```ignore
//! let manager = ConnectionManager::new()?;
//! let id = manager.subscribe(|message| println!("{}", message.text));
//! manager.connect(ConnectionConfig::new("ws://localhost:8000/api/v1/ws", "123456789"))?;
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod scheduler;
pub mod subscribers;
pub mod traits;
#[cfg(feature = "ws")]
pub mod transport;

pub use connection::{ConnectionManager, ConnectionState, ConnectionStatus, EventSink};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use scheduler::TokioScheduler;
pub use subscribers::SubscriberId;
pub use traits::*;
#[cfg(feature = "ws")]
pub use transport::TungsteniteTransport;
