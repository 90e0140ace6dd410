use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use url::Url;

use super::connection::EventSink;
use super::error::WsError;
use super::traits::{ReadyState, Transport, TransportEvent, TransportHandle};
use crate::Result;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// [`Transport`] over tokio-tungstenite.
///
/// Each connection runs in its own task on the given runtime. Text frames are forwarded;
/// binary frames are ignored and ping/pong is answered by tungstenite. Nothing is ever
/// written except the closing handshake.
#[derive(Debug, Clone)]
pub struct TungsteniteTransport {
    runtime: Handle,
    connect_timeout: Option<Duration>,
}

impl TungsteniteTransport {
    /// Transport for the runtime this is called from, without a handshake timeout.
    pub fn new() -> Result<Self> {
        Ok(Self::with_handle(Handle::try_current()?))
    }

    #[must_use]
    pub fn with_handle(runtime: Handle) -> Self {
        Self {
            runtime,
            connect_timeout: None,
        }
    }

    /// Give up on a handshake after `limit`.
    ///
    /// Expiry is reported as an error followed by a close, so it costs one retry.
    #[must_use]
    pub fn with_connect_timeout(mut self, limit: Duration) -> Self {
        self.connect_timeout = Some(limit);
        self
    }
}

impl Transport for TungsteniteTransport {
    fn open(&self, endpoint: &Url, events: EventSink) -> Result<Box<dyn TransportHandle>> {
        let ready = Arc::new(AtomicU8::new(ReadyState::Connecting as u8));
        let (close_tx, close_rx) = oneshot::channel();

        let task = self.runtime.spawn(run_connection(
            endpoint.clone(),
            self.connect_timeout,
            events,
            Arc::clone(&ready),
            close_rx,
        ));

        Ok(Box::new(TungsteniteHandle {
            ready,
            close_tx: Some(close_tx),
            _task: task,
        }))
    }
}

struct TungsteniteHandle {
    ready: Arc<AtomicU8>,
    /// Firing or dropping this makes the connection task close
    close_tx: Option<oneshot::Sender<()>>,
    _task: JoinHandle<()>,
}

impl TransportHandle for TungsteniteHandle {
    fn ready_state(&self) -> ReadyState {
        ReadyState::from_code(self.ready.load(Ordering::Acquire))
    }

    fn close(mut self: Box<Self>) {
        store(&self.ready, ReadyState::Closing);
        if let Some(close_tx) = self.close_tx.take() {
            _ = close_tx.send(());
        }
    }
}

fn store(ready: &AtomicU8, state: ReadyState) {
    ready.store(state as u8, Ordering::Release);
}

async fn handshake(endpoint: &Url, connect_timeout: Option<Duration>) -> Result<WsStream> {
    let connecting = connect_async(endpoint.as_str());
    let (stream, _response) = match connect_timeout {
        Some(limit) => timeout(limit, connecting)
            .await
            .map_err(|_elapsed| WsError::Timeout)??,
        None => connecting.await?,
    };
    Ok(stream)
}

/// Drive one connection until it closes, reporting every lifecycle step through `events`.
async fn run_connection(
    endpoint: Url,
    connect_timeout: Option<Duration>,
    events: EventSink,
    ready: Arc<AtomicU8>,
    mut close_rx: oneshot::Receiver<()>,
) {
    let ws_stream = tokio::select! {
        result = handshake(&endpoint, connect_timeout) => match result {
            Ok(stream) => stream,
            Err(e) => {
                store(&ready, ReadyState::Closed);
                events.emit(TransportEvent::Error(e));
                events.emit(TransportEvent::Close);
                return;
            }
        },
        _ = &mut close_rx => {
            store(&ready, ReadyState::Closed);
            events.emit(TransportEvent::Close);
            return;
        }
    };

    store(&ready, ReadyState::Open);
    events.emit(TransportEvent::Open);

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            _ = &mut close_rx => {
                if let Err(e) = write.send(Message::Close(None)).await {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(error = %e, "Failed to send close frame");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &e;
                }
                break;
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        events.emit(TransportEvent::Message(text.as_str().to_owned()));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        #[cfg(feature = "tracing")]
                        tracing::debug!(?frame, "Server closed WebSocket");
                        #[cfg(not(feature = "tracing"))]
                        let _ = &frame;
                        break;
                    }
                    Some(Ok(_)) => {
                        // Binary frames are not part of the protocol; ping/pong is handled by tungstenite
                    }
                    Some(Err(e)) => {
                        events.emit(TransportEvent::Error(e.into()));
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    store(&ready, ReadyState::Closed);
    events.emit(TransportEvent::Close);
}
