#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests, and https://github.com/rust-lang/rust-clippy/issues/13981"
)]
#![allow(
    unused,
    reason = "Each test binary uses a different subset of these helpers"
)]

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone as _, Utc};
use evolve_notify::Result;
use evolve_notify::error::Error;
use evolve_notify::notification::{NotificationOptions, Notifier, Permission};
use evolve_notify::types::InboundMessage;
use evolve_notify::ws::config::ConnectionConfig;
use evolve_notify::ws::{
    ConnectionManager, EventSink, ReadyState, Scheduler, TimerHandle, Transport, TransportEvent,
    TransportHandle,
};
use url::Url;

pub const ENDPOINT_BASE: &str = "ws://x";
pub const SUBSCRIBER_ID: &str = "u1";

/// Config with an immediate reconnect interval and the given budget.
#[must_use]
pub fn config(max_reconnect_attempts: u32) -> ConnectionConfig {
    ConnectionConfig::builder()
        .endpoint_base(ENDPOINT_BASE)
        .subscriber_id(SUBSCRIBER_ID)
        .reconnect_interval(Duration::ZERO)
        .max_reconnect_attempts(max_reconnect_attempts)
        .build()
}

/// Fixed clock reading returned by [`ManualScheduler::now`].
#[must_use]
pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
}

/// Manager wired to fresh fakes.
#[must_use]
pub fn manager() -> (ConnectionManager, Arc<MockTransport>, Arc<ManualScheduler>) {
    let transport = Arc::new(MockTransport::default());
    let scheduler = Arc::new(ManualScheduler::default());
    let manager = ConnectionManager::with_ports(
        Arc::clone(&transport) as Arc<dyn Transport>,
        Arc::clone(&scheduler) as Arc<dyn Scheduler>,
    );
    (manager, transport, scheduler)
}

/// Records every listener invocation.
#[derive(Debug, Default)]
pub struct Inbox {
    messages: Mutex<Vec<InboundMessage>>,
}

impl Inbox {
    pub fn push(&self, message: &InboundMessage) {
        self.messages.lock().unwrap().push(message.clone());
    }

    #[must_use]
    pub fn messages(&self) -> Vec<InboundMessage> {
        self.messages.lock().unwrap().clone()
    }

    #[must_use]
    pub fn texts(&self) -> Vec<String> {
        self.messages()
            .into_iter()
            .map(|message| message.text)
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.lock().unwrap().len()
    }
}

/// Register an [`Inbox`] on `manager`.
pub fn inbox(manager: &ConnectionManager) -> Arc<Inbox> {
    let inbox = Arc::new(Inbox::default());
    let sink = Arc::clone(&inbox);
    manager.subscribe(move |message| sink.push(message));
    inbox
}

struct Opened {
    endpoint: Url,
    sink: EventSink,
    ready: Arc<AtomicU8>,
    closed: Arc<AtomicBool>,
}

/// Transport that records every `open` and lets the test drive events by hand.
#[derive(Default)]
pub struct MockTransport {
    opened: Mutex<Vec<Opened>>,
    fail_next: AtomicBool,
    close_synchronously: AtomicBool,
}

impl MockTransport {
    /// Make the next `open` fail as if the connection could not be constructed.
    pub fn fail_next_open(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Make every handle opened from now on report `Close` from inside `close`.
    pub fn close_synchronously(&self) {
        self.close_synchronously.store(true, Ordering::SeqCst);
    }

    /// How many transports were created.
    #[must_use]
    pub fn opens(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    /// How many created transports have been neither closed nor dropped.
    #[must_use]
    pub fn live(&self) -> usize {
        self.opened
            .lock()
            .unwrap()
            .iter()
            .filter(|opened| !opened.closed.load(Ordering::SeqCst))
            .count()
    }

    #[must_use]
    pub fn endpoint(&self, index: usize) -> Url {
        self.opened.lock().unwrap()[index].endpoint.clone()
    }

    #[must_use]
    pub fn sink(&self, index: usize) -> EventSink {
        self.opened.lock().unwrap()[index].sink.clone()
    }

    #[must_use]
    pub fn is_closed(&self, index: usize) -> bool {
        self.opened.lock().unwrap()[index].closed.load(Ordering::SeqCst)
    }

    fn last_index(&self) -> usize {
        self.opens().checked_sub(1).expect("no transport was opened")
    }

    fn set_ready(&self, index: usize, state: ReadyState) {
        self.opened.lock().unwrap()[index]
            .ready
            .store(state as u8, Ordering::SeqCst);
    }

    /// Complete the handshake of the latest transport.
    pub fn open_last(&self) {
        let index = self.last_index();
        self.set_ready(index, ReadyState::Open);
        self.sink(index).emit(TransportEvent::Open);
    }

    /// Deliver a text frame on the latest transport.
    pub fn message_last(&self, text: &str) {
        self.sink(self.last_index())
            .emit(TransportEvent::Message(text.to_owned()));
    }

    /// Report an error on the latest transport without closing it.
    pub fn error_last(&self) {
        self.sink(self.last_index())
            .emit(TransportEvent::Error(Error::validation("mock failure")));
    }

    /// Close the latest transport from the server side.
    pub fn close_last(&self) {
        let index = self.last_index();
        self.set_ready(index, ReadyState::Closed);
        self.sink(index).emit(TransportEvent::Close);
    }
}

impl Transport for MockTransport {
    fn open(&self, endpoint: &Url, events: EventSink) -> Result<Box<dyn TransportHandle>> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(Error::validation("transport construction failed"));
        }

        let ready = Arc::new(AtomicU8::new(ReadyState::Connecting as u8));
        let closed = Arc::new(AtomicBool::new(false));
        let close_sink = self
            .close_synchronously
            .load(Ordering::SeqCst)
            .then(|| events.clone());
        self.opened.lock().unwrap().push(Opened {
            endpoint: endpoint.clone(),
            sink: events,
            ready: Arc::clone(&ready),
            closed: Arc::clone(&closed),
        });

        Ok(Box::new(MockHandle {
            ready,
            closed,
            close_sink,
        }))
    }
}

struct MockHandle {
    ready: Arc<AtomicU8>,
    closed: Arc<AtomicBool>,
    /// Set when `close` reports `Close` before returning
    close_sink: Option<EventSink>,
}

impl TransportHandle for MockHandle {
    fn ready_state(&self) -> ReadyState {
        ReadyState::from_code(self.ready.load(Ordering::SeqCst))
    }

    fn close(self: Box<Self>) {
        match &self.close_sink {
            Some(sink) => {
                self.ready.store(ReadyState::Closed as u8, Ordering::SeqCst);
                sink.emit(TransportEvent::Close);
            }
            None => self
                .ready
                .store(ReadyState::Closing as u8, Ordering::SeqCst),
        }
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

type Task = Box<dyn FnOnce() + Send>;

struct Scheduled {
    delay: Duration,
    task: Option<Task>,
    cancelled: Arc<AtomicBool>,
}

/// Scheduler whose timers only fire when the test says so.
#[derive(Default)]
pub struct ManualScheduler {
    scheduled: Mutex<Vec<Scheduled>>,
}

impl ManualScheduler {
    /// Timers that were scheduled and have neither fired nor been cancelled.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.scheduled
            .lock()
            .unwrap()
            .iter()
            .filter(|timer| timer.task.is_some() && !timer.cancelled.load(Ordering::SeqCst))
            .count()
    }

    /// Every timer ever scheduled.
    #[must_use]
    pub fn scheduled(&self) -> usize {
        self.scheduled.lock().unwrap().len()
    }

    #[must_use]
    pub fn cancelled(&self) -> usize {
        self.scheduled
            .lock()
            .unwrap()
            .iter()
            .filter(|timer| timer.cancelled.load(Ordering::SeqCst))
            .count()
    }

    #[must_use]
    pub fn last_delay(&self) -> Option<Duration> {
        self.scheduled.lock().unwrap().last().map(|timer| timer.delay)
    }

    /// Run the oldest pending timer. Returns `false` when nothing is pending.
    pub fn fire_next(&self) -> bool {
        let task = {
            let mut scheduled = self.scheduled.lock().unwrap();
            scheduled
                .iter_mut()
                .find(|timer| timer.task.is_some() && !timer.cancelled.load(Ordering::SeqCst))
                .and_then(|timer| timer.task.take())
        };

        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> Box<dyn TimerHandle> {
        let cancelled = Arc::new(AtomicBool::new(false));
        self.scheduled.lock().unwrap().push(Scheduled {
            delay,
            task: Some(task),
            cancelled: Arc::clone(&cancelled),
        });
        Box::new(ManualTimer(cancelled))
    }

    fn now(&self) -> DateTime<Utc> {
        fixed_now()
    }
}

struct ManualTimer(Arc<AtomicBool>);

impl TimerHandle for ManualTimer {
    fn cancel(self: Box<Self>) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Notifier that records what it was asked to show.
pub struct RecordingNotifier {
    permission: Mutex<Permission>,
    /// Permission the user "chooses" when asked
    answer: Permission,
    fail_notify: bool,
    requests: AtomicUsize,
    shown: Mutex<Vec<(String, NotificationOptions)>>,
}

impl RecordingNotifier {
    #[must_use]
    pub fn new(permission: Permission, answer: Permission) -> Self {
        Self {
            permission: Mutex::new(permission),
            answer,
            fail_notify: false,
            requests: AtomicUsize::new(0),
            shown: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn granted() -> Self {
        Self::new(Permission::Granted, Permission::Granted)
    }

    /// Notifier whose `notify` always errors.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail_notify: true,
            ..Self::granted()
        }
    }

    #[must_use]
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn shown(&self) -> Vec<(String, NotificationOptions)> {
        self.shown.lock().unwrap().clone()
    }

    /// Wait until at least `count` notifications were shown, or give up after two seconds.
    pub async fn wait_for(&self, count: usize) -> Vec<(String, NotificationOptions)> {
        for _ in 0..200 {
            if self.shown.lock().unwrap().len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.shown()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn permission(&self) -> Permission {
        *self.permission.lock().unwrap()
    }

    async fn request_permission(&self) -> Result<Permission> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        *self.permission.lock().unwrap() = self.answer;
        Ok(self.answer)
    }

    async fn notify(&self, title: &str, options: NotificationOptions) -> Result<bool> {
        if self.fail_notify {
            return Err(Error::notification("display failed"));
        }
        self.shown
            .lock()
            .unwrap()
            .push((title.to_owned(), options));
        Ok(true)
    }
}
