use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use super::traits::{Scheduler, TimerHandle};
use crate::Result;

/// [`Scheduler`] backed by tokio timers on a fixed runtime.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    runtime: Handle,
}

impl TokioScheduler {
    /// Scheduler for the runtime this is called from.
    pub fn new() -> Result<Self> {
        Ok(Self::with_handle(Handle::try_current()?))
    }

    #[must_use]
    pub fn with_handle(runtime: Handle) -> Self {
        Self { runtime }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce() + Send>) -> Box<dyn TimerHandle> {
        let join = self.runtime.spawn(async move {
            sleep(delay).await;
            task();
        });
        Box::new(TokioTimer(join))
    }
}

struct TokioTimer(JoinHandle<()>);

impl TimerHandle for TokioTimer {
    fn cancel(self: Box<Self>) {
        self.0.abort();
    }
}
