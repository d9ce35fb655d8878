//! Open watchdog
//!
//! Runs callbacks on a dedicated timer thread once a deadline passes unless
//! they are disarmed first. Each arm returns its own ticket, so disarming one
//! open attempt never touches the timer of another.

use crate::dispatch::{DispatchThread, TaskId};
use crate::errors::CaptureResult;
use std::time::Duration;

/// Handle to one armed deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchdogTicket(TaskId);

pub struct Watchdog {
    timer: DispatchThread,
}

impl Watchdog {
    pub fn spawn(thread_name: &str) -> CaptureResult<Self> {
        Ok(Self {
            timer: DispatchThread::spawn(thread_name)?,
        })
    }

    /// Schedule `on_expire` to run after `deadline` on the timer thread.
    pub fn arm<F>(&self, deadline: Duration, on_expire: F) -> CaptureResult<WatchdogTicket>
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.timer.handle().post_delayed(on_expire, deadline)?;
        log::debug!("Watchdog armed for {:?}", deadline);
        Ok(WatchdogTicket(id))
    }

    /// Returns false if the deadline already fired.
    pub fn disarm(&self, ticket: WatchdogTicket) -> bool {
        self.timer.handle().cancel(ticket.0)
    }

    pub fn shutdown(&self) {
        self.timer.shutdown();
    }
}
