//! Event recorder
//!
//! Records every capturer callback in arrival order and lets tests block
//! until an expected event shows up.

use crate::dispatch::lock;
use crate::events::{switch_callback, CameraEventsHandler, CameraSwitchHandler, CapturerObserver};
use crate::types::VideoFrame;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedEvent {
    Opening(String),
    Error(String),
    Disconnected,
    Freezed(String),
    FirstFrame,
    Closed,
    Started(bool),
    Stopped,
    Frame { rotation: u32, mirrored: bool },
    SwitchDone(bool),
    SwitchError(String),
}

#[derive(Debug, Default)]
pub struct EventRecorder {
    events: Mutex<Vec<RecordedEvent>>,
    cv: Condvar,
}

impl EventRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, event: RecordedEvent) {
        lock(&self.events).push(event);
        self.cv.notify_all();
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        lock(&self.events).clone()
    }

    pub fn clear(&self) {
        lock(&self.events).clear();
    }

    pub fn count(&self, matches: impl Fn(&RecordedEvent) -> bool) -> usize {
        lock(&self.events).iter().filter(|e| matches(e)).count()
    }

    /// Wait until `done` holds for the recorded events, up to `timeout`.
    pub fn wait_until(&self, timeout: Duration, done: impl Fn(&[RecordedEvent]) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut events = lock(&self.events);
        loop {
            if done(&events) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (e, _) = self
                .cv
                .wait_timeout(events, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            events = e;
        }
    }

    /// Wait until at least `n` events match.
    pub fn wait_for_count(
        &self,
        timeout: Duration,
        n: usize,
        matches: impl Fn(&RecordedEvent) -> bool,
    ) -> bool {
        self.wait_until(timeout, |events| events.iter().filter(|e| matches(e)).count() >= n)
    }

    /// Switch handler that records its outcome here.
    pub fn switch_handler(self: &Arc<Self>) -> Box<dyn CameraSwitchHandler> {
        let recorder = Arc::clone(self);
        switch_callback(move |result| {
            recorder.push(match result {
                Ok(front) => RecordedEvent::SwitchDone(front),
                Err(error) => RecordedEvent::SwitchError(error),
            })
        })
    }
}

impl CameraEventsHandler for EventRecorder {
    fn on_camera_opening(&self, camera_name: &str) {
        self.push(RecordedEvent::Opening(camera_name.to_string()));
    }

    fn on_camera_error(&self, error: &str) {
        self.push(RecordedEvent::Error(error.to_string()));
    }

    fn on_camera_disconnected(&self) {
        self.push(RecordedEvent::Disconnected);
    }

    fn on_camera_freezed(&self, error: &str) {
        self.push(RecordedEvent::Freezed(error.to_string()));
    }

    fn on_first_frame_available(&self) {
        self.push(RecordedEvent::FirstFrame);
    }

    fn on_camera_closed(&self) {
        self.push(RecordedEvent::Closed);
    }
}

impl CapturerObserver for EventRecorder {
    fn on_capturer_started(&self, success: bool) {
        self.push(RecordedEvent::Started(success));
    }

    fn on_capturer_stopped(&self) {
        self.push(RecordedEvent::Stopped);
    }

    fn on_frame_captured(&self, frame: &VideoFrame) {
        self.push(RecordedEvent::Frame {
            rotation: frame.rotation,
            mirrored: frame.mirrored,
        });
    }
}
