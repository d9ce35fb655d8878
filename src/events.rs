//! Application-facing callbacks
//!
//! `CameraEventsHandler` receives lifecycle notifications, `CapturerObserver`
//! receives start/stop outcomes and frames, and a `CameraSwitchHandler` is
//! supplied per switch request. All methods have no-op defaults.

use crate::types::VideoFrame;

/// Camera lifecycle notifications.
///
/// Called from the camera thread, except the open timeout which arrives from
/// the watchdog thread. Implementations must not call back into the capturer's
/// blocking operations.
pub trait CameraEventsHandler: Send + Sync {
    /// A device open is starting for `camera_name`.
    fn on_camera_opening(&self, _camera_name: &str) {}

    fn on_camera_error(&self, _error: &str) {}

    fn on_camera_disconnected(&self) {}

    /// Reserved for freeze detection. The capturer never calls it.
    fn on_camera_freezed(&self, _error: &str) {}

    /// First frame of a freshly opened session arrived.
    fn on_first_frame_available(&self) {}

    fn on_camera_closed(&self) {}
}

/// Events handler that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEvents;

impl CameraEventsHandler for NoopEvents {}

/// Consumer of capture outcomes and frames.
pub trait CapturerObserver: Send + Sync {
    /// Fired once per open attempt with its outcome.
    fn on_capturer_started(&self, _success: bool) {}

    fn on_capturer_stopped(&self) {}

    /// Frames are delivered synchronously on the camera thread; keep this short.
    fn on_frame_captured(&self, _frame: &VideoFrame) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl CapturerObserver for NoopObserver {}

/// Completion handler for one switch request. Exactly one method is called.
pub trait CameraSwitchHandler: Send {
    fn on_camera_switch_done(self: Box<Self>, is_front_facing: bool);

    fn on_camera_switch_error(self: Box<Self>, error: &str);
}

struct FnSwitchHandler<F>(F);

impl<F> CameraSwitchHandler for FnSwitchHandler<F>
where
    F: FnOnce(Result<bool, String>) + Send,
{
    fn on_camera_switch_done(self: Box<Self>, is_front_facing: bool) {
        (self.0)(Ok(is_front_facing))
    }

    fn on_camera_switch_error(self: Box<Self>, error: &str) {
        (self.0)(Err(error.to_string()))
    }
}

/// Build a switch handler from a closure receiving the facing or the error.
pub fn switch_callback<F>(f: F) -> Box<dyn CameraSwitchHandler>
where
    F: FnOnce(Result<bool, String>) + Send + 'static,
{
    Box::new(FnSwitchHandler(f))
}
