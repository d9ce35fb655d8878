//! Capture session
//!
//! A `CaptureSession` is one opened device bound to one camera and one
//! negotiated format. Sessions are created, streamed and stopped on the camera
//! thread only and are never reused: every open, retry or switch builds a new
//! one with a new `SessionId`.

use crate::dispatch::{lock, DispatchHandle};
use crate::errors::{CaptureError, CaptureResult, SessionFailure};
use crate::format::negotiate;
use crate::platform::{CameraBackend, CameraHandle, DeviceEvent, FrameSink, OrientationSource};
use crate::timing::CaptureClock;
use crate::types::{
    CaptureFormat, DeviceErrorKind, DeviceInfo, DeviceParameters, Facing, FocusMode, FormatPolicy,
    FormatRequest, FrameBuffer, SessionId, VideoFrame,
};
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

/// Receiver of a session's lifecycle and frame events. Every call carries the
/// id of the reporting session and arrives on the camera thread.
pub trait SessionEvents: Send + Sync {
    fn on_camera_opening(&self, session: SessionId);

    fn on_camera_error(&self, session: SessionId, error: &str);

    fn on_camera_disconnected(&self, session: SessionId);

    fn on_camera_closed(&self, session: SessionId);

    fn on_frame_captured(&self, session: SessionId, frame: VideoFrame);
}

/// Everything a session needs to open itself.
pub struct SessionContext {
    pub id: SessionId,
    pub camera_name: String,
    pub request: FormatRequest,
    pub policy: FormatPolicy,
    pub dispatcher: DispatchHandle,
    pub events: Weak<dyn SessionEvents>,
    pub orientation: Arc<dyn OrientationSource>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Running,
    Stopped,
}

struct SessionInner {
    state: SessionState,
    handle: Option<Box<dyn CameraHandle>>,
    first_frame_reported: bool,
}

pub struct CaptureSession {
    id: SessionId,
    camera_name: String,
    info: DeviceInfo,
    format: CaptureFormat,
    dispatcher: DispatchHandle,
    events: Weak<dyn SessionEvents>,
    orientation: Arc<dyn OrientationSource>,
    clock: CaptureClock,
    construction_time: Instant,
    inner: Mutex<SessionInner>,
}

/// Clockwise rotation to display a frame upright.
///
/// Back-facing sensors rotate against the device, front-facing ones with it.
pub fn frame_orientation(info: &DeviceInfo, device_rotation: u32) -> u32 {
    let mut rotation = device_rotation % 360;
    if info.facing != Facing::Front {
        rotation = (360 - rotation) % 360;
    }
    (info.sensor_orientation + rotation) % 360
}

impl CaptureSession {
    /// Open `ctx.camera_name` through `backend` and start streaming.
    ///
    /// Anything acquired before a failure is released before returning.
    pub fn create(
        ctx: SessionContext,
        backend: &dyn CameraBackend,
    ) -> Result<Arc<CaptureSession>, SessionFailure> {
        ctx.dispatcher.check_is_current();
        let construction_time = Instant::now();

        if let Some(events) = ctx.events.upgrade() {
            events.on_camera_opening(ctx.id);
        }

        let mut handle = backend.open(&ctx.camera_name).map_err(|e| {
            log::warn!("{}: failed to open camera {}: {}", ctx.id, ctx.camera_name, e);
            SessionFailure::from(e)
        })?;

        let info = handle.info();
        let capabilities = handle.capabilities();
        let format = match negotiate(&capabilities, &ctx.request, ctx.policy) {
            Ok(format) => format,
            Err(e) => {
                handle.release();
                return Err(e.into());
            }
        };
        log::debug!("{}: requested {}, using {}", ctx.id, ctx.request, format);

        let focus_mode = capabilities
            .focus_modes
            .contains(&FocusMode::ContinuousVideo)
            .then_some(FocusMode::ContinuousVideo);
        let params = DeviceParameters {
            format,
            video_stabilization: capabilities.video_stabilization,
            focus_mode,
        };
        if let Err(e) = handle.configure(&params) {
            log::warn!("{}: failed to configure {}: {}", ctx.id, ctx.camera_name, e);
            handle.release();
            return Err(e.into());
        }

        let session = Arc::new(CaptureSession {
            id: ctx.id,
            camera_name: ctx.camera_name,
            info,
            format,
            dispatcher: ctx.dispatcher,
            events: ctx.events,
            orientation: ctx.orientation,
            clock: CaptureClock::from_instant(construction_time),
            construction_time,
            inner: Mutex::new(SessionInner {
                state: SessionState::Running,
                handle: None,
                first_frame_reported: false,
            }),
        });

        if let Err(e) = handle.start_streaming(session.frame_sink()) {
            log::warn!("{}: failed to start streaming: {}", session.id, e);
            handle.release();
            return Err(e.into());
        }
        lock(&session.inner).handle = Some(handle);

        log::debug!(
            "{}: opened {} in {:?}",
            session.id,
            session.camera_name,
            construction_time.elapsed()
        );
        Ok(session)
    }

    /// Sink handed to the device. Events hop onto the camera thread and are
    /// dropped once the session itself is gone.
    fn frame_sink(self: &Arc<Self>) -> FrameSink {
        let weak = Arc::downgrade(self);
        let dispatcher = self.dispatcher.clone();
        let id = self.id;
        FrameSink::new(move |event| {
            let weak = weak.clone();
            let posted = dispatcher.post(move || {
                if let Some(session) = weak.upgrade() {
                    session.handle_device_event(event);
                }
            });
            if posted.is_err() {
                log::debug!("{}: camera thread stopped, dropping device event", id);
            }
        })
    }

    fn handle_device_event(&self, event: DeviceEvent) {
        self.dispatcher.check_is_current();
        match event {
            DeviceEvent::Frame(buffer) => self.on_frame(buffer),
            DeviceEvent::Error(kind) => self.on_device_error(kind),
        }
    }

    fn on_frame(&self, buffer: FrameBuffer) {
        {
            let mut inner = lock(&self.inner);
            if inner.state == SessionState::Stopped {
                log::debug!("{}: frame after stop dropped", self.id);
                return;
            }
            if !inner.first_frame_reported {
                inner.first_frame_reported = true;
                log::debug!(
                    "{}: first frame after {:?}",
                    self.id,
                    self.construction_time.elapsed()
                );
            }
        }

        let frame = VideoFrame {
            timestamp_ns: self.clock.timestamp_ns_at(buffer.captured_at),
            rotation: frame_orientation(&self.info, self.orientation.device_rotation()),
            mirrored: self.info.facing == Facing::Front,
            buffer,
        };
        if let Some(events) = self.events.upgrade() {
            events.on_frame_captured(self.id, frame);
        }
    }

    fn on_device_error(&self, kind: DeviceErrorKind) {
        let message = kind.describe();
        log::error!("{}: {}", self.id, message);
        if !self.stop_internal() {
            return;
        }
        if let Some(events) = self.events.upgrade() {
            match kind {
                DeviceErrorKind::Evicted => events.on_camera_disconnected(self.id),
                _ => events.on_camera_error(self.id, &message),
            }
        }
    }

    /// Stop streaming, release the device, then report closed. No-op once stopped.
    pub fn stop(&self) {
        log::debug!("{}: stop", self.id);
        self.dispatcher.check_is_current();
        if self.stop_internal() {
            if let Some(events) = self.events.upgrade() {
                events.on_camera_closed(self.id);
            }
        }
    }

    /// Returns false if the session was already stopped.
    fn stop_internal(&self) -> bool {
        let handle = {
            let mut inner = lock(&self.inner);
            if inner.state == SessionState::Stopped {
                return false;
            }
            inner.state = SessionState::Stopped;
            inner.handle.take()
        };
        if let Some(mut handle) = handle {
            handle.stop_streaming();
            handle.release();
        }
        log::debug!("{}: stop done", self.id);
        true
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn camera_name(&self) -> &str {
        &self.camera_name
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn format(&self) -> CaptureFormat {
        self.format
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner).state == SessionState::Running
    }

    fn with_handle<R>(&self, f: impl FnOnce(&mut dyn CameraHandle) -> CaptureResult<R>) -> CaptureResult<R> {
        self.dispatcher.check_is_current();
        let mut inner = lock(&self.inner);
        if inner.state == SessionState::Stopped {
            return Err(CaptureError::SessionStopped);
        }
        match inner.handle.as_mut() {
            Some(handle) => f(handle.as_mut()),
            None => Err(CaptureError::SessionStopped),
        }
    }

    pub fn is_zoom_supported(&self) -> CaptureResult<bool> {
        self.with_handle(|h| Ok(!h.zoom_ratios().is_empty()))
    }

    pub fn zoom_ratios(&self) -> CaptureResult<Vec<u32>> {
        self.with_handle(|h| Ok(h.zoom_ratios()))
    }

    pub fn max_zoom(&self) -> CaptureResult<u32> {
        self.with_handle(|h| match h.zoom_ratios().len() {
            0 => Err(CaptureError::ControlUnsupported("zoom".to_string())),
            n => Ok(n as u32 - 1),
        })
    }

    pub fn zoom(&self) -> CaptureResult<u32> {
        self.with_handle(|h| h.zoom())
    }

    pub fn set_zoom(&self, value: u32) -> CaptureResult<()> {
        self.with_handle(|h| {
            let ratios = h.zoom_ratios();
            if ratios.is_empty() {
                return Err(CaptureError::ControlUnsupported("zoom".to_string()));
            }
            if value as usize >= ratios.len() {
                return Err(CaptureError::ControlFailed(format!(
                    "zoom {} out of range 0..={}",
                    value,
                    ratios.len() - 1
                )));
            }
            h.set_zoom(value)
        })
    }

    pub fn set_torch(&self, enabled: bool) -> CaptureResult<()> {
        self.with_handle(|h| h.set_torch(enabled))
    }
}

impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("id", &self.id)
            .field("camera_name", &self.camera_name)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}
