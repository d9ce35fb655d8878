//! Device collaborator interfaces
//!
//! The capturer never talks to hardware directly. A `CameraEnumerator` lists
//! devices, a `CameraBackend` opens them, and the resulting `CameraHandle` is
//! driven exclusively from the camera thread.

use crate::errors::{CaptureError, CaptureResult};
use crate::types::{DeviceCapabilities, DeviceErrorKind, DeviceInfo, DeviceParameters, FrameBuffer};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[cfg(feature = "native")]
pub mod native;

/// Lists available cameras.
pub trait CameraEnumerator: Send + Sync {
    /// Device names in a stable order.
    fn device_names(&self) -> Vec<String>;

    fn is_front_facing(&self, camera_name: &str) -> bool;
}

/// Opens camera devices. Only ever called on the camera thread.
pub trait CameraBackend: Send + Sync {
    fn open(&self, camera_name: &str) -> CaptureResult<Box<dyn CameraHandle>>;
}

/// An opened device. Owned by exactly one session and released exactly once.
pub trait CameraHandle: Send {
    fn info(&self) -> DeviceInfo;

    fn capabilities(&self) -> DeviceCapabilities;

    fn configure(&mut self, params: &DeviceParameters) -> CaptureResult<()>;

    /// Begin delivering frames and device errors to `sink`. The sink may be
    /// called from any thread.
    fn start_streaming(&mut self, sink: FrameSink) -> CaptureResult<()>;

    /// Stop calling the sink. Called before `release`.
    fn stop_streaming(&mut self);

    fn release(&mut self);

    /// Zoom ratios in 1/100 steps, index = zoom value. Empty when zoom is unsupported.
    fn zoom_ratios(&self) -> Vec<u32> {
        Vec::new()
    }

    fn zoom(&self) -> CaptureResult<u32> {
        Err(CaptureError::ControlUnsupported("zoom".to_string()))
    }

    fn set_zoom(&mut self, _value: u32) -> CaptureResult<()> {
        Err(CaptureError::ControlUnsupported("zoom".to_string()))
    }

    fn set_torch(&mut self, _enabled: bool) -> CaptureResult<()> {
        Err(CaptureError::ControlUnsupported("torch".to_string()))
    }
}

/// Asynchronous output of a streaming device.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    Frame(FrameBuffer),
    Error(DeviceErrorKind),
}

/// Where a streaming device pushes its frames and errors.
#[derive(Clone)]
pub struct FrameSink {
    deliver: Arc<dyn Fn(DeviceEvent) + Send + Sync>,
}

impl FrameSink {
    pub fn new<F>(deliver: F) -> Self
    where
        F: Fn(DeviceEvent) + Send + Sync + 'static,
    {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    pub fn frame(&self, buffer: FrameBuffer) {
        (self.deliver)(DeviceEvent::Frame(buffer));
    }

    pub fn error(&self, kind: DeviceErrorKind) {
        (self.deliver)(DeviceEvent::Error(kind));
    }
}

impl std::fmt::Debug for FrameSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSink").finish_non_exhaustive()
    }
}

/// Current rotation of the device/display in degrees (0, 90, 180, 270).
pub trait OrientationSource: Send + Sync {
    fn device_rotation(&self) -> u32;
}

/// Orientation that never changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedOrientation(pub u32);

impl OrientationSource for FixedOrientation {
    fn device_rotation(&self) -> u32 {
        self.0
    }
}

/// Lets the application publish rotation changes by storing into an atomic.
impl OrientationSource for AtomicU32 {
    fn device_rotation(&self) -> u32 {
        self.load(Ordering::Relaxed)
    }
}
