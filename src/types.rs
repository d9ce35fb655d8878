use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Generation number of a capture session.
///
/// Every construction attempt gets a fresh id, so callbacks from a superseded
/// session can be told apart from the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Supported framerate range in frames per second multiplied by 1000.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FramerateRange {
    pub min: u32,
    pub max: u32,
}

impl FramerateRange {
    pub fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    /// A fixed range at `fps` whole frames per second.
    pub fn fixed(fps: u32) -> Self {
        Self::new(fps * 1000, fps * 1000)
    }

    pub fn contains_fps(&self, fps: u32) -> bool {
        (self.min..=self.max).contains(&(fps * 1000))
    }
}

impl fmt::Display for FramerateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:{}]", self.min as f32 / 1000.0, self.max as f32 / 1000.0)
    }
}

/// Negotiated capture format of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureFormat {
    pub size: Size,
    pub framerate: FramerateRange,
}

impl CaptureFormat {
    pub fn new(width: u32, height: u32, framerate: FramerateRange) -> Self {
        Self {
            size: Size::new(width, height),
            framerate,
        }
    }

    /// Upper bound of the framerate range in whole frames per second.
    pub fn max_fps(&self) -> u32 {
        self.framerate.max / 1000
    }
}

impl fmt::Display for CaptureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.size, self.framerate)
    }
}

/// Format asked for by the caller of `start_capture`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatRequest {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
}

impl FormatRequest {
    pub fn new(width: u32, height: u32, framerate: u32) -> Self {
        Self {
            width,
            height,
            framerate,
        }
    }
}

impl fmt::Display for FormatRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}@{}", self.width, self.height, self.framerate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatPolicy {
    /// Nearest supported size and framerate range
    #[default]
    Closest,
    /// Requested size must be supported and the framerate must fall in a range
    Exact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    Front,
    Back,
    External,
}

/// Static properties of an opened device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub facing: Facing,
    /// Clockwise angle the sensor is mounted at, in degrees
    pub sensor_orientation: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusMode {
    Auto,
    ContinuousVideo,
    Fixed,
    Infinity,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub preview_sizes: Vec<Size>,
    pub framerate_ranges: Vec<FramerateRange>,
    pub video_stabilization: bool,
    pub focus_modes: Vec<FocusMode>,
}

/// Parameters pushed to a device before streaming starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceParameters {
    pub format: CaptureFormat,
    pub video_stabilization: bool,
    pub focus_mode: Option<FocusMode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgb24,
    Yuyv,
    Nv21,
    Mjpeg,
}

/// Raw frame as produced by a device.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub captured_at: Instant,
}

impl FrameBuffer {
    pub fn new(data: impl Into<Bytes>, width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        Self {
            data: data.into(),
            width,
            height,
            pixel_format,
            captured_at: Instant::now(),
        }
    }
}

/// Frame delivered to the consumer, with orientation correction applied as metadata.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub buffer: FrameBuffer,
    /// Clockwise rotation needed to display the frame upright
    pub rotation: u32,
    pub mirrored: bool,
    /// Monotonic capture time since the session was created
    pub timestamp_ns: u64,
}

/// Asynchronous device failure reported by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceErrorKind {
    /// Device taken by another client or unplugged
    Evicted,
    /// Camera service died
    ServerDied,
    Other(i32),
}

impl DeviceErrorKind {
    pub fn describe(&self) -> String {
        match self {
            DeviceErrorKind::Evicted => "Camera disconnected / evicted.".to_string(),
            DeviceErrorKind::ServerDied => "Camera server died!".to_string(),
            DeviceErrorKind::Other(code) => format!("Camera error: {}", code),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchState {
    Idle,
    Pending,
    InProgress,
}
