use thiserror::Error;

/// Errors produced by the capture controller, its sessions and collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("Failed to open camera: {0}")]
    DeviceOpenFailed(String),
    #[error("Camera device not found: {0}")]
    DeviceNotFound(String),
    #[error("Camera device disconnected")]
    DeviceDisconnected,
    #[error("Session already open")]
    AlreadyRunning,
    #[error("Camera switch already in progress.")]
    SwitchAlreadyInProgress,
    #[error("Attempted to switch to unknown camera device {0}")]
    SwitchTargetUnknown(String),
    #[error("switchCamera: camera is not running.")]
    SwitchNotRunning,
    #[error("No camera to switch to.")]
    NoCameraToSwitch,
    #[error("Not on camera thread.")]
    NotOnCaptureThread,
    #[error("Camera failed to start within timeout.")]
    OpenTimedOut,
    #[error("No cameras attached.")]
    NoCamerasAttached,
    #[error("Camera name {0} does not match any known camera device.")]
    UnknownCamera(String),
    #[error("No supported capture format for {0}")]
    UnsupportedFormat(String),
    #[error("Camera control not supported: {0}")]
    ControlUnsupported(String),
    #[error("Camera control error: {0}")]
    ControlFailed(String),
    #[error("No active camera session")]
    NoActiveSession,
    #[error("Camera session is stopped")]
    SessionStopped,
    #[error("Camera thread has stopped")]
    CaptureThreadStopped,
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type CaptureResult<T> = Result<T, CaptureError>;

/// Why a session could not be constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    Error,
    NotFound,
    Disconnected,
}

/// Construction failure reported by a session factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFailure {
    pub kind: FailureType,
    pub message: String,
}

impl SessionFailure {
    pub fn new(kind: FailureType, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_disconnect(&self) -> bool {
        self.kind == FailureType::Disconnected
    }
}

impl From<CaptureError> for SessionFailure {
    fn from(error: CaptureError) -> Self {
        let kind = match error {
            CaptureError::DeviceNotFound(_) | CaptureError::UnknownCamera(_) => FailureType::NotFound,
            CaptureError::DeviceDisconnected => FailureType::Disconnected,
            _ => FailureType::Error,
        };
        Self {
            kind,
            message: error.to_string(),
        }
    }
}

impl std::fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for SessionFailure {}
