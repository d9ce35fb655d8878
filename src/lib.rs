//! crabcapture: camera capture session controller
//!
//! Manages the lifecycle of a single logical camera on top of a device API
//! whose open/close calls are synchronous, slow, fallible and confined to one
//! thread.
//!
//! # Features
//! - Asynchronous session open with bounded retry and backoff
//! - Camera switching that never races an in-flight open
//! - Blocking (and async) stop that waits out pending opens
//! - Stale session events filtered by session generation
//! - Open watchdog on a dedicated timer thread
//! - Closest-match format negotiation
//!
//! # Usage
//! ```rust,no_run
//! use crabcapture::testing::{EventRecorder, SyntheticBackend};
//! use crabcapture::CameraCapturer;
//!
//! let device = SyntheticBackend::back_and_front();
//! let recorder = EventRecorder::new();
//! let capturer = CameraCapturer::builder()
//!     .device(device)
//!     .events(recorder.clone())
//!     .observer(recorder.clone())
//!     .build()
//!     .expect("capturer");
//!
//! capturer.start_capture(1280, 720, 30);
//! capturer.switch_camera(recorder.switch_handler());
//! capturer.stop_capture();
//! ```

pub mod capturer;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod events;
pub mod format;
pub mod invariant_ppt;
pub mod platform;
pub mod session;
pub mod statistics;
pub mod timing;
pub mod types;
pub mod watchdog;

// Testing utilities - synthetic devices for offline testing
pub mod testing;

pub use capturer::{CameraCapturer, CapturerBuilder};
pub use config::CapturerConfig;
pub use errors::{CaptureError, CaptureResult, FailureType, SessionFailure};
pub use events::{switch_callback, CameraEventsHandler, CameraSwitchHandler, CapturerObserver};
pub use platform::{CameraBackend, CameraEnumerator, CameraHandle, FrameSink, OrientationSource};
pub use statistics::CaptureStats;
pub use types::{CaptureFormat, FormatPolicy, FormatRequest, SessionId, SwitchState, VideoFrame};

/// Initialize logging for the capture system
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "crabcapture=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
