//! Testing utilities for crabcapture
//!
//! A scriptable in-memory camera device, synthetic frames and an event
//! recorder, for exercising the capturer without hardware.

pub mod recorder;
pub mod synthetic_data;
pub mod synthetic_device;

pub use recorder::{EventRecorder, RecordedEvent};
pub use synthetic_data::synthetic_frame;
pub use synthetic_device::{Gate, SyntheticBackend, SyntheticCamera};
