//! Monotonic capture timestamps
//!
//! Each session owns a clock whose zero is the moment the session was created.

use std::sync::Arc;
use std::time::Instant;

/// Monotonic clock for frame timestamps
///
/// Clones share the same start instant, so every frame of a session is
/// stamped on one timebase.
#[derive(Debug, Clone)]
pub struct CaptureClock {
    start: Arc<Instant>,
}

impl CaptureClock {
    /// Create a clock with the current instant as time zero
    pub fn new() -> Self {
        Self {
            start: Arc::new(Instant::now()),
        }
    }

    /// Create a clock from an existing start instant
    pub fn from_instant(start: Instant) -> Self {
        Self {
            start: Arc::new(start),
        }
    }

    /// Nanoseconds elapsed since the clock was created
    #[inline]
    pub fn timestamp_ns(&self) -> u64 {
        self.start.elapsed().as_nanos() as u64
    }

    /// Nanoseconds between the clock's start and `instant`
    ///
    /// Instants earlier than the start map to zero.
    #[inline]
    pub fn timestamp_ns_at(&self, instant: Instant) -> u64 {
        instant.saturating_duration_since(*self.start).as_nanos() as u64
    }

    pub fn start_instant(&self) -> Instant {
        *self.start
    }
}

impl Default for CaptureClock {
    fn default() -> Self {
        Self::new()
    }
}
