//! Per-session frame statistics
//!
//! One `CameraStatistics` is created when a session becomes current and is
//! released before that session is stopped.

use crate::assert_invariant;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::{Duration, Instant};

const REPORT_INTERVAL: Duration = Duration::from_secs(2);

/// Snapshot of the current session's statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureStats {
    pub camera_name: String,
    pub session: u64,
    pub frames_captured: u64,
    pub current_fps: f32,
    pub opened_at: DateTime<Utc>,
    pub uptime_ms: u64,
}

#[derive(Debug)]
pub struct CameraStatistics {
    camera_name: String,
    session: u64,
    opened_at: DateTime<Utc>,
    started: Instant,
    frames: u64,
    window_start: Instant,
    window_frames: u64,
    current_fps: f32,
    released: bool,
}

impl CameraStatistics {
    pub fn new(camera_name: impl Into<String>, session: u64) -> Self {
        let now = Instant::now();
        Self {
            camera_name: camera_name.into(),
            session,
            opened_at: Utc::now(),
            started: now,
            frames: 0,
            window_start: now,
            window_frames: 0,
            current_fps: 0.0,
            released: false,
        }
    }

    pub fn add_frame(&mut self) {
        assert_invariant!(
            !self.released,
            "Statistics are never updated after release",
            "CameraStatistics::add_frame"
        );
        self.frames += 1;
        self.window_frames += 1;

        let elapsed = self.window_start.elapsed();
        if elapsed >= REPORT_INTERVAL {
            self.current_fps = self.window_frames as f32 / elapsed.as_secs_f32();
            log::debug!(
                "Camera {} fps: {:.1}, total frames: {}",
                self.camera_name,
                self.current_fps,
                self.frames
            );
            self.window_start = Instant::now();
            self.window_frames = 0;
        }
    }

    pub fn release(&mut self) {
        self.released = true;
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn snapshot(&self) -> CaptureStats {
        // Before the first report interval completes, estimate from the whole run.
        let current_fps = if self.current_fps > 0.0 {
            self.current_fps
        } else {
            let secs = self.started.elapsed().as_secs_f32();
            if secs > 0.0 {
                self.frames as f32 / secs
            } else {
                0.0
            }
        };
        CaptureStats {
            camera_name: self.camera_name.clone(),
            session: self.session,
            frames_captured: self.frames,
            current_fps,
            opened_at: self.opened_at,
            uptime_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}
