//! Capture format negotiation
//!
//! Picks the device format that best matches a caller's request. Sizes are
//! compared by L1 distance. Framerate ranges are scored with a progressive
//! penalty that prefers a low minimum (so the device can lower its rate in
//! poor light) and a maximum close to the requested rate.

use crate::errors::{CaptureError, CaptureResult};
use crate::types::{CaptureFormat, DeviceCapabilities, FormatPolicy, FormatRequest, FramerateRange, Size};

const MIN_FPS_THRESHOLD: u32 = 8000;
const MIN_FPS_LOW_WEIGHT: u64 = 1;
const MIN_FPS_HIGH_WEIGHT: u64 = 4;

const MAX_FPS_DIFF_THRESHOLD: u32 = 5000;
const MAX_FPS_LOW_DIFF_WEIGHT: u64 = 1;
const MAX_FPS_HIGH_DIFF_WEIGHT: u64 = 3;

fn progressive_penalty(value: u32, threshold: u32, low_weight: u64, high_weight: u64) -> u64 {
    let value = value as u64;
    let threshold = threshold as u64;
    if value < threshold {
        value * low_weight
    } else {
        threshold * low_weight + (value - threshold) * high_weight
    }
}

/// Penalty of `range` for a request of `fps` whole frames per second.
pub fn framerate_penalty(range: &FramerateRange, fps: u32) -> u64 {
    let min_penalty = progressive_penalty(
        range.min,
        MIN_FPS_THRESHOLD,
        MIN_FPS_LOW_WEIGHT,
        MIN_FPS_HIGH_WEIGHT,
    );
    let requested = fps.saturating_mul(1000);
    let max_penalty = progressive_penalty(
        requested.abs_diff(range.max),
        MAX_FPS_DIFF_THRESHOLD,
        MAX_FPS_LOW_DIFF_WEIGHT,
        MAX_FPS_HIGH_DIFF_WEIGHT,
    );
    min_penalty + max_penalty
}

/// Supported size with the smallest L1 distance to the request. Ties keep the first.
pub fn closest_size(sizes: &[Size], width: u32, height: u32) -> Option<Size> {
    sizes
        .iter()
        .copied()
        .min_by_key(|s| s.width.abs_diff(width) as u64 + s.height.abs_diff(height) as u64)
}

/// Supported range with the lowest penalty for `fps`. Ties keep the first.
pub fn closest_framerate_range(ranges: &[FramerateRange], fps: u32) -> Option<FramerateRange> {
    ranges
        .iter()
        .copied()
        .min_by_key(|r| framerate_penalty(r, fps))
}

/// Resolve `request` against what the device supports.
pub fn negotiate(
    capabilities: &DeviceCapabilities,
    request: &FormatRequest,
    policy: FormatPolicy,
) -> CaptureResult<CaptureFormat> {
    let unsupported = || CaptureError::UnsupportedFormat(request.to_string());

    match policy {
        FormatPolicy::Closest => {
            let size = closest_size(&capabilities.preview_sizes, request.width, request.height)
                .ok_or_else(unsupported)?;
            let framerate =
                closest_framerate_range(&capabilities.framerate_ranges, request.framerate)
                    .ok_or_else(unsupported)?;
            Ok(CaptureFormat { size, framerate })
        }
        FormatPolicy::Exact => {
            let size = Size::new(request.width, request.height);
            if !capabilities.preview_sizes.contains(&size) {
                return Err(unsupported());
            }
            let framerate = capabilities
                .framerate_ranges
                .iter()
                .copied()
                .filter(|r| r.contains_fps(request.framerate))
                .min_by_key(|r| framerate_penalty(r, request.framerate))
                .ok_or_else(unsupported)?;
            Ok(CaptureFormat { size, framerate })
        }
    }
}
