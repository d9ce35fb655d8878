//! Scriptable in-memory camera device
//!
//! `SyntheticBackend` is both the enumerator and the backend. Tests can queue
//! open failures, hold opens or control calls behind a `Gate`, push frames and
//! device errors into whatever is streaming, and inspect the call log.

use crate::dispatch::lock;
use crate::errors::{CaptureError, CaptureResult};
use crate::platform::{CameraBackend, CameraEnumerator, CameraHandle, FrameSink};
use crate::testing::synthetic_frame;
use crate::types::{
    DeviceCapabilities, DeviceErrorKind, DeviceInfo, DeviceParameters, Facing, FocusMode,
    FramerateRange, Size,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// A latch that blocks callers of `wait` until opened.
#[derive(Debug, Default)]
pub struct Gate {
    state: Mutex<GateState>,
    cv: Condvar,
}

#[derive(Debug, Default)]
struct GateState {
    open: bool,
    waiting: usize,
}

impl Gate {
    pub fn closed() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open(&self) {
        lock(&self.state).open = true;
        self.cv.notify_all();
    }

    pub fn wait(&self) {
        let mut state = lock(&self.state);
        state.waiting += 1;
        self.cv.notify_all();
        while !state.open {
            state = self.cv.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        state.waiting -= 1;
    }

    /// Block until at least one caller is parked in `wait`, or `timeout` passes.
    pub fn wait_for_waiter(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.state);
        while state.waiting == 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (s, _) = self
                .cv
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = s;
        }
        true
    }
}

/// Static description of one synthetic camera.
#[derive(Debug, Clone)]
pub struct SyntheticCamera {
    pub name: String,
    pub facing: Facing,
    pub sensor_orientation: u32,
    pub capabilities: DeviceCapabilities,
    /// Empty disables zoom
    pub zoom_ratios: Vec<u32>,
    pub torch: bool,
}

impl SyntheticCamera {
    pub fn back(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            facing: Facing::Back,
            sensor_orientation: 90,
            capabilities: DeviceCapabilities {
                preview_sizes: vec![Size::new(640, 480), Size::new(1280, 720), Size::new(1920, 1080)],
                framerate_ranges: vec![
                    FramerateRange::new(15_000, 15_000),
                    FramerateRange::new(7_500, 30_000),
                    FramerateRange::new(30_000, 30_000),
                ],
                video_stabilization: true,
                focus_modes: vec![FocusMode::Auto, FocusMode::ContinuousVideo],
            },
            zoom_ratios: vec![100, 125, 150, 200],
            torch: true,
        }
    }

    pub fn front(name: impl Into<String>) -> Self {
        Self {
            facing: Facing::Front,
            sensor_orientation: 270,
            zoom_ratios: Vec::new(),
            torch: false,
            ..Self::back(name)
        }
    }
}

struct Stream {
    handle_id: u64,
    camera_name: String,
    sink: FrameSink,
}

#[derive(Default)]
struct DeviceState {
    failures: HashMap<String, VecDeque<CaptureError>>,
    open_gate: Option<Arc<Gate>>,
    control_gate: Option<Arc<Gate>>,
    open_delay: Duration,
    opens: HashMap<String, usize>,
    next_handle: u64,
    open_handles: usize,
    max_open_handles: usize,
    streams: Vec<Stream>,
    calls: Vec<String>,
    last_params: Option<DeviceParameters>,
    frame_counter: u64,
    zoom: u32,
    torch: bool,
}

pub struct SyntheticBackend {
    cameras: Mutex<Vec<SyntheticCamera>>,
    state: Arc<Mutex<DeviceState>>,
}

impl SyntheticBackend {
    pub fn new(cameras: Vec<SyntheticCamera>) -> Arc<Self> {
        Arc::new(Self {
            cameras: Mutex::new(cameras),
            state: Arc::new(Mutex::new(DeviceState::default())),
        })
    }

    /// Back camera "back" and front camera "front".
    pub fn back_and_front() -> Arc<Self> {
        Self::new(vec![SyntheticCamera::back("back"), SyntheticCamera::front("front")])
    }

    pub fn remove_camera(&self, name: &str) {
        lock(&self.cameras).retain(|c| c.name != name);
    }

    /// Fail the next `count` opens of `camera_name` with `error`.
    pub fn fail_next_opens(&self, camera_name: &str, count: usize, error: CaptureError) {
        let mut state = lock(&self.state);
        let queue = state.failures.entry(camera_name.to_string()).or_default();
        queue.extend(std::iter::repeat(error).take(count));
    }

    /// Park every open until the returned gate is opened.
    pub fn hold_opens(&self) -> Arc<Gate> {
        let gate = Gate::closed();
        lock(&self.state).open_gate = Some(Arc::clone(&gate));
        gate
    }

    /// Park every zoom and torch call until the returned gate is opened.
    pub fn hold_controls(&self) -> Arc<Gate> {
        let gate = Gate::closed();
        lock(&self.state).control_gate = Some(Arc::clone(&gate));
        gate
    }

    pub fn release_holds(&self) {
        let mut state = lock(&self.state);
        for gate in [state.open_gate.take(), state.control_gate.take()].into_iter().flatten() {
            gate.open();
        }
    }

    pub fn set_open_delay(&self, delay: Duration) {
        lock(&self.state).open_delay = delay;
    }

    pub fn open_count(&self, camera_name: &str) -> usize {
        lock(&self.state).opens.get(camera_name).copied().unwrap_or(0)
    }

    pub fn total_opens(&self) -> usize {
        lock(&self.state).opens.values().sum()
    }

    /// Handles opened and not yet released.
    pub fn open_handles(&self) -> usize {
        lock(&self.state).open_handles
    }

    pub fn max_open_handles(&self) -> usize {
        lock(&self.state).max_open_handles
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.state).calls.clone()
    }

    pub fn last_params(&self) -> Option<DeviceParameters> {
        lock(&self.state).last_params.clone()
    }

    pub fn streaming_cameras(&self) -> Vec<String> {
        lock(&self.state).streams.iter().map(|s| s.camera_name.clone()).collect()
    }

    /// Sink of the stream currently open on `camera_name`.
    pub fn sink_for(&self, camera_name: &str) -> Option<FrameSink> {
        lock(&self.state)
            .streams
            .iter()
            .find(|s| s.camera_name == camera_name)
            .map(|s| s.sink.clone())
    }

    pub fn torch_enabled(&self) -> bool {
        lock(&self.state).torch
    }

    pub fn zoom_value(&self) -> u32 {
        lock(&self.state).zoom
    }

    /// Push one 16x16 frame into every open stream. Returns how many received it.
    pub fn emit_frame(&self) -> usize {
        let (sinks, frame_number) = {
            let mut state = lock(&self.state);
            state.frame_counter += 1;
            let sinks: Vec<FrameSink> = state.streams.iter().map(|s| s.sink.clone()).collect();
            (sinks, state.frame_counter)
        };
        for sink in &sinks {
            sink.frame(synthetic_frame(frame_number, 16, 16));
        }
        sinks.len()
    }

    /// Report an asynchronous device error on every open stream.
    pub fn emit_error(&self, kind: DeviceErrorKind) -> usize {
        let sinks: Vec<FrameSink> = lock(&self.state).streams.iter().map(|s| s.sink.clone()).collect();
        for sink in &sinks {
            sink.error(kind);
        }
        sinks.len()
    }

    fn camera(&self, name: &str) -> Option<SyntheticCamera> {
        lock(&self.cameras).iter().find(|c| c.name == name).cloned()
    }
}

impl CameraEnumerator for SyntheticBackend {
    fn device_names(&self) -> Vec<String> {
        lock(&self.cameras).iter().map(|c| c.name.clone()).collect()
    }

    fn is_front_facing(&self, camera_name: &str) -> bool {
        self.camera(camera_name)
            .map(|c| c.facing == Facing::Front)
            .unwrap_or(false)
    }
}

impl CameraBackend for SyntheticBackend {
    fn open(&self, camera_name: &str) -> CaptureResult<Box<dyn CameraHandle>> {
        let (gate, failure, delay) = {
            let mut state = lock(&self.state);
            state.calls.push(format!("open {}", camera_name));
            *state.opens.entry(camera_name.to_string()).or_default() += 1;
            let failure = state.failures.get_mut(camera_name).and_then(|q| q.pop_front());
            (state.open_gate.clone(), failure, state.open_delay)
        };
        if let Some(gate) = gate {
            gate.wait();
        }
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if let Some(error) = failure {
            return Err(error);
        }
        let camera = self
            .camera(camera_name)
            .ok_or_else(|| CaptureError::DeviceNotFound(camera_name.to_string()))?;

        let mut state = lock(&self.state);
        state.next_handle += 1;
        state.open_handles += 1;
        state.max_open_handles = state.max_open_handles.max(state.open_handles);
        Ok(Box::new(SyntheticHandle {
            id: state.next_handle,
            camera,
            state: Arc::clone(&self.state),
            released: false,
        }))
    }
}

struct SyntheticHandle {
    id: u64,
    camera: SyntheticCamera,
    state: Arc<Mutex<DeviceState>>,
    released: bool,
}

impl SyntheticHandle {
    fn record(&self, call: &str) {
        lock(&self.state).calls.push(format!("{} {}", call, self.camera.name));
    }

    fn wait_control_gate(&self) {
        let gate = lock(&self.state).control_gate.clone();
        if let Some(gate) = gate {
            gate.wait();
        }
    }
}

impl CameraHandle for SyntheticHandle {
    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            name: self.camera.name.clone(),
            facing: self.camera.facing,
            sensor_orientation: self.camera.sensor_orientation,
        }
    }

    fn capabilities(&self) -> DeviceCapabilities {
        self.camera.capabilities.clone()
    }

    fn configure(&mut self, params: &DeviceParameters) -> CaptureResult<()> {
        self.record("configure");
        lock(&self.state).last_params = Some(params.clone());
        Ok(())
    }

    fn start_streaming(&mut self, sink: FrameSink) -> CaptureResult<()> {
        self.record("start_streaming");
        lock(&self.state).streams.push(Stream {
            handle_id: self.id,
            camera_name: self.camera.name.clone(),
            sink,
        });
        Ok(())
    }

    fn stop_streaming(&mut self) {
        self.record("stop_streaming");
        let id = self.id;
        lock(&self.state).streams.retain(|s| s.handle_id != id);
    }

    fn release(&mut self) {
        if self.released {
            self.record("double_release");
            return;
        }
        self.released = true;
        self.record("release");
        let mut state = lock(&self.state);
        state.open_handles = state.open_handles.saturating_sub(1);
    }

    fn zoom_ratios(&self) -> Vec<u32> {
        self.camera.zoom_ratios.clone()
    }

    fn zoom(&self) -> CaptureResult<u32> {
        if self.camera.zoom_ratios.is_empty() {
            return Err(CaptureError::ControlUnsupported("zoom".to_string()));
        }
        Ok(lock(&self.state).zoom)
    }

    fn set_zoom(&mut self, value: u32) -> CaptureResult<()> {
        self.wait_control_gate();
        self.record("set_zoom");
        lock(&self.state).zoom = value;
        Ok(())
    }

    fn set_torch(&mut self, enabled: bool) -> CaptureResult<()> {
        self.wait_control_gate();
        if !self.camera.torch {
            return Err(CaptureError::ControlUnsupported("torch".to_string()));
        }
        self.record("set_torch");
        lock(&self.state).torch = enabled;
        Ok(())
    }
}
