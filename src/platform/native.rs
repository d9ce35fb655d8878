//! Native cameras through nokhwa
//!
//! Enabled with the `native` feature. Devices are addressed by their human
//! readable name and resolved to a nokhwa index on every open.
//!
//! `nokhwa::Camera` is `!Send`, so each opened device lives on its own device
//! thread. The handle held by the session only sends commands to it.

use crate::errors::{CaptureError, CaptureResult};
use crate::platform::{CameraBackend, CameraEnumerator, CameraHandle, FrameSink};
use crate::types::{
    DeviceCapabilities, DeviceErrorKind, DeviceInfo, DeviceParameters, Facing, FocusMode,
    FrameBuffer, FramerateRange, PixelFormat, Size,
};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TryRecvError};
use nokhwa::{
    pixel_format::RgbFormat,
    query,
    utils::{
        ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
        Resolution,
    },
    Buffer, Camera,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Formats assumed when the driver does not report any.
const COMMON_FORMATS: [(u32, u32, u32); 4] =
    [(1920, 1080, 30), (1280, 720, 30), (640, 480, 30), (1920, 1080, 15)];

/// Consecutive failed reads after which the device counts as lost.
const MAX_FRAME_ERRORS: u32 = 30;

/// Enumerator and backend for the platform's cameras.
#[derive(Debug, Default)]
pub struct NativeCameras;

impl NativeCameras {
    pub fn new() -> Self {
        Self
    }

    fn index_of(&self, camera_name: &str) -> CaptureResult<CameraIndex> {
        let cameras = query(ApiBackend::Auto)
            .map_err(|e| CaptureError::DeviceOpenFailed(format!("Failed to query cameras: {}", e)))?;
        cameras
            .into_iter()
            .find(|info| info.human_name() == camera_name)
            .map(|info| info.index().clone())
            .ok_or_else(|| CaptureError::DeviceNotFound(camera_name.to_string()))
    }
}

impl CameraEnumerator for NativeCameras {
    fn device_names(&self) -> Vec<String> {
        match query(ApiBackend::Auto) {
            Ok(cameras) => cameras.into_iter().map(|info| info.human_name()).collect(),
            Err(e) => {
                log::warn!("Failed to query cameras: {}", e);
                Vec::new()
            }
        }
    }

    // Desktop drivers do not report facing.
    fn is_front_facing(&self, _camera_name: &str) -> bool {
        false
    }
}

impl CameraBackend for NativeCameras {
    fn open(&self, camera_name: &str) -> CaptureResult<Box<dyn CameraHandle>> {
        let index = self.index_of(camera_name)?;
        let (tx, rx) = unbounded();
        let (ready_tx, ready_rx) = bounded(1);

        let name = camera_name.to_string();
        let join = thread::Builder::new()
            .name(format!("crabcapture-device-{}", index))
            .spawn(move || device_thread(name, index, ready_tx, rx))
            .map_err(|e| CaptureError::DeviceOpenFailed(format!("{}: {}", camera_name, e)))?;

        let formats = match ready_rx.recv() {
            Ok(Ok(formats)) => formats,
            Ok(Err(e)) => {
                let _ = join.join();
                return Err(e);
            }
            Err(_) => {
                let _ = join.join();
                return Err(CaptureError::DeviceOpenFailed(format!(
                    "{}: device thread exited",
                    camera_name
                )));
            }
        };
        log::debug!("{}: {} formats reported", camera_name, formats.len());

        Ok(Box::new(NativeHandle {
            tx,
            join: Some(join),
            info: DeviceInfo {
                name: camera_name.to_string(),
                facing: Facing::External,
                sensor_orientation: 0,
            },
            capabilities: capabilities_from(&formats),
        }))
    }
}

enum Command {
    Configure(CameraFormat, Sender<CaptureResult<()>>),
    Start(FrameSink, Sender<CaptureResult<()>>),
    Stop,
    Release,
}

fn device_thread(
    name: String,
    index: CameraIndex,
    ready: Sender<CaptureResult<Vec<CameraFormat>>>,
    commands: Receiver<Command>,
) {
    let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::None);
    let mut camera = match Camera::new(index, requested) {
        Ok(camera) => camera,
        Err(e) => {
            let _ = ready.send(Err(CaptureError::DeviceOpenFailed(format!("{}: {}", name, e))));
            return;
        }
    };
    let formats = camera.compatible_camera_formats().unwrap_or_default();
    if ready.send(Ok(formats)).is_err() {
        return;
    }

    let mut sink: Option<FrameSink> = None;
    let mut frame_errors = 0;
    loop {
        let command = if sink.is_some() {
            match commands.try_recv() {
                Ok(command) => Some(command),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => break,
            }
        } else {
            match commands.recv() {
                Ok(command) => Some(command),
                Err(_) => break,
            }
        };

        match command {
            Some(Command::Configure(format, reply)) => {
                let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(format));
                let result = camera
                    .set_camera_requset(requested)
                    .map(|applied| log::debug!("{}: driver applied {}", name, applied))
                    .map_err(|e| CaptureError::UnsupportedFormat(e.to_string()));
                let _ = reply.send(result);
            }
            Some(Command::Start(new_sink, reply)) => {
                let result = camera
                    .open_stream()
                    .map_err(|e| CaptureError::DeviceOpenFailed(format!("Failed to start stream: {}", e)));
                if result.is_ok() {
                    sink = Some(new_sink);
                    frame_errors = 0;
                }
                let _ = reply.send(result);
            }
            Some(Command::Stop) => {
                if sink.take().is_some() {
                    if let Err(e) = camera.stop_stream() {
                        log::warn!("{}: failed to stop stream: {}", name, e);
                    }
                }
            }
            Some(Command::Release) => break,
            None => {
                let Some(current) = sink.as_ref() else {
                    continue;
                };
                match camera.frame() {
                    Ok(buffer) => {
                        frame_errors = 0;
                        current.frame(to_frame(&buffer));
                    }
                    Err(e) => {
                        frame_errors += 1;
                        log::warn!("{}: failed to capture frame: {}", name, e);
                        if frame_errors >= MAX_FRAME_ERRORS {
                            current.error(DeviceErrorKind::Evicted);
                            sink = None;
                        } else {
                            thread::sleep(Duration::from_millis(50));
                        }
                    }
                }
            }
        }
    }

    if sink.is_some() {
        if let Err(e) = camera.stop_stream() {
            log::warn!("{}: failed to stop stream: {}", name, e);
        }
    }
    log::debug!("{}: device thread exiting", name);
}

fn capabilities_from(formats: &[CameraFormat]) -> DeviceCapabilities {
    let reported: Vec<(u32, u32, u32)> = formats
        .iter()
        .map(|f| (f.resolution().width_x, f.resolution().height_y, f.frame_rate()))
        .collect();
    let all = if reported.is_empty() {
        COMMON_FORMATS.to_vec()
    } else {
        reported
    };

    let mut sizes: Vec<Size> = Vec::new();
    let mut ranges: Vec<FramerateRange> = Vec::new();
    for (width, height, fps) in all {
        let size = Size::new(width, height);
        if !sizes.contains(&size) {
            sizes.push(size);
        }
        let range = FramerateRange::fixed(fps);
        if !ranges.contains(&range) {
            ranges.push(range);
        }
    }

    DeviceCapabilities {
        preview_sizes: sizes,
        framerate_ranges: ranges,
        video_stabilization: false,
        focus_modes: vec![FocusMode::Auto],
    }
}

fn pixel_format(format: FrameFormat) -> PixelFormat {
    match format {
        FrameFormat::MJPEG => PixelFormat::Mjpeg,
        FrameFormat::YUYV => PixelFormat::Yuyv,
        _ => PixelFormat::Rgb24,
    }
}

fn to_frame(buffer: &Buffer) -> FrameBuffer {
    FrameBuffer::new(
        buffer.buffer_bytes().to_vec(),
        buffer.resolution().width_x,
        buffer.resolution().height_y,
        pixel_format(buffer.source_frame_format()),
    )
}

struct NativeHandle {
    tx: Sender<Command>,
    join: Option<JoinHandle<()>>,
    info: DeviceInfo,
    capabilities: DeviceCapabilities,
}

impl NativeHandle {
    fn request(&self, command: impl FnOnce(Sender<CaptureResult<()>>) -> Command) -> CaptureResult<()> {
        let (reply_tx, reply_rx) = bounded(1);
        self.tx
            .send(command(reply_tx))
            .map_err(|_| CaptureError::SessionStopped)?;
        reply_rx.recv().map_err(|_| CaptureError::SessionStopped)?
    }
}

impl CameraHandle for NativeHandle {
    fn info(&self) -> DeviceInfo {
        self.info.clone()
    }

    fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities.clone()
    }

    fn configure(&mut self, params: &DeviceParameters) -> CaptureResult<()> {
        let size = params.format.size;
        let format = CameraFormat::new(
            Resolution::new(size.width, size.height),
            FrameFormat::MJPEG,
            params.format.max_fps(),
        );
        self.request(|reply| Command::Configure(format, reply))
    }

    fn start_streaming(&mut self, sink: FrameSink) -> CaptureResult<()> {
        self.request(|reply| Command::Start(sink, reply))
    }

    fn stop_streaming(&mut self) {
        let _ = self.tx.send(Command::Stop);
    }

    fn release(&mut self) {
        let Some(join) = self.join.take() else {
            return;
        };
        let _ = self.tx.send(Command::Release);
        if join.join().is_err() {
            log::error!("{}: device thread panicked", self.info.name);
        }
        log::debug!("{}: released", self.info.name);
    }
}

impl Drop for NativeHandle {
    fn drop(&mut self) {
        self.release();
    }
}
