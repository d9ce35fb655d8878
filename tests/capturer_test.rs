//! Integration tests for the camera capturer state machine
//!
//! Every test drives a `CameraCapturer` against the synthetic device and
//! observes it only through the public callbacks.

use crabcapture::platform::FixedOrientation;
use crabcapture::testing::{synthetic_frame, EventRecorder, RecordedEvent, SyntheticBackend, SyntheticCamera};
use crabcapture::types::{DeviceErrorKind, FormatPolicy, Size};
use crabcapture::{CameraCapturer, CaptureError, CapturerConfig, SwitchState};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(5);

fn fast_config() -> CapturerConfig {
    let mut config = CapturerConfig::default();
    config.session.open_retry_delay_ms = 20;
    config
}

fn build(device: &Arc<SyntheticBackend>, recorder: &Arc<EventRecorder>) -> CameraCapturer {
    build_with(device, recorder, fast_config())
}

fn build_with(
    device: &Arc<SyntheticBackend>,
    recorder: &Arc<EventRecorder>,
    config: CapturerConfig,
) -> CameraCapturer {
    CameraCapturer::builder()
        .device(Arc::clone(device))
        .events(recorder.clone())
        .observer(recorder.clone())
        .config(config)
        .build()
        .expect("capturer should build")
}

/// Poll `cond` until it holds or the timeout passes.
fn wait_for(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

fn start_and_wait(capturer: &CameraCapturer) {
    capturer.start_capture(1280, 720, 30);
    assert!(wait_for(|| capturer.is_running()), "capture did not start");
}

fn is_switch_outcome(e: &RecordedEvent) -> bool {
    matches!(e, RecordedEvent::SwitchDone(_) | RecordedEvent::SwitchError(_))
}

#[test]
fn test_start_opens_camera_and_reports_first_frame_once() {
    let device = SyntheticBackend::back_and_front();
    let recorder = EventRecorder::new();
    let capturer = build(&device, &recorder);

    start_and_wait(&capturer);
    assert_eq!(capturer.camera_name(), "back");
    assert!(!capturer.is_front_facing());
    assert_eq!(recorder.events()[0], RecordedEvent::Opening("back".to_string()));
    assert_eq!(recorder.count(|e| *e == RecordedEvent::Started(true)), 1);

    for _ in 0..3 {
        assert_eq!(device.emit_frame(), 1);
    }
    assert!(recorder.wait_for_count(TIMEOUT, 3, |e| matches!(e, RecordedEvent::Frame { .. })));
    assert_eq!(recorder.count(|e| *e == RecordedEvent::FirstFrame), 1);
    assert!(recorder
        .events()
        .contains(&RecordedEvent::Frame { rotation: 90, mirrored: false }));

    let params = device.last_params().expect("device configured");
    assert_eq!(params.format.size, Size::new(1280, 720));
    assert!(params.video_stabilization);
}

#[test]
fn test_start_is_idempotent() {
    let device = SyntheticBackend::back_and_front();
    let recorder = EventRecorder::new();
    let capturer = build(&device, &recorder);

    capturer.start_capture(1280, 720, 30);
    capturer.start_capture(640, 480, 15);
    assert!(wait_for(|| capturer.is_running()));
    capturer.start_capture(640, 480, 15);

    thread::sleep(Duration::from_millis(50));
    assert_eq!(device.open_count("back"), 1);
    assert_eq!(capturer.current_format().map(|f| f.size), Some(Size::new(1280, 720)));
}

#[test]
fn test_stop_blocks_until_in_flight_open_finishes() {
    let device = SyntheticBackend::back_and_front();
    let recorder = EventRecorder::new();
    let capturer = Arc::new(build(&device, &recorder));

    let gate = device.hold_opens();
    capturer.start_capture(1280, 720, 30);
    assert!(gate.wait_for_waiter(TIMEOUT));
    assert!(capturer.is_opening());

    let (tx, rx) = mpsc::channel();
    let c = Arc::clone(&capturer);
    let stopper = thread::spawn(move || {
        c.stop_capture();
        tx.send(()).unwrap();
    });

    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err(), "stop returned during open");
    device.release_holds();
    rx.recv_timeout(TIMEOUT).expect("stop should return once the open completes");
    stopper.join().unwrap();

    assert!(!capturer.is_running());
    assert!(!capturer.is_opening());
    assert!(wait_for(|| device.open_handles() == 0));
    assert!(recorder.wait_for_count(TIMEOUT, 1, |e| *e == RecordedEvent::Closed));
    assert_eq!(recorder.count(|e| *e == RecordedEvent::Stopped), 1);

    // Second stop is a no-op
    capturer.stop_capture();
    assert_eq!(recorder.count(|e| *e == RecordedEvent::Stopped), 1);
}

#[test]
fn test_switch_during_open_is_queued_until_open_completes() {
    let device = SyntheticBackend::back_and_front();
    let recorder = EventRecorder::new();
    let capturer = build(&device, &recorder);

    let gate = device.hold_opens();
    capturer.start_capture(1280, 720, 30);
    assert!(gate.wait_for_waiter(TIMEOUT));

    capturer.switch_camera(recorder.switch_handler());
    assert_eq!(capturer.switch_state(), SwitchState::Pending);
    assert_eq!(device.open_count("front"), 0);

    device.release_holds();
    assert!(recorder.wait_for_count(TIMEOUT, 1, is_switch_outcome));
    assert_eq!(recorder.count(|e| *e == RecordedEvent::SwitchDone(true)), 1);
    assert!(wait_for(|| capturer.is_running()));

    assert_eq!(capturer.camera_name(), "front");
    assert_eq!(capturer.switch_state(), SwitchState::Idle);
    assert_eq!(device.open_count("back"), 1);
    assert_eq!(device.open_count("front"), 1);
    assert_eq!(device.max_open_handles(), 1);
    assert!(wait_for(|| device.streaming_cameras() == vec!["front".to_string()]));
}

#[test]
fn test_queued_switch_proceeds_after_original_open_gives_up() {
    let device = SyntheticBackend::back_and_front();
    let recorder = EventRecorder::new();
    let capturer = build(&device, &recorder);

    device.fail_next_opens("back", 3, CaptureError::DeviceOpenFailed("busy".to_string()));
    let gate = device.hold_opens();
    capturer.start_capture(1280, 720, 30);
    assert!(gate.wait_for_waiter(TIMEOUT));
    capturer.switch_camera(recorder.switch_handler());
    assert_eq!(capturer.switch_state(), SwitchState::Pending);
    device.release_holds();

    assert!(recorder.wait_for_count(TIMEOUT, 1, is_switch_outcome));
    assert!(wait_for(|| capturer.is_running()));

    assert_eq!(device.open_count("back"), 3);
    assert_eq!(device.open_count("front"), 1);
    assert_eq!(capturer.camera_name(), "front");
    assert_eq!(recorder.count(|e| *e == RecordedEvent::Started(false)), 3);
    assert_eq!(
        recorder.count(|e| *e == RecordedEvent::Error("Failed to open camera: busy".to_string())),
        1
    );
    assert_eq!(recorder.count(|e| *e == RecordedEvent::SwitchDone(true)), 1);
}

#[test]
fn test_switch_while_running_reopens_other_camera() {
    let device = SyntheticBackend::back_and_front();
    let recorder = EventRecorder::new();
    let capturer = build(&device, &recorder);

    start_and_wait(&capturer);
    let old = capturer.current_session_id();

    capturer.switch_camera(recorder.switch_handler());
    assert!(recorder.wait_for_count(TIMEOUT, 1, is_switch_outcome));
    assert!(wait_for(|| capturer.is_running()));

    assert_eq!(recorder.count(|e| *e == RecordedEvent::SwitchDone(true)), 1);
    assert_eq!(capturer.camera_name(), "front");
    assert!(capturer.is_front_facing());
    assert_ne!(capturer.current_session_id(), old);
    assert_eq!(recorder.count(|e| *e == RecordedEvent::Closed), 1);
    assert_eq!(device.max_open_handles(), 1);

    let calls = device.calls();
    let released = calls.iter().position(|c| c == "release back").expect("back released");
    let opened = calls.iter().position(|c| c == "open front").expect("front opened");
    assert!(released < opened, "old device must be released before the new open");
    assert!(!calls.contains(&"double_release back".to_string()));
}

#[test]
fn test_failed_switch_reports_error_once_and_leaves_no_session() {
    let device = SyntheticBackend::back_and_front();
    let recorder = EventRecorder::new();
    let capturer = build(&device, &recorder);

    start_and_wait(&capturer);
    device.fail_next_opens("front", 1, CaptureError::DeviceOpenFailed("busy".to_string()));
    capturer.switch_camera(recorder.switch_handler());

    assert!(recorder.wait_for_count(TIMEOUT, 1, is_switch_outcome));
    assert!(wait_for(|| !capturer.is_opening()));
    thread::sleep(Duration::from_millis(50));

    assert_eq!(recorder.count(is_switch_outcome), 1);
    assert_eq!(
        recorder.count(|e| *e == RecordedEvent::SwitchError("Failed to open camera: busy".to_string())),
        1
    );
    assert_eq!(recorder.count(|e| matches!(e, RecordedEvent::Error(_))), 1);
    assert_eq!(device.open_count("front"), 1);
    assert!(!capturer.is_running());
    assert_eq!(capturer.switch_state(), SwitchState::Idle);
    assert!(wait_for(|| device.open_handles() == 0));
}

#[test]
fn test_switch_to_unknown_camera_is_rejected_without_teardown() {
    let device = SyntheticBackend::back_and_front();
    let recorder = EventRecorder::new();
    let capturer = build(&device, &recorder);

    start_and_wait(&capturer);
    let session = capturer.current_session_id();

    capturer.switch_camera_to("side", recorder.switch_handler());
    assert_eq!(
        recorder.count(|e| {
            *e == RecordedEvent::SwitchError("Attempted to switch to unknown camera device side".to_string())
        }),
        1
    );
    assert!(capturer.is_running());
    assert_eq!(capturer.current_session_id(), session);
    assert!(!device.calls().contains(&"stop_streaming back".to_string()));
}

#[test]
fn test_switch_rejections() {
    let single = SyntheticBackend::new(vec![SyntheticCamera::back("only")]);
    let recorder = EventRecorder::new();
    let capturer = build(&single, &recorder);
    start_and_wait(&capturer);
    capturer.switch_camera(recorder.switch_handler());
    assert_eq!(
        recorder.events().last(),
        Some(&RecordedEvent::SwitchError("No camera to switch to.".to_string()))
    );
    drop(capturer);

    let device = SyntheticBackend::back_and_front();
    let recorder = EventRecorder::new();
    let capturer = build(&device, &recorder);
    capturer.switch_camera(recorder.switch_handler());
    assert_eq!(
        recorder.events(),
        vec![RecordedEvent::SwitchError("switchCamera: camera is not running.".to_string())]
    );
    assert_eq!(device.total_opens(), 0);
}

#[test]
fn test_second_switch_while_one_is_active_is_rejected() {
    let device = SyntheticBackend::back_and_front();
    let recorder = EventRecorder::new();
    let capturer = build(&device, &recorder);

    let gate = device.hold_opens();
    capturer.start_capture(1280, 720, 30);
    assert!(gate.wait_for_waiter(TIMEOUT));
    capturer.switch_camera(recorder.switch_handler());
    capturer.switch_camera(recorder.switch_handler());
    assert_eq!(
        recorder.count(|e| *e == RecordedEvent::SwitchError("Camera switch already in progress.".to_string())),
        1
    );

    device.release_holds();
    assert!(recorder.wait_for_count(TIMEOUT, 2, is_switch_outcome));
    assert_eq!(recorder.count(|e| *e == RecordedEvent::SwitchDone(true)), 1);
    assert_eq!(device.open_count("front"), 1);
}

#[test]
fn test_open_retries_then_succeeds() {
    let device = SyntheticBackend::back_and_front();
    let recorder = EventRecorder::new();
    let capturer = build(&device, &recorder);

    device.fail_next_opens("back", 2, CaptureError::DeviceOpenFailed("busy".to_string()));
    start_and_wait(&capturer);

    assert_eq!(device.open_count("back"), 3);
    assert_eq!(recorder.count(|e| *e == RecordedEvent::Started(false)), 2);
    assert_eq!(recorder.count(|e| *e == RecordedEvent::Started(true)), 1);
    assert_eq!(recorder.count(|e| matches!(e, RecordedEvent::Error(_))), 0);
}

#[test]
fn test_open_gives_up_after_three_attempts() {
    let device = SyntheticBackend::back_and_front();
    let recorder = EventRecorder::new();
    let capturer = build(&device, &recorder);

    device.fail_next_opens("back", 5, CaptureError::DeviceOpenFailed("busy".to_string()));
    capturer.start_capture(1280, 720, 30);
    assert!(recorder.wait_for_count(TIMEOUT, 1, |e| matches!(e, RecordedEvent::Error(_))));
    assert!(!capturer.is_opening());

    thread::sleep(Duration::from_millis(100));
    assert_eq!(device.open_count("back"), 3);
    assert!(!capturer.is_running());
    assert_eq!(recorder.count(|e| *e == RecordedEvent::Started(false)), 3);
}

#[test]
fn test_retries_are_spaced_by_backoff() {
    let device = SyntheticBackend::back_and_front();
    let recorder = EventRecorder::new();
    let mut config = CapturerConfig::default();
    config.session.open_retry_delay_ms = 100;
    let capturer = build_with(&device, &recorder, config);

    device.fail_next_opens("back", 2, CaptureError::DeviceOpenFailed("busy".to_string()));
    let started = Instant::now();
    start_and_wait(&capturer);
    assert!(started.elapsed() >= Duration::from_millis(200));
}

#[test]
fn test_disconnected_open_failure_reports_disconnect() {
    let device = SyntheticBackend::back_and_front();
    let recorder = EventRecorder::new();
    let capturer = build(&device, &recorder);

    device.fail_next_opens("back", 3, CaptureError::DeviceDisconnected);
    capturer.start_capture(1280, 720, 30);
    assert!(recorder.wait_for_count(TIMEOUT, 1, |e| *e == RecordedEvent::Disconnected));
    assert_eq!(recorder.count(|e| matches!(e, RecordedEvent::Error(_))), 0);
}

#[test]
fn test_device_error_stops_capture() {
    let device = SyntheticBackend::back_and_front();
    let recorder = EventRecorder::new();
    let capturer = build(&device, &recorder);

    start_and_wait(&capturer);
    assert_eq!(device.emit_error(DeviceErrorKind::ServerDied), 1);

    assert!(recorder.wait_for_count(TIMEOUT, 1, |e| *e == RecordedEvent::Error("Camera server died!".to_string())));
    assert!(recorder.wait_for_count(TIMEOUT, 1, |e| *e == RecordedEvent::Stopped));
    assert!(!capturer.is_running());
    assert!(wait_for(|| device.open_handles() == 0));
    assert!(!device.calls().contains(&"double_release back".to_string()));
}

#[test]
fn test_eviction_reports_disconnect() {
    let device = SyntheticBackend::back_and_front();
    let recorder = EventRecorder::new();
    let capturer = build(&device, &recorder);

    start_and_wait(&capturer);
    device.emit_error(DeviceErrorKind::Evicted);
    assert!(recorder.wait_for_count(TIMEOUT, 1, |e| *e == RecordedEvent::Disconnected));
    assert!(wait_for(|| !capturer.is_running()));

    // Capture can be started again afterwards
    start_and_wait(&capturer);
    assert_eq!(device.open_count("back"), 2);
}

#[test]
fn test_frames_from_replaced_session_are_dropped() {
    let device = SyntheticBackend::back_and_front();
    let recorder = EventRecorder::new();
    let capturer = Arc::new(build(&device, &recorder));

    start_and_wait(&capturer);
    let old_sink = device.sink_for("back").expect("back is streaming");

    // Park the camera thread inside a zoom call so events pile up behind it.
    let controls = device.hold_controls();
    let c = Arc::clone(&capturer);
    let zoomer = thread::spawn(move || c.set_zoom(1));
    assert!(controls.wait_for_waiter(TIMEOUT));

    old_sink.frame(synthetic_frame(1, 16, 16));
    capturer.switch_camera(recorder.switch_handler());
    device.release_holds();

    zoomer.join().unwrap().expect("zoom on back camera");
    assert!(recorder.wait_for_count(TIMEOUT, 1, is_switch_outcome));
    assert_eq!(recorder.count(|e| matches!(e, RecordedEvent::Frame { .. })), 0);
    assert_eq!(recorder.count(|e| *e == RecordedEvent::FirstFrame), 0);

    assert!(wait_for(|| device.streaming_cameras() == vec!["front".to_string()]));
    device.emit_frame();
    assert!(recorder.wait_for_count(TIMEOUT, 1, |e| matches!(e, RecordedEvent::Frame { .. })));
    assert_eq!(recorder.count(|e| *e == RecordedEvent::FirstFrame), 1);
    assert!(recorder
        .events()
        .contains(&RecordedEvent::Frame { rotation: 270, mirrored: true }));
}

#[test]
fn test_errors_from_replaced_session_are_dropped() {
    let device = SyntheticBackend::back_and_front();
    let recorder = EventRecorder::new();
    let capturer = Arc::new(build(&device, &recorder));

    start_and_wait(&capturer);
    let old_sink = device.sink_for("back").expect("back is streaming");

    let controls = device.hold_controls();
    let c = Arc::clone(&capturer);
    let zoomer = thread::spawn(move || c.set_zoom(1));
    assert!(controls.wait_for_waiter(TIMEOUT));

    old_sink.error(DeviceErrorKind::Evicted);
    capturer.switch_camera(recorder.switch_handler());
    device.release_holds();

    zoomer.join().unwrap().expect("zoom on back camera");
    assert!(recorder.wait_for_count(TIMEOUT, 1, is_switch_outcome));
    assert_eq!(recorder.count(|e| *e == RecordedEvent::SwitchDone(true)), 1);
    assert!(wait_for(|| capturer.is_running()));
    assert_eq!(capturer.camera_name(), "front");

    thread::sleep(Duration::from_millis(50));
    assert_eq!(recorder.count(|e| *e == RecordedEvent::Disconnected), 0);
    assert_eq!(recorder.count(|e| matches!(e, RecordedEvent::Error(_))), 0);
    assert!(capturer.is_running());
}

#[test]
fn test_started_reported_once_per_opened_session_before_stop() {
    let device = SyntheticBackend::back_and_front();
    let recorder = EventRecorder::new();
    let capturer = Arc::new(build(&device, &recorder));

    let gate = device.hold_opens();
    capturer.start_capture(1280, 720, 30);
    assert!(gate.wait_for_waiter(TIMEOUT));
    capturer.switch_camera(recorder.switch_handler());

    let c = Arc::clone(&capturer);
    let stopper = thread::spawn(move || {
        assert!(wait_for(|| c.switch_state() == SwitchState::Idle && !c.is_opening() && c.is_running()));
        c.stop_capture();
    });
    device.release_holds();
    stopper.join().unwrap();

    let opened = device.open_count("back") + device.open_count("front");
    assert_eq!(opened, 2);
    assert_eq!(recorder.count(|e| *e == RecordedEvent::Started(true)), opened);

    let events = recorder.events();
    let last_started = events.iter().rposition(|e| *e == RecordedEvent::Started(true));
    let stopped = events.iter().position(|e| *e == RecordedEvent::Stopped);
    assert!(last_started.is_some() && stopped.is_some());
    assert!(last_started < stopped);
}

#[test]
fn test_first_frame_reported_again_after_switch() {
    let device = SyntheticBackend::back_and_front();
    let recorder = EventRecorder::new();
    let capturer = build(&device, &recorder);

    start_and_wait(&capturer);
    device.emit_frame();
    assert!(recorder.wait_for_count(TIMEOUT, 1, |e| *e == RecordedEvent::FirstFrame));

    capturer.switch_camera(recorder.switch_handler());
    assert!(recorder.wait_for_count(TIMEOUT, 1, is_switch_outcome));
    assert!(wait_for(|| device.streaming_cameras() == vec!["front".to_string()]));
    device.emit_frame();
    device.emit_frame();

    assert!(recorder.wait_for_count(TIMEOUT, 3, |e| matches!(e, RecordedEvent::Frame { .. })));
    assert_eq!(recorder.count(|e| *e == RecordedEvent::FirstFrame), 2);
}

#[test]
fn test_watchdog_reports_slow_open() {
    let device = SyntheticBackend::back_and_front();
    let recorder = EventRecorder::new();
    let mut config = fast_config();
    config.session.open_timeout_ms = 50;
    let capturer = build_with(&device, &recorder, config);

    let gate = device.hold_opens();
    capturer.start_capture(1280, 720, 30);
    assert!(gate.wait_for_waiter(TIMEOUT));
    assert!(recorder.wait_for_count(TIMEOUT, 1, |e| {
        *e == RecordedEvent::Error("Camera failed to start within timeout.".to_string())
    }));

    device.release_holds();
    assert!(wait_for(|| capturer.is_running()));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(recorder.count(|e| matches!(e, RecordedEvent::Error(_))), 1);
}

#[test]
fn test_watchdog_quiet_when_open_is_fast() {
    let device = SyntheticBackend::back_and_front();
    let recorder = EventRecorder::new();
    let mut config = fast_config();
    config.session.open_timeout_ms = 100;
    let capturer = build_with(&device, &recorder, config);

    start_and_wait(&capturer);
    thread::sleep(Duration::from_millis(200));
    assert_eq!(recorder.count(|e| matches!(e, RecordedEvent::Error(_))), 0);
}

#[test]
fn test_change_capture_format_reopens_with_new_format() {
    let device = SyntheticBackend::back_and_front();
    let recorder = EventRecorder::new();
    let capturer = build(&device, &recorder);

    start_and_wait(&capturer);
    capturer.change_capture_format(640, 480, 15);
    assert!(wait_for(|| {
        capturer.current_format().map(|f| f.size) == Some(Size::new(640, 480))
    }));

    assert_eq!(device.open_count("back"), 2);
    assert_eq!(recorder.count(|e| *e == RecordedEvent::Stopped), 1);
    let format = capturer.current_format().unwrap();
    assert_eq!(format.max_fps(), 15);
    assert_eq!(device.max_open_handles(), 1);
}

#[test]
fn test_restart_session_reopens_same_camera() {
    let device = SyntheticBackend::back_and_front();
    let recorder = EventRecorder::new();
    let capturer = build(&device, &recorder);

    start_and_wait(&capturer);
    let first = capturer.current_session_id().unwrap();
    capturer.restart_session();

    assert!(wait_for(|| {
        matches!(capturer.current_session_id(), Some(id) if id != first)
    }));
    assert_eq!(capturer.camera_name(), "back");
    assert_eq!(device.open_count("back"), 2);
    assert!(recorder.wait_for_count(TIMEOUT, 1, |e| *e == RecordedEvent::Closed));
}

#[test]
fn test_controls_are_restored_on_new_session() {
    let device = SyntheticBackend::new(vec![SyntheticCamera::back("a"), SyntheticCamera::back("b")]);
    let recorder = EventRecorder::new();
    let capturer = build(&device, &recorder);

    assert_eq!(capturer.set_zoom(2), Err(CaptureError::NoActiveSession));
    start_and_wait(&capturer);
    assert!(wait_for(|| device.calls().contains(&"set_zoom a".to_string())));

    assert_eq!(capturer.is_zoom_supported(), Ok(true));
    assert_eq!(capturer.zoom_ratios(), Ok(vec![100, 125, 150, 200]));
    assert_eq!(capturer.max_zoom(), Ok(3));
    assert_eq!(capturer.zoom(), Ok(2));
    assert!(matches!(capturer.set_zoom(9), Err(CaptureError::ControlFailed(_))));
    capturer.set_torch(true).expect("torch");

    capturer.switch_camera(recorder.switch_handler());
    assert!(recorder.wait_for_count(TIMEOUT, 1, is_switch_outcome));
    assert!(wait_for(|| {
        let calls = device.calls();
        calls.contains(&"set_zoom b".to_string()) && calls.contains(&"set_torch b".to_string())
    }));
    assert!(device.torch_enabled());
    assert_eq!(device.zoom_value(), 2);
}

#[test]
fn test_controls_unsupported_on_front_camera() {
    let device = SyntheticBackend::back_and_front();
    let recorder = EventRecorder::new();
    let capturer = CameraCapturer::builder()
        .device(Arc::clone(&device))
        .observer(recorder.clone())
        .config(fast_config())
        .camera("front")
        .build()
        .unwrap();

    start_and_wait(&capturer);
    assert_eq!(capturer.is_zoom_supported(), Ok(false));
    assert!(matches!(capturer.set_torch(true), Err(CaptureError::ControlUnsupported(_))));
    assert!(matches!(capturer.zoom(), Err(CaptureError::ControlUnsupported(_))));
}

#[test]
fn test_capture_stats_follow_current_session() {
    let device = SyntheticBackend::back_and_front();
    let recorder = EventRecorder::new();
    let capturer = build(&device, &recorder);

    assert!(capturer.capture_stats().is_none());
    start_and_wait(&capturer);
    for _ in 0..3 {
        device.emit_frame();
    }
    assert!(recorder.wait_for_count(TIMEOUT, 3, |e| matches!(e, RecordedEvent::Frame { .. })));

    let stats = capturer.capture_stats().expect("stats while running");
    assert_eq!(stats.camera_name, "back");
    assert_eq!(stats.frames_captured, 3);
    assert_eq!(Some(stats.session), capturer.current_session_id().map(|id| id.0));

    capturer.stop_capture();
    assert!(capturer.capture_stats().is_none());
}

#[test]
fn test_frame_rotation_follows_device_orientation() {
    let device = SyntheticBackend::back_and_front();
    let recorder = EventRecorder::new();
    let capturer = CameraCapturer::builder()
        .device(Arc::clone(&device))
        .events(recorder.clone())
        .observer(recorder.clone())
        .orientation(Arc::new(FixedOrientation(90)))
        .build()
        .unwrap();

    start_and_wait(&capturer);
    device.emit_frame();
    assert!(recorder.wait_for_count(TIMEOUT, 1, |e| matches!(e, RecordedEvent::Frame { .. })));
    assert!(recorder
        .events()
        .contains(&RecordedEvent::Frame { rotation: 0, mirrored: false }));
}

#[test]
fn test_exact_policy_failure_releases_device() {
    let device = SyntheticBackend::back_and_front();
    let recorder = EventRecorder::new();
    let mut config = fast_config();
    config.capture.format_policy = FormatPolicy::Exact;
    let capturer = build_with(&device, &recorder, config);

    capturer.start_capture(800, 600, 30);
    assert!(recorder.wait_for_count(TIMEOUT, 1, |e| matches!(e, RecordedEvent::Error(_))));
    assert_eq!(device.open_count("back"), 3);
    assert_eq!(device.open_handles(), 0);
    assert_eq!(device.calls().iter().filter(|c| *c == "release back").count(), 3);
    assert!(!capturer.is_running());
}

#[test]
fn test_builder_rejects_bad_setup() {
    let empty = SyntheticBackend::new(Vec::new());
    assert!(matches!(
        CameraCapturer::builder().device(empty).build(),
        Err(CaptureError::NoCamerasAttached)
    ));

    let device = SyntheticBackend::back_and_front();
    assert!(matches!(
        CameraCapturer::builder().device(Arc::clone(&device)).camera("side").build(),
        Err(CaptureError::UnknownCamera(name)) if name == "side"
    ));
    assert!(matches!(
        CameraCapturer::builder().enumerator(device.clone()).build(),
        Err(CaptureError::Config(_))
    ));

    let mut config = CapturerConfig::default();
    config.session.max_open_attempts = 0;
    assert!(matches!(
        CameraCapturer::builder().device(device).config(config).build(),
        Err(CaptureError::Config(_))
    ));
}

#[test]
fn test_drop_releases_running_camera() {
    let device = SyntheticBackend::back_and_front();
    let recorder = EventRecorder::new();
    let capturer = build(&device, &recorder);

    start_and_wait(&capturer);
    assert_eq!(device.open_handles(), 1);
    drop(capturer);

    assert_eq!(device.open_handles(), 0);
    assert!(device.streaming_cameras().is_empty());
    assert_eq!(recorder.count(|e| *e == RecordedEvent::Stopped), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_async_stop_waits_for_open() {
    let device = SyntheticBackend::back_and_front();
    let recorder = EventRecorder::new();
    let capturer = build(&device, &recorder);

    let gate = device.hold_opens();
    capturer.start_capture(1280, 720, 30);
    assert!(gate.wait_for_waiter(TIMEOUT));

    let d = Arc::clone(&device);
    let releaser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        d.release_holds();
    });

    tokio::time::timeout(TIMEOUT, capturer.stop_capture_async())
        .await
        .expect("async stop should finish");
    releaser.join().unwrap();

    assert!(!capturer.is_opening());
    assert!(!capturer.is_running());
    assert_eq!(recorder.count(|e| *e == RecordedEvent::Started(true)), 1);
    assert_eq!(recorder.count(|e| *e == RecordedEvent::Stopped), 1);
}

#[test]
fn test_async_stop_without_open_returns_immediately() {
    let device = SyntheticBackend::back_and_front();
    let recorder = EventRecorder::new();
    let capturer = build(&device, &recorder);

    start_and_wait(&capturer);
    tokio_test::block_on(capturer.stop_capture_async());
    assert!(!capturer.is_running());
    tokio_test::block_on(capturer.stop_capture_async());
    assert_eq!(recorder.count(|e| *e == RecordedEvent::Stopped), 1);
}

#[test]
fn test_capture_stats_serialize() {
    let device = SyntheticBackend::back_and_front();
    let recorder = EventRecorder::new();
    let capturer = build(&device, &recorder);

    start_and_wait(&capturer);
    let stats = capturer.capture_stats().unwrap();
    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["camera_name"], "back");
    assert_eq!(json["frames_captured"], 0);
    assert!(json["opened_at"].is_string());
}
