//! Camera capturer
//!
//! `CameraCapturer` owns the state machine around capture sessions: opening
//! with bounded retry, camera switching, blocking stop and routing of session
//! events. Callers may use it from any thread. Device work runs on a dedicated
//! camera thread and open deadlines are supervised by a watchdog thread.
//!
//! All cross-thread state lives in one `CapturerState` behind one mutex. No
//! device call is made while that mutex is held, and application callbacks
//! are invoked only after it has been released.

use crate::assert_invariant;
use crate::config::CapturerConfig;
use crate::dispatch::{lock, DispatchThread};
use crate::errors::{CaptureError, CaptureResult, SessionFailure};
use crate::events::{CameraEventsHandler, CameraSwitchHandler, CapturerObserver, NoopEvents, NoopObserver};
use crate::platform::{CameraBackend, CameraEnumerator, FixedOrientation, OrientationSource};
use crate::session::{CaptureSession, SessionContext, SessionEvents};
use crate::statistics::{CameraStatistics, CaptureStats};
use crate::types::{CaptureFormat, FormatRequest, SessionId, SwitchState, VideoFrame};
use crate::watchdog::{Watchdog, WatchdogTicket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;

/// One in-flight construction attempt and its watchdog.
#[derive(Debug, Clone, Copy)]
struct OpenAttempt {
    id: SessionId,
    ticket: Option<WatchdogTicket>,
}

/// Controls re-applied to every newly opened session.
#[derive(Debug, Clone, Copy, Default)]
struct RequestedControls {
    zoom: Option<u32>,
    torch: bool,
}

struct CapturerState {
    camera_name: String,
    pending_camera_name: Option<String>,
    format: FormatRequest,
    opening: bool,
    open_attempts_remaining: u32,
    current_session: Option<Arc<CaptureSession>>,
    attempt: Option<OpenAttempt>,
    switch_state: SwitchState,
    switch_handler: Option<Box<dyn CameraSwitchHandler>>,
    // Valid from a successful open until that session is stopped.
    statistics: Option<CameraStatistics>,
    first_frame_observed: bool,
    // Sessions stopped by the capturer whose closed event is still due.
    closing_sessions: Vec<SessionId>,
    controls: RequestedControls,
}

impl CapturerState {
    fn current_id(&self) -> Option<SessionId> {
        self.current_session.as_ref().map(|s| s.id())
    }

    fn check_invariants(&self) {
        assert_invariant!(
            !(self.opening && self.current_session.is_some()),
            "No current session while an open is in flight",
            "CapturerState"
        );
        assert_invariant!(
            self.opening == self.attempt.is_some(),
            "Open attempt tracked only while opening",
            "CapturerState"
        );
        assert_invariant!(
            self.switch_state != SwitchState::Idle || self.switch_handler.is_none(),
            "Switch handler only held while a switch is active",
            "CapturerState"
        );
        assert_invariant!(
            self.switch_state != SwitchState::Pending
                || (self.pending_camera_name.is_some() && self.opening),
            "Pending switch has a queued camera and an open in flight",
            "CapturerState"
        );
        assert_invariant!(
            self.current_session.is_some() == self.statistics.is_some(),
            "Statistics live exactly as long as the current session",
            "CapturerState"
        );
    }
}

/// Application notifications collected under the state lock and delivered
/// after it is released.
enum Notice {
    CapturerStopped,
    CameraOpening(String),
    CameraError(String),
    CameraDisconnected,
    CameraClosed,
    SwitchDone(Box<dyn CameraSwitchHandler>, String),
    SwitchError(Box<dyn CameraSwitchHandler>, String),
}

struct CapturerInner {
    config: CapturerConfig,
    enumerator: Arc<dyn CameraEnumerator>,
    backend: Arc<dyn CameraBackend>,
    events: Arc<dyn CameraEventsHandler>,
    observer: Arc<dyn CapturerObserver>,
    orientation: Arc<dyn OrientationSource>,
    camera_thread: DispatchThread,
    watchdog: Watchdog,
    state: Mutex<CapturerState>,
    opening_done: Condvar,
    opening_tx: watch::Sender<bool>,
    next_session: AtomicU64,
    self_ref: Weak<CapturerInner>,
}

/// Thread-safe controller for a single logical camera.
pub struct CameraCapturer {
    inner: Arc<CapturerInner>,
}

/// Builder for [`CameraCapturer`].
#[derive(Default)]
pub struct CapturerBuilder {
    enumerator: Option<Arc<dyn CameraEnumerator>>,
    backend: Option<Arc<dyn CameraBackend>>,
    events: Option<Arc<dyn CameraEventsHandler>>,
    observer: Option<Arc<dyn CapturerObserver>>,
    orientation: Option<Arc<dyn OrientationSource>>,
    config: Option<CapturerConfig>,
    camera_name: Option<String>,
}

impl CapturerBuilder {
    pub fn enumerator(mut self, enumerator: Arc<dyn CameraEnumerator>) -> Self {
        self.enumerator = Some(enumerator);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn CameraBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Use one object as both enumerator and backend.
    pub fn device<D>(self, device: Arc<D>) -> Self
    where
        D: CameraEnumerator + CameraBackend + 'static,
    {
        let enumerator: Arc<dyn CameraEnumerator> = device.clone();
        let backend: Arc<dyn CameraBackend> = device;
        self.enumerator(enumerator).backend(backend)
    }

    pub fn events(mut self, events: Arc<dyn CameraEventsHandler>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn CapturerObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn orientation(mut self, orientation: Arc<dyn OrientationSource>) -> Self {
        self.orientation = Some(orientation);
        self
    }

    pub fn config(mut self, config: CapturerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Initially selected camera. Defaults to the first enumerated device.
    pub fn camera(mut self, camera_name: impl Into<String>) -> Self {
        self.camera_name = Some(camera_name.into());
        self
    }

    pub fn build(self) -> CaptureResult<CameraCapturer> {
        let enumerator = self
            .enumerator
            .ok_or_else(|| CaptureError::Config("camera enumerator is required".to_string()))?;
        let backend = self
            .backend
            .ok_or_else(|| CaptureError::Config("camera backend is required".to_string()))?;
        let config = self.config.unwrap_or_default();
        config.validate().map_err(CaptureError::Config)?;

        let device_names = enumerator.device_names();
        let camera_name = match self.camera_name {
            Some(name) => name,
            None => device_names.first().cloned().ok_or(CaptureError::NoCamerasAttached)?,
        };
        if device_names.is_empty() {
            return Err(CaptureError::NoCamerasAttached);
        }
        if !device_names.contains(&camera_name) {
            return Err(CaptureError::UnknownCamera(camera_name));
        }

        let camera_thread = DispatchThread::spawn(config.threads.capture_thread_name.clone())?;
        let watchdog = Watchdog::spawn(&config.threads.watchdog_thread_name)?;
        let format = FormatRequest::new(
            config.capture.default_width,
            config.capture.default_height,
            config.capture.default_framerate,
        );
        let (opening_tx, _) = watch::channel(false);

        log::info!("Camera capturer created for {}", camera_name);
        let inner = Arc::new_cyclic(|self_ref| CapturerInner {
            enumerator,
            backend,
            events: self.events.unwrap_or_else(|| Arc::new(NoopEvents)),
            observer: self.observer.unwrap_or_else(|| Arc::new(NoopObserver)),
            orientation: self
                .orientation
                .unwrap_or_else(|| Arc::new(FixedOrientation::default())),
            camera_thread,
            watchdog,
            state: Mutex::new(CapturerState {
                camera_name,
                pending_camera_name: None,
                format,
                opening: false,
                open_attempts_remaining: 0,
                current_session: None,
                attempt: None,
                switch_state: SwitchState::Idle,
                switch_handler: None,
                statistics: None,
                first_frame_observed: false,
                closing_sessions: Vec::new(),
                controls: RequestedControls::default(),
            }),
            opening_done: Condvar::new(),
            opening_tx,
            next_session: AtomicU64::new(1),
            self_ref: self_ref.clone(),
            config,
        });
        Ok(CameraCapturer { inner })
    }
}

impl CameraCapturer {
    pub fn builder() -> CapturerBuilder {
        CapturerBuilder::default()
    }

    /// Open the selected camera, retrying failed opens. No-op with a warning
    /// if a session is already open or opening.
    pub fn start_capture(&self, width: u32, height: u32, framerate: u32) {
        log::debug!("startCapture: {}x{}@{}", width, height, framerate);
        let inner = &self.inner;
        let mut state = inner.lock_state();
        inner.start_locked(&mut state, FormatRequest::new(width, height, framerate));
        inner.finish(state, Vec::new());
    }

    /// `start_capture` with the configured default format.
    pub fn start_capture_with_defaults(&self) {
        let capture = &self.inner.config.capture;
        self.start_capture(
            capture.default_width,
            capture.default_height,
            capture.default_framerate,
        );
    }

    /// Stop capture, first waiting for any in-flight open (including its
    /// retries) to finish. Idempotent.
    pub fn stop_capture(&self) {
        self.inner.stop_capture();
    }

    /// Async variant of `stop_capture` that awaits the in-flight open instead
    /// of blocking the thread.
    pub async fn stop_capture_async(&self) {
        log::debug!("Stop capture (async)");
        let inner = &self.inner;
        let mut opening = inner.opening_tx.subscribe();
        loop {
            {
                let mut state = inner.lock_state();
                if !state.opening {
                    let notices = inner.stop_locked(&mut state);
                    inner.finish(state, notices);
                    return;
                }
            }
            log::debug!("Stop capture: Waiting for session to open");
            if opening.wait_for(|opening| !*opening).await.is_err() {
                return;
            }
        }
    }

    /// Stop and restart with a new format.
    pub fn change_capture_format(&self, width: u32, height: u32, framerate: u32) {
        log::debug!("changeCaptureFormat: {}x{}@{}", width, height, framerate);
        let inner = &self.inner;
        let Some(mut state) = inner.wait_while_opening() else {
            return;
        };
        let notices = inner.stop_locked(&mut state);
        inner.start_locked(&mut state, FormatRequest::new(width, height, framerate));
        inner.finish(state, notices);
    }

    /// Switch to the next camera in enumeration order.
    pub fn switch_camera(&self, handler: Box<dyn CameraSwitchHandler>) {
        log::debug!("switchCamera");
        let device_names = self.inner.enumerator.device_names();
        if device_names.len() < 2 {
            report_switch_error(handler, &CaptureError::NoCameraToSwitch);
            return;
        }
        let current = self.camera_name();
        let index = device_names.iter().position(|n| *n == current);
        let next = match index {
            Some(i) => device_names[(i + 1) % device_names.len()].clone(),
            None => device_names[0].clone(),
        };
        self.switch_camera_to(next, handler);
    }

    /// Switch to `camera_name`. The outcome is reported to `handler`.
    pub fn switch_camera_to(&self, camera_name: impl Into<String>, handler: Box<dyn CameraSwitchHandler>) {
        let camera_name = camera_name.into();
        log::debug!("switchCamera internal: {}", camera_name);
        let inner = &self.inner;
        if !inner.enumerator.device_names().contains(&camera_name) {
            report_switch_error(handler, &CaptureError::SwitchTargetUnknown(camera_name));
            return;
        }

        let mut notices = Vec::new();
        let mut state = inner.lock_state();
        inner.switch_locked(&mut state, Some(handler), camera_name, &mut notices);
        inner.finish(state, notices);
        log::debug!("switchCamera done");
    }

    /// Tear down the live session and reopen the same camera with a single
    /// attempt.
    pub fn restart_session(&self) {
        let inner = &self.inner;
        let mut state = inner.lock_state();
        if state.opening || state.current_session.is_none() {
            log::warn!("restartSession: no open session to restart");
            inner.finish(state, Vec::new());
            return;
        }
        log::debug!("restartSession: stopping {}", state.camera_name);
        inner.release_current_locked(&mut state);
        state.opening = true;
        state.open_attempts_remaining = inner.config.session.switch_open_attempts;
        inner.create_session_locked(&mut state, Duration::ZERO);
        inner.finish(state, Vec::new());
    }

    pub fn dispose(&self) {
        log::debug!("dispose");
        self.inner.stop_capture();
    }

    pub fn camera_name(&self) -> String {
        self.inner.lock_state().camera_name.clone()
    }

    pub fn is_front_facing(&self) -> bool {
        let name = self.camera_name();
        self.inner.enumerator.is_front_facing(&name)
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock_state().current_session.is_some()
    }

    pub fn is_opening(&self) -> bool {
        self.inner.lock_state().opening
    }

    pub fn switch_state(&self) -> SwitchState {
        self.inner.lock_state().switch_state
    }

    pub fn current_session_id(&self) -> Option<SessionId> {
        self.inner.lock_state().current_id()
    }

    /// Format negotiated by the current session.
    pub fn current_format(&self) -> Option<CaptureFormat> {
        self.inner.lock_state().current_session.as_ref().map(|s| s.format())
    }

    pub fn capture_stats(&self) -> Option<CaptureStats> {
        self.inner.lock_state().statistics.as_ref().map(|s| s.snapshot())
    }

    pub fn config(&self) -> &CapturerConfig {
        &self.inner.config
    }

    pub fn is_zoom_supported(&self) -> CaptureResult<bool> {
        self.inner.with_session(|s| s.is_zoom_supported())
    }

    pub fn zoom(&self) -> CaptureResult<u32> {
        self.inner.with_session(|s| s.zoom())
    }

    pub fn max_zoom(&self) -> CaptureResult<u32> {
        self.inner.with_session(|s| s.max_zoom())
    }

    /// Zoom ratios in 1/100 steps. The first entry is 100.
    pub fn zoom_ratios(&self) -> CaptureResult<Vec<u32>> {
        self.inner.with_session(|s| s.zoom_ratios())
    }

    /// Set the zoom value. Accepted values, and values set while no session
    /// is live, are re-applied after every reopen.
    pub fn set_zoom(&self, value: u32) -> CaptureResult<()> {
        let result = self.inner.with_session(move |s| s.set_zoom(value));
        if remember_control(&result) {
            self.inner.lock_state().controls.zoom = Some(value);
        }
        result
    }

    /// Turn the torch on or off. Remembered like `set_zoom`.
    pub fn set_torch(&self, enabled: bool) -> CaptureResult<()> {
        let result = self.inner.with_session(move |s| s.set_torch(enabled));
        if remember_control(&result) {
            self.inner.lock_state().controls.torch = enabled;
        }
        result
    }
}

fn remember_control(result: &CaptureResult<()>) -> bool {
    matches!(result, Ok(()) | Err(CaptureError::NoActiveSession))
}

impl Drop for CameraCapturer {
    fn drop(&mut self) {
        self.dispose();
        self.inner.watchdog.shutdown();
        self.inner.camera_thread.shutdown();
    }
}

fn report_switch_error(handler: Box<dyn CameraSwitchHandler>, error: &CaptureError) {
    log::error!("{}", error);
    handler.on_camera_switch_error(&error.to_string());
}

impl CapturerInner {
    fn lock_state(&self) -> MutexGuard<'_, CapturerState> {
        lock(&self.state)
    }

    /// Publish the opening flag, check invariants, release the lock and
    /// deliver collected notices.
    fn finish(&self, state: MutexGuard<'_, CapturerState>, notices: Vec<Notice>) {
        state.check_invariants();
        let opening = state.opening;
        self.opening_tx.send_replace(opening);
        if !opening {
            self.opening_done.notify_all();
        }
        drop(state);
        self.dispatch(notices);
    }

    fn dispatch(&self, notices: Vec<Notice>) {
        for notice in notices {
            match notice {
                Notice::CapturerStopped => self.observer.on_capturer_stopped(),
                Notice::CameraOpening(name) => self.events.on_camera_opening(&name),
                Notice::CameraError(error) => self.events.on_camera_error(&error),
                Notice::CameraDisconnected => self.events.on_camera_disconnected(),
                Notice::CameraClosed => self.events.on_camera_closed(),
                Notice::SwitchDone(handler, camera_name) => {
                    handler.on_camera_switch_done(self.enumerator.is_front_facing(&camera_name))
                }
                Notice::SwitchError(handler, error) => handler.on_camera_switch_error(&error),
            }
        }
    }

    fn stop_capture(&self) {
        log::debug!("Stop capture");
        let Some(mut state) = self.wait_while_opening() else {
            return;
        };
        let notices = self.stop_locked(&mut state);
        self.finish(state, notices);
        log::debug!("Stop capture done");
    }

    /// Block until no open is in flight. Returns None when called on the
    /// camera thread during an open, which would otherwise never finish.
    fn wait_while_opening(&self) -> Option<MutexGuard<'_, CapturerState>> {
        let mut state = self.lock_state();
        if state.opening && self.camera_thread.handle().is_current() {
            log::error!("Stop capture on the camera thread while a session is opening, ignored");
            return None;
        }
        while state.opening {
            log::debug!("Stop capture: Waiting for session to open");
            state = self
                .opening_done
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        Some(state)
    }

    fn start_locked(&self, state: &mut CapturerState, format: FormatRequest) {
        if state.opening || state.current_session.is_some() {
            log::warn!("{}", CaptureError::AlreadyRunning);
            return;
        }
        state.format = format;
        state.opening = true;
        state.open_attempts_remaining = self.config.session.max_open_attempts;
        self.create_session_locked(state, Duration::ZERO);
    }

    /// Release the current session's statistics, then hand the session to the
    /// camera thread to be stopped.
    fn release_current_locked(&self, state: &mut CapturerState) -> bool {
        let Some(session) = state.current_session.take() else {
            return false;
        };
        if let Some(mut statistics) = state.statistics.take() {
            statistics.release();
        }
        state.closing_sessions.push(session.id());
        let id = session.id();
        if self.camera_thread.handle().post(move || session.stop()).is_err() {
            log::warn!("{}: camera thread stopped before the session could be closed", id);
        }
        true
    }

    fn stop_locked(&self, state: &mut CapturerState) -> Vec<Notice> {
        if self.release_current_locked(state) {
            log::debug!("Stop capture: Nulling session");
            vec![Notice::CapturerStopped]
        } else {
            log::debug!("Stop capture: No session open");
            Vec::new()
        }
    }

    fn switch_locked(
        &self,
        state: &mut CapturerState,
        handler: Option<Box<dyn CameraSwitchHandler>>,
        camera_name: String,
        notices: &mut Vec<Notice>,
    ) {
        let rejection = if state.switch_state != SwitchState::Idle {
            Some(CaptureError::SwitchAlreadyInProgress)
        } else if !state.opening && state.current_session.is_none() {
            Some(CaptureError::SwitchNotRunning)
        } else {
            None
        };
        if let Some(error) = rejection {
            log::error!("{}", error);
            if let Some(handler) = handler {
                notices.push(Notice::SwitchError(handler, error.to_string()));
            }
            return;
        }

        if state.opening {
            state.switch_state = SwitchState::Pending;
            state.pending_camera_name = Some(camera_name);
            state.switch_handler = handler;
            return;
        }

        log::debug!("switchCamera: Stopping session");
        self.release_current_locked(state);
        self.open_for_switch_locked(state, handler, camera_name);
    }

    fn open_for_switch_locked(
        &self,
        state: &mut CapturerState,
        handler: Option<Box<dyn CameraSwitchHandler>>,
        camera_name: String,
    ) {
        state.switch_state = SwitchState::InProgress;
        state.switch_handler = handler;
        state.camera_name = camera_name;
        state.opening = true;
        state.open_attempts_remaining = self.config.session.switch_open_attempts;
        self.create_session_locked(state, Duration::ZERO);
    }

    /// Arm the watchdog and post one construction attempt after `delay`.
    fn create_session_locked(&self, state: &mut CapturerState, delay: Duration) {
        let id = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed));

        let weak = self.self_ref.clone();
        let ticket = self
            .watchdog
            .arm(delay + self.config.session.open_timeout(), move || {
                if let Some(inner) = weak.upgrade() {
                    inner.on_open_timeout(id);
                }
            })
            .map_err(|e| log::warn!("{}: watchdog unavailable: {}", id, e))
            .ok();
        state.attempt = Some(OpenAttempt { id, ticket });

        let events: Weak<dyn SessionEvents> = self.self_ref.clone();
        let ctx = SessionContext {
            id,
            camera_name: state.camera_name.clone(),
            request: state.format,
            policy: self.config.capture.format_policy,
            dispatcher: self.camera_thread.handle(),
            events,
            orientation: Arc::clone(&self.orientation),
        };
        let weak = self.self_ref.clone();
        let backend = Arc::clone(&self.backend);
        let posted = self.camera_thread.handle().post_delayed(
            move || {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                match CaptureSession::create(ctx, backend.as_ref()) {
                    Ok(session) => inner.on_create_done(id, session),
                    Err(failure) => inner.on_create_failure(id, failure),
                }
            },
            delay,
        );

        if let Err(e) = posted {
            log::error!("{}: cannot open camera: {}", id, e);
            if let Some(ticket) = ticket {
                self.watchdog.disarm(ticket);
            }
            state.attempt = None;
            state.opening = false;
            state.switch_state = SwitchState::Idle;
            state.pending_camera_name = None;
            state.switch_handler = None;
        }
    }

    fn is_current_attempt(&self, id: SessionId) -> bool {
        self.lock_state().attempt.map(|a| a.id) == Some(id)
    }

    fn take_attempt_locked(&self, state: &mut CapturerState, id: SessionId) -> bool {
        match state.attempt {
            Some(attempt) if attempt.id == id => {
                if let Some(ticket) = attempt.ticket {
                    self.watchdog.disarm(ticket);
                }
                state.attempt = None;
                true
            }
            _ => false,
        }
    }

    fn on_create_done(&self, id: SessionId, session: Arc<CaptureSession>) {
        self.camera_thread.handle().check_is_current();
        if !self.is_current_attempt(id) {
            log::warn!("{}: opened without a matching attempt, closing", id);
            session.stop();
            return;
        }
        // Reported before the lock is retaken so a waiting stop cannot overtake it.
        self.observer.on_capturer_started(true);

        let mut notices = Vec::new();
        let mut state = self.lock_state();
        log::debug!("Create session done. Switch state: {:?}", state.switch_state);
        if !self.take_attempt_locked(&mut state, id) {
            log::warn!("{}: attempt superseded while reporting start, closing", id);
            drop(state);
            session.stop();
            return;
        }

        state.opening = false;
        state.statistics = Some(CameraStatistics::new(state.camera_name.clone(), id.0));
        state.current_session = Some(Arc::clone(&session));
        state.first_frame_observed = false;
        state.closing_sessions.clear();

        match state.switch_state {
            SwitchState::InProgress => {
                state.switch_state = SwitchState::Idle;
                if let Some(handler) = state.switch_handler.take() {
                    notices.push(Notice::SwitchDone(handler, state.camera_name.clone()));
                }
            }
            SwitchState::Pending => {
                let target = state.pending_camera_name.take();
                let handler = state.switch_handler.take();
                state.switch_state = SwitchState::Idle;
                if let Some(target) = target {
                    self.switch_locked(&mut state, handler, target, &mut notices);
                }
            }
            SwitchState::Idle => {}
        }

        let still_current = state.current_id() == Some(id);
        let controls = state.controls;
        self.finish(state, notices);

        if still_current {
            self.reapply_controls(&session, controls);
        }
    }

    fn on_create_failure(&self, id: SessionId, failure: SessionFailure) {
        self.camera_thread.handle().check_is_current();
        if !self.is_current_attempt(id) {
            log::warn!("{}: failure without a matching attempt: {}", id, failure);
            return;
        }
        self.observer.on_capturer_started(false);

        let mut notices = Vec::new();
        let mut state = self.lock_state();
        if !self.take_attempt_locked(&mut state, id) {
            log::warn!("{}: failure without a matching attempt: {}", id, failure);
            return;
        }

        state.open_attempts_remaining = state.open_attempts_remaining.saturating_sub(1);
        if state.open_attempts_remaining > 0 {
            log::warn!("Opening camera failed, retry: {}", failure);
            self.create_session_locked(&mut state, self.config.session.retry_delay());
            self.finish(state, notices);
            return;
        }

        log::warn!("Opening camera failed, passing: {}", failure);
        state.opening = false;
        let terminal = if failure.is_disconnect() {
            Notice::CameraDisconnected
        } else {
            Notice::CameraError(failure.message.clone())
        };

        match state.switch_state {
            SwitchState::InProgress => {
                state.switch_state = SwitchState::Idle;
                if let Some(handler) = state.switch_handler.take() {
                    notices.push(Notice::SwitchError(handler, failure.message.clone()));
                }
                notices.push(terminal);
            }
            SwitchState::Pending => {
                notices.push(terminal);
                let target = state.pending_camera_name.take();
                let handler = state.switch_handler.take();
                state.switch_state = SwitchState::Idle;
                if let Some(target) = target {
                    log::debug!("Reopening queued switch target {}", target);
                    self.open_for_switch_locked(&mut state, handler, target);
                }
            }
            SwitchState::Idle => notices.push(terminal),
        }
        self.finish(state, notices);
    }

    fn on_open_timeout(&self, id: SessionId) {
        {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            match state.attempt.as_mut() {
                Some(attempt) if attempt.id == id && state.opening => attempt.ticket = None,
                _ => return,
            }
        }
        let error = CaptureError::OpenTimedOut;
        log::warn!("{}: {}", id, error);
        self.events.on_camera_error(&error.to_string());
    }

    fn reapply_controls(&self, session: &CaptureSession, controls: RequestedControls) {
        if let Some(zoom) = controls.zoom {
            if let Err(e) = session.set_zoom(zoom) {
                log::debug!("{}: zoom {} not restored: {}", session.id(), zoom, e);
            }
        }
        if controls.torch {
            if let Err(e) = session.set_torch(true) {
                log::debug!("{}: torch not restored: {}", session.id(), e);
            }
        }
    }

    fn with_session<R, F>(&self, f: F) -> CaptureResult<R>
    where
        F: FnOnce(&CaptureSession) -> CaptureResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let session = self
            .lock_state()
            .current_session
            .clone()
            .ok_or(CaptureError::NoActiveSession)?;
        self.camera_thread.handle().invoke(move || f(&session))?
    }

    /// Run `f` under the lock if `id` is the current session; drop the event otherwise.
    fn route_to_current(
        &self,
        id: SessionId,
        what: &str,
        f: impl FnOnce(&Self, &mut CapturerState) -> Vec<Notice>,
    ) {
        self.camera_thread.handle().check_is_current();
        let mut state = self.lock_state();
        if state.current_id() != Some(id) {
            log::warn!("{} from another session ({}).", what, id);
            return;
        }
        let notices = f(self, &mut state);
        self.finish(state, notices);
    }
}

impl SessionEvents for CapturerInner {
    fn on_camera_opening(&self, session: SessionId) {
        self.camera_thread.handle().check_is_current();
        let state = self.lock_state();
        if state.current_session.is_some() {
            log::warn!("onCameraOpening while session was open.");
            return;
        }
        if state.attempt.map(|a| a.id) != Some(session) {
            log::debug!("onCameraOpening from another session ({}).", session);
            return;
        }
        let notices = vec![Notice::CameraOpening(state.camera_name.clone())];
        self.finish(state, notices);
    }

    fn on_camera_error(&self, session: SessionId, error: &str) {
        self.route_to_current(session, "onCameraError", |inner, state| {
            let mut notices = vec![Notice::CameraError(error.to_string())];
            notices.extend(inner.stop_locked(state));
            notices
        });
    }

    fn on_camera_disconnected(&self, session: SessionId) {
        self.route_to_current(session, "onCameraDisconnected", |inner, state| {
            let mut notices = vec![Notice::CameraDisconnected];
            notices.extend(inner.stop_locked(state));
            notices
        });
    }

    fn on_camera_closed(&self, session: SessionId) {
        self.camera_thread.handle().check_is_current();
        let mut state = self.lock_state();
        let closing = state.closing_sessions.iter().position(|id| *id == session);
        match closing {
            Some(index) => {
                state.closing_sessions.swap_remove(index);
            }
            None if state.current_id() == Some(session) => {}
            None => {
                log::debug!("onCameraClosed from another session ({}).", session);
                return;
            }
        }
        self.finish(state, vec![Notice::CameraClosed]);
    }

    fn on_frame_captured(&self, session: SessionId, frame: VideoFrame) {
        self.camera_thread.handle().check_is_current();
        let first_frame = {
            let mut state = self.lock_state();
            if state.current_id() != Some(session) {
                log::warn!("onFrameCaptured from another session ({}).", session);
                return;
            }
            let first_frame = !state.first_frame_observed;
            state.first_frame_observed = true;
            if let Some(statistics) = state.statistics.as_mut() {
                statistics.add_frame();
            }
            first_frame
        };
        if first_frame {
            self.events.on_first_frame_available();
        }
        self.observer.on_frame_captured(&frame);
    }
}
