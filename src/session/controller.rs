//! Session controller.
//!
//! Owns the one live device handle, the one capture session bound to it, and
//! the session state machine. All mutation happens on the lifecycle context:
//! public operations and device callbacks alike arrive there as posted tasks,
//! in order. Each open attempt is stamped with an epoch; events from a
//! superseded attempt are ignored, and their payload handles close on drop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::config::ViewfinderConfig;
use crate::errors::CameraError;
use crate::imagequeue::ImageQueue;
use crate::permissions::AccessAuthorizer;
use crate::platform::{
    CameraBackend, CaptureEvent, CaptureEventSink, DeviceEvent, DeviceEventSink, DeviceHandle,
    SessionEvent, SessionEventSink, SessionHandle,
};
use crate::registry::DeviceRegistry;
use crate::scheduler::{TaskContext, WorkerScheduler};
use crate::session::pipeline::RequestPipeline;
use crate::session::state::StateCell;
use crate::storage::FrameWriter;
use crate::types::{CaptureRequest, DeviceDescriptor, Facing, SessionState, StreamTarget};

/// Out-of-band reports. Device and session failures also surface through
/// `SessionState`; persistence failures surface only here and never change
/// the state.
#[derive(Debug, Clone)]
pub enum Notice {
    PreviewStarted { device_id: String },
    StillSaved { path: std::path::PathBuf },
    PersistenceFailed { reason: String },
    SessionFailed { error: CameraError },
    Closed,
}

struct RunContexts {
    lifecycle: TaskContext,
    capture: TaskContext,
    persist: TaskContext,
}

/// Mutable session resources. Touched only from lifecycle-context tasks
/// while a run is live; the inline fallback in `close` applies only once the
/// lifecycle context is gone.
struct SessionCore {
    device: Option<DeviceHandle>,
    session: Option<SessionHandle>,
    preview_request: Option<CaptureRequest>,
    targets: Vec<StreamTarget>,
    still_queue: Option<ImageQueue>,
}

impl SessionCore {
    fn new() -> Self {
        Self {
            device: None,
            session: None,
            preview_request: None,
            targets: Vec::new(),
            still_queue: None,
        }
    }
}

struct ControllerInner {
    backend: Arc<dyn CameraBackend>,
    authorizer: Arc<dyn AccessAuthorizer>,
    registry: DeviceRegistry,
    config: ViewfinderConfig,
    pipeline: RequestPipeline,
    scheduler: WorkerScheduler,
    state: StateCell,
    core: Mutex<SessionCore>,
    run: Mutex<Option<RunContexts>>,
    retired: Mutex<Vec<TaskContext>>,
    /// Serializes open/close/switch/shutdown against each other. Event
    /// handlers never take this, so state keeps moving while a caller waits.
    ops: Mutex<()>,
    epoch: AtomicU64,
    facing: Mutex<Facing>,
    preview_target: Mutex<Option<StreamTarget>>,
    notices_tx: Sender<Notice>,
    notices_rx: Receiver<Notice>,
}

/// Externally-facing facade sequencing device switch, start/stop, and
/// capture against one exclusive camera.
pub struct CameraController {
    inner: Arc<ControllerInner>,
}

impl CameraController {
    /// Enumerates devices once and starts in Idle with no device claimed.
    pub fn new(
        backend: Arc<dyn CameraBackend>,
        authorizer: Arc<dyn AccessAuthorizer>,
        writer: Arc<dyn FrameWriter>,
        config: ViewfinderConfig,
    ) -> Result<Self, CameraError> {
        let registry = DeviceRegistry::enumerate(backend.as_ref())?;
        let (notices_tx, notices_rx) = unbounded();
        let pipeline = RequestPipeline::new(
            config.camera.clone(),
            config.storage.clone(),
            writer,
            notices_tx.clone(),
        );
        let facing = config.camera.default_facing;

        Ok(Self {
            inner: Arc::new(ControllerInner {
                backend,
                authorizer,
                registry,
                config,
                pipeline,
                scheduler: WorkerScheduler::new(),
                state: StateCell::new(),
                core: Mutex::new(SessionCore::new()),
                run: Mutex::new(None),
                retired: Mutex::new(Vec::new()),
                ops: Mutex::new(()),
                epoch: AtomicU64::new(0),
                facing: Mutex::new(facing),
                preview_target: Mutex::new(None),
                notices_tx,
                notices_rx,
            }),
        })
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.get()
    }

    /// Block until the state satisfies `predicate` or `timeout` passes.
    pub fn wait_for_state<F>(&self, predicate: F, timeout: Duration) -> bool
    where
        F: Fn(SessionState) -> bool,
    {
        self.inner.state.wait_for(predicate, timeout)
    }

    /// Stream of out-of-band reports. Cheap to clone and poll.
    pub fn notices(&self) -> Receiver<Notice> {
        self.inner.notices_rx.clone()
    }

    pub fn facing(&self) -> Facing {
        *self.inner.facing.lock().expect("lock poisoned")
    }

    pub fn devices(&self) -> Vec<DeviceDescriptor> {
        self.inner.registry.devices().to_vec()
    }

    /// Provide the preview output. Takes effect at the next open; the target
    /// set of a configured session is fixed.
    pub fn attach_preview(&self, target: StreamTarget) {
        *self.inner.preview_target.lock().expect("lock poisoned") = Some(target);
    }

    /// The display surface became available: attach it and start the camera.
    pub fn surface_ready(&self, target: StreamTarget) -> Result<(), CameraError> {
        self.attach_preview(target);
        self.open()
    }

    /// The display surface went away: stop the camera and drop the target.
    pub fn surface_destroyed(&self) {
        if let Err(e) = self.close() {
            log::warn!("close on surface loss failed: {}", e);
        }
        *self.inner.preview_target.lock().expect("lock poisoned") = None;
    }

    /// Begin opening the active-facing device. Fails fast, without touching
    /// the platform, when permission is missing, no device matches, or the
    /// session is not Idle. Completion is observed through the state and the
    /// notice stream.
    pub fn open(&self) -> Result<(), CameraError> {
        let _guard = self.inner.ops.lock().expect("lock poisoned");
        self.inner.do_open()
    }

    /// Stop everything and settle back to Idle. Idempotent; enqueues the
    /// teardown and returns without waiting for it.
    pub fn close(&self) -> Result<(), CameraError> {
        let _guard = self.inner.ops.lock().expect("lock poisoned");
        self.inner.do_close()
    }

    /// Take one still picture, then resume the preview. A no-op unless the
    /// preview is running; callers observe capability via the state.
    pub fn capture_still(&self) {
        self.inner.request_still();
    }

    /// Tear down the current device entirely, then reopen facing `facing`.
    /// Valid from PreviewRunning or Failed. Blocks only until the teardown
    /// settles (bounded by the configured settle timeout).
    pub fn switch_device(&self, facing: Facing) -> Result<(), CameraError> {
        let _guard = self.inner.ops.lock().expect("lock poisoned");
        self.inner.do_switch(facing)
    }

    /// Switch to the opposite-facing camera.
    pub fn toggle_camera(&self) -> Result<(), CameraError> {
        let facing = self.facing().flipped();
        self.switch_device(facing)
    }

    /// Close and release every worker context. Safe to invoke twice.
    pub fn shutdown(&self, timeout: Duration) -> Result<(), CameraError> {
        let _guard = self.inner.ops.lock().expect("lock poisoned");
        self.inner.do_close()?;
        drop(_guard);

        let settled = self
            .inner
            .state
            .wait_for(|s| s == SessionState::Idle, timeout);
        if !settled {
            log::warn!("session did not settle at idle before shutdown deadline");
        }

        self.inner.reap_retired(timeout);
        self.inner.scheduler.shutdown_all(timeout)
    }
}

impl Drop for CameraController {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown(Duration::from_millis(500)) {
            log::warn!("shutdown in drop incomplete: {}", e);
        }
    }
}

impl ControllerInner {
    fn do_open(self: &Arc<Self>) -> Result<(), CameraError> {
        let timeout = self.shutdown_timeout();
        self.reap_retired(timeout);

        if !self.authorizer.has_camera_access() {
            log::warn!("open refused: camera permission not granted");
            return Err(CameraError::PermissionDenied(
                "camera access not granted".to_string(),
            ));
        }

        let facing = *self.facing.lock().expect("lock poisoned");
        let descriptor = self
            .registry
            .describe(facing)
            .cloned()
            .ok_or_else(|| CameraError::NotFound(format!("no {} camera", facing)))?;

        let preview = self
            .preview_target
            .lock()
            .expect("lock poisoned")
            .clone()
            .ok_or_else(|| CameraError::OpenFailed("no preview surface attached".to_string()))?;

        self.state
            .transition(SessionState::Idle, SessionState::Opening, "open")?;
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;

        let lifecycle = self.scheduler.spawn("camera-lifecycle");
        let capture = self.scheduler.spawn("camera-capture");
        let persist = self.scheduler.spawn("camera-persist");

        let (targets, still_queue) = self.pipeline.build_targets(preview);
        if let Some(queue) = &still_queue {
            self.pipeline.wire_still_queue(queue, &capture, &persist);
        }
        {
            let mut core = self.core.lock().expect("lock poisoned");
            core.targets = targets;
            core.still_queue = still_queue;
            core.device = None;
            core.session = None;
            core.preview_request = None;
        }

        *self.run.lock().expect("lock poisoned") = Some(RunContexts {
            lifecycle: lifecycle.clone(),
            capture,
            persist,
        });

        let backend = self.backend.clone();
        let sink = self.device_sink(epoch);
        let me = Arc::clone(self);
        let posted = lifecycle.post(move || {
            log::info!("opening camera device {} ({})", descriptor.id, descriptor.name);
            if let Err(e) = backend.open_device(&descriptor, sink) {
                log::error!("device open failed: {}", e);
                me.fail(e);
            }
        });
        if posted.is_err() {
            self.state.set(SessionState::Failed);
            return Err(CameraError::ContextStopped("camera-lifecycle".to_string()));
        }
        Ok(())
    }

    fn do_close(self: &Arc<Self>) -> Result<(), CameraError> {
        let run = self.run.lock().expect("lock poisoned").take();
        let Some(run) = run else {
            // Nothing live. A failed session still settles back to Idle so a
            // fresh open is accepted.
            match self.state.get() {
                SessionState::Failed => {
                    self.teardown_core();
                    self.state.set(SessionState::Idle);
                    let _ = self.notices_tx.send(Notice::Closed);
                }
                state => log::debug!("close ignored in state {}", state),
            }
            return Ok(());
        };

        // In-flight callbacks from this run are stale from here on.
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if self.state.get() != SessionState::Idle {
            self.state.set(SessionState::Closing);
        }

        let me = Arc::clone(self);
        let posted = run.lifecycle.post(move || {
            me.teardown_core();
            me.state.set(SessionState::Idle);
            let _ = me.notices_tx.send(Notice::Closed);
            log::info!("camera session closed");
        });
        if posted.is_err() {
            // Lifecycle context already gone; tear down from here instead.
            self.teardown_core();
            self.state.set(SessionState::Idle);
            let _ = self.notices_tx.send(Notice::Closed);
        }

        run.lifecycle.request_stop();
        run.capture.request_stop();
        run.persist.request_stop();
        self.retired
            .lock()
            .expect("lock poisoned")
            .extend([run.lifecycle, run.capture, run.persist]);
        Ok(())
    }

    fn do_switch(self: &Arc<Self>, facing: Facing) -> Result<(), CameraError> {
        let state = self.state.get();
        if !matches!(state, SessionState::PreviewRunning | SessionState::Failed) {
            return Err(CameraError::InvalidState {
                operation: "switch_device",
                state,
            });
        }

        self.do_close()?;
        let settle = Duration::from_millis(self.config.scheduler.settle_timeout_ms);
        if !self.state.wait_for(|s| s == SessionState::Idle, settle) {
            return Err(CameraError::ShutdownTimeout(
                "session did not settle at idle".to_string(),
            ));
        }

        *self.facing.lock().expect("lock poisoned") = facing;
        log::info!("switching camera to {}", facing);
        self.do_open()
    }

    fn request_still(self: &Arc<Self>) {
        let lifecycle = self
            .run
            .lock()
            .expect("lock poisoned")
            .as_ref()
            .map(|r| r.lifecycle.clone());
        let Some(lifecycle) = lifecycle else {
            log::debug!("still capture ignored: no active session");
            return;
        };

        let me = Arc::clone(self);
        let posted = lifecycle.post(move || me.begin_still());
        if posted.is_err() {
            log::debug!("still capture ignored: lifecycle context stopped");
        }
    }

    /// Runs on the lifecycle context.
    fn begin_still(self: &Arc<Self>) {
        let state = self.state.get();
        if state != SessionState::PreviewRunning {
            log::debug!("still capture ignored in state {}", state);
            return;
        }
        if !self.pipeline.still_capture_enabled() {
            log::debug!("still capture ignored: no still sink configured");
            return;
        }

        let epoch = self.epoch.load(Ordering::SeqCst);
        let sink = self.capture_sink(epoch);
        let result = {
            let mut core = self.core.lock().expect("lock poisoned");
            let targets = core.targets.clone();
            match core.session.as_mut() {
                Some(session) => self.pipeline.begin_still(session, &targets, sink),
                None => {
                    log::debug!("still capture ignored: no configured session");
                    return;
                }
            }
        };

        match result {
            Ok(()) => {
                if let Err(e) = self.state.transition(
                    SessionState::PreviewRunning,
                    SessionState::Capturing,
                    "still_capture",
                ) {
                    // A concurrent close superseded the capture; its events
                    // are already stale.
                    log::debug!("capture raced teardown: {}", e);
                }
            }
            Err(e) => self.fail(e),
        }
    }

    fn device_sink(self: &Arc<Self>, epoch: u64) -> DeviceEventSink {
        let me = Arc::clone(self);
        DeviceEventSink::new(move |event| {
            let lifecycle = me
                .run
                .lock()
                .expect("lock poisoned")
                .as_ref()
                .map(|r| r.lifecycle.clone());
            let Some(lifecycle) = lifecycle else {
                log::debug!("device event {:?} dropped: no active run", event);
                return;
            };
            let handler = Arc::clone(&me);
            if lifecycle
                .post(move || handler.on_device_event(epoch, event))
                .is_err()
            {
                log::debug!("device event dropped: lifecycle context stopped");
            }
        })
    }

    fn session_sink(self: &Arc<Self>, epoch: u64) -> SessionEventSink {
        let me = Arc::clone(self);
        SessionEventSink::new(move |event| {
            let lifecycle = me
                .run
                .lock()
                .expect("lock poisoned")
                .as_ref()
                .map(|r| r.lifecycle.clone());
            let Some(lifecycle) = lifecycle else {
                log::debug!("session event {:?} dropped: no active run", event);
                return;
            };
            let handler = Arc::clone(&me);
            if lifecycle
                .post(move || handler.on_session_event(epoch, event))
                .is_err()
            {
                log::debug!("session event dropped: lifecycle context stopped");
            }
        })
    }

    fn capture_sink(self: &Arc<Self>, epoch: u64) -> CaptureEventSink {
        let me = Arc::clone(self);
        CaptureEventSink::new(move |event| {
            let lifecycle = me
                .run
                .lock()
                .expect("lock poisoned")
                .as_ref()
                .map(|r| r.lifecycle.clone());
            let Some(lifecycle) = lifecycle else {
                log::debug!("capture event {:?} dropped: no active run", event);
                return;
            };
            let handler = Arc::clone(&me);
            if lifecycle
                .post(move || handler.on_capture_event(epoch, event))
                .is_err()
            {
                log::debug!("capture event dropped: lifecycle context stopped");
            }
        })
    }

    /// Runs on the lifecycle context. Exactly one device event arrives per
    /// open attempt.
    fn on_device_event(self: &Arc<Self>, epoch: u64, event: DeviceEvent) {
        if epoch != self.epoch.load(Ordering::SeqCst) {
            // A stale Opened still carries a handle; dropping it here
            // releases the device.
            log::debug!("ignoring stale device event {:?}", event);
            return;
        }

        match event {
            DeviceEvent::Opened { handle } => self.on_device_opened(epoch, handle),
            DeviceEvent::Disconnected { device_id } => {
                log::warn!("camera device {} disconnected", device_id);
                self.teardown_core();
                self.fail(CameraError::Disconnected(device_id));
            }
            DeviceEvent::Error { device_id, code } => {
                log::error!("camera device {} reported error code {}", device_id, code);
                self.teardown_core();
                self.fail(CameraError::DeviceFault { device_id, code });
            }
        }
    }

    fn on_device_opened(self: &Arc<Self>, epoch: u64, handle: DeviceHandle) {
        log::info!("camera device {} opened", handle.id());
        if let Err(e) =
            self.state
                .transition(SessionState::Opening, SessionState::Configuring, "configure")
        {
            log::debug!("open resolved after teardown began: {}", e);
            return;
        }

        let sink = self.session_sink(epoch);
        let result = {
            let mut core = self.core.lock().expect("lock poisoned");
            core.device = Some(handle);
            let targets = core.targets.clone();
            match core.device.as_mut() {
                Some(device) => device.create_session(targets, sink),
                None => return,
            }
        };
        if let Err(e) = result {
            self.teardown_core();
            self.fail(e);
        }
    }

    /// Runs on the lifecycle context.
    fn on_session_event(self: &Arc<Self>, epoch: u64, event: SessionEvent) {
        if epoch != self.epoch.load(Ordering::SeqCst) {
            log::debug!("ignoring stale session event {:?}", event);
            return;
        }

        match event {
            SessionEvent::Configured { mut session } => {
                let device_id;
                let result = {
                    let mut core = self.core.lock().expect("lock poisoned");
                    device_id = core
                        .device
                        .as_ref()
                        .map(|d| d.id().to_string())
                        .unwrap_or_default();
                    let targets = core.targets.clone();
                    match self.pipeline.start_repeating(&mut session, &targets) {
                        Ok(request) => {
                            core.preview_request = Some(request);
                            core.session = Some(session);
                            Ok(())
                        }
                        Err(e) => Err(e),
                    }
                };

                match result {
                    Ok(()) => {
                        if let Err(e) = self.state.transition(
                            SessionState::Configuring,
                            SessionState::PreviewRunning,
                            "preview",
                        ) {
                            log::debug!("configured after teardown began: {}", e);
                            return;
                        }
                        log::info!("preview running on device {}", device_id);
                        let _ = self.notices_tx.send(Notice::PreviewStarted { device_id });
                    }
                    Err(e) => {
                        self.teardown_core();
                        self.fail(e);
                    }
                }
            }
            SessionEvent::ConfigureFailed { reason } => {
                log::error!("session configuration failed: {}", reason);
                // The device handle stays claimed; close() releases it.
                self.fail(CameraError::ConfigRejected(reason));
            }
        }
    }

    /// Runs on the lifecycle context. Restores the preview before anything
    /// waits on persistence; the completed buffer travels the capture and
    /// persistence contexts independently.
    fn on_capture_event(self: &Arc<Self>, epoch: u64, event: CaptureEvent) {
        if epoch != self.epoch.load(Ordering::SeqCst) {
            log::debug!("ignoring stale capture event {:?}", event);
            return;
        }

        let CaptureEvent::Completed { request_id } = event;
        log::debug!("still capture request {} completed", request_id);

        let result = {
            let mut core = self.core.lock().expect("lock poisoned");
            let preview = core.preview_request.clone();
            match (core.session.as_mut(), preview) {
                (Some(session), Some(preview)) => {
                    self.pipeline.resume_preview(session, &preview)
                }
                _ => {
                    log::debug!("capture completed after teardown; nothing to resume");
                    return;
                }
            }
        };

        match result {
            Ok(()) => {
                if let Err(e) = self.state.transition(
                    SessionState::Capturing,
                    SessionState::PreviewRunning,
                    "resume_preview",
                ) {
                    log::debug!("capture completed after teardown began: {}", e);
                }
            }
            Err(e) => {
                self.teardown_core();
                self.fail(e);
            }
        }
    }

    fn fail(&self, error: CameraError) {
        self.state.set(SessionState::Failed);
        let _ = self.notices_tx.send(Notice::SessionFailed { error });
    }

    /// Release session resources in dependency order: repeating request,
    /// capture session, device handle, then the still queue.
    fn teardown_core(&self) {
        let mut core = self.core.lock().expect("lock poisoned");
        if let Some(session) = core.session.as_mut() {
            let _ = session.stop_repeating();
            session.close();
        }
        core.session = None;
        if let Some(device) = core.device.as_mut() {
            device.close();
        }
        core.device = None;
        core.preview_request = None;
        if let Some(queue) = core.still_queue.take() {
            queue.close();
        }
        core.targets.clear();
    }

    fn reap_retired(&self, timeout: Duration) {
        let retired: Vec<TaskContext> = self
            .retired
            .lock()
            .expect("lock poisoned")
            .drain(..)
            .collect();
        for context in retired {
            // Shutdown logs the leak warning itself on timeout.
            let _ = context.shutdown(timeout);
        }
    }

    fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.config.scheduler.shutdown_timeout_ms)
    }
}
