//! Simulated camera backend.
//!
//! Deterministic stand-in for real hardware: a fixed device table, synthetic
//! frames, and injectable failures for every asynchronous outcome the device
//! model can produce. Also counts live device handles so tests can assert
//! exclusive ownership across open/close/switch sequences.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;

use crate::errors::CameraError;
use crate::platform::{
    CameraBackend, CaptureEvent, CaptureEventSink, DeviceControl, DeviceEvent, DeviceEventSink,
    DeviceHandle, SessionControl, SessionEvent, SessionEventSink, SessionHandle,
};
use crate::types::{
    CameraFrame, CaptureRequest, DeviceDescriptor, Facing, StreamFormat, StreamTarget, TargetSink,
};

/// How the next open attempt resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    Opened,
    Disconnected,
    Error(i32),
}

/// Generate a synthetic frame with content that varies by position and
/// sequence number, so downstream consumers see changing data.
pub fn synthetic_frame(sequence: u64, width: u32, height: u32, device_id: &str) -> CameraFrame {
    let mut data = vec![0u8; (width * height * 3) as usize];
    let base = (sequence % 256) as u8;
    for y in 0..height {
        for x in 0..width {
            let idx = ((y * width + x) * 3) as usize;
            data[idx] = base ^ (x % 256) as u8;
            data[idx + 1] = base.wrapping_add((y % 256) as u8);
            data[idx + 2] = ((x + y) as u64 + sequence) as u8;
        }
    }
    CameraFrame::new(Bytes::from(data), width, height, device_id.to_string())
        .with_sequence(sequence)
        .with_format("RGB8".to_string())
}

struct GateInner {
    held: Mutex<bool>,
    cv: Condvar,
}

/// Holds in-flight open attempts until released. Lets tests interleave a
/// close while the device is still answering.
pub struct OpenGate {
    inner: Arc<GateInner>,
}

impl OpenGate {
    pub fn release(&self) {
        let mut held = self.inner.held.lock().expect("lock poisoned");
        *held = false;
        self.inner.cv.notify_all();
    }
}

impl Drop for OpenGate {
    fn drop(&mut self) {
        self.release();
    }
}

struct SimShared {
    devices: Vec<DeviceDescriptor>,
    enumeration_fails: AtomicBool,
    configure_fails: AtomicBool,
    open_outcome: Mutex<OpenOutcome>,
    open_latency: Mutex<Duration>,
    capture_latency: Mutex<Duration>,
    frame_interval: Mutex<Duration>,
    gate: Mutex<Option<Arc<GateInner>>>,
    opens: AtomicUsize,
    sessions: AtomicUsize,
    captures: AtomicUsize,
    aborts: AtomicUsize,
    live_handles: AtomicUsize,
    max_live_handles: AtomicUsize,
}

/// Simulated backend handle. Clones share the same device table and counters.
#[derive(Clone)]
pub struct SimBackend {
    shared: Arc<SimShared>,
}

impl SimBackend {
    pub fn new() -> Self {
        Self::with_devices(vec![
            DeviceDescriptor::new("0".to_string(), "Rear Wide Camera".to_string(), Facing::Back)
                .with_sensor_orientation(90)
                .with_formats(vec![
                    StreamFormat::new(1920, 1080, 30.0),
                    StreamFormat::new(1280, 720, 30.0),
                ]),
            DeviceDescriptor::new("1".to_string(), "Front Camera".to_string(), Facing::Front)
                .with_sensor_orientation(270)
                .with_formats(vec![StreamFormat::new(1280, 720, 30.0)]),
        ])
    }

    pub fn with_devices(devices: Vec<DeviceDescriptor>) -> Self {
        Self {
            shared: Arc::new(SimShared {
                devices,
                enumeration_fails: AtomicBool::new(false),
                configure_fails: AtomicBool::new(false),
                open_outcome: Mutex::new(OpenOutcome::Opened),
                open_latency: Mutex::new(Duration::from_millis(5)),
                capture_latency: Mutex::new(Duration::from_millis(5)),
                frame_interval: Mutex::new(Duration::from_millis(10)),
                gate: Mutex::new(None),
                opens: AtomicUsize::new(0),
                sessions: AtomicUsize::new(0),
                captures: AtomicUsize::new(0),
                aborts: AtomicUsize::new(0),
                live_handles: AtomicUsize::new(0),
                max_live_handles: AtomicUsize::new(0),
            }),
        }
    }

    /// Make `list_devices` fail, as when the camera service is absent.
    pub fn fail_enumeration(&self, fail: bool) {
        self.shared.enumeration_fails.store(fail, Ordering::SeqCst);
    }

    /// Choose how subsequent open attempts resolve.
    pub fn set_open_outcome(&self, outcome: OpenOutcome) {
        *self.shared.open_outcome.lock().expect("lock poisoned") = outcome;
    }

    /// Make subsequent session configurations fail.
    pub fn set_configure_fails(&self, fail: bool) {
        self.shared.configure_fails.store(fail, Ordering::SeqCst);
    }

    pub fn set_open_latency(&self, latency: Duration) {
        *self.shared.open_latency.lock().expect("lock poisoned") = latency;
    }

    pub fn set_capture_latency(&self, latency: Duration) {
        *self.shared.capture_latency.lock().expect("lock poisoned") = latency;
    }

    pub fn set_frame_interval(&self, interval: Duration) {
        *self.shared.frame_interval.lock().expect("lock poisoned") = interval;
    }

    /// Hold every in-flight open until the returned gate is released
    /// (or dropped).
    pub fn hold_opens(&self) -> OpenGate {
        let inner = Arc::new(GateInner {
            held: Mutex::new(true),
            cv: Condvar::new(),
        });
        *self.shared.gate.lock().expect("lock poisoned") = Some(inner.clone());
        OpenGate { inner }
    }

    pub fn opens(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }

    pub fn sessions_created(&self) -> usize {
        self.shared.sessions.load(Ordering::SeqCst)
    }

    pub fn captures(&self) -> usize {
        self.shared.captures.load(Ordering::SeqCst)
    }

    pub fn aborts(&self) -> usize {
        self.shared.aborts.load(Ordering::SeqCst)
    }

    /// Device handles currently claimed and not yet released.
    pub fn live_handles(&self) -> usize {
        self.shared.live_handles.load(Ordering::SeqCst)
    }

    /// Most handles ever claimed at once. Stays at 1 for a well-behaved
    /// controller no matter how often the device is switched.
    pub fn max_live_handles(&self) -> usize {
        self.shared.max_live_handles.load(Ordering::SeqCst)
    }
}

impl Default for SimBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraBackend for SimBackend {
    fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, CameraError> {
        if self.shared.enumeration_fails.load(Ordering::SeqCst) {
            return Err(CameraError::EnumerationFailed(
                "camera service unavailable".to_string(),
            ));
        }
        Ok(self.shared.devices.clone())
    }

    fn open_device(
        &self,
        descriptor: &DeviceDescriptor,
        events: DeviceEventSink,
    ) -> Result<(), CameraError> {
        self.shared.opens.fetch_add(1, Ordering::SeqCst);
        let shared = self.shared.clone();
        let descriptor = descriptor.clone();

        std::thread::Builder::new()
            .name("sim-device-open".to_string())
            .spawn(move || {
                let latency = *shared.open_latency.lock().expect("lock poisoned");
                std::thread::sleep(latency);

                let gate = shared.gate.lock().expect("lock poisoned").clone();
                if let Some(gate) = gate {
                    let mut held = gate.held.lock().expect("lock poisoned");
                    while *held {
                        held = gate.cv.wait(held).expect("lock poisoned");
                    }
                }

                let outcome = *shared.open_outcome.lock().expect("lock poisoned");
                match outcome {
                    OpenOutcome::Opened => {
                        let device = SimDevice::claim(shared, descriptor);
                        events.emit(DeviceEvent::Opened {
                            handle: DeviceHandle::new(Box::new(device)),
                        });
                    }
                    OpenOutcome::Disconnected => {
                        events.emit(DeviceEvent::Disconnected {
                            device_id: descriptor.id,
                        });
                    }
                    OpenOutcome::Error(code) => {
                        events.emit(DeviceEvent::Error {
                            device_id: descriptor.id,
                            code,
                        });
                    }
                }
            })
            .map_err(|e| CameraError::OpenFailed(format!("spawn failed: {}", e)))?;

        Ok(())
    }
}

struct SimDevice {
    shared: Arc<SimShared>,
    descriptor: DeviceDescriptor,
    released: bool,
}

impl SimDevice {
    fn claim(shared: Arc<SimShared>, descriptor: DeviceDescriptor) -> Self {
        let live = shared.live_handles.fetch_add(1, Ordering::SeqCst) + 1;
        shared.max_live_handles.fetch_max(live, Ordering::SeqCst);
        log::debug!("sim device {} claimed ({} live)", descriptor.id, live);
        Self {
            shared,
            descriptor,
            released: false,
        }
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.shared.live_handles.fetch_sub(1, Ordering::SeqCst);
            log::debug!("sim device {} released", self.descriptor.id);
        }
    }
}

impl DeviceControl for SimDevice {
    fn id(&self) -> &str {
        &self.descriptor.id
    }

    fn create_session(
        &mut self,
        targets: Vec<StreamTarget>,
        events: SessionEventSink,
    ) -> Result<(), CameraError> {
        if self.shared.configure_fails.load(Ordering::SeqCst) {
            events.emit(SessionEvent::ConfigureFailed {
                reason: "target set rejected".to_string(),
            });
            return Ok(());
        }

        self.shared.sessions.fetch_add(1, Ordering::SeqCst);
        let session = SimSession::start(self.shared.clone(), self.descriptor.id.clone(), targets);
        events.emit(SessionEvent::Configured {
            session: SessionHandle::new(Box::new(session)),
        });
        Ok(())
    }

    fn close(&mut self) {
        self.release();
    }
}

impl Drop for SimDevice {
    fn drop(&mut self) {
        self.release();
    }
}

struct SessionShared {
    backend: Arc<SimShared>,
    device_id: String,
    targets: Vec<StreamTarget>,
    repeating: Mutex<Option<CaptureRequest>>,
    stop: AtomicBool,
    sequence: AtomicU64,
}

impl SessionShared {
    fn target(&self, id: uuid::Uuid) -> Option<&StreamTarget> {
        self.targets.iter().find(|t| t.id == id)
    }
}

struct SimSession {
    shared: Arc<SessionShared>,
    driver: Option<JoinHandle<()>>,
    closed: bool,
}

impl SimSession {
    fn start(backend: Arc<SimShared>, device_id: String, targets: Vec<StreamTarget>) -> Self {
        let shared = Arc::new(SessionShared {
            backend,
            device_id,
            targets,
            repeating: Mutex::new(None),
            stop: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
        });

        let driver_shared = shared.clone();
        let driver = std::thread::Builder::new()
            .name("sim-preview-driver".to_string())
            .spawn(move || drive_repeating(driver_shared))
            .ok();

        Self {
            shared,
            driver,
            closed: false,
        }
    }
}

/// Re-executes the installed repeating request until the session closes,
/// delivering a synthetic frame to each surface target per tick.
fn drive_repeating(shared: Arc<SessionShared>) {
    loop {
        if shared.stop.load(Ordering::SeqCst) {
            break;
        }
        let interval = *shared
            .backend
            .frame_interval
            .lock()
            .expect("lock poisoned");
        std::thread::sleep(interval);

        let request = shared.repeating.lock().expect("lock poisoned").clone();
        let Some(request) = request else {
            continue;
        };

        let sequence = shared.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        for target_id in &request.target_ids {
            if let Some(target) = shared.target(*target_id) {
                if let TargetSink::Surface(sink) = &target.sink {
                    sink.deliver(synthetic_frame(
                        sequence,
                        target.width,
                        target.height,
                        &shared.device_id,
                    ));
                }
            }
        }
    }
}

impl SessionControl for SimSession {
    fn set_repeating(&mut self, request: CaptureRequest) -> Result<(), CameraError> {
        *self.shared.repeating.lock().expect("lock poisoned") = Some(request);
        Ok(())
    }

    fn stop_repeating(&mut self) -> Result<(), CameraError> {
        *self.shared.repeating.lock().expect("lock poisoned") = None;
        Ok(())
    }

    fn abort_captures(&mut self) -> Result<(), CameraError> {
        self.shared.backend.aborts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn capture(
        &mut self,
        request: CaptureRequest,
        events: CaptureEventSink,
    ) -> Result<(), CameraError> {
        self.shared.backend.captures.fetch_add(1, Ordering::SeqCst);
        let shared = self.shared.clone();

        std::thread::Builder::new()
            .name("sim-still-capture".to_string())
            .spawn(move || {
                let latency = *shared
                    .backend
                    .capture_latency
                    .lock()
                    .expect("lock poisoned");
                std::thread::sleep(latency);

                let sequence = shared.sequence.fetch_add(1, Ordering::SeqCst) + 1;
                for target_id in &request.target_ids {
                    if let Some(target) = shared.target(*target_id) {
                        if let TargetSink::StillQueue(queue) = &target.sink {
                            queue.push(synthetic_frame(
                                sequence,
                                target.width,
                                target.height,
                                &shared.device_id,
                            ));
                        }
                    }
                }
                events.emit(CaptureEvent::Completed {
                    request_id: request.id,
                });
            })
            .map_err(|e| {
                log::error!("still-capture worker spawn failed: {}", e);
                CameraError::DeviceFault {
                    device_id: self.shared.device_id.clone(),
                    code: -1,
                }
            })?;

        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        *self.shared.repeating.lock().expect("lock poisoned") = None;
        self.shared.stop.store(true, Ordering::SeqCst);
        if let Some(driver) = self.driver.take() {
            let _ = driver.join();
        }
    }
}

impl Drop for SimSession {
    fn drop(&mut self) {
        self.close();
    }
}
