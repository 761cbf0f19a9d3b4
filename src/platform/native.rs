//! Hardware backend over nokhwa.
//!
//! Adapts the synchronous nokhwa camera to the asynchronous device model:
//! opens resolve on a worker thread and report through the event sinks, the
//! repeating request is driven by a poll loop, and one-shot captures feed the
//! still queue like any other device.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use bytes::Bytes;
use nokhwa::{
    pixel_format::RgbFormat,
    query,
    utils::{ApiBackend, CameraIndex, RequestedFormat, RequestedFormatType},
    CallbackCamera,
};

use crate::errors::CameraError;
use crate::platform::{
    CameraBackend, CaptureEvent, CaptureEventSink, DeviceControl, DeviceEvent, DeviceEventSink,
    DeviceHandle, SessionControl, SessionEvent, SessionEventSink, SessionHandle,
};
use crate::types::{
    CameraFrame, CaptureRequest, DeviceDescriptor, Facing, StreamFormat, StreamTarget, TargetSink,
};

/// Shared camera handle. nokhwa's camera is not Send; access is serialized
/// through the mutex and the platform promises no thread affinity beyond
/// that, matching how the rest of the crate already uses it.
#[derive(Clone)]
struct SharedCamera(Arc<Mutex<CallbackCamera>>);

unsafe impl Send for SharedCamera {}
unsafe impl Sync for SharedCamera {}

impl SharedCamera {
    fn poll_frame(&self, device_id: &str, sequence: u64) -> Result<CameraFrame, CameraError> {
        let mut camera = self
            .0
            .lock()
            .map_err(|_| CameraError::DeviceFault {
                device_id: device_id.to_string(),
                code: -1,
            })?;
        let buffer = camera.poll_frame().map_err(|e| {
            log::error!("poll_frame on device {} failed: {}", device_id, e);
            CameraError::DeviceFault {
                device_id: device_id.to_string(),
                code: -2,
            }
        })?;
        Ok(CameraFrame::new(
            Bytes::from(buffer.buffer_bytes().to_vec()),
            buffer.resolution().width_x,
            buffer.resolution().height_y,
            device_id.to_string(),
        )
        .with_format(buffer.source_frame_format().to_string())
        .with_sequence(sequence))
    }
}

pub struct NativeBackend;

impl CameraBackend for NativeBackend {
    fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, CameraError> {
        let cameras = query(ApiBackend::Auto)
            .map_err(|e| CameraError::EnumerationFailed(format!("query failed: {}", e)))?;

        let mut devices = Vec::new();
        for info in cameras {
            let name = info.human_name();
            // Desktop backends rarely report facing; infer from the name.
            let facing = if name.to_lowercase().contains("front") {
                Facing::Front
            } else {
                Facing::Back
            };
            devices.push(
                DeviceDescriptor::new(info.index().to_string(), name, facing).with_formats(vec![
                    StreamFormat::new(1920, 1080, 30.0),
                    StreamFormat::new(1280, 720, 30.0),
                    StreamFormat::new(640, 480, 30.0),
                ]),
            );
        }
        Ok(devices)
    }

    fn open_device(
        &self,
        descriptor: &DeviceDescriptor,
        events: DeviceEventSink,
    ) -> Result<(), CameraError> {
        let descriptor = descriptor.clone();
        std::thread::Builder::new()
            .name("native-device-open".to_string())
            .spawn(move || match open_native(&descriptor) {
                Ok(device) => events.emit(DeviceEvent::Opened {
                    handle: DeviceHandle::new(Box::new(device)),
                }),
                Err(e) => {
                    log::error!("native open of {} failed: {}", descriptor.id, e);
                    events.emit(DeviceEvent::Error {
                        device_id: descriptor.id.clone(),
                        code: -1,
                    });
                }
            })
            .map_err(|e| CameraError::OpenFailed(format!("spawn failed: {}", e)))?;
        Ok(())
    }
}

fn open_native(descriptor: &DeviceDescriptor) -> Result<NativeDevice, CameraError> {
    let index = descriptor
        .id
        .parse::<u32>()
        .map_err(|_| CameraError::OpenFailed(format!("invalid device id {}", descriptor.id)))?;

    let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::None);
    let camera = CallbackCamera::new(CameraIndex::Index(index), requested, |_| {})
        .map_err(|e| CameraError::OpenFailed(format!("initialize {}: {}", descriptor.id, e)))?;

    Ok(NativeDevice {
        camera: Some(SharedCamera(Arc::new(Mutex::new(camera)))),
        device_id: descriptor.id.clone(),
    })
}

struct NativeDevice {
    camera: Option<SharedCamera>,
    device_id: String,
}

impl DeviceControl for NativeDevice {
    fn id(&self) -> &str {
        &self.device_id
    }

    fn create_session(
        &mut self,
        targets: Vec<StreamTarget>,
        events: SessionEventSink,
    ) -> Result<(), CameraError> {
        let Some(camera) = self.camera.clone() else {
            events.emit(SessionEvent::ConfigureFailed {
                reason: "device closed".to_string(),
            });
            return Ok(());
        };

        if let Err(e) = camera
            .0
            .lock()
            .map_err(|_| "camera lock poisoned".to_string())
            .and_then(|mut c| c.open_stream().map_err(|e| e.to_string()))
        {
            events.emit(SessionEvent::ConfigureFailed { reason: e });
            return Ok(());
        }

        let session = NativeSession::start(camera, self.device_id.clone(), targets);
        events.emit(SessionEvent::Configured {
            session: SessionHandle::new(Box::new(session)),
        });
        Ok(())
    }

    fn close(&mut self) {
        if let Some(camera) = self.camera.take() {
            if let Ok(mut camera) = camera.0.lock() {
                let _ = camera.stop_stream();
            }
        }
    }
}

struct NativeSession {
    camera: SharedCamera,
    device_id: String,
    targets: Arc<Vec<StreamTarget>>,
    repeating: Arc<Mutex<Option<CaptureRequest>>>,
    stop: Arc<AtomicBool>,
    sequence: Arc<AtomicU64>,
    driver: Option<JoinHandle<()>>,
    closed: bool,
}

impl NativeSession {
    fn start(camera: SharedCamera, device_id: String, targets: Vec<StreamTarget>) -> Self {
        let targets = Arc::new(targets);
        let repeating: Arc<Mutex<Option<CaptureRequest>>> = Arc::new(Mutex::new(None));
        let stop = Arc::new(AtomicBool::new(false));
        let sequence = Arc::new(AtomicU64::new(0));

        let driver = {
            let camera = camera.clone();
            let device_id = device_id.clone();
            let targets = targets.clone();
            let repeating = repeating.clone();
            let stop = stop.clone();
            let sequence = sequence.clone();
            std::thread::Builder::new()
                .name("native-preview-driver".to_string())
                .spawn(move || {
                    while !stop.load(Ordering::SeqCst) {
                        let request = repeating.lock().expect("lock poisoned").clone();
                        let Some(request) = request else {
                            std::thread::sleep(std::time::Duration::from_millis(10));
                            continue;
                        };
                        let seq = sequence.fetch_add(1, Ordering::SeqCst) + 1;
                        match camera.poll_frame(&device_id, seq) {
                            Ok(frame) => {
                                for target_id in &request.target_ids {
                                    let target =
                                        targets.iter().find(|t| t.id == *target_id);
                                    if let Some(StreamTarget {
                                        sink: TargetSink::Surface(surface),
                                        ..
                                    }) = target
                                    {
                                        surface.deliver(frame.clone());
                                    }
                                }
                            }
                            Err(_) => {
                                std::thread::sleep(std::time::Duration::from_millis(50));
                            }
                        }
                    }
                })
                .ok()
        };

        Self {
            camera,
            device_id,
            targets,
            repeating,
            stop,
            sequence,
            driver,
            closed: false,
        }
    }
}

impl SessionControl for NativeSession {
    fn set_repeating(&mut self, request: CaptureRequest) -> Result<(), CameraError> {
        *self.repeating.lock().expect("lock poisoned") = Some(request);
        Ok(())
    }

    fn stop_repeating(&mut self) -> Result<(), CameraError> {
        *self.repeating.lock().expect("lock poisoned") = None;
        Ok(())
    }

    fn abort_captures(&mut self) -> Result<(), CameraError> {
        // nokhwa exposes no in-flight queue to flush; the poll model already
        // hands us one frame at a time.
        Ok(())
    }

    fn capture(
        &mut self,
        request: CaptureRequest,
        events: CaptureEventSink,
    ) -> Result<(), CameraError> {
        let camera = self.camera.clone();
        let device_id = self.device_id.clone();
        let targets = self.targets.clone();
        let sequence = self.sequence.clone();

        std::thread::Builder::new()
            .name("native-still-capture".to_string())
            .spawn(move || {
                let seq = sequence.fetch_add(1, Ordering::SeqCst) + 1;
                match camera.poll_frame(&device_id, seq) {
                    Ok(frame) => {
                        for target_id in &request.target_ids {
                            let target = targets.iter().find(|t| t.id == *target_id);
                            if let Some(StreamTarget {
                                sink: TargetSink::StillQueue(queue),
                                ..
                            }) = target
                            {
                                queue.push(frame.clone());
                            }
                        }
                    }
                    Err(e) => log::error!("still capture poll failed: {}", e),
                }
                events.emit(CaptureEvent::Completed {
                    request_id: request.id,
                });
            })
            .map_err(|e| {
                log::error!("still-capture worker spawn failed: {}", e);
                CameraError::DeviceFault {
                    device_id: self.device_id.clone(),
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
        *self.repeating.lock().expect("lock poisoned") = None;
        self.stop.store(true, Ordering::SeqCst);
        if let Some(driver) = self.driver.take() {
            let _ = driver.join();
        }
        if let Ok(mut camera) = self.camera.0.lock() {
            let _ = camera.stop_stream();
        }
    }
}

impl Drop for NativeSession {
    fn drop(&mut self) {
        self.close();
    }
}
