//! Platform device model.
//!
//! The physical camera exposes only callback-shaped, cancelable operations.
//! Those callbacks are represented here as small closed event enums delivered
//! through sinks; a sink posts its event onto the session's lifecycle context
//! so every outcome is observed in device order, on one thread.

pub mod sim;

#[cfg(feature = "native")]
pub mod native;

use std::fmt;
use std::sync::Arc;

use crate::errors::CameraError;
use crate::types::{CaptureRequest, DeviceDescriptor, StreamTarget};

/// Outcome of one open attempt. Exactly one event is delivered per attempt.
pub enum DeviceEvent {
    Opened { handle: DeviceHandle },
    Disconnected { device_id: String },
    Error { device_id: String, code: i32 },
}

impl fmt::Debug for DeviceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceEvent::Opened { handle } => write!(f, "Opened({})", handle.id()),
            DeviceEvent::Disconnected { device_id } => write!(f, "Disconnected({})", device_id),
            DeviceEvent::Error { device_id, code } => {
                write!(f, "Error({}, code {})", device_id, code)
            }
        }
    }
}

/// Outcome of one session configuration attempt.
pub enum SessionEvent {
    Configured { session: SessionHandle },
    ConfigureFailed { reason: String },
}

impl fmt::Debug for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEvent::Configured { .. } => write!(f, "Configured"),
            SessionEvent::ConfigureFailed { reason } => write!(f, "ConfigureFailed({})", reason),
        }
    }
}

/// Outcome of one submitted one-shot capture.
#[derive(Debug)]
pub enum CaptureEvent {
    Completed { request_id: u64 },
}

/// Delivery channel for device open outcomes. Cheap to clone; safe to fire
/// from any thread.
#[derive(Clone)]
pub struct DeviceEventSink(Arc<dyn Fn(DeviceEvent) + Send + Sync>);

impl DeviceEventSink {
    pub fn new<F>(deliver: F) -> Self
    where
        F: Fn(DeviceEvent) + Send + Sync + 'static,
    {
        Self(Arc::new(deliver))
    }

    pub fn emit(&self, event: DeviceEvent) {
        (self.0)(event)
    }
}

/// Delivery channel for session configuration outcomes.
#[derive(Clone)]
pub struct SessionEventSink(Arc<dyn Fn(SessionEvent) + Send + Sync>);

impl SessionEventSink {
    pub fn new<F>(deliver: F) -> Self
    where
        F: Fn(SessionEvent) + Send + Sync + 'static,
    {
        Self(Arc::new(deliver))
    }

    pub fn emit(&self, event: SessionEvent) {
        (self.0)(event)
    }
}

/// Delivery channel for one-shot capture completions.
#[derive(Clone)]
pub struct CaptureEventSink(Arc<dyn Fn(CaptureEvent) + Send + Sync>);

impl CaptureEventSink {
    pub fn new<F>(deliver: F) -> Self
    where
        F: Fn(CaptureEvent) + Send + Sync + 'static,
    {
        Self(Arc::new(deliver))
    }

    pub fn emit(&self, event: CaptureEvent) {
        (self.0)(event)
    }
}

/// A camera platform: enumeration plus asynchronous exclusive open.
pub trait CameraBackend: Send + Sync {
    /// Query the platform for attached devices. Fails when the camera
    /// service itself is unavailable.
    fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, CameraError>;

    /// Begin an exclusive open. Returns once the request is initiated;
    /// exactly one `DeviceEvent` arrives later through `events`.
    fn open_device(
        &self,
        descriptor: &DeviceDescriptor,
        events: DeviceEventSink,
    ) -> Result<(), CameraError>;
}

/// Control surface of one opened device.
pub trait DeviceControl: Send {
    fn id(&self) -> &str;

    /// Negotiate a capture session against a fixed target set. The outcome
    /// arrives through `events`; targets cannot be added afterwards.
    fn create_session(
        &mut self,
        targets: Vec<StreamTarget>,
        events: SessionEventSink,
    ) -> Result<(), CameraError>;

    fn close(&mut self);
}

/// Control surface of one configured capture session.
pub trait SessionControl: Send {
    /// Install `request` as the repeating request, replacing any previous one.
    fn set_repeating(&mut self, request: CaptureRequest) -> Result<(), CameraError>;

    fn stop_repeating(&mut self) -> Result<(), CameraError>;

    /// Discard in-flight captures ahead of a one-shot submission.
    fn abort_captures(&mut self) -> Result<(), CameraError>;

    /// Submit a one-shot capture. Completion arrives through `events`.
    fn capture(
        &mut self,
        request: CaptureRequest,
        events: CaptureEventSink,
    ) -> Result<(), CameraError>;

    fn close(&mut self);
}

/// Exclusively-owned open device. Closing (or dropping) releases the
/// exclusive claim; the handle must not be used afterwards.
pub struct DeviceHandle {
    control: Box<dyn DeviceControl>,
    closed: bool,
}

impl DeviceHandle {
    pub fn new(control: Box<dyn DeviceControl>) -> Self {
        Self {
            control,
            closed: false,
        }
    }

    pub fn id(&self) -> &str {
        self.control.id()
    }

    pub fn create_session(
        &mut self,
        targets: Vec<StreamTarget>,
        events: SessionEventSink,
    ) -> Result<(), CameraError> {
        if self.closed {
            return Err(CameraError::OpenFailed("device handle closed".to_string()));
        }
        self.control.create_session(targets, events)
    }

    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.control.close();
        }
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Live capture session, bound to the device that created it. Never outlives
/// its device: the controller closes sessions before handles.
pub struct SessionHandle {
    control: Box<dyn SessionControl>,
    closed: bool,
}

impl SessionHandle {
    pub fn new(control: Box<dyn SessionControl>) -> Self {
        Self {
            control,
            closed: false,
        }
    }

    pub fn set_repeating(&mut self, request: CaptureRequest) -> Result<(), CameraError> {
        self.ensure_open("set_repeating")?;
        self.control.set_repeating(request)
    }

    pub fn stop_repeating(&mut self) -> Result<(), CameraError> {
        self.ensure_open("stop_repeating")?;
        self.control.stop_repeating()
    }

    pub fn abort_captures(&mut self) -> Result<(), CameraError> {
        self.ensure_open("abort_captures")?;
        self.control.abort_captures()
    }

    pub fn capture(
        &mut self,
        request: CaptureRequest,
        events: CaptureEventSink,
    ) -> Result<(), CameraError> {
        self.ensure_open("capture")?;
        self.control.capture(request, events)
    }

    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.control.close();
        }
    }

    fn ensure_open(&self, operation: &str) -> Result<(), CameraError> {
        if self.closed {
            return Err(CameraError::ConfigRejected(format!(
                "{} on closed session",
                operation
            )));
        }
        Ok(())
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.close();
    }
}
