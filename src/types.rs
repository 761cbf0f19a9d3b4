//! Core data types shared across the crate.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::imagequeue::ImageQueue;

/// Which way a camera points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Facing {
    Front,
    Back,
}

impl Facing {
    /// The opposite facing, used when cycling through cameras.
    pub fn flipped(self) -> Self {
        match self {
            Facing::Front => Facing::Back,
            Facing::Back => Facing::Front,
        }
    }
}

impl fmt::Display for Facing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Facing::Front => write!(f, "front"),
            Facing::Back => write!(f, "back"),
        }
    }
}

/// A capture size/rate a device advertises.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamFormat {
    pub width: u32,
    pub height: u32,
    pub fps: f32,
}

impl StreamFormat {
    pub fn new(width: u32, height: u32, fps: f32) -> Self {
        Self { width, height, fps }
    }
}

/// Static description of one physical capture device, fixed at enumeration time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: String,
    pub name: String,
    pub facing: Facing,
    /// Sensor mounting rotation in degrees, clockwise.
    pub sensor_orientation: u32,
    pub formats: Vec<StreamFormat>,
}

impl DeviceDescriptor {
    pub fn new(id: String, name: String, facing: Facing) -> Self {
        Self {
            id,
            name,
            facing,
            sensor_orientation: 0,
            formats: Vec::new(),
        }
    }

    pub fn with_sensor_orientation(mut self, degrees: u32) -> Self {
        self.sensor_orientation = degrees;
        self
    }

    pub fn with_formats(mut self, formats: Vec<StreamFormat>) -> Self {
        self.formats = formats;
        self
    }
}

/// Session lifecycle state. Exactly one instance exists per controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Opening,
    Configuring,
    PreviewRunning,
    Capturing,
    Closing,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Opening => write!(f, "opening"),
            SessionState::Configuring => write!(f, "configuring"),
            SessionState::PreviewRunning => write!(f, "preview_running"),
            SessionState::Capturing => write!(f, "capturing"),
            SessionState::Closing => write!(f, "closing"),
            SessionState::Failed => write!(f, "failed"),
        }
    }
}

/// One captured image with its metadata.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub id: Uuid,
    pub device_id: String,
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub data: Bytes,
}

impl CameraFrame {
    pub fn new(data: Bytes, width: u32, height: u32, device_id: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_id,
            width,
            height,
            format: "RGB8".to_string(),
            sequence: 0,
            timestamp: Utc::now(),
            data,
        }
    }

    pub fn with_format(mut self, format: String) -> Self {
        self.format = format;
        self
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }
}

/// Receives decoded preview frames. Implemented by the display surface collaborator.
pub trait FrameSink: Send + Sync {
    fn deliver(&self, frame: CameraFrame);
}

/// Where a stream target routes its frames.
#[derive(Clone)]
pub enum TargetSink {
    /// A rendering surface consuming frames as they arrive.
    Surface(Arc<dyn FrameSink>),
    /// A bounded still-image queue drained by the capture context.
    StillQueue(ImageQueue),
}

/// An output sink with a fixed size, negotiated into the capture session.
/// The session holds these for its lifetime; the sinks themselves are owned
/// by the caller.
#[derive(Clone)]
pub struct StreamTarget {
    pub id: Uuid,
    pub width: u32,
    pub height: u32,
    pub sink: TargetSink,
}

impl StreamTarget {
    pub fn surface(width: u32, height: u32, sink: Arc<dyn FrameSink>) -> Self {
        Self {
            id: Uuid::new_v4(),
            width,
            height,
            sink: TargetSink::Surface(sink),
        }
    }

    pub fn still_queue(width: u32, height: u32, queue: ImageQueue) -> Self {
        Self {
            id: Uuid::new_v4(),
            width,
            height,
            sink: TargetSink::StillQueue(queue),
        }
    }

    pub fn is_surface(&self) -> bool {
        matches!(self.sink, TargetSink::Surface(_))
    }

    pub fn is_still_queue(&self) -> bool {
        matches!(self.sink, TargetSink::StillQueue(_))
    }
}

impl fmt::Debug for StreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.sink {
            TargetSink::Surface(_) => "surface",
            TargetSink::StillQueue(_) => "still_queue",
        };
        f.debug_struct("StreamTarget")
            .field("id", &self.id)
            .field("kind", &kind)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// What a capture request asks the device to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Re-executed by the device until stopped or replaced.
    Preview,
    /// Executed exactly once.
    StillCapture,
}

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// A capture instruction built fresh per submission and never mutated after.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub id: u64,
    pub kind: RequestKind,
    /// Ids of the session targets this request writes to.
    pub target_ids: Vec<Uuid>,
    pub trigger_autofocus: bool,
}

impl CaptureRequest {
    /// Preview template: repeating, writing to every surface target.
    pub fn preview(targets: &[StreamTarget]) -> Self {
        Self {
            id: next_request_id(),
            kind: RequestKind::Preview,
            target_ids: targets
                .iter()
                .filter(|t| t.is_surface())
                .map(|t| t.id)
                .collect(),
            trigger_autofocus: false,
        }
    }

    /// Still-capture template: one-shot, writing to the still-image queue.
    pub fn still_capture(targets: &[StreamTarget], trigger_autofocus: bool) -> Self {
        Self {
            id: next_request_id(),
            kind: RequestKind::StillCapture,
            target_ids: targets
                .iter()
                .filter(|t| t.is_still_queue())
                .map(|t| t.id)
                .collect(),
            trigger_autofocus,
        }
    }
}
