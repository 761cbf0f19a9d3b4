//! Request pipeline.
//!
//! Builds and submits capture requests for one configured session: the
//! repeating preview request, the one-shot still sequence that temporarily
//! replaces it, and the image-available path that hands completed buffers to
//! the persistence context. Still-capture support is a configuration choice;
//! without it the session carries no still sink and capture calls are
//! ignored.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use crossbeam_channel::Sender;
use uuid::Uuid;

use crate::config::{CameraConfig, StorageConfig};
use crate::errors::CameraError;
use crate::imagequeue::{AcquiredImage, ImageQueue};
use crate::platform::{CaptureEventSink, SessionHandle};
use crate::scheduler::TaskContext;
use crate::session::controller::Notice;
use crate::storage::FrameWriter;
use crate::types::{CaptureRequest, StreamTarget};

/// One acquired still buffer bound to its destination, handed from the
/// capture context to the persistence context by ownership transfer. The
/// buffer returns to the pool when this is consumed (or dropped on error).
struct PendingCaptureBuffer {
    image: AcquiredImage,
    path: PathBuf,
}

impl PendingCaptureBuffer {
    /// Read the backing bytes out to storage, report the outcome, and
    /// release the buffer back to its pool.
    fn persist(self, writer: &dyn FrameWriter, notices: &Sender<Notice>) {
        match writer.write(&self.image.frame().data, &self.path) {
            Ok(()) => {
                let _ = notices.send(Notice::StillSaved { path: self.path });
            }
            Err(e) => {
                log::error!("persistence failed: {}", e);
                let _ = notices.send(Notice::PersistenceFailed {
                    reason: e.to_string(),
                });
            }
        }
        self.image.release();
    }
}

pub(crate) struct RequestPipeline {
    camera: CameraConfig,
    storage: StorageConfig,
    writer: Arc<dyn FrameWriter>,
    notices: Sender<Notice>,
}

impl RequestPipeline {
    pub(crate) fn new(
        camera: CameraConfig,
        storage: StorageConfig,
        writer: Arc<dyn FrameWriter>,
        notices: Sender<Notice>,
    ) -> Self {
        Self {
            camera,
            storage,
            writer,
            notices,
        }
    }

    pub(crate) fn still_capture_enabled(&self) -> bool {
        self.camera.still_capture
    }

    /// Assemble the full target set for session configuration. The still
    /// sink must be registered here, up front: the device model does not
    /// support adding a sink to an already-configured session.
    pub(crate) fn build_targets(
        &self,
        preview: StreamTarget,
    ) -> (Vec<StreamTarget>, Option<ImageQueue>) {
        let mut targets = vec![preview];
        if !self.camera.still_capture {
            return (targets, None);
        }

        let queue = ImageQueue::new(self.camera.image_queue_capacity);
        let [width, height] = self.camera.capture_resolution;
        targets.push(StreamTarget::still_queue(width, height, queue.clone()));
        (targets, Some(queue))
    }

    /// Route completed still buffers: the image-available notification runs
    /// on the capture context, packages the buffer with its destination, and
    /// posts the write onto the persistence context. A slow or failing write
    /// therefore never holds up a camera callback, and the buffer returns to
    /// the pool once the write finishes either way.
    pub(crate) fn wire_still_queue(
        &self,
        queue: &ImageQueue,
        capture_context: &TaskContext,
        persist_context: &TaskContext,
    ) {
        let drain_queue = queue.clone();
        let persist = persist_context.clone();
        let writer = self.writer.clone();
        let notices = self.notices.clone();
        let storage = self.storage.clone();

        queue.set_listener(capture_context.clone(), move || {
            let Some(image) = drain_queue.acquire() else {
                return;
            };
            let path = capture_path(&storage, &image.frame().device_id);
            log::debug!(
                "still buffer {} ready, routing to {}",
                image.frame().id,
                path.display()
            );
            let pending = PendingCaptureBuffer { image, path };

            let writer = writer.clone();
            let notices = notices.clone();
            let posted = persist.post(move || pending.persist(writer.as_ref(), &notices));
            if posted.is_err() {
                log::warn!("persistence context stopped; capture buffer discarded");
            }
        });
    }

    /// Submit the preview template as the repeating request. Returns the
    /// template so it can be resubmitted after a still capture.
    pub(crate) fn start_repeating(
        &self,
        session: &mut SessionHandle,
        targets: &[StreamTarget],
    ) -> Result<CaptureRequest, CameraError> {
        let request = CaptureRequest::preview(targets);
        session.set_repeating(request.clone())?;
        Ok(request)
    }

    /// The still sequence: stop the repeating preview, optionally abort
    /// anything in flight for a clean slate, then submit the one-shot.
    pub(crate) fn begin_still(
        &self,
        session: &mut SessionHandle,
        targets: &[StreamTarget],
        events: CaptureEventSink,
    ) -> Result<(), CameraError> {
        session.stop_repeating()?;
        if self.camera.abort_inflight_on_still {
            session.abort_captures()?;
        }
        let request = CaptureRequest::still_capture(targets, self.camera.trigger_autofocus);
        log::debug!("submitting still capture request {}", request.id);
        session.capture(request, events)
    }

    /// Reinstall the original preview template after a completed still.
    pub(crate) fn resume_preview(
        &self,
        session: &mut SessionHandle,
        preview: &CaptureRequest,
    ) -> Result<(), CameraError> {
        session.set_repeating(preview.clone())
    }
}

fn capture_path(storage: &StorageConfig, device_id: &str) -> PathBuf {
    let stamp = Utc::now().format("%Y%m%d_%H%M%S%3f");
    let tag = Uuid::new_v4().simple().to_string();
    PathBuf::from(&storage.output_directory).join(format!(
        "{}_{}_cam{}_{}.raw",
        storage.filename_prefix,
        stamp,
        device_id,
        &tag[..8]
    ))
}
