//! Persistence collaborator.
//!
//! Captured still buffers are written verbatim; encoding belongs to whoever
//! produced the buffer. Runs only on the persistence context, never on a
//! camera thread.

use std::fs;
use std::io::Write;
use std::path::Path;

use crate::errors::CameraError;

/// Writes one completed capture buffer to its destination.
pub trait FrameWriter: Send + Sync {
    fn write(&self, data: &[u8], path: &Path) -> Result<(), CameraError>;
}

/// Filesystem writer. Creates missing parent directories and flushes before
/// returning so the buffer can be released immediately after.
pub struct DiskWriter;

impl FrameWriter for DiskWriter {
    fn write(&self, data: &[u8], path: &Path) -> Result<(), CameraError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                CameraError::PersistenceFailed(format!(
                    "create {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let mut file = fs::File::create(path).map_err(|e| {
            CameraError::PersistenceFailed(format!("create {}: {}", path.display(), e))
        })?;
        file.write_all(data).map_err(|e| {
            CameraError::PersistenceFailed(format!("write {}: {}", path.display(), e))
        })?;
        file.flush().map_err(|e| {
            CameraError::PersistenceFailed(format!("flush {}: {}", path.display(), e))
        })?;

        log::info!("saved capture to {} ({} bytes)", path.display(), data.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disk_writer_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("captures").join("frame.raw");
        DiskWriter.write(b"pixels", &path).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"pixels");
    }

    #[test]
    fn test_disk_writer_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        // A path whose parent is a regular file cannot be created.
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"x").unwrap();
        let result = DiskWriter.write(b"pixels", &blocker.join("frame.raw"));
        assert!(matches!(result, Err(CameraError::PersistenceFailed(_))));
    }
}
