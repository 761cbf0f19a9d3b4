use std::fmt;

use crate::types::SessionState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    /// Platform camera service absent or unusable. Fatal at startup, not retried.
    EnumerationFailed(String),
    /// Camera access not authorized. The caller may re-request authorization and retry.
    PermissionDenied(String),
    /// The device rejected the open request. The session must be re-opened from Idle.
    OpenFailed(String),
    /// The device was removed or revoked externally while in use.
    Disconnected(String),
    /// Unrecoverable device-level fault, with the driver error code.
    DeviceFault { device_id: String, code: i32 },
    /// The capture session configuration was rejected. Not retried automatically.
    ConfigRejected(String),
    /// Operation attempted in a state that does not accept it.
    InvalidState { operation: &'static str, state: SessionState },
    /// No device matches the requested selector.
    NotFound(String),
    /// Writing a captured buffer to storage failed. Isolated to that capture.
    PersistenceFailed(String),
    /// A worker context did not drain within its shutdown deadline.
    ShutdownTimeout(String),
    /// Work was posted to a context that no longer accepts tasks.
    ContextStopped(String),
}

impl fmt::Display for CameraError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CameraError::EnumerationFailed(msg) => write!(f, "Device enumeration error: {}", msg),
            CameraError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            CameraError::OpenFailed(msg) => write!(f, "Device open error: {}", msg),
            CameraError::Disconnected(msg) => write!(f, "Device disconnected: {}", msg),
            CameraError::DeviceFault { device_id, code } => {
                write!(f, "Device error on {}: code {}", device_id, code)
            }
            CameraError::ConfigRejected(msg) => {
                write!(f, "Session configuration error: {}", msg)
            }
            CameraError::InvalidState { operation, state } => {
                write!(f, "Invalid state for {}: {}", operation, state)
            }
            CameraError::NotFound(msg) => write!(f, "Not found: {}", msg),
            CameraError::PersistenceFailed(msg) => write!(f, "Persistence error: {}", msg),
            CameraError::ShutdownTimeout(msg) => write!(f, "Shutdown timeout: {}", msg),
            CameraError::ContextStopped(msg) => write!(f, "Context stopped: {}", msg),
        }
    }
}

impl std::error::Error for CameraError {}
