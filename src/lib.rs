//! Viewfinder: camera device lifecycle and capture session management
//!
//! This crate drives one exclusive camera through its full lifecycle:
//! discovering devices, opening one asynchronously, configuring a streaming
//! capture session against fixed output targets, keeping a continuous
//! preview alive, and interleaving one-shot still captures that are
//! persisted off the camera threads.
//!
//! # Features
//! - Asynchronous open/close/switch with an observable session state machine
//! - Ordered callback delivery on dedicated serial worker contexts
//! - Repeating preview requests with still capture interleaved and restored
//! - Still buffers persisted on their own context, isolated from the preview
//! - Simulated backend for hardware-free operation and testing
//!
//! # Usage
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use viewfinder::platform::sim::SimBackend;
//! use viewfinder::{
//!     CameraController, CameraFrame, DiskWriter, FrameSink, SessionState, StaticAuthorizer,
//!     StreamTarget, ViewfinderConfig,
//! };
//!
//! struct NullSurface;
//! impl FrameSink for NullSurface {
//!     fn deliver(&self, _frame: CameraFrame) {}
//! }
//!
//! let controller = CameraController::new(
//!     Arc::new(SimBackend::new()),
//!     Arc::new(StaticAuthorizer::granted()),
//!     Arc::new(DiskWriter),
//!     ViewfinderConfig::default(),
//! )
//! .expect("camera service available");
//!
//! controller
//!     .surface_ready(StreamTarget::surface(1280, 720, Arc::new(NullSurface)))
//!     .expect("open accepted");
//! controller.wait_for_state(|s| s == SessionState::PreviewRunning, Duration::from_secs(2));
//! controller.close().expect("close accepted");
//! ```

pub mod config;
pub mod errors;
pub mod imagequeue;
pub mod permissions;
pub mod platform;
pub mod registry;
pub mod scheduler;
pub mod session;
pub mod storage;
pub mod types;

// Re-exports for convenience
pub use config::ViewfinderConfig;
pub use errors::CameraError;
pub use imagequeue::ImageQueue;
pub use permissions::{AccessAuthorizer, PermissionInfo, PermissionStatus, StaticAuthorizer, SystemAuthorizer};
pub use registry::DeviceRegistry;
pub use scheduler::{TaskContext, WorkerScheduler};
pub use session::{CameraController, Notice};
pub use storage::{DiskWriter, FrameWriter};
pub use types::{
    CameraFrame, CaptureRequest, DeviceDescriptor, Facing, FrameSink, SessionState, StreamFormat,
    StreamTarget,
};

/// Initialize logging for the camera system
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "viewfinder=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn test_crate_constants() {
        assert_eq!(NAME, "viewfinder");
        assert!(!VERSION.is_empty());
        assert!(!DESCRIPTION.is_empty());
    }

    #[test]
    fn test_default_config_sane() {
        let config = ViewfinderConfig::default();
        assert!(config.camera.image_queue_capacity >= 1);
        assert!(config.scheduler.shutdown_timeout_ms > 0);
    }
}
