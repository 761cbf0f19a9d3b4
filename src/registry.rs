//! Device registry.
//!
//! Enumerates once at construction and is read-only afterwards; descriptors
//! are immutable snapshots of what the platform reported.

use crate::errors::CameraError;
use crate::platform::CameraBackend;
use crate::types::{DeviceDescriptor, Facing};

pub struct DeviceRegistry {
    devices: Vec<DeviceDescriptor>,
}

impl DeviceRegistry {
    /// Query the platform once. Fails with an enumeration error when the
    /// camera service is unavailable; an empty device list is not an error.
    pub fn enumerate(backend: &dyn CameraBackend) -> Result<Self, CameraError> {
        let devices = backend.list_devices()?;

        let front = devices.iter().filter(|d| d.facing == Facing::Front).count();
        let back = devices.len() - front;
        log::debug!(
            "enumerated {} camera devices ({} front, {} back)",
            devices.len(),
            front,
            back
        );

        Ok(Self { devices })
    }

    pub fn devices(&self) -> &[DeviceDescriptor] {
        &self.devices
    }

    /// First device pointing the given way, or None.
    pub fn describe(&self, facing: Facing) -> Option<&DeviceDescriptor> {
        self.devices.iter().find(|d| d.facing == facing)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
