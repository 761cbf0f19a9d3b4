#[cfg(test)]
mod registry_tests {
    use viewfinder::platform::sim::SimBackend;
    use viewfinder::{CameraError, DeviceDescriptor, DeviceRegistry, Facing};

    #[test]
    fn test_enumerates_default_device_table() {
        let backend = SimBackend::new();
        let registry = DeviceRegistry::enumerate(&backend).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(!registry.is_empty());
    }

    #[test]
    fn test_describe_partitions_by_facing() {
        let backend = SimBackend::new();
        let registry = DeviceRegistry::enumerate(&backend).unwrap();

        let back = registry.describe(Facing::Back).expect("back camera");
        assert_eq!(back.id, "0");
        let front = registry.describe(Facing::Front).expect("front camera");
        assert_eq!(front.id, "1");
    }

    #[test]
    fn test_describe_missing_facing_is_none() {
        let backend = SimBackend::with_devices(vec![DeviceDescriptor::new(
            "0".to_string(),
            "Only Back".to_string(),
            Facing::Back,
        )]);
        let registry = DeviceRegistry::enumerate(&backend).unwrap();
        assert!(registry.describe(Facing::Front).is_none());
        assert!(registry.describe(Facing::Back).is_some());
    }

    #[test]
    fn test_enumeration_failure_surfaces() {
        let backend = SimBackend::new();
        backend.fail_enumeration(true);
        let result = DeviceRegistry::enumerate(&backend);
        assert!(matches!(result, Err(CameraError::EnumerationFailed(_))));
    }

    #[test]
    fn test_descriptors_serialize() {
        let backend = SimBackend::new();
        let registry = DeviceRegistry::enumerate(&backend).unwrap();
        let json = serde_json::to_string(registry.devices()).unwrap();
        assert!(json.contains("\"facing\""));
        assert!(json.contains("\"sensor_orientation\""));
    }
}
