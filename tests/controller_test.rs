#[cfg(test)]
mod controller_tests {
    use std::path::Path;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use crossbeam_channel::Receiver;
    use viewfinder::platform::sim::{OpenOutcome, SimBackend};
    use viewfinder::{
        AccessAuthorizer, CameraController, CameraError, CameraFrame, DiskWriter, Facing,
        FrameSink, FrameWriter, Notice, SessionState, StaticAuthorizer, StreamTarget,
        ViewfinderConfig,
    };

    struct CountingSurface {
        frames: AtomicU64,
    }

    impl CountingSurface {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                frames: AtomicU64::new(0),
            })
        }

        fn count(&self) -> u64 {
            self.frames.load(Ordering::SeqCst)
        }
    }

    impl FrameSink for CountingSurface {
        fn deliver(&self, _frame: CameraFrame) {
            self.frames.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FailingWriter;

    impl FrameWriter for FailingWriter {
        fn write(&self, _data: &[u8], path: &Path) -> Result<(), CameraError> {
            Err(CameraError::PersistenceFailed(format!(
                "injected failure for {}",
                path.display()
            )))
        }
    }

    fn test_config(dir: &Path) -> ViewfinderConfig {
        let mut config = ViewfinderConfig::default();
        config.storage.output_directory = dir.to_string_lossy().to_string();
        config
    }

    fn build(
        backend: &SimBackend,
        authorizer: impl AccessAuthorizer + 'static,
        writer: Arc<dyn FrameWriter>,
        dir: &Path,
    ) -> CameraController {
        CameraController::new(
            Arc::new(backend.clone()),
            Arc::new(authorizer),
            writer,
            test_config(dir),
        )
        .expect("enumeration succeeds against the sim")
    }

    fn start_preview(controller: &CameraController) -> Arc<CountingSurface> {
        let surface = CountingSurface::new();
        controller
            .surface_ready(StreamTarget::surface(1280, 720, surface.clone()))
            .expect("open accepted");
        assert!(controller.wait_for_state(
            |s| s == SessionState::PreviewRunning,
            Duration::from_secs(2)
        ));
        surface
    }

    fn wait_until(condition: impl Fn() -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    fn next_matching(
        notices: &Receiver<Notice>,
        matches: impl Fn(&Notice) -> bool,
        timeout: Duration,
    ) -> Option<Notice> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match notices.recv_timeout(remaining) {
                Ok(notice) if matches(&notice) => return Some(notice),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    }

    #[test]
    fn test_open_without_permission_fails_fast() {
        let backend = SimBackend::new();
        let dir = tempfile::tempdir().unwrap();
        let controller = build(
            &backend,
            StaticAuthorizer::denied(),
            Arc::new(DiskWriter),
            dir.path(),
        );
        controller.attach_preview(StreamTarget::surface(1280, 720, CountingSurface::new()));

        let result = controller.open();
        assert!(matches!(result, Err(CameraError::PermissionDenied(_))));
        assert_eq!(controller.state(), SessionState::Idle);
        // The platform was never touched.
        assert_eq!(backend.opens(), 0);
    }

    #[test]
    fn test_open_without_surface_fails_fast() {
        let backend = SimBackend::new();
        let dir = tempfile::tempdir().unwrap();
        let controller = build(
            &backend,
            StaticAuthorizer::granted(),
            Arc::new(DiskWriter),
            dir.path(),
        );
        let result = controller.open();
        assert!(matches!(result, Err(CameraError::OpenFailed(_))));
        assert_eq!(controller.state(), SessionState::Idle);
        assert_eq!(backend.opens(), 0);
    }

    #[test]
    fn test_preview_and_still_capture_roundtrip() {
        let backend = SimBackend::new();
        let dir = tempfile::tempdir().unwrap();
        let controller = build(
            &backend,
            StaticAuthorizer::granted(),
            Arc::new(DiskWriter),
            dir.path(),
        );
        let notices = controller.notices();

        let surface = start_preview(&controller);
        let started = next_matching(
            &notices,
            |n| matches!(n, Notice::PreviewStarted { .. }),
            Duration::from_secs(2),
        );
        match started {
            Some(Notice::PreviewStarted { device_id }) => assert_eq!(device_id, "0"),
            other => panic!("expected PreviewStarted, got {:?}", other),
        }

        // The repeating request keeps frames flowing without resubmission.
        assert!(wait_until(|| surface.count() >= 3, Duration::from_secs(2)));

        controller.capture_still();
        let saved = next_matching(
            &notices,
            |n| matches!(n, Notice::StillSaved { .. }),
            Duration::from_secs(2),
        );
        let path = match saved {
            Some(Notice::StillSaved { path }) => path,
            other => panic!("expected StillSaved, got {:?}", other),
        };

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 1280 * 720 * 3);
        assert_eq!(backend.captures(), 1);
        // The clean-slate abort ran before the one-shot was submitted.
        assert_eq!(backend.aborts(), 1);

        // Preview resumed after the one-shot.
        assert!(controller.wait_for_state(
            |s| s == SessionState::PreviewRunning,
            Duration::from_secs(2)
        ));
        let before = surface.count();
        assert!(wait_until(
            || surface.count() > before,
            Duration::from_secs(2)
        ));
    }

    #[test]
    fn test_capture_still_is_noop_outside_preview() {
        let backend = SimBackend::new();
        let dir = tempfile::tempdir().unwrap();
        let controller = build(
            &backend,
            StaticAuthorizer::granted(),
            Arc::new(DiskWriter),
            dir.path(),
        );
        let notices = controller.notices();
        controller.attach_preview(StreamTarget::surface(1280, 720, CountingSurface::new()));

        // Before any open: nothing is submitted and nothing changes.
        controller.capture_still();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(controller.state(), SessionState::Idle);
        assert_eq!(backend.captures(), 0);
        assert!(notices.try_recv().is_err());

        // After close: same story.
        controller.open().unwrap();
        assert!(controller.wait_for_state(
            |s| s == SessionState::PreviewRunning,
            Duration::from_secs(2)
        ));
        controller.close().unwrap();
        assert!(controller.wait_for_state(|s| s == SessionState::Idle, Duration::from_secs(2)));
        controller.capture_still();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(controller.state(), SessionState::Idle);
        assert_eq!(backend.captures(), 0);
    }

    #[test]
    fn test_persistence_failure_keeps_preview_alive() {
        let backend = SimBackend::new();
        let dir = tempfile::tempdir().unwrap();
        let controller = build(
            &backend,
            StaticAuthorizer::granted(),
            Arc::new(FailingWriter),
            dir.path(),
        );
        let notices = controller.notices();
        let surface = start_preview(&controller);

        controller.capture_still();
        let failed = next_matching(
            &notices,
            |n| matches!(n, Notice::PersistenceFailed { .. }),
            Duration::from_secs(2),
        );
        assert!(failed.is_some());

        // The failed write is isolated: preview resumed and keeps flowing.
        assert!(controller.wait_for_state(
            |s| s == SessionState::PreviewRunning,
            Duration::from_secs(2)
        ));
        let before = surface.count();
        assert!(wait_until(
            || surface.count() > before,
            Duration::from_secs(2)
        ));
        // And no session failure was reported.
        assert!(next_matching(
            &notices,
            |n| matches!(n, Notice::SessionFailed { .. }),
            Duration::from_millis(100)
        )
        .is_none());
    }

    #[test]
    fn test_close_settles_idle_and_is_idempotent() {
        let backend = SimBackend::new();
        let dir = tempfile::tempdir().unwrap();
        let controller = build(
            &backend,
            StaticAuthorizer::granted(),
            Arc::new(DiskWriter),
            dir.path(),
        );
        start_preview(&controller);

        controller.close().unwrap();
        assert!(controller.wait_for_state(|s| s == SessionState::Idle, Duration::from_secs(2)));
        assert!(wait_until(|| backend.live_handles() == 0, Duration::from_secs(2)));

        // Close again from Idle: a documented no-op.
        controller.close().unwrap();
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[test]
    fn test_close_during_opening_discards_late_open() {
        let backend = SimBackend::new();
        let dir = tempfile::tempdir().unwrap();
        let controller = build(
            &backend,
            StaticAuthorizer::granted(),
            Arc::new(DiskWriter),
            dir.path(),
        );
        controller.attach_preview(StreamTarget::surface(1280, 720, CountingSurface::new()));

        let gate = backend.hold_opens();
        controller.open().unwrap();
        assert_eq!(controller.state(), SessionState::Opening);

        controller.close().unwrap();
        assert!(controller.wait_for_state(|s| s == SessionState::Idle, Duration::from_secs(2)));

        // The device answers after teardown: the late handle is discarded
        // and released, and no session is ever configured.
        gate.release();
        assert!(wait_until(|| backend.live_handles() == 0, Duration::from_secs(2)));
        assert_eq!(backend.sessions_created(), 0);
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[test]
    fn test_switch_device_never_overlaps_handles() {
        let backend = SimBackend::new();
        let dir = tempfile::tempdir().unwrap();
        let controller = build(
            &backend,
            StaticAuthorizer::granted(),
            Arc::new(DiskWriter),
            dir.path(),
        );
        let notices = controller.notices();
        start_preview(&controller);
        assert_eq!(controller.facing(), Facing::Back);

        let mut expected = vec!["0".to_string()];
        for _ in 0..3 {
            controller.toggle_camera().unwrap();
            assert!(controller.wait_for_state(
                |s| s == SessionState::PreviewRunning,
                Duration::from_secs(2)
            ));
            expected.push(if controller.facing() == Facing::Front {
                "1".to_string()
            } else {
                "0".to_string()
            });
        }
        assert_eq!(controller.facing(), Facing::Front);

        // Every preview start names the device that was switched to, in order.
        let mut observed = Vec::new();
        while let Some(Notice::PreviewStarted { device_id }) = next_matching(
            &notices,
            |n| matches!(n, Notice::PreviewStarted { .. }),
            Duration::from_millis(100),
        ) {
            observed.push(device_id);
        }
        assert_eq!(observed, expected);

        // At no instant were two devices claimed at once.
        assert_eq!(backend.max_live_handles(), 1);
    }

    #[test]
    fn test_configure_failure_fails_session_then_recovers() {
        let backend = SimBackend::new();
        let dir = tempfile::tempdir().unwrap();
        let controller = build(
            &backend,
            StaticAuthorizer::granted(),
            Arc::new(DiskWriter),
            dir.path(),
        );
        let notices = controller.notices();
        backend.set_configure_fails(true);

        controller.attach_preview(StreamTarget::surface(1280, 720, CountingSurface::new()));
        controller.open().unwrap();
        assert!(controller.wait_for_state(|s| s == SessionState::Failed, Duration::from_secs(2)));

        let failure = next_matching(
            &notices,
            |n| matches!(n, Notice::SessionFailed { .. }),
            Duration::from_secs(2),
        );
        match failure {
            Some(Notice::SessionFailed {
                error: CameraError::ConfigRejected(_),
            }) => {}
            other => panic!("expected ConfigRejected failure, got {:?}", other),
        }

        // Not retried automatically; recovery is close + fresh open.
        controller.close().unwrap();
        assert!(controller.wait_for_state(|s| s == SessionState::Idle, Duration::from_secs(2)));
        backend.set_configure_fails(false);
        controller.open().unwrap();
        assert!(controller.wait_for_state(
            |s| s == SessionState::PreviewRunning,
            Duration::from_secs(2)
        ));
    }

    #[test]
    fn test_device_error_fails_session_and_switch_recovers() {
        let backend = SimBackend::new();
        let dir = tempfile::tempdir().unwrap();
        let controller = build(
            &backend,
            StaticAuthorizer::granted(),
            Arc::new(DiskWriter),
            dir.path(),
        );
        backend.set_open_outcome(OpenOutcome::Error(3));

        controller.attach_preview(StreamTarget::surface(1280, 720, CountingSurface::new()));
        controller.open().unwrap();
        assert!(controller.wait_for_state(|s| s == SessionState::Failed, Duration::from_secs(2)));
        assert_eq!(backend.live_handles(), 0);

        // switch_device is explicitly valid from Failed.
        backend.set_open_outcome(OpenOutcome::Opened);
        controller.switch_device(Facing::Front).unwrap();
        assert!(controller.wait_for_state(
            |s| s == SessionState::PreviewRunning,
            Duration::from_secs(2)
        ));
        assert_eq!(controller.facing(), Facing::Front);
    }

    #[test]
    fn test_disconnect_during_open_fails_session() {
        let backend = SimBackend::new();
        let dir = tempfile::tempdir().unwrap();
        let controller = build(
            &backend,
            StaticAuthorizer::granted(),
            Arc::new(DiskWriter),
            dir.path(),
        );
        backend.set_open_outcome(OpenOutcome::Disconnected);

        controller.attach_preview(StreamTarget::surface(1280, 720, CountingSurface::new()));
        controller.open().unwrap();
        assert!(controller.wait_for_state(|s| s == SessionState::Failed, Duration::from_secs(2)));
        assert_eq!(backend.live_handles(), 0);
        assert_eq!(backend.sessions_created(), 0);
    }

    #[test]
    fn test_open_rejected_while_running() {
        let backend = SimBackend::new();
        let dir = tempfile::tempdir().unwrap();
        let controller = build(
            &backend,
            StaticAuthorizer::granted(),
            Arc::new(DiskWriter),
            dir.path(),
        );
        start_preview(&controller);

        let result = controller.open();
        assert!(matches!(result, Err(CameraError::InvalidState { .. })));
        assert_eq!(controller.state(), SessionState::PreviewRunning);
    }

    #[test]
    fn test_switch_rejected_outside_preview_or_failed() {
        let backend = SimBackend::new();
        let dir = tempfile::tempdir().unwrap();
        let controller = build(
            &backend,
            StaticAuthorizer::granted(),
            Arc::new(DiskWriter),
            dir.path(),
        );
        let result = controller.switch_device(Facing::Front);
        assert!(matches!(result, Err(CameraError::InvalidState { .. })));
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let backend = SimBackend::new();
        let dir = tempfile::tempdir().unwrap();
        let controller = build(
            &backend,
            StaticAuthorizer::granted(),
            Arc::new(DiskWriter),
            dir.path(),
        );
        start_preview(&controller);

        controller.shutdown(Duration::from_secs(2)).unwrap();
        assert_eq!(controller.state(), SessionState::Idle);
        assert_eq!(backend.live_handles(), 0);

        controller.shutdown(Duration::from_secs(2)).unwrap();
        assert_eq!(controller.state(), SessionState::Idle);
    }
}
