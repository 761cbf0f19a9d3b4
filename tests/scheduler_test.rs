#[cfg(test)]
mod scheduler_tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use viewfinder::{CameraError, TaskContext, WorkerScheduler};

    #[test]
    fn test_cross_context_handoff_preserves_order() {
        let first = TaskContext::spawn("stage-one");
        let second = TaskContext::spawn("stage-two");
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..25 {
            let second = second.clone();
            let seen = seen.clone();
            first
                .post(move || {
                    // Hand the item to the next stage, the way a capture
                    // notification posts its write onto the persistence
                    // context.
                    let seen = seen.clone();
                    second.post(move || seen.lock().unwrap().push(i)).unwrap();
                })
                .unwrap();
        }

        first.shutdown(Duration::from_secs(2)).unwrap();
        second.shutdown(Duration::from_secs(2)).unwrap();
        assert_eq!(*seen.lock().unwrap(), (0..25).collect::<Vec<_>>());
    }

    #[test]
    fn test_posting_onto_own_context_does_not_deadlock() {
        let ctx = TaskContext::spawn("self-post");
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let ctx_again = ctx.clone();
            let seen = seen.clone();
            ctx.post(move || {
                seen.lock().unwrap().push("outer");
                let seen = seen.clone();
                ctx_again
                    .post(move || seen.lock().unwrap().push("inner"))
                    .unwrap();
            })
            .unwrap();
        }
        ctx.shutdown(Duration::from_secs(2)).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["outer", "inner"]);
    }

    #[test]
    fn test_shutdown_all_reports_stuck_context() {
        let scheduler = WorkerScheduler::new();
        let healthy = scheduler.spawn("healthy");
        let stuck = scheduler.spawn("stuck");

        let ran = Arc::new(Mutex::new(false));
        {
            let ran = ran.clone();
            healthy.post(move || *ran.lock().unwrap() = true).unwrap();
        }
        stuck
            .post(|| std::thread::sleep(Duration::from_secs(10)))
            .unwrap();

        let result = scheduler.shutdown_all(Duration::from_millis(100));
        assert!(matches!(result, Err(CameraError::ShutdownTimeout(_))));
        // The healthy context still drained.
        assert!(*ran.lock().unwrap());
    }

    #[test]
    fn test_stopped_context_rejects_but_drains() {
        let ctx = TaskContext::spawn("drain-then-reject");
        let seen = Arc::new(Mutex::new(0u32));
        for _ in 0..10 {
            let seen = seen.clone();
            ctx.post(move || *seen.lock().unwrap() += 1).unwrap();
        }
        ctx.request_stop();
        assert!(matches!(
            ctx.post(|| {}),
            Err(CameraError::ContextStopped(_))
        ));
        ctx.shutdown(Duration::from_secs(2)).unwrap();
        assert_eq!(*seen.lock().unwrap(), 10);
    }
}
