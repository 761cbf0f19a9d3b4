//! Serial worker contexts.
//!
//! Device and session callbacks must be observed in the order the device
//! emits them, so each context is a single dedicated thread draining an
//! ordered queue. Blocking work (disk writes) gets its own context so it can
//! never delay a camera callback.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::errors::CameraError;

type Task = Box<dyn FnOnce() + Send + 'static>;

struct ContextInner {
    name: String,
    sender: Mutex<Option<Sender<Task>>>,
    join: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to one serial execution context. Cloning shares the same queue and
/// worker thread.
#[derive(Clone)]
pub struct TaskContext {
    inner: Arc<ContextInner>,
}

impl TaskContext {
    /// Spawn a named context with a dedicated worker thread.
    pub fn spawn(name: &str) -> Self {
        let (tx, rx): (Sender<Task>, Receiver<Task>) = unbounded();
        let thread_name = name.to_string();
        let handle = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                while let Ok(task) = rx.recv() {
                    task();
                }
                log::debug!("context {} drained and exiting", thread_name);
            })
            .expect("failed to spawn context thread");

        Self {
            inner: Arc::new(ContextInner {
                name: name.to_string(),
                sender: Mutex::new(Some(tx)),
                join: Mutex::new(Some(handle)),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Enqueue work. Tasks run in post order on the context's thread.
    pub fn post<F>(&self, task: F) -> Result<(), CameraError>
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = self.inner.sender.lock().expect("lock poisoned");
        match guard.as_ref() {
            Some(tx) => tx
                .send(Box::new(task))
                .map_err(|_| CameraError::ContextStopped(self.inner.name.clone())),
            None => Err(CameraError::ContextStopped(self.inner.name.clone())),
        }
    }

    /// Stop accepting new work without blocking. Already-queued tasks still
    /// run; the worker thread exits once the queue is drained.
    pub fn request_stop(&self) {
        let mut guard = self.inner.sender.lock().expect("lock poisoned");
        if guard.take().is_some() {
            log::debug!("context {} intake closed", self.inner.name);
        }
    }

    /// Stop intake, wait for the queue to drain, and join the thread, bounded
    /// by `timeout`. On expiry the thread is abandoned rather than blocked on
    /// forever, and the caller should treat the context as leaked.
    pub fn shutdown(&self, timeout: Duration) -> Result<(), CameraError> {
        self.request_stop();

        let handle = self.inner.join.lock().expect("lock poisoned").take();
        let Some(handle) = handle else {
            return Ok(());
        };

        let start = Instant::now();
        let mut handle = Some(handle);
        loop {
            let finished = handle.as_ref().is_some_and(|h| h.is_finished());
            if finished {
                let _ = handle.take().expect("handle present").join();
                return Ok(());
            }
            if start.elapsed() >= timeout {
                // Abandon: drop the handle so nothing ever blocks on it.
                drop(handle.take());
                log::warn!(
                    "context {} did not drain within {:?}; thread abandoned (resource leak)",
                    self.inner.name,
                    timeout
                );
                return Err(CameraError::ShutdownTimeout(self.inner.name.clone()));
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    /// True once intake is closed.
    pub fn is_stopped(&self) -> bool {
        self.inner.sender.lock().expect("lock poisoned").is_none()
    }
}

/// Owns the set of contexts a camera run stands up, so teardown can reach
/// all of them.
pub struct WorkerScheduler {
    contexts: Mutex<Vec<TaskContext>>,
}

impl WorkerScheduler {
    pub fn new() -> Self {
        Self {
            contexts: Mutex::new(Vec::new()),
        }
    }

    pub fn spawn(&self, name: &str) -> TaskContext {
        let ctx = TaskContext::spawn(name);
        self.contexts
            .lock()
            .expect("lock poisoned")
            .push(ctx.clone());
        ctx
    }

    /// Shut down every context spawned through this scheduler. Safe to call
    /// twice; already-shut contexts are skipped. Returns the first timeout
    /// error encountered, after attempting all contexts.
    pub fn shutdown_all(&self, timeout: Duration) -> Result<(), CameraError> {
        let contexts: Vec<TaskContext> = self
            .contexts
            .lock()
            .expect("lock poisoned")
            .drain(..)
            .collect();

        let mut first_err = None;
        for ctx in contexts {
            if let Err(e) = ctx.shutdown(timeout) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Default for WorkerScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_tasks_run_in_post_order() {
        let ctx = TaskContext::spawn("order-test");
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..50 {
            let seen = seen.clone();
            ctx.post(move || seen.lock().unwrap().push(i)).unwrap();
        }
        ctx.shutdown(Duration::from_secs(2)).unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(*seen, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_post_after_stop_rejected() {
        let ctx = TaskContext::spawn("stop-test");
        ctx.request_stop();
        let result = ctx.post(|| {});
        assert!(matches!(result, Err(CameraError::ContextStopped(_))));
    }

    #[test]
    fn test_shutdown_drains_pending_work() {
        let ctx = TaskContext::spawn("drain-test");
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            let counter = counter.clone();
            ctx.post(move || {
                std::thread::sleep(Duration::from_millis(1));
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        ctx.shutdown(Duration::from_secs(5)).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn test_shutdown_times_out_on_stuck_task() {
        let ctx = TaskContext::spawn("stuck-test");
        ctx.post(|| std::thread::sleep(Duration::from_secs(10))).unwrap();
        let result = ctx.shutdown(Duration::from_millis(50));
        assert!(matches!(result, Err(CameraError::ShutdownTimeout(_))));
        // A second shutdown is a no-op, not a hang.
        assert!(ctx.shutdown(Duration::from_millis(10)).is_ok());
    }

    #[test]
    fn test_scheduler_shutdown_all_idempotent() {
        let scheduler = WorkerScheduler::new();
        let _a = scheduler.spawn("ctx-a");
        let _b = scheduler.spawn("ctx-b");
        assert!(scheduler.shutdown_all(Duration::from_secs(2)).is_ok());
        assert!(scheduler.shutdown_all(Duration::from_secs(2)).is_ok());
    }
}
