//! Bounded still-image queue.
//!
//! Stands between the device and the persistence path: the device pushes
//! completed still frames in, an image-available listener fires on the
//! capture context, and each acquired image holds a pool slot until it is
//! released. The device drops new frames rather than growing past capacity,
//! so an unreleased image backpressures the device instead of the heap.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::scheduler::TaskContext;
use crate::types::CameraFrame;

struct QueueState {
    ready: VecDeque<CameraFrame>,
    in_flight: usize,
    capacity: usize,
    dropped: u64,
    closed: bool,
}

type Listener = (TaskContext, Arc<dyn Fn() + Send + Sync>);

struct QueueInner {
    state: Mutex<QueueState>,
    cv: Condvar,
    listener: Mutex<Option<Listener>>,
}

/// Cloneable handle to one bounded image queue.
#[derive(Clone)]
pub struct ImageQueue {
    inner: Arc<QueueInner>,
}

impl ImageQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    ready: VecDeque::with_capacity(capacity.max(1)),
                    in_flight: 0,
                    capacity: capacity.max(1),
                    dropped: 0,
                    closed: false,
                }),
                cv: Condvar::new(),
                listener: Mutex::new(None),
            }),
        }
    }

    /// Register the image-available notification. `context` is where the
    /// callback runs, away from the device lifecycle thread.
    pub fn set_listener<F>(&self, context: TaskContext, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.inner.listener.lock().expect("lock poisoned") =
            Some((context, Arc::new(callback)));
    }

    /// Device side: offer a completed frame. Dropped (with a warning) when
    /// the pool is exhausted, since unreleased buffers must not be recycled
    /// out from under their consumers.
    pub fn push(&self, frame: CameraFrame) {
        {
            let mut state = self.inner.state.lock().expect("lock poisoned");
            if state.closed {
                return;
            }
            if state.ready.len() + state.in_flight >= state.capacity {
                state.dropped = state.dropped.saturating_add(1);
                log::warn!(
                    "image queue full ({} ready, {} in flight); frame dropped",
                    state.ready.len(),
                    state.in_flight
                );
                return;
            }
            state.ready.push_back(frame);
            self.inner.cv.notify_all();
        }

        let listener = self.inner.listener.lock().expect("lock poisoned").clone();
        if let Some((context, callback)) = listener {
            if context.post(move || callback()).is_err() {
                log::debug!("image-available notification dropped: context stopped");
            }
        }
    }

    /// Take the next ready image, holding its pool slot until release.
    pub fn acquire(&self) -> Option<AcquiredImage> {
        let mut state = self.inner.state.lock().expect("lock poisoned");
        let frame = state.ready.pop_front()?;
        state.in_flight += 1;
        Some(AcquiredImage {
            frame: Some(frame),
            queue: self.inner.clone(),
        })
    }

    /// Block until an image is ready or `timeout` passes. Test/CLI helper.
    pub fn acquire_timeout(&self, timeout: Duration) -> Option<AcquiredImage> {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock().expect("lock poisoned");
        loop {
            if let Some(frame) = state.ready.pop_front() {
                state.in_flight += 1;
                return Some(AcquiredImage {
                    frame: Some(frame),
                    queue: self.inner.clone(),
                });
            }
            if state.closed {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (next, _) = self
                .inner
                .cv
                .wait_timeout(state, deadline - now)
                .expect("lock poisoned");
            state = next;
        }
    }

    /// Stop accepting frames and discard anything still ready.
    pub fn close(&self) {
        let mut state = self.inner.state.lock().expect("lock poisoned");
        state.closed = true;
        state.ready.clear();
        self.inner.cv.notify_all();
    }

    pub fn dropped(&self) -> u64 {
        self.inner.state.lock().expect("lock poisoned").dropped
    }

    pub fn ready(&self) -> usize {
        self.inner.state.lock().expect("lock poisoned").ready.len()
    }

    pub fn in_flight(&self) -> usize {
        self.inner.state.lock().expect("lock poisoned").in_flight
    }
}

/// A frame checked out of the queue. The pool slot returns on `release` or
/// drop, whichever comes first.
pub struct AcquiredImage {
    frame: Option<CameraFrame>,
    queue: Arc<QueueInner>,
}

impl AcquiredImage {
    pub fn frame(&self) -> &CameraFrame {
        self.frame.as_ref().expect("frame taken")
    }

    /// Take ownership of the frame and return the pool slot.
    pub fn release(mut self) -> CameraFrame {
        let frame = self.frame.take().expect("frame taken");
        release_slot(&self.queue);
        frame
    }
}

impl Drop for AcquiredImage {
    fn drop(&mut self) {
        if self.frame.take().is_some() {
            release_slot(&self.queue);
        }
    }
}

fn release_slot(queue: &Arc<QueueInner>) {
    let mut state = queue.state.lock().expect("lock poisoned");
    state.in_flight = state.in_flight.saturating_sub(1);
    queue.cv.notify_all();
}
