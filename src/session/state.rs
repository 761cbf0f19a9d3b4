//! Observable session state.
//!
//! One cell per controller. Transitions are logged, watchers are woken on
//! every change, and guarded transitions reject callers that lost a race.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::errors::CameraError;
use crate::types::SessionState;

pub struct StateCell {
    state: Mutex<SessionState>,
    cv: Condvar,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::Idle),
            cv: Condvar::new(),
        }
    }

    pub fn get(&self) -> SessionState {
        *self.state.lock().expect("lock poisoned")
    }

    pub fn set(&self, to: SessionState) {
        let mut state = self.state.lock().expect("lock poisoned");
        if *state != to {
            log::debug!("session state {} -> {}", *state, to);
            *state = to;
            self.cv.notify_all();
        }
    }

    /// Move `from` to `to`, or report which operation lost the race.
    pub fn transition(
        &self,
        from: SessionState,
        to: SessionState,
        operation: &'static str,
    ) -> Result<(), CameraError> {
        let mut state = self.state.lock().expect("lock poisoned");
        if *state != from {
            return Err(CameraError::InvalidState {
                operation,
                state: *state,
            });
        }
        log::debug!("session state {} -> {} ({})", *state, to, operation);
        *state = to;
        self.cv.notify_all();
        Ok(())
    }

    /// Block until `predicate` holds or `timeout` passes. Returns whether the
    /// predicate was observed.
    pub fn wait_for<F>(&self, predicate: F, timeout: Duration) -> bool
    where
        F: Fn(SessionState) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().expect("lock poisoned");
        loop {
            if predicate(*state) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, _) = self
                .cv
                .wait_timeout(state, deadline - now)
                .expect("lock poisoned");
            state = next;
        }
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
