//! Single-flight guards.
//!
//! A [`SingleFlight`] lets at most one holder run a task at a time. The flag
//! is released when the [`FlightGuard`] drops, so an early return, an error or
//! a panic in the task body cannot leave it stuck.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Admission flag for one kind of task.
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    busy: Arc<AtomicBool>,
}

impl SingleFlight {
    /// Create an idle flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the flag if nobody holds it.
    #[must_use]
    pub fn try_acquire(&self) -> Option<FlightGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard {
                busy: Arc::clone(&self.busy),
            })
    }

    /// Whether a holder is currently running.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Proof of holding a [`SingleFlight`]; releases it on drop.
#[derive(Debug)]
pub struct FlightGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
