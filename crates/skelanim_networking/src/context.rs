//! # Networking Context
//!
//! Process-wide startup/teardown of the networking subsystem.
//!
//! Only one context may be alive per process. Clients and servers keep a
//! clone of the handle, so teardown (dropping the last clone) cannot happen
//! while any of them still exists.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{NetError, NetResult};

/// Set while a context is alive.
static NETWORKING_RUNNING: AtomicBool = AtomicBool::new(false);

/// Handle proving the networking subsystem is up.
#[derive(Clone, Debug)]
pub struct NetworkContext {
    guard: Arc<TeardownGuard>,
}

/// Clears the process-wide flag when the last handle goes away.
#[derive(Debug)]
struct TeardownGuard;

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        NETWORKING_RUNNING.store(false, Ordering::Release);
        tracing::info!("networking subsystem stopped");
    }
}

impl NetworkContext {
    /// Starts the networking subsystem.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::AlreadyRunning`] if a context is already alive in
    /// this process.
    pub fn startup() -> NetResult<Self> {
        if NETWORKING_RUNNING
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(NetError::AlreadyRunning("networking subsystem"));
        }

        tracing::info!("networking subsystem started");
        Ok(Self {
            guard: Arc::new(TeardownGuard),
        })
    }

    /// Returns true while any context handle is alive.
    #[must_use]
    pub fn is_running() -> bool {
        NETWORKING_RUNNING.load(Ordering::Acquire)
    }

    /// Returns the number of live handles (clients and servers included).
    #[must_use]
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.guard)
    }
}
