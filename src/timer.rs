//! Cancellable single-shot deadline for reconnect attempts
//!
//! Each `schedule` bumps a generation counter and spawns a tokio task that
//! sleeps until the deadline. When it wakes, the task only fires if the
//! generation is still the one it was scheduled with. `cancel` and
//! `settle` bump the generation too, so a wake-up racing a cancellation is
//! a no-op even if the task has already left its sleep.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::device::{Device, DeviceAddress};

/// The one outstanding timed reconnect attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReconnect {
    pub target: Device,
    pub deadline: Instant,
    pub generation: u64,
}

#[derive(Default)]
struct TimerState {
    generation: u64,
    pending: Option<PendingReconnect>,
    task: Option<JoinHandle<()>>,
}

/// Single-shot reconnect deadline
#[derive(Clone, Default)]
pub struct ConnectionTimer {
    state: Arc<Mutex<TimerState>>,
}

impl ConnectionTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the deadline for `target`, replacing any pending attempt
    ///
    /// `on_elapsed` runs at most once, outside the timer lock, and only if
    /// nothing cancelled or settled this generation first. Returns `None`
    /// when called outside a tokio runtime (nothing is armed).
    pub fn schedule<F>(&self, target: Device, timeout: Duration, on_elapsed: F) -> Option<PendingReconnect>
    where
        F: FnOnce(Device) + Send + 'static,
    {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!(address = %target.address, "No runtime available, reconnect deadline not armed");
                return None;
            }
        };

        let mut state = self.lock();
        state.generation += 1;
        let generation = state.generation;
        let deadline = Instant::now() + timeout;

        let pending = PendingReconnect {
            target,
            deadline,
            generation,
        };
        state.pending = Some(pending.clone());

        let timer = self.clone();
        let task = handle.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(target) = timer.fire_if_current(generation) {
                on_elapsed(target);
            }
        });

        if let Some(previous) = state.task.replace(task) {
            previous.abort();
        }

        tracing::debug!(
            address = %pending.target.address,
            timeout_ms = timeout.as_millis() as u64,
            generation,
            "Reconnect deadline armed"
        );
        Some(pending)
    }

    /// Disarm unconditionally. Returns the attempt that was pending, if any.
    pub fn cancel(&self) -> Option<PendingReconnect> {
        let mut state = self.lock();
        state.generation += 1;
        if let Some(task) = state.task.take() {
            task.abort();
        }
        let cancelled = state.pending.take();
        if let Some(pending) = &cancelled {
            tracing::debug!(address = %pending.target.address, "Reconnect deadline cancelled");
        }
        cancelled
    }

    /// Disarm if `address` is the pending target (it reached `connected`)
    pub fn settle(&self, address: &DeviceAddress) -> bool {
        let mut state = self.lock();
        let matches = state
            .pending
            .as_ref()
            .is_some_and(|pending| &pending.target.address == address);
        if !matches {
            return false;
        }

        state.generation += 1;
        state.pending = None;
        if let Some(task) = state.task.take() {
            task.abort();
        }
        tracing::debug!(address = %address, "Reconnect target connected, deadline settled");
        true
    }

    pub fn pending(&self) -> Option<PendingReconnect> {
        self.lock().pending.clone()
    }

    /// Take the pending target if `generation` is still current
    ///
    /// Called by the sleeping task on wake-up. A stale generation returns
    /// `None` and leaves any newer attempt untouched.
    pub(crate) fn fire_if_current(&self, generation: u64) -> Option<Device> {
        let mut state = self.lock();
        if state.generation != generation {
            tracing::trace!(generation, current = state.generation, "Stale reconnect deadline ignored");
            return None;
        }
        state.task = None;
        state.pending.take().map(|pending| pending.target)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
