//! The universal stop protocol.
//!
//! [`CancellationController::stop_all`] is invoked from every place that
//! ends a run: the operator's stop request and the `finished`, `stopped`
//! and `error` handlers. Only the first call after a dispatch does any
//! work; later calls are no-ops until [`CancellationController::rearm`].

use std::time::Duration;

use tokio::time::Instant;

use crate::error::PhotolinkError;
use crate::registry::ActiveWorkerRegistry;
use crate::ui::{ProcessIndicator, ProgressCounters};

/// Default grace period for workers to acknowledge a stop request.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct CancellationController {
    stop_timeout: Duration,
    engaged: bool,
    deadline: Option<Instant>,
    cleanups: usize,
}

impl Default for CancellationController {
    fn default() -> Self {
        Self::new(DEFAULT_STOP_TIMEOUT)
    }
}

impl CancellationController {
    pub fn new(stop_timeout: Duration) -> Self {
        Self {
            stop_timeout,
            engaged: false,
            deadline: None,
            cleanups: 0,
        }
    }

    pub fn stop_timeout(&self) -> Duration {
        self.stop_timeout
    }

    /// Signals every worker, stops the feedback timers, dismisses the
    /// indicator and zeroes the counters.
    ///
    /// Registry entries are left in place: each one is removed when its
    /// terminal event arrives, or by [`expire`](Self::expire) once the stop
    /// deadline passes. Returns the number of workers newly signalled.
    pub fn stop_all(
        &mut self,
        registry: &ActiveWorkerRegistry,
        indicator: &mut ProcessIndicator,
        counters: &mut ProgressCounters,
    ) -> usize {
        if self.engaged {
            tracing::debug!(pending = registry.len(), "Stop already in progress");
            return 0;
        }

        let signalled = registry.signal_all_stop();
        indicator.stop_timers();
        indicator.dismiss();
        counters.reset();

        self.engaged = true;
        self.cleanups += 1;
        if !registry.is_empty() {
            self.deadline = Some(Instant::now() + self.stop_timeout);
        }

        tracing::info!(signalled, pending = registry.len(), "Stop requested for all workers");
        signalled
    }

    /// Clears the deadline once no worker is left to wait for.
    pub fn settle(&mut self, registry: &ActiveWorkerRegistry) {
        if registry.is_empty() {
            self.deadline = None;
        }
    }

    /// When the pending workers must have acknowledged the stop.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Gives up on workers that missed the deadline.
    ///
    /// Their entries are dropped from the registry (the threads themselves
    /// are left to finish on their own) and a [`PhotolinkError::StopTimeout`]
    /// is returned for the caller to surface.
    pub fn expire(&mut self, registry: &mut ActiveWorkerRegistry) -> Option<PhotolinkError> {
        let deadline = self.deadline?;
        if Instant::now() < deadline {
            return None;
        }
        self.deadline = None;
        if registry.is_empty() {
            return None;
        }

        let abandoned = registry.drain();
        let now = chrono::Utc::now();
        for handle in &abandoned {
            tracing::warn!(
                job_id = %handle.job_id(),
                task = %handle.task(),
                running_secs = (now - handle.dispatched_at()).num_seconds(),
                exited = handle.is_finished(),
                "Worker ignored the stop request; abandoning it",
            );
        }
        Some(PhotolinkError::StopTimeout {
            pending: abandoned.len(),
            timeout_ms: self.stop_timeout().as_millis() as u64,
        })
    }

    /// Makes the next `stop_all` effective again. Called on dispatch.
    pub fn rearm(&mut self) {
        self.engaged = false;
        self.deadline = None;
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged
    }

    /// How many times `stop_all` actually ran.
    pub fn cleanups(&self) -> usize {
        self.cleanups
    }
}
