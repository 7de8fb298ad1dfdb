//! Periodic lease sweep.
//!
//! Runs [`Workflow::expire_due`] on a fixed interval until shut down. Shutdown
//! interrupts the wait between sweeps immediately and stops a sweep in
//! progress before its next claim; a claim already being expired finishes
//! its own transaction first.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use opentelemetry::KeyValue;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use super::lease::ExpireClaimsResult;
use super::workflow::Workflow;
use crate::error::Result;
use crate::telemetry::metrics;

/// Sweeps expired leases on an interval.
pub struct Sweeper {
    workflow: Workflow,
    interval: Duration,
    shutdown: Arc<Notify>,
    stopping: Arc<AtomicBool>,
    sweeps: Arc<AtomicU64>,
}

impl Clone for Sweeper {
    fn clone(&self) -> Self {
        Self {
            workflow: self.workflow.clone(),
            interval: self.interval,
            shutdown: Arc::clone(&self.shutdown),
            stopping: Arc::clone(&self.stopping),
            sweeps: Arc::clone(&self.sweeps),
        }
    }
}

impl Sweeper {
    pub fn new(workflow: Workflow, interval: Duration) -> Self {
        Self {
            workflow,
            interval,
            shutdown: Arc::new(Notify::new()),
            stopping: Arc::new(AtomicBool::new(false)),
            sweeps: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Signal the sweep loop to stop.
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.shutdown.notify_one();
    }

    /// Completed sweeps so far.
    pub fn sweeps(&self) -> u64 {
        self.sweeps.load(Ordering::Relaxed)
    }

    /// Sweep now, then every interval, until shutdown. `on_sweep` sees each
    /// sweep's result. A sweep that fails as a whole is logged and the loop
    /// carries on.
    pub async fn run<F>(&self, mut on_sweep: F) -> Result<()>
    where
        F: FnMut(&ExpireClaimsResult),
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_ms = self.interval.as_millis() as u64, "lease sweeper started");

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!(sweeps = self.sweeps(), "lease sweeper shutting down");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }
            if self.stopping.load(Ordering::SeqCst) {
                info!(sweeps = self.sweeps(), "lease sweeper shutting down");
                return Ok(());
            }

            let stopping = Arc::clone(&self.stopping);
            match self
                .workflow
                .expire_due(Utc::now(), false, move || stopping.load(Ordering::SeqCst))
                .await
            {
                Ok(result) => {
                    self.sweeps.fetch_add(1, Ordering::Relaxed);
                    metrics::sweep_runs().add(1, &[KeyValue::new("result", "ok")]);
                    on_sweep(&result);
                }
                Err(e) => {
                    metrics::sweep_runs().add(1, &[KeyValue::new("result", "error")]);
                    error!("lease sweep error: {e}");
                }
            }
        }
    }
}
