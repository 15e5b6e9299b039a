//! Expiry Sweep Background Task
//!
//! Periodically transitions live contexts past their TTL to `Expired` and
//! releases their reservations. Contexts become stuck when:
//!
//! - An agent crashes without harvesting
//! - A supervising process loses track of a session
//! - A caller abandons an injection it never consumed
//!
//! The task runs until the shutdown signal is received and reports its
//! activity through atomic counters that can be exported as metrics.

use crate::MemoryBridge;
use chrono::Utc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

// ============================================================================
// METRICS
// ============================================================================

/// Metrics for the expiry sweep.
#[derive(Debug, Default)]
pub struct SweepMetrics {
    /// Total sweep cycles completed since startup
    pub cycles: AtomicU64,

    /// Total contexts expired since startup
    pub contexts_expired: AtomicU64,

    /// Total tokens returned to the budget by expiry
    pub tokens_released: AtomicI64,

    /// Total errors encountered while sweeping
    pub errors: AtomicU64,
}

impl SweepMetrics {
    /// Create a new metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> SweepSnapshot {
        SweepSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            contexts_expired: self.contexts_expired.load(Ordering::Relaxed),
            tokens_released: self.tokens_released.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of sweep metrics at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepSnapshot {
    pub cycles: u64,
    pub contexts_expired: u64,
    pub tokens_released: i64,
    pub errors: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Background task that periodically expires stale contexts.
///
/// # Arguments
///
/// * `bridge` - The memory bridge whose contexts are swept
/// * `sweep_interval` - How often to run a sweep cycle
/// * `shutdown_rx` - Watch receiver for the shutdown signal
///
/// # Returns
///
/// Metrics collected during the task's lifetime
///
/// # Example
///
/// ```ignore
/// use tokio::sync::watch;
/// use std::sync::Arc;
///
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let handle = tokio::spawn(expiry_sweep_task(
///     Arc::clone(&bridge),
///     bridge.sweep_interval(),
///     shutdown_rx,
/// ));
///
/// // Later, trigger shutdown
/// let _ = shutdown_tx.send(true);
/// let metrics = handle.await.unwrap();
/// ```
pub async fn expiry_sweep_task(
    bridge: Arc<MemoryBridge>,
    sweep_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<SweepMetrics> {
    let metrics = Arc::new(SweepMetrics::new());

    let mut sweep_timer = interval(sweep_interval);
    sweep_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        sweep_interval_secs = sweep_interval.as_secs(),
        "Expiry sweep task started"
    );

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("Expiry sweep task shutting down");
                    break;
                }
            }

            _ = sweep_timer.tick() => {
                run_sweep_cycle(&bridge, &metrics);
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        cycles = snapshot.cycles,
        contexts_expired = snapshot.contexts_expired,
        tokens_released = snapshot.tokens_released,
        errors = snapshot.errors,
        "Expiry sweep task completed"
    );

    metrics
}

/// Perform one sweep cycle.
fn run_sweep_cycle(bridge: &MemoryBridge, metrics: &SweepMetrics) {
    metrics.cycles.fetch_add(1, Ordering::Relaxed);

    match bridge.sweep_expired(Utc::now()) {
        Ok(outcome) => {
            if outcome.expired > 0 {
                metrics
                    .contexts_expired
                    .fetch_add(outcome.expired as u64, Ordering::Relaxed);
                metrics
                    .tokens_released
                    .fetch_add(outcome.tokens_released, Ordering::Relaxed);
                tracing::info!(
                    expired = outcome.expired,
                    tokens_released = outcome.tokens_released,
                    "Sweep cycle expired contexts"
                );
            } else {
                tracing::trace!("Sweep cycle found no expired contexts");
            }
        }
        Err(err) => {
            tracing::error!(error = %err, "Sweep cycle failed");
            metrics.errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
