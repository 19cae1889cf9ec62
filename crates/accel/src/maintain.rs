//! The background maintenance cycle.
//!
//! One dedicated task owns all cache mutation: each cycle validates the
//! current generation and rebuilds when the cache is dirty or the
//! configuration changed. The sleep between cycles adapts to the
//! measured cycle cost (an exponentially weighted moving average aimed
//! at roughly 0.01% of one CPU) and is clamped between 100ms and five
//! minutes. The cycle runs for the lifetime of the cache; there is no
//! mid-cycle cancellation.

use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use crate::cache::AccelCache;

#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    pub min_interval: Duration,
    pub max_interval: Duration,
    /// Fraction of one CPU the cycle may consume, e.g. `1e-4` for 0.01%.
    pub target_duty: f64,
    /// Weight of the newest cost sample in the moving average.
    pub ewma_weight: f64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(300),
            target_duty: 1e-4,
            ewma_weight: 0.2,
        }
    }
}

/// Chooses the sleep before the next cycle from the smoothed cost of
/// past cycles.
#[derive(Debug)]
pub(crate) struct CyclePlanner {
    config: MaintenanceConfig,
    smoothed_cost: Option<f64>,
}

impl CyclePlanner {
    pub(crate) fn new(config: MaintenanceConfig) -> Self {
        Self { config, smoothed_cost: None }
    }

    pub(crate) fn interval(&self) -> Duration {
        let Some(cost) = self.smoothed_cost else {
            return self.config.min_interval;
        };
        let seconds = cost / self.config.target_duty;
        Duration::from_secs_f64(seconds).clamp(self.config.min_interval, self.config.max_interval)
    }

    pub(crate) fn observe(&mut self, cost: Duration) {
        let cost = cost.as_secs_f64();
        let w = self.config.ewma_weight;
        self.smoothed_cost = Some(match self.smoothed_cost {
            Some(previous) => w * cost + (1.0 - w) * previous,
            None => cost,
        });
    }
}

impl AccelCache {
    /// Spawns the maintenance task. A previously running task for this
    /// cache is replaced.
    pub fn start_maintenance(&self, config: MaintenanceConfig) {
        let cache = self.clone();
        let mut planner = CyclePlanner::new(config);
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(planner.interval()).await;
                let started = Instant::now();
                cache.run_cycle();
                planner.observe(started.elapsed());
                trace!(next_in = ?planner.interval(), "accelerator maintenance cycle complete");
            }
        });

        let mut slot = self.inner.maintainer.lock().expect("maintainer slot poisoned");
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
    }

    /// Stops the maintenance task. The cache itself stays usable; only
    /// background self-repair ceases.
    pub fn shutdown(&self) {
        let mut slot = self.inner.maintainer.lock().expect("maintainer slot poisoned");
        if let Some(task) = slot.take() {
            task.abort();
        }
    }
}
