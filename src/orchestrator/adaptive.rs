//! Adaptive bounded concurrency (§5 "Bounded concurrency"). A `tokio::sync::Semaphore`
//! gates outbound provider/doc-store calls; a periodic sampler grows or shrinks its
//! permit count from observed CPU load and resident memory.
//!
//! Grounded on `performance/cpu.rs` / `performance/memory.rs`'s periodic-sampling
//! style, generalized from a pure observability profiler into a control loop that
//! actually resizes a resource bound.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};
use tokio::sync::{Semaphore, SemaphorePermit};

use crate::ports::Metrics;

const HARD_CEILING: usize = 32;
/// Resident memory usage above this fraction of total halves the bound.
const MEMORY_PRESSURE_RATIO: f64 = 0.85;
/// CPU usage below this fraction permits growth.
const CPU_HEADROOM_RATIO: f64 = 0.50;

pub struct AdaptiveConcurrencyController {
    semaphore: Semaphore,
    base: usize,
    current_limit: AtomicUsize,
    system: Mutex<System>,
    metrics: Arc<dyn Metrics>,
}

impl AdaptiveConcurrencyController {
    pub fn new(base: usize, metrics: Arc<dyn Metrics>) -> Self {
        let base = base.max(1);
        Self {
            semaphore: Semaphore::new(base),
            base,
            current_limit: AtomicUsize::new(base),
            system: Mutex::new(System::new_with_specifics(
                RefreshKind::new().with_cpu(CpuRefreshKind::everything()).with_memory(MemoryRefreshKind::everything()),
            )),
            metrics,
        }
    }

    pub fn current_limit(&self) -> usize {
        self.current_limit.load(Ordering::Relaxed)
    }

    /// The semaphore backing this controller is never closed, so acquisition
    /// cannot fail; callers do not need to handle an error path here.
    pub async fn acquire(&self) -> SemaphorePermit<'_> {
        self.semaphore.acquire().await.expect("semaphore is never closed")
    }

    /// Resamples CPU/memory and resizes the semaphore's permit count. Called
    /// periodically from a background task (wired in `main.rs`); safe to call
    /// concurrently with in-flight `acquire`s since only the *count* of future
    /// permits changes, never permits already granted.
    pub fn resample(&self) {
        let (cpu_ratio, mem_ratio) = {
            let mut system = self.system.lock();
            system.refresh_cpu_usage();
            system.refresh_memory();
            let cpu_ratio = system.global_cpu_usage() as f64 / 100.0;
            let mem_ratio = if system.total_memory() == 0 {
                0.0
            } else {
                system.used_memory() as f64 / system.total_memory() as f64
            };
            (cpu_ratio, mem_ratio)
        };

        let current = self.current_limit.load(Ordering::Relaxed);
        let target = if mem_ratio > MEMORY_PRESSURE_RATIO {
            (current / 2).max(1)
        } else if cpu_ratio < CPU_HEADROOM_RATIO {
            (current + 1).min(self.base * 2).min(HARD_CEILING)
        } else {
            current
        };

        if target == current {
            return;
        }

        if target > current {
            self.semaphore.add_permits(target - current);
        } else {
            self.semaphore.forget_permits(current - target);
        }
        self.current_limit.store(target, Ordering::Relaxed);

        self.metrics.gauge("orchestrator_concurrency_limit", target as f64, &[]);
        if mem_ratio > MEMORY_PRESSURE_RATIO {
            self.metrics.increment("orchestrator_memory_pressure", &[]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::metrics::NoopMetrics;

    #[tokio::test]
    async fn starts_at_base_and_allows_base_concurrent_acquires() {
        let controller = AdaptiveConcurrencyController::new(4, Arc::new(NoopMetrics));
        assert_eq!(controller.current_limit(), 4);
        let mut permits = Vec::new();
        for _ in 0..4 {
            permits.push(controller.acquire().await);
        }
        assert_eq!(controller.semaphore.available_permits(), 0);
    }
}
