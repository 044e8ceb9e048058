//! Memory monitor and back-pressure / circuit-breaker logic.
//!
//! Samples resident-set size via `sysinfo` and expresses it as a ratio against the
//! configured soft limit. The same ratio drives three escalating responses: mild batch
//! shrinkage, back-pressure (pause + shrink further), and a hard circuit break.

use std::sync::Mutex;

use sysinfo::{Pid, System};

/// Samples process RSS and tracks the peak seen so far. Guarded by its own lock so
/// concurrent samplers don't stampede `sysinfo`'s refresh call.
pub struct MemoryMonitor {
    system: Mutex<System>,
    pid: Pid,
    soft_limit_bytes: u64,
    hard_ratio: f64,
    peak_bytes: std::sync::atomic::AtomicU64,
}

/// Outcome of one memory sample: whether the soft limit was exceeded, and the usage ratio
/// against it (can exceed 1.0).
#[derive(Debug, Clone, Copy)]
pub struct MemorySample {
    pub over_soft_limit: bool,
    pub usage_ratio: f64,
    pub rss_bytes: u64,
}

/// The escalation tier a sample falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    Normal,
    MildShrink,
    BackPressure,
    CircuitBreak,
}

impl MemoryMonitor {
    pub fn new(soft_limit_mb: u64, hard_ratio: f64) -> Self {
        let pid = Pid::from_u32(std::process::id());
        Self {
            system: Mutex::new(System::new()),
            pid,
            soft_limit_bytes: soft_limit_mb * 1024 * 1024,
            hard_ratio,
            peak_bytes: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Disabled when `memory_limit_mb == 0`.
    pub fn enabled(&self) -> bool {
        self.soft_limit_bytes > 0
    }

    pub fn sample(&self) -> MemorySample {
        if !self.enabled() {
            return MemorySample {
                over_soft_limit: false,
                usage_ratio: 0.0,
                rss_bytes: 0,
            };
        }

        let rss = {
            let mut system = self.system.lock().expect("memory monitor mutex poisoned");
            system.refresh_process(self.pid);
            system
                .process(self.pid)
                .map(|p| p.memory())
                .unwrap_or(0)
        };

        self.peak_bytes
            .fetch_max(rss, std::sync::atomic::Ordering::Relaxed);

        let usage_ratio = rss as f64 / self.soft_limit_bytes as f64;
        MemorySample {
            over_soft_limit: usage_ratio > 1.0,
            usage_ratio,
            rss_bytes: rss,
        }
    }

    pub fn peak_bytes(&self) -> u64 {
        self.peak_bytes.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Classifies a sample's ratio into an escalation tier. The hard circuit-break
    /// threshold is `hard_memory_ratio` (default 0.95) of the *soft* limit, or the
    /// absolute limit being exceeded outright (ratio >= 1.0), whichever comes first.
    pub fn escalation(&self, sample: MemorySample) -> Escalation {
        if !self.enabled() {
            return Escalation::Normal;
        }
        if sample.usage_ratio >= self.hard_ratio || sample.usage_ratio >= 1.0 {
            Escalation::CircuitBreak
        } else if sample.usage_ratio > 0.85 {
            Escalation::BackPressure
        } else if sample.usage_ratio > 0.70 {
            Escalation::MildShrink
        } else {
            Escalation::Normal
        }
    }
}

/// Shrinks a batch size according to the escalation tier, preserving a floor so progress
/// never fully stalls.
pub fn shrink_batch_size(current: usize, escalation: Escalation, usage_ratio: f64) -> usize {
    let floor = 10;
    let shrunk = match escalation {
        Escalation::Normal => current,
        Escalation::MildShrink => ((current as f64) * 0.75) as usize,
        Escalation::BackPressure if usage_ratio > 1.0 => ((current as f64) * 0.25) as usize,
        Escalation::BackPressure => ((current as f64) * 0.5) as usize,
        Escalation::CircuitBreak => floor,
    };
    shrunk.max(floor)
}

/// Pauses briefly and yields the executor in response to back-pressure. Rust has no
/// tracing garbage collector to invoke, so this logs a marker and gives already-dropped
/// allocations a scheduling window to actually deallocate instead of requesting a GC cycle.
pub async fn apply_back_pressure_pause() {
    tracing::warn!(gc_requested = true, "back-pressure: pausing briefly");
    tokio::task::yield_now().await;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_monitor_never_escalates() {
        let monitor = MemoryMonitor::new(0, 0.95);
        assert!(!monitor.enabled());
        let sample = monitor.sample();
        assert_eq!(monitor.escalation(sample), Escalation::Normal);
    }

    #[test]
    fn escalation_tiers_match_thresholds() {
        let monitor = MemoryMonitor::new(100, 0.95);
        let mk = |ratio: f64| MemorySample {
            over_soft_limit: ratio > 1.0,
            usage_ratio: ratio,
            rss_bytes: 0,
        };
        assert_eq!(monitor.escalation(mk(0.50)), Escalation::Normal);
        assert_eq!(monitor.escalation(mk(0.71)), Escalation::MildShrink);
        assert_eq!(monitor.escalation(mk(0.86)), Escalation::BackPressure);
        assert_eq!(monitor.escalation(mk(0.95)), Escalation::CircuitBreak);
        assert_eq!(monitor.escalation(mk(1.2)), Escalation::CircuitBreak);
    }

    #[test]
    fn shrink_batch_size_preserves_floor() {
        assert_eq!(shrink_batch_size(12, Escalation::CircuitBreak, 1.5), 12.max(10));
        assert_eq!(shrink_batch_size(5, Escalation::MildShrink, 0.71), 10);
    }

    #[test]
    fn shrink_batch_size_applies_correct_factors() {
        assert_eq!(shrink_batch_size(100, Escalation::MildShrink, 0.71), 75);
        assert_eq!(shrink_batch_size(100, Escalation::BackPressure, 0.86), 50);
        assert_eq!(shrink_batch_size(100, Escalation::BackPressure, 1.1), 25);
    }

    #[tokio::test]
    async fn real_process_sample_reports_nonzero_rss() {
        let monitor = MemoryMonitor::new(4096, 0.95);
        let sample = monitor.sample();
        assert!(sample.rss_bytes > 0);
        assert!(monitor.peak_bytes() >= sample.rss_bytes);
    }
}
