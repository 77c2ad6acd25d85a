//! Runtime statistics for the acquisition loop.
//! These are cheap counters updated once per sweep and reported when the run ends.

use std::time::Duration;

use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct AcquisitionStats {
    pub attempts: usize,
    pub successes: usize,
    pub failures: usize,
    /// Iterations that took longer than the target interval
    pub overruns: usize,
    pub longest: Duration,
    busy: Duration,
}

impl AcquisitionStats {
    pub fn record(&mut self, succeeded: bool, busy: Duration, interval: Duration) {
        self.attempts += 1;
        if succeeded {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        if busy > interval {
            self.overruns += 1;
        }
        self.longest = self.longest.max(busy);
        self.busy += busy;
    }

    /// Mean time spent talking to the instrument and writing files per iteration
    pub fn mean_busy(&self) -> Duration {
        match self.attempts {
            0 => Duration::ZERO,
            n => self.busy / n as u32,
        }
    }

    pub fn report(&self) {
        info!(
            attempts = self.attempts,
            successes = self.successes,
            failures = self.failures,
            mean_busy = ?self.mean_busy(),
            longest = ?self.longest,
            "Acquisition finished"
        );
        if self.overruns > 0 {
            warn!(
                "{} sweeps took longer than the requested interval",
                self.overruns
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let mut stats = AcquisitionStats::default();
        let interval = Duration::from_secs(2);
        stats.record(true, Duration::from_millis(500), interval);
        stats.record(false, Duration::from_millis(2500), interval);
        stats.record(true, Duration::from_millis(300), interval);
        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.successes, 2);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.overruns, 1);
        assert_eq!(stats.longest, Duration::from_millis(2500));
        assert_eq!(stats.mean_busy(), Duration::from_millis(1100));
    }
}
