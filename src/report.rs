use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Success/error tallies of a run.
///
/// Incremented lock-free by every worker; totals are exact because each
/// started operation is recorded exactly once.
#[derive(Debug, Default)]
pub struct Counters {
    success: AtomicU64,
    error: AtomicU64,
}

impl Counters {
    pub fn record_success(&self) {
        self.success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.error.fetch_add(1, Ordering::Relaxed);
    }

    pub fn success(&self) -> u64 {
        self.success.load(Ordering::Relaxed)
    }

    pub fn error(&self) -> u64 {
        self.error.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.success() + self.error()
    }
}

/// Label under which a run's derived rate is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Metric {
    Tps,
    Qps,
}

/// Result of one measurement run.
///
/// Built once, after every worker has joined; `elapsed` is frozen at that
/// point and never changes again.
#[derive(Debug)]
pub struct ThroughputReport {
    worker_count: u64,
    metric: Metric,
    elapsed: Duration,
    counters: Arc<Counters>,
}

impl ThroughputReport {
    pub(crate) fn finalize(
        worker_count: u64,
        metric: Metric,
        elapsed: Duration,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            worker_count,
            metric,
            elapsed,
            counters,
        }
    }

    pub fn worker_count(&self) -> u64 {
        self.worker_count
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn success(&self) -> u64 {
        self.counters.success()
    }

    pub fn error(&self) -> u64 {
        self.counters.error()
    }

    /// Successful operations per second of wall time.
    ///
    /// Zero (not NaN/infinity) when nothing ran.
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.success() as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for ThroughputReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "duration: {:?}, worker: {}, success: {}, error: {}, {}: {:.2}",
            self.elapsed,
            self.worker_count,
            self.success(),
            self.error(),
            self.metric,
            self.rate()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters(success: u64, error: u64) -> Arc<Counters> {
        let c = Counters::default();
        for _ in 0..success {
            c.record_success();
        }
        for _ in 0..error {
            c.record_error();
        }
        Arc::new(c)
    }

    #[test]
    fn test_summary_line_format() {
        let report = ThroughputReport::finalize(
            4,
            Metric::Tps,
            Duration::from_secs(2),
            counters(100, 3),
        );
        assert_eq!(
            report.to_string(),
            "duration: 2s, worker: 4, success: 100, error: 3, tps: 50.00"
        );
    }

    #[test]
    fn test_qps_label() {
        let report =
            ThroughputReport::finalize(1, Metric::Qps, Duration::from_secs(1), counters(7, 0));
        assert!(report.to_string().ends_with("qps: 7.00"));
    }

    #[test]
    fn test_rate_is_finite_and_non_negative() {
        let report =
            ThroughputReport::finalize(1, Metric::Tps, Duration::ZERO, counters(10, 0));
        assert_eq!(report.rate(), 0.0);

        let report = ThroughputReport::finalize(
            8,
            Metric::Tps,
            Duration::from_millis(1),
            counters(0, 5),
        );
        assert!(report.rate().is_finite());
        assert!(report.rate() >= 0.0);
    }

    #[test]
    fn test_counter_totals() {
        let c = counters(5, 2);
        assert_eq!(c.success(), 5);
        assert_eq!(c.error(), 2);
        assert_eq!(c.total(), 7);
    }
}
