use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::FutureExt;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::time::Instant;

use crate::configuration::{Configuration, Operation, OperationContext, OperationOutcome};
use crate::error::ConfigError;
use crate::report::{Counters, ThroughputReport};
use crate::shutdown::Shutdown;

// Represents shareable state and configuration of a worker.
struct WorkerContext {
    operation_counter: AtomicU64,
    counters: Arc<Counters>,
    shutdown: Arc<Shutdown>,
}

impl WorkerContext {
    // Issues the next operation id. Returns `None` once the termination
    // signal has fired, so no new operation starts after it was observed.
    fn issue_operation_id(&self) -> Option<u64> {
        if self.shutdown.is_fired() {
            return None;
        }
        Some(self.operation_counter.fetch_add(1, Ordering::Relaxed))
    }

    // Repeatedly runs `operation` until the termination signal fires.
    //
    // Every started invocation is recorded in exactly one of the two
    // counters; the operation returns a normalized outcome and nothing is
    // reinterpreted here.
    async fn run_worker(&self, mut operation: Box<dyn Operation>) {
        while let Some(op_id) = self.issue_operation_id() {
            let ctx = OperationContext {
                operation_id: op_id,
                interrupt: &self.shutdown,
            };

            match operation.execute(&ctx).await {
                OperationOutcome::Success => self.counters.record_success(),
                OperationOutcome::Failure => self.counters.record_error(),
            }
        }
    }
}

/// Runs `config.concurrency` workers against the configured operation until
/// `shutdown` fires (or `config.max_duration` elapses, whichever is first)
/// and reports the achieved throughput.
///
/// Blocks until every worker has observed the signal and returned; the
/// report's elapsed time spans launch to that barrier join.
pub async fn measure(
    config: Configuration,
    shutdown: Arc<Shutdown>,
) -> Result<ThroughputReport, ConfigError> {
    if config.concurrency == 0 {
        return Err(ConfigError::NonPositiveWorkerCount);
    }

    let start_time = Instant::now();
    let counters = Arc::new(Counters::default());
    let ctx = Arc::new(WorkerContext {
        operation_counter: AtomicU64::new(0),
        counters: Arc::clone(&counters),
        shutdown: Arc::clone(&shutdown),
    });

    // Spawn as many worker tasks as the concurrency allows
    let mut worker_handles = (0..config.concurrency)
        .map(|_| {
            let ctx_clone = Arc::clone(&ctx);
            let operation = config.operation_factory.create();
            let (fut, handle) =
                async move { ctx_clone.run_worker(operation).await }.remote_handle();
            tokio::task::spawn(fut);
            handle
        })
        .collect::<FuturesUnordered<_>>();

    // If there is a time limit, spawn a task which will fire the signal
    // after the bench period has elapsed. Dropping the handle cancels it.
    let shutdown_clone = Arc::clone(&shutdown);
    let _stopper_handle = config.max_duration.map(move |duration| {
        let (fut, handle) = async move {
            tokio::time::sleep_until(start_time + duration).await;
            shutdown_clone.fire();
        }
        .remote_handle();
        tokio::task::spawn(fut);
        handle
    });

    while worker_handles.next().await.is_some() {}

    let elapsed = start_time.elapsed();
    Ok(ThroughputReport::finalize(
        config.concurrency,
        config.metric,
        elapsed,
        counters,
    ))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::configuration::OperationFactory;
    use crate::report::Metric;

    struct CountingOperation {
        invocations: Arc<AtomicU64>,
        outcome: fn(u64) -> OperationOutcome,
    }

    #[async_trait]
    impl Operation for CountingOperation {
        async fn execute(&mut self, _ctx: &OperationContext<'_>) -> OperationOutcome {
            let n = self.invocations.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            (self.outcome)(n)
        }
    }

    struct CountingFactory {
        invocations: Arc<AtomicU64>,
        outcome: fn(u64) -> OperationOutcome,
    }

    impl OperationFactory for CountingFactory {
        fn create(&self) -> Box<dyn Operation> {
            Box::new(CountingOperation {
                invocations: Arc::clone(&self.invocations),
                outcome: self.outcome,
            })
        }
    }

    fn make_test_cfg(
        concurrency: u64,
        max_duration: Option<Duration>,
        invocations: Arc<AtomicU64>,
        outcome: fn(u64) -> OperationOutcome,
    ) -> Configuration {
        Configuration {
            max_duration,
            concurrency,
            operation_factory: Arc::new(CountingFactory {
                invocations,
                outcome,
            }),
            metric: Metric::Tps,
        }
    }

    #[tokio::test]
    #[ntest::timeout(10000)]
    async fn test_measure_until_deadline() {
        let invocations = Arc::new(AtomicU64::new(0));
        let cfg = make_test_cfg(
            4,
            Some(Duration::from_millis(200)),
            Arc::clone(&invocations),
            |_| OperationOutcome::Success,
        );

        let report = measure(cfg, Arc::new(Shutdown::new())).await.unwrap();

        assert!(report.success() > 0);
        assert_eq!(report.error(), 0);
        assert_eq!(report.worker_count(), 4);
        assert!(report.elapsed() >= Duration::from_millis(200));
        assert!(report.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    #[ntest::timeout(10000)]
    async fn test_measure_all_failures() {
        let invocations = Arc::new(AtomicU64::new(0));
        let cfg = make_test_cfg(
            1,
            Some(Duration::from_millis(150)),
            Arc::clone(&invocations),
            |_| OperationOutcome::Failure,
        );

        let report = measure(cfg, Arc::new(Shutdown::new())).await.unwrap();

        assert!(report.error() > 0);
        assert_eq!(report.success(), 0);
    }

    #[tokio::test]
    async fn test_zero_workers_rejected() {
        let invocations = Arc::new(AtomicU64::new(0));
        let cfg = make_test_cfg(0, None, Arc::clone(&invocations), |_| {
            OperationOutcome::Success
        });

        let err = measure(cfg, Arc::new(Shutdown::new())).await.unwrap_err();
        assert_eq!(err, ConfigError::NonPositiveWorkerCount);
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
    }

    // Every started invocation lands in exactly one counter.
    #[tokio::test]
    #[ntest::timeout(10000)]
    async fn test_counter_conservation() {
        let invocations = Arc::new(AtomicU64::new(0));
        let cfg = make_test_cfg(
            8,
            Some(Duration::from_millis(200)),
            Arc::clone(&invocations),
            |n| {
                if n % 3 == 0 {
                    OperationOutcome::Failure
                } else {
                    OperationOutcome::Success
                }
            },
        );

        let report = measure(cfg, Arc::new(Shutdown::new())).await.unwrap();

        assert_eq!(
            report.success() + report.error(),
            invocations.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    #[ntest::timeout(10000)]
    async fn test_external_cancellation() {
        let invocations = Arc::new(AtomicU64::new(0));
        let cfg = make_test_cfg(4, None, Arc::clone(&invocations), |_| {
            OperationOutcome::Success
        });

        let shutdown = Arc::new(Shutdown::new());
        shutdown.fire_after(Duration::from_millis(100));
        let report = measure(cfg, Arc::clone(&shutdown)).await.unwrap();

        // No new operation starts once the signal was observed.
        let started = invocations.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(invocations.load(Ordering::SeqCst), started);
        assert_eq!(report.success(), started);
    }

    #[tokio::test]
    #[ntest::timeout(10000)]
    async fn test_signal_fired_before_launch() {
        let invocations = Arc::new(AtomicU64::new(0));
        let cfg = make_test_cfg(4, None, Arc::clone(&invocations), |_| {
            OperationOutcome::Success
        });

        let shutdown = Arc::new(Shutdown::new());
        shutdown.fire();
        let report = measure(cfg, shutdown).await.unwrap();

        assert_eq!(report.success() + report.error(), 0);
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
    }
}
