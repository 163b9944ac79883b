use std::sync::Arc;
use std::time::Duration;

use crate::report::Metric;
use crate::shutdown::Shutdown;

/// Defines the configuration of a measurement run.
pub struct Configuration {
    /// The maximum duration of the run.
    ///
    /// When it elapses the shared shutdown signal is fired and workers stop
    /// at their next iteration boundary; in-flight operations are allowed
    /// to complete.
    ///
    /// If `None`, the run only stops when the caller fires the signal.
    pub max_duration: Option<Duration>,

    /// The concurrency with which the operations will be performed.
    ///
    /// The tool will spawn as many tokio tasks as this number specifies,
    /// and each task will sequentially perform the operations.
    ///
    /// Must not be zero.
    pub concurrency: u64,

    /// Creates one operation instance per worker.
    pub operation_factory: Arc<dyn OperationFactory>,

    /// Label under which the derived rate is reported.
    pub metric: Metric,
}

/// Contains all necessary context needed to execute an Operation.
pub struct OperationContext<'a> {
    /// The current ID of the operation being performed.
    ///
    /// The tool tries to issue operation IDs sequentially, however because
    /// of the parallelism the operations can be reordered. To be more
    /// precise, if an operation with ID `X` > 0 was issued, then the tool
    /// has attempted or will attempt to execute operations of IDs less
    /// than `X`.
    pub operation_id: u64,

    /// The run's termination signal. Storage calls take it so they can
    /// refuse to start new I/O once the run is over.
    pub interrupt: &'a Shutdown,
}

/// Normalized result of a single operation execution.
///
/// The operation itself decides how to classify ambiguous outcomes (a
/// zero-row lookup, an interrupt observed mid-call) before returning; the
/// engine only counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationOutcome {
    Success,
    Failure,
}

/// Represents an operation which is repeatedly performed during the run.
#[async_trait]
pub trait Operation: Send {
    /// Executes the operation, given information in the OperationContext.
    async fn execute(&mut self, ctx: &OperationContext<'_>) -> OperationOutcome;
}

/// Creates operations for the workers.
///
/// Each worker gets its own operation instance, so operations may keep
/// mutable state (e.g. a per-worker random generator) without
/// synchronization.
pub trait OperationFactory: Send + Sync {
    fn create(&self) -> Box<dyn Operation>;
}
