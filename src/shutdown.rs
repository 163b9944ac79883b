use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Cooperative termination signal shared by every worker of a run and by
/// the storage facade.
///
/// Firing is one-way and idempotent. Workers poll it at iteration
/// boundaries, the facade polls it before starting new I/O; nothing is
/// preempted mid-operation.
#[derive(Debug, Default)]
pub struct Shutdown {
    fired: AtomicBool,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire(&self) {
        self.fired.store(true, Ordering::Relaxed);
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Relaxed)
    }

    /// Spawns a task that fires this signal once `after` has elapsed.
    pub fn fire_after(self: &Arc<Self>, after: Duration) {
        let signal = Arc::clone(self);
        tokio::task::spawn(async move {
            tokio::time::sleep(after).await;
            signal.fire();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fire_is_sticky() {
        let signal = Shutdown::new();
        assert!(!signal.is_fired());
        signal.fire();
        signal.fire();
        assert!(signal.is_fired());
    }

    #[tokio::test]
    async fn fire_after_elapses() {
        let signal = Arc::new(Shutdown::new());
        signal.fire_after(Duration::from_millis(10));
        assert!(!signal.is_fired());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(signal.is_fired());
    }
}
