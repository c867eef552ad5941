use std::fmt;
use std::sync::{Mutex, PoisonError};

use futures::future::BoxFuture;
use tracing::warn;

use crate::core::Result;

/// An action to run once its transaction commits.
pub type DeferredOp = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// FIFO of post-commit actions.
#[derive(Default)]
pub struct DeferredQueue {
    ops: Mutex<Vec<DeferredOp>>,
}

impl DeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, op: DeferredOp) {
        self.ops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(op);
    }

    pub fn len(&self) -> usize {
        self.ops.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every queued action without running it.
    pub fn discard(&self) -> usize {
        let mut ops = self.ops.lock().unwrap_or_else(PoisonError::into_inner);
        let count = ops.len();
        ops.clear();
        count
    }

    /// Runs every queued action in insertion order. A failing action is logged
    /// and does not stop the rest. Returns how many failed.
    pub async fn run_all(&self, owner: &str) -> usize {
        let ops = std::mem::take(&mut *self.ops.lock().unwrap_or_else(PoisonError::into_inner));
        let mut failed = 0;
        for (position, op) in ops.into_iter().enumerate() {
            if let Err(err) = op().await {
                failed += 1;
                warn!("Deferred operation #{} of {} failed: {}", position, owner, err);
            }
        }
        failed
    }
}

impl fmt::Debug for DeferredQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredQueue")
            .field("pending", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DbError;
    use futures::FutureExt;
    use std::sync::Arc;

    fn recording(log: &Arc<Mutex<Vec<u32>>>, n: u32) -> DeferredOp {
        let log = log.clone();
        Box::new(move || {
            async move {
                log.lock().unwrap().push(n);
                Ok(())
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_runs_in_order_and_continues_past_failures() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let queue = DeferredQueue::new();
        queue.push(recording(&log, 1));
        queue.push(Box::new(|| {
            async { Err(DbError::Store("cache down".into())) }.boxed()
        }));
        queue.push(recording(&log, 3));

        assert_eq!(queue.run_all("tx_test").await, 1);
        assert_eq!(*log.lock().unwrap(), vec![1, 3]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_discard_drops_without_running() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let queue = DeferredQueue::new();
        queue.push(recording(&log, 1));
        assert_eq!(queue.discard(), 1);
        assert_eq!(queue.run_all("tx_test").await, 0);
        assert!(log.lock().unwrap().is_empty());
    }
}
