use std::fmt;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use futures::FutureExt;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use super::baseline::BaselineStore;
use super::deferred::{DeferredOp, DeferredQueue};
use super::state::{TransactionState, TxId};
use crate::core::{DbError, Result};
use crate::storage::{Scope, Store};

struct TxInner {
    id: TxId,
    parent: Option<TxId>,
    store: Arc<dyn Store>,
    state: RwLock<TransactionState>,
    /// Serializes commit/rollback so each runs at most once.
    transition: Mutex<()>,
    baseline: BaselineStore,
    deferred: DeferredQueue,
}

/// A unit of work over a [`Store`].
///
/// Cloning yields another handle to the same transaction. It owns the
/// baselines captured by reads inside it and a queue of actions to run once
/// it commits. `commit`, `rollback` and `finish` are no-ops once the
/// transaction has reached a terminal state.
#[derive(Clone)]
pub struct Tx {
    inner: Arc<TxInner>,
}

impl Tx {
    /// Opens a top-level transaction on `store`.
    pub async fn begin(store: Arc<dyn Store>) -> Result<Self> {
        let id = store.begin(None).await?;
        debug!("Transaction {} started", id);
        Ok(Self::from_parts(id, None, store))
    }

    fn from_parts(id: TxId, parent: Option<TxId>, store: Arc<dyn Store>) -> Self {
        Self {
            inner: Arc::new(TxInner {
                id,
                parent,
                store,
                state: RwLock::new(TransactionState::Active),
                transition: Mutex::new(()),
                baseline: BaselineStore::new(),
                deferred: DeferredQueue::new(),
            }),
        }
    }

    pub fn id(&self) -> TxId {
        self.inner.id
    }

    pub fn parent(&self) -> Option<TxId> {
        self.inner.parent
    }

    pub fn state(&self) -> TransactionState {
        *self
            .inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    pub fn scope(&self) -> Scope {
        Scope::Tx(self.inner.id)
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.inner.store
    }

    pub fn baseline(&self) -> &BaselineStore {
        &self.inner.baseline
    }

    pub fn pending_deferred(&self) -> usize {
        self.inner.deferred.len()
    }

    /// Opens a transaction nested inside this one.
    ///
    /// The child has its own baselines and deferred queue. Its writes become
    /// part of this transaction when it commits.
    pub async fn begin_nested(&self) -> Result<Tx> {
        self.ensure_active()?;
        let id = self.inner.store.begin(Some(self.inner.id)).await?;
        debug!("Transaction {} started inside {}", id, self.inner.id);
        Ok(Self::from_parts(id, Some(self.inner.id), self.inner.store.clone()))
    }

    /// Queues `op` to run after a successful commit. Ignored once the
    /// transaction is no longer active.
    pub fn queue_deferred<F, Fut>(&self, op: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if !self.is_active() {
            warn!(
                "Dropping deferred operation queued on {} transaction {}",
                self.state(),
                self.inner.id
            );
            return;
        }
        let boxed: DeferredOp = Box::new(move || op().boxed());
        self.inner.deferred.push(boxed);
    }

    /// Commits, then runs the deferred queue in order. A failing deferred
    /// action is logged and does not affect the commit. If the store rejects
    /// the commit the transaction stays active and the error is returned.
    pub async fn commit(&self) -> Result<()> {
        let _guard = self.inner.transition.lock().await;
        if self.state().is_terminal() {
            return Ok(());
        }

        self.inner.store.commit(self.inner.id).await?;
        self.set_state(TransactionState::Committed);
        debug!("Transaction {} committed", self.inner.id);

        let failed = self.inner.deferred.run_all(&self.inner.id.to_string()).await;
        if failed > 0 {
            warn!(
                "{} deferred operation(s) failed after commit of {}",
                failed, self.inner.id
            );
        }
        Ok(())
    }

    /// Rolls back and discards the deferred queue and baselines.
    pub async fn rollback(&self) -> Result<()> {
        let _guard = self.inner.transition.lock().await;
        if self.state().is_terminal() {
            return Ok(());
        }

        self.inner.store.rollback(self.inner.id).await?;
        self.set_state(TransactionState::Aborted);
        let dropped = self.inner.deferred.discard();
        self.inner.baseline.clear();
        debug!(
            "Transaction {} rolled back, {} deferred operation(s) discarded",
            self.inner.id, dropped
        );
        Ok(())
    }

    /// Ends the transaction according to `outcome`.
    ///
    /// `Err` rolls back (a rollback failure is only logged) and returns the
    /// original error. `Ok` commits and returns the commit error if there is
    /// one. Does nothing if the transaction already ended.
    pub async fn finish<T>(&self, outcome: Result<T>) -> Result<T> {
        if self.state().is_terminal() {
            return outcome;
        }

        match outcome {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.rollback().await {
                    error!(
                        "Rollback of {} after '{}' failed: {}",
                        self.inner.id, err, rollback_err
                    );
                }
                Err(err)
            }
        }
    }

    /// Runs `work` inside a fresh transaction on `store` and finishes it with the result.
    pub async fn run<T, F, Fut>(store: Arc<dyn Store>, work: F) -> Result<T>
    where
        F: FnOnce(Tx) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let tx = Tx::begin(store).await?;
        let outcome = work(tx.clone()).await;
        tx.finish(outcome).await
    }

    pub(crate) fn ensure_active(&self) -> Result<()> {
        let state = self.state();
        if state.is_active() {
            Ok(())
        } else {
            Err(DbError::TransactionState(
                self.inner.id.to_string(),
                state.to_string(),
            ))
        }
    }

    fn set_state(&self, next: TransactionState) {
        *self
            .inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner) = next;
    }
}

impl fmt::Debug for Tx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tx")
            .field("id", &self.inner.id)
            .field("parent", &self.inner.parent)
            .field("state", &self.state())
            .field("baseline", &self.inner.baseline)
            .field("deferred", &self.inner.deferred)
            .finish()
    }
}

impl Drop for TxInner {
    fn drop(&mut self) {
        let state = *self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if !state.is_active() {
            return;
        }
        warn!("Transaction {} dropped while still active, rolling it back", self.id);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let store = self.store.clone();
            let id = self.id;
            handle.spawn(async move {
                if let Err(err) = store.rollback(id).await {
                    debug!("Background rollback of {} failed: {}", id, err);
                }
            });
        }
    }
}
