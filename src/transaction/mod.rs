// ============================================================================
// Transaction Module
// ============================================================================
//
// A Tx wraps a store transaction and carries two pieces of per-transaction
// state:
// - BaselineStore: the first snapshot of every entity read inside the
//   transaction, used as the "old" side of later diffs
// - DeferredQueue: actions (cache invalidation) that run only after commit
//
// ============================================================================

pub mod baseline;
pub mod deferred;
pub mod state;
pub mod tx;

pub use baseline::{BaselineStore, EntityKey};
pub use deferred::{DeferredOp, DeferredQueue};
pub use state::{TransactionState, TxId};
pub use tx::Tx;
