//! Storage contract for the Skein snapshot kernel.
//!
//! The kernel consumes storage through the [`Store`] trait and never holds
//! a concrete backend. All operations are synchronous blocking calls;
//! implementations are internally synchronized so methods take `&self`.
//!
//! # Persistent invariants
//!
//! Every implementation must uphold:
//!
//! - `read_round_meta(n)` returns the highest `(number, start)` ever
//!   written for node `n`.
//! - `read_round_link(a, b)` is monotonic non-decreasing, updated
//!   atomically with [`Store::write_snapshot`].
//! - `read_snapshots_for_node_round` returns snapshots in ascending
//!   timestamp order.

mod memory;

pub use memory::MemoryStore;

use skein_types::{Hash, Input, NodeId, Output, Snapshot, SnapshotWithTopologicalOrder};
use thiserror::Error;

/// Error type for storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend failed; the caller cannot safely continue with this
    /// operation.
    #[error("storage backend: {0}")]
    Backend(String),

    /// Persisted data violates a round invariant.
    #[error("corrupt round data: {0}")]
    Corrupt(String),

    /// A claimed input does not exist.
    #[error("unknown input {input_source:?}:{index}")]
    UnknownInput { input_source: Hash, index: u32 },

    /// A claimed input is already locked by a different candidate
    /// transaction.
    #[error("input {input_source:?}:{index} locked by {holder:?}")]
    InputLocked {
        input_source: Hash,
        index: u32,
        holder: Hash,
    },
}

/// Head-round metadata for one validator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RoundMeta {
    /// Highest round number written.
    pub number: u64,
    /// Start timestamp of that round.
    pub start: u64,
}

/// A spendable output as tracked by the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UtxoRecord {
    pub output: Output,
    /// Transaction hash of the snapshot candidate that locked this output,
    /// if any.
    pub locked_by: Option<Hash>,
}

/// The storage capability consumed by the kernel.
pub trait Store: Send + Sync {
    /// Look up a persisted snapshot by its transaction hash.
    fn read_snapshot_by_transaction_hash(
        &self,
        tx_hash: &Hash,
    ) -> Result<Option<SnapshotWithTopologicalOrder>, StoreError>;

    /// Persist a finalized snapshot.
    ///
    /// Atomically updates the transaction index, the producer's round
    /// meta, the recorded round links (monotonic max), and credits the
    /// transaction's outputs as new spendable UTXOs.
    fn write_snapshot(&self, snapshot: &SnapshotWithTopologicalOrder) -> Result<(), StoreError>;

    /// The validator ids known to this store, in registration order.
    fn read_nodes_list(&self) -> Result<Vec<NodeId>, StoreError>;

    /// Highest `(number, start)` written for `node_id`; zero if the node
    /// has never persisted a snapshot.
    fn read_round_meta(&self, node_id: &NodeId) -> Result<RoundMeta, StoreError>;

    /// All persisted snapshots for one round of one node, ascending by
    /// timestamp.
    fn read_snapshots_for_node_round(
        &self,
        node_id: &NodeId,
        number: u64,
    ) -> Result<Vec<Snapshot>, StoreError>;

    /// Last recorded round number that `from` referenced on `to`; zero if
    /// never recorded.
    fn read_round_link(&self, from: &NodeId, to: &NodeId) -> Result<u64, StoreError>;

    /// Look up an output by its producing transaction hash and index.
    fn read_utxo(&self, source: &Hash, index: u32) -> Result<Option<UtxoRecord>, StoreError>;

    /// Atomically lock `inputs` to the candidate transaction `candidate`.
    ///
    /// Either every input is locked or none is. Re-locking by the same
    /// candidate is a no-op; a different candidate is a conflict.
    fn lock_inputs(&self, inputs: &[Input], candidate: &Hash) -> Result<(), StoreError>;
}
