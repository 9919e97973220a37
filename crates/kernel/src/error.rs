//! Kernel error types.
//!
//! Only conditions that leave the ingest queue unable to advance safely
//! are surfaced to the caller. Byzantine inputs (duplicates, invalid
//! transactions, malformed references, lock conflicts) are logged and
//! dropped inside the handler and the caller sees success.

use crate::peer::PeerError;
use skein_storage::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KernelError {
    /// A store read or write failed outside the dedup lookup.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A peer send failed during rebroadcast.
    #[error(transparent)]
    Peer(#[from] PeerError),

    /// Persisted round data violates an invariant; the store cannot be
    /// trusted and the node must not continue.
    #[error("corrupt persistent state: {0}")]
    Corrupted(String),

    /// The in-memory graph reached a state its invariants forbid. Not
    /// recoverable by dropping the snapshot.
    #[error("inconsistent round graph: {0}")]
    Inconsistent(String),
}
