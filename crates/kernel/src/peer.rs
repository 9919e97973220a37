//! Peer transport contract.

use skein_types::{NodeId, Snapshot};
use thiserror::Error;

/// Error type for peer sends.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("peer {peer:?} unreachable: {reason}")]
    Unreachable { peer: NodeId, reason: String },
}

/// Point-to-point snapshot delivery, consumed by the kernel.
///
/// Implementations are externally synchronized black boxes; the kernel
/// holds a reference for the lifetime of the node and calls it only from
/// the handler thread.
pub trait Peer: Send + Sync {
    fn send_snapshot(&self, peer_id: &NodeId, snapshot: &Snapshot) -> Result<(), PeerError>;
}
