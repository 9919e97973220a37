//! Round model.
//!
//! Each validator has exactly one open [`CacheRound`] accumulating
//! finalized snapshots, and one sealed [`FinalRound`] behind it. Sealing
//! hashes the round's snapshot payloads in timestamp order, so every node
//! that observed the same snapshots derives the same round hash. The
//! hashes are what snapshots reference to link the DAG together.

use skein_types::{Hash, NodeId, Snapshot};

/// The currently open round for one validator.
///
/// Invariants: every snapshot in `snapshots` belongs to `node_id`, carries
/// `round_number == number`, has a timestamp within `[start, end]`, and
/// has met the finalization threshold.
#[derive(Clone, Debug)]
pub struct CacheRound {
    pub node_id: NodeId,
    pub number: u64,
    /// Timestamp of the first snapshot in the round.
    pub start: u64,
    /// Timestamp of the last snapshot in the round.
    pub end: u64,
    /// Finalized snapshots in insertion order.
    pub snapshots: Vec<Snapshot>,
}

impl CacheRound {
    /// Open an empty round.
    pub fn open(node_id: NodeId, number: u64, start: u64) -> Self {
        Self {
            node_id,
            number,
            start,
            end: start,
            snapshots: Vec::new(),
        }
    }

    /// Seal this round into a [`FinalRound`].
    ///
    /// The round hash is
    /// `H(node_id ‖ BE64(number) ‖ H(s₁.payload) ‖ … ‖ H(sₖ.payload))`
    /// with snapshots taken in ascending timestamp order (stable, so
    /// equal-timestamp snapshots keep their insertion order). Insertion
    /// order itself does not affect the hash.
    pub fn seal(&self) -> FinalRound {
        let mut ordered: Vec<(u64, Hash)> = self
            .snapshots
            .iter()
            .map(|s| (s.timestamp, s.payload_hash()))
            .collect();
        ordered.sort_by_key(|(timestamp, _)| *timestamp);

        let mut data = Vec::with_capacity(40 + 32 * ordered.len());
        data.extend_from_slice(self.node_id.as_bytes());
        data.extend_from_slice(&self.number.to_be_bytes());
        for (_, payload_hash) in &ordered {
            data.extend_from_slice(payload_hash.as_bytes());
        }

        FinalRound {
            node_id: self.node_id,
            number: self.number,
            start: self.start,
            end: self.end,
            hash: Hash::from_bytes(&data),
        }
    }
}

/// A sealed round: the reference target snapshots link to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FinalRound {
    pub node_id: NodeId,
    pub number: u64,
    pub start: u64,
    pub end: u64,
    pub hash: Hash,
}

impl FinalRound {
    /// The bootstrap round for a validator that has never finalized:
    /// round zero with no snapshots, hashed by the same sealing formula
    /// (`H(node_id ‖ BE64(0))`).
    pub fn genesis(node_id: NodeId) -> Self {
        CacheRound::open(node_id, 0, 0).seal()
    }
}
