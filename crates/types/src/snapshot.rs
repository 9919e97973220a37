//! Snapshot types.
//!
//! A snapshot is one validator's proposed commitment to a transaction. It
//! carries two references linking it into the round DAG: the producer's own
//! previous final round, and the most recent final round of some *other*
//! validator. Signatures accumulate on the snapshot as it circulates; once
//! strictly more than 2/3 of the accepted validator set has signed, the
//! snapshot is finalized and persisted with a topological order.

use crate::{Hash, KeyPair, NodeId, Signature, Transaction};
use std::collections::BTreeMap;

/// Round numbers referenced by a persisted snapshot, keyed by the
/// referenced validator. `BTreeMap` so persisted artifacts iterate in a
/// stable order.
pub type RoundLinks = BTreeMap<NodeId, u64>;

/// A proposed commitment to a transaction, produced by one validator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    /// The producing validator.
    pub node_id: NodeId,
    /// The committed transaction.
    pub transaction: Transaction,
    /// `references[0]` is the producer's current final-round hash;
    /// `references[1]` is the final-round hash of some other validator.
    pub references: [Hash; 2],
    /// The round this snapshot belongs to on `node_id`.
    pub round_number: u64,
    /// Wall-clock nanoseconds at creation. Zero marks a locally produced
    /// snapshot that has not been stamped yet.
    pub timestamp: u64,
    /// Deduplicated validator signatures over `payload()`, in first-seen
    /// order.
    pub signatures: Vec<Signature>,
}

impl Snapshot {
    /// Create an unstamped snapshot for local production.
    ///
    /// Timestamp, round number, and references are assigned by the kernel
    /// when the snapshot is first handled.
    pub fn new(node_id: NodeId, transaction: Transaction) -> Self {
        Self {
            node_id,
            transaction,
            references: [Hash::zero(), Hash::zero()],
            round_number: 0,
            timestamp: 0,
            signatures: Vec::new(),
        }
    }

    /// Deterministic byte serialization, excluding signatures.
    ///
    /// Signatures are computed over this byte string, so it must be stable
    /// across retransmissions and identical on every node.
    pub fn payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(112 + self.transaction.encode().len());
        out.extend_from_slice(self.node_id.as_bytes());
        out.extend_from_slice(self.references[0].as_bytes());
        out.extend_from_slice(self.references[1].as_bytes());
        out.extend_from_slice(&self.round_number.to_be_bytes());
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&self.transaction.encode());
        out
    }

    pub fn payload_hash(&self) -> Hash {
        Hash::from_bytes(&self.payload())
    }

    /// Append `key`'s signature over the current payload.
    pub fn sign(&mut self, key: &KeyPair) {
        let signature = key.sign(&self.payload());
        self.signatures.push(signature);
    }
}

/// A finalized snapshot as persisted: the snapshot itself, its position in
/// the global persistence order, and the round numbers it referenced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotWithTopologicalOrder {
    pub snapshot: Snapshot,
    pub topological_order: u64,
    pub round_links: RoundLinks,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Transaction;

    fn sample() -> Snapshot {
        let key = KeyPair::from_seed(&[5u8; 32]);
        let mut s = Snapshot::new(
            key.node_id(),
            Transaction {
                inputs: vec![],
                outputs: vec![],
                extra: b"t".to_vec(),
            },
        );
        s.round_number = 3;
        s.timestamp = 1_000;
        s.references = [Hash::from_bytes(b"self"), Hash::from_bytes(b"other")];
        s
    }

    #[test]
    fn payload_excludes_signatures() {
        let mut s = sample();
        let before = s.payload_hash();
        s.sign(&KeyPair::from_seed(&[5u8; 32]));
        s.sign(&KeyPair::from_seed(&[6u8; 32]));
        assert_eq!(s.payload_hash(), before);
    }

    #[test]
    fn signatures_verify_over_payload() {
        let key = KeyPair::from_seed(&[5u8; 32]);
        let mut s = sample();
        s.sign(&key);
        assert!(key.public_key().verify(&s.payload(), &s.signatures[0]));
    }

    #[test]
    fn payload_covers_references_and_round() {
        let base = sample();

        let mut other = base.clone();
        other.references[1] = Hash::from_bytes(b"other2");
        assert_ne!(base.payload_hash(), other.payload_hash());

        let mut other = base.clone();
        other.round_number += 1;
        assert_ne!(base.payload_hash(), other.payload_hash());

        let mut other = base.clone();
        other.timestamp += 1;
        assert_ne!(base.payload_hash(), other.payload_hash());
    }
}
