//! In-memory reference store.
//!
//! Used by tests and the simulation harness. Upholds the same persistent
//! invariants a production backend would: round meta tracks the highest
//! written round, round links only move forward, and snapshot writes are
//! atomic with respect to every index they touch.

use crate::{RoundMeta, Store, StoreError, UtxoRecord};
use parking_lot::RwLock;
use skein_types::{Hash, Input, NodeId, Output, Snapshot, SnapshotWithTopologicalOrder};
use std::collections::{BTreeMap, HashMap};
use tracing::trace;

#[derive(Default)]
struct Inner {
    nodes: Vec<NodeId>,
    by_transaction: HashMap<Hash, SnapshotWithTopologicalOrder>,
    rounds: BTreeMap<(NodeId, u64), Vec<Snapshot>>,
    meta: HashMap<NodeId, RoundMeta>,
    links: HashMap<(NodeId, NodeId), u64>,
    utxos: HashMap<(Hash, u32), UtxoRecord>,
}

/// An in-memory [`Store`].
///
/// Methods take `&self`; the store is internally synchronized and can be
/// shared behind an `Arc`.
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Create a store that knows the given validator set and holds no
    /// rounds: every validator bootstraps at the synthetic round zero.
    pub fn new(nodes: Vec<NodeId>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                nodes,
                ..Inner::default()
            }),
        }
    }

    /// Seed a spendable output, e.g. a genesis allocation.
    pub fn credit_output(&self, source: Hash, index: u32, output: Output) {
        self.inner.write().utxos.insert(
            (source, index),
            UtxoRecord {
                output,
                locked_by: None,
            },
        );
    }

    /// Number of persisted snapshots, for assertions in tests and sim
    /// stats.
    pub fn snapshot_count(&self) -> usize {
        self.inner.read().by_transaction.len()
    }
}

impl Store for MemoryStore {
    fn read_snapshot_by_transaction_hash(
        &self,
        tx_hash: &Hash,
    ) -> Result<Option<SnapshotWithTopologicalOrder>, StoreError> {
        Ok(self.inner.read().by_transaction.get(tx_hash).cloned())
    }

    fn write_snapshot(&self, snapshot: &SnapshotWithTopologicalOrder) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let s = &snapshot.snapshot;
        let tx_hash = s.transaction.payload_hash();

        // Idempotent under replay.
        if inner.by_transaction.contains_key(&tx_hash) {
            return Ok(());
        }

        inner.by_transaction.insert(tx_hash, snapshot.clone());

        let round = inner
            .rounds
            .entry((s.node_id, s.round_number))
            .or_default();
        round.push(s.clone());
        round.sort_by_key(|s| s.timestamp);
        let round_start = round[0].timestamp;

        let meta = inner.meta.entry(s.node_id).or_default();
        if s.round_number > meta.number {
            *meta = RoundMeta {
                number: s.round_number,
                start: round_start,
            };
        } else if s.round_number == meta.number {
            // Keep start at the earliest timestamp seen for the head round.
            meta.start = round_start;
        }

        for (to, number) in &snapshot.round_links {
            let link = inner.links.entry((s.node_id, *to)).or_insert(0);
            *link = (*link).max(*number);
        }

        for (index, output) in s.transaction.outputs.iter().enumerate() {
            inner.utxos.insert(
                (tx_hash, index as u32),
                UtxoRecord {
                    output: *output,
                    locked_by: None,
                },
            );
        }

        trace!(
            node = ?s.node_id,
            round = s.round_number,
            topo = snapshot.topological_order,
            "persisted snapshot"
        );
        Ok(())
    }

    fn read_nodes_list(&self) -> Result<Vec<NodeId>, StoreError> {
        Ok(self.inner.read().nodes.clone())
    }

    fn read_round_meta(&self, node_id: &NodeId) -> Result<RoundMeta, StoreError> {
        Ok(self
            .inner
            .read()
            .meta
            .get(node_id)
            .copied()
            .unwrap_or_default())
    }

    fn read_snapshots_for_node_round(
        &self,
        node_id: &NodeId,
        number: u64,
    ) -> Result<Vec<Snapshot>, StoreError> {
        Ok(self
            .inner
            .read()
            .rounds
            .get(&(*node_id, number))
            .cloned()
            .unwrap_or_default())
    }

    fn read_round_link(&self, from: &NodeId, to: &NodeId) -> Result<u64, StoreError> {
        Ok(self
            .inner
            .read()
            .links
            .get(&(*from, *to))
            .copied()
            .unwrap_or(0))
    }

    fn read_utxo(&self, source: &Hash, index: u32) -> Result<Option<UtxoRecord>, StoreError> {
        Ok(self.inner.read().utxos.get(&(*source, index)).cloned())
    }

    fn lock_inputs(&self, inputs: &[Input], candidate: &Hash) -> Result<(), StoreError> {
        let mut inner = self.inner.write();

        // Check every input before touching any, so a conflict leaves the
        // lock state unchanged.
        for input in inputs {
            match inner.utxos.get(&(input.source, input.index)) {
                None => {
                    return Err(StoreError::UnknownInput {
                        input_source: input.source,
                        index: input.index,
                    });
                }
                Some(record) => {
                    if let Some(holder) = record.locked_by {
                        if holder != *candidate {
                            return Err(StoreError::InputLocked {
                                input_source: input.source,
                                index: input.index,
                                holder,
                            });
                        }
                    }
                }
            }
        }

        for input in inputs {
            if let Some(record) = inner.utxos.get_mut(&(input.source, input.index)) {
                record.locked_by = Some(*candidate);
            }
        }
        Ok(())
    }
}
