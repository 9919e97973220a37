//! Snapshot handler state machine.
//!
//! The handler is the single entry point of the kernel: every inbound
//! snapshot, locally produced or received from a peer, passes through
//! [`Node::handle_snapshot`]. Processing is strictly serialized on one
//! logical thread; the graph, signature pool, and send throttle need no
//! locks because nothing else may touch them.
//!
//! Per snapshot: dedup against the store → validate the transaction →
//! normalize signatures → stamp-and-sign if locally produced → verify if
//! external or co-signed → persist with topological order once the
//! signature threshold is met, otherwise lock inputs, co-sign, and gossip.

use crate::config::KernelConfig;
use crate::error::KernelError;
use crate::graph::RoundGraph;
use crate::peer::Peer;
use crate::round::{CacheRound, FinalRound};
use crate::verify::Verdict;
use skein_storage::{Store, StoreError};
use skein_types::{
    Hash, KeyPair, NodeId, RoundLinks, Signature, Snapshot, SnapshotWithTopologicalOrder,
    Transaction, Validator,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Total order over finalized snapshots in the order they are persisted.
#[derive(Debug, Default)]
pub struct TopoCounter {
    sequence: u64,
}

impl TopoCounter {
    pub fn next(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    pub fn current(&self) -> u64 {
        self.sequence
    }
}

/// Why a transaction was refused before entering consensus.
#[derive(Debug, Error)]
enum TransactionRejected {
    #[error("duplicate input {input_source:?}:{index}")]
    DuplicateInput { input_source: Hash, index: u32 },

    #[error("unknown input {input_source:?}:{index}")]
    UnknownInput { input_source: Hash, index: u32 },

    #[error("input lookup failed: {0}")]
    Lookup(#[from] StoreError),
}

/// One validator's consensus kernel.
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) keypair: KeyPair,
    pub(crate) validators: Vec<Validator>,
    pub(crate) config: KernelConfig,
    pub(crate) graph: RoundGraph,
    /// Payload hash → deduplicated signatures observed across
    /// retransmissions. Entries live for the process lifetime.
    pub(crate) signature_pool: HashMap<Hash, Vec<Signature>>,
    /// `(payload hash, peer)` → last send timestamp; gates rebroadcast at
    /// the round-gap rate. A pair never sent reads as zero and passes.
    send_cache: HashMap<(Hash, NodeId), u64>,
    topo: TopoCounter,
    pub(crate) store: Arc<dyn Store>,
    peer: Arc<dyn Peer>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("validators", &self.validators.len())
            .field("pool_entries", &self.signature_pool.len())
            .field("topo", &self.topo.current())
            .finish()
    }
}

impl Node {
    /// Build a kernel for `keypair`'s validator, bootstrapping the round
    /// graph from the store.
    pub fn new(
        keypair: KeyPair,
        validators: Vec<Validator>,
        config: KernelConfig,
        store: Arc<dyn Store>,
        peer: Arc<dyn Peer>,
    ) -> Result<Self, KernelError> {
        let id = keypair.node_id();
        let graph = RoundGraph::load(store.as_ref())?;
        info!(node = ?id, validators = validators.len(), "kernel initialized");
        Ok(Self {
            id,
            keypair,
            validators,
            config,
            graph,
            signature_pool: HashMap::new(),
            send_cache: HashMap::new(),
            topo: TopoCounter::default(),
            store,
            peer,
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn graph(&self) -> &RoundGraph {
        &self.graph
    }

    /// Signatures pooled for a payload, if any.
    pub fn pooled_signatures(&self, payload_hash: &Hash) -> Option<&[Signature]> {
        self.signature_pool
            .get(payload_hash)
            .map(|sigs| sigs.as_slice())
    }

    /// Ingest one snapshot.
    ///
    /// Byzantine inputs (duplicates, invalid transactions, malformed
    /// references, lock conflicts) are logged and dropped; the caller sees
    /// success. Errors are reserved for conditions that leave the queue
    /// unable to advance safely: store I/O outside the dedup read, peer
    /// send failures, and invariant violations.
    ///
    /// The snapshot is the caller's and is mutated in place: timestamps,
    /// references, and round numbers are assigned on the local-producer
    /// path, and signatures are normalized and merged on every path.
    pub fn handle_snapshot(&mut self, s: &mut Snapshot) -> Result<(), KernelError> {
        let tx_hash = s.transaction.payload_hash();

        match self.store.read_snapshot_by_transaction_hash(&tx_hash) {
            Ok(Some(_)) => {
                debug!(tx = ?tx_hash, "duplicate snapshot dropped");
                return Ok(());
            }
            Ok(None) => {}
            Err(err) => {
                warn!(%err, tx = ?tx_hash, "snapshot dedup read failed, dropping");
                return Ok(());
            }
        }

        if let Err(err) = self.validate_transaction(&s.transaction) {
            warn!(%err, tx = ?tx_hash, "invalid transaction dropped");
            return Ok(());
        }

        if !self.graph.contains(&s.node_id) {
            warn!(node = ?s.node_id, tx = ?tx_hash, "snapshot from unknown validator dropped");
            return Ok(());
        }

        let outcome = self.ingest(s);
        self.graph.update_final_cache();
        outcome
    }

    fn ingest(&mut self, s: &mut Snapshot) -> Result<(), KernelError> {
        self.clear_consensus_signatures(s);

        let (mut cache, mut final_round) = self.sign_snapshot(s)?;
        let mut links = RoundLinks::new();

        if s.node_id != self.id || s.signatures.len() > 1 {
            match self.verify_snapshot(s)? {
                Verdict::Proceed {
                    links: recorded,
                    cache: proposed_cache,
                    final_round: proposed_final,
                } => {
                    links = recorded;
                    cache = proposed_cache;
                    final_round = proposed_final;
                }
                Verdict::Reject => return Ok(()),
            }
        }

        if self.verify_finalization(s) {
            cache.snapshots.push(s.clone());
            cache.end = s.timestamp;
            let topological_order = self.topo.next();
            self.store.write_snapshot(&SnapshotWithTopologicalOrder {
                snapshot: s.clone(),
                topological_order,
                round_links: links,
            })?;
            debug!(
                node = ?s.node_id,
                round = s.round_number,
                topo = topological_order,
                signatures = s.signatures.len(),
                "snapshot finalized"
            );
            self.graph.cache_round.insert(s.node_id, cache);
            self.graph.final_round.insert(s.node_id, final_round);
            return Ok(());
        }

        if let Err(err) = self
            .store
            .lock_inputs(&s.transaction.inputs, &s.transaction.payload_hash())
        {
            warn!(%err, node = ?s.node_id, "input lock conflict, dropping snapshot");
            return Ok(());
        }
        self.cosign(s);
        self.rebroadcast(s)?;

        self.graph.cache_round.insert(s.node_id, cache);
        self.graph.final_round.insert(s.node_id, final_round);
        Ok(())
    }

    /// Check the transaction's claimed inputs against the store.
    fn validate_transaction(&self, transaction: &Transaction) -> Result<(), TransactionRejected> {
        let mut seen = HashSet::new();
        for input in &transaction.inputs {
            if !seen.insert((input.source, input.index)) {
                return Err(TransactionRejected::DuplicateInput {
                    input_source: input.source,
                    index: input.index,
                });
            }
            if self.store.read_utxo(&input.source, input.index)?.is_none() {
                return Err(TransactionRejected::UnknownInput {
                    input_source: input.source,
                    index: input.index,
                });
            }
        }
        Ok(())
    }

    /// Normalize `s.signatures`: drop duplicates and anything that does
    /// not verify under an accepted validator's key. Input order is
    /// preserved.
    pub(crate) fn clear_consensus_signatures(&self, s: &mut Snapshot) {
        let message = s.payload();
        let mut seen = HashSet::new();
        let mut kept = Vec::with_capacity(s.signatures.len());
        for signature in &s.signatures {
            if !seen.insert(*signature) {
                continue;
            }
            let valid = self
                .validators
                .iter()
                .filter(|v| v.is_accepted())
                .any(|v| v.public_key.verify(&message, signature));
            if valid {
                kept.push(*signature);
            }
        }
        s.signatures = kept;
    }

    /// Stamp a locally produced snapshot.
    ///
    /// Only acts on a fresh local snapshot (ours, unsigned, timestamp
    /// zero); anything else gets back untouched copies of the producer's
    /// current rounds. Stamping assigns a wall-clock timestamp strictly
    /// greater than the open round's end (busy-waiting in 1 ms steps),
    /// advances the round if the gap has elapsed, and elects the
    /// second reference: the other validator's final round with the
    /// greatest start that ended before now.
    fn sign_snapshot(&self, s: &mut Snapshot) -> Result<(CacheRound, FinalRound), KernelError> {
        let mut cache = self
            .graph
            .cache_round
            .get(&s.node_id)
            .cloned()
            .ok_or_else(|| KernelError::Inconsistent(format!("no cache round for {}", s.node_id)))?;
        let mut final_round = *self
            .graph
            .final_round
            .get(&s.node_id)
            .ok_or_else(|| KernelError::Inconsistent(format!("no final round for {}", s.node_id)))?;

        if s.node_id != self.id || !s.signatures.is_empty() || s.timestamp != 0 {
            return Ok((cache, final_round));
        }
        debug!(tx = ?s.transaction.payload_hash(), "stamping locally produced snapshot");

        loop {
            s.timestamp = now_ns();
            if s.timestamp > cache.end {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }

        if s.timestamp >= self.config.gap_ns() + cache.start {
            if cache.snapshots.is_empty() {
                cache.start = s.timestamp;
            } else {
                self.assert_cache_finalized(&cache)?;
                final_round = cache.seal();
                cache = CacheRound::open(s.node_id, cache.number + 1, s.timestamp);
            }
        }
        cache.end = s.timestamp;

        let now = now_ns();
        let mut best: Option<&FinalRound> = None;
        for round in self.graph.final_rounds() {
            if round.node_id == s.node_id || round.end >= now {
                continue;
            }
            if best.map_or(true, |b| round.start >= b.start) {
                best = Some(round);
            }
        }
        let Some(best) = best else {
            return Err(KernelError::Inconsistent(
                "no eligible final round of another validator to reference".into(),
            ));
        };

        s.round_number = cache.number;
        s.references = [final_round.hash, best.hash];
        Ok((cache, final_round))
    }

    /// Every snapshot already in an open round must have met the
    /// threshold before the round can seal.
    pub(crate) fn assert_cache_finalized(&self, cache: &CacheRound) -> Result<(), KernelError> {
        for snapshot in &cache.snapshots {
            if !self.verify_finalization(snapshot) {
                return Err(KernelError::Inconsistent(format!(
                    "open round {} on {} holds a non-finalized snapshot at seal time",
                    cache.number, cache.node_id
                )));
            }
        }
        Ok(())
    }

    /// Add our own signature, re-normalize, and publish the result to the
    /// signature pool.
    fn cosign(&mut self, s: &mut Snapshot) {
        s.sign(&self.keypair);
        self.clear_consensus_signatures(s);
        self.signature_pool.insert(s.payload_hash(), s.signatures.clone());
    }

    /// Gossip a non-finalized snapshot.
    ///
    /// As producer, fan out to every accepted validator, throttled per
    /// peer by the round gap. As relay, send to the origin validator only
    /// until gossip peer selection exists.
    fn rebroadcast(&mut self, s: &Snapshot) -> Result<(), KernelError> {
        if s.node_id != self.id {
            self.peer.send_snapshot(&s.node_id, s)?;
            return Ok(());
        }

        let payload_hash = s.payload_hash();
        let gap = self.config.gap_ns();
        let peers: Vec<NodeId> = self
            .validators
            .iter()
            .filter(|v| v.is_accepted() && v.node_id != self.id)
            .map(|v| v.node_id)
            .collect();
        for peer_id in peers {
            let last = self
                .send_cache
                .get(&(payload_hash, peer_id))
                .copied()
                .unwrap_or(0);
            let now = now_ns();
            if now < last + gap {
                continue;
            }
            self.peer.send_snapshot(&peer_id, s)?;
            self.send_cache.insert((payload_hash, peer_id), now);
        }
        Ok(())
    }
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos() as u64
}
