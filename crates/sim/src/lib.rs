//! Deterministic in-process multi-node harness.
//!
//! Each node runs a full kernel with its own independent store; they are
//! separate validators that share no state. Peer sends are enqueued onto a
//! single FIFO and delivered synchronously by the harness loop, so a run
//! with a fixed seed and fixed inputs exercises the same code paths every
//! time (snapshot timestamps still come from the wall clock, as they do in
//! production).

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use skein_kernel::{KernelConfig, KernelError, Node, Peer, PeerError};
use skein_storage::MemoryStore;
use skein_types::{Hash, KeyPair, NodeId, Output, Snapshot, Transaction, Validator};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Harness configuration.
#[derive(Clone, Debug)]
pub struct SimConfig {
    pub validators: usize,
    pub snapshot_round_gap: Duration,
    /// Seed for deterministic validator key derivation.
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            validators: 4,
            snapshot_round_gap: Duration::from_millis(250),
            seed: 42,
        }
    }
}

/// Counters collected while draining the network.
#[derive(Clone, Copy, Debug, Default)]
pub struct SimStats {
    /// Snapshots delivered to a kernel.
    pub delivered: u64,
    /// Snapshots addressed to a peer outside the validator set.
    pub dropped_unknown: u64,
}

/// A snapshot in flight to a destination validator.
type InFlight = (NodeId, Snapshot);

/// Peer implementation that enqueues sends onto the harness queue.
struct QueuedPeer {
    queue: Arc<Mutex<VecDeque<InFlight>>>,
}

impl Peer for QueuedPeer {
    fn send_snapshot(&self, peer_id: &NodeId, snapshot: &Snapshot) -> Result<(), PeerError> {
        self.queue.lock().push_back((*peer_id, snapshot.clone()));
        Ok(())
    }
}

/// A small validator network run inside one process.
pub struct SimNetwork {
    keys: Vec<KeyPair>,
    nodes: Vec<Node>,
    stores: Vec<Arc<MemoryStore>>,
    queue: Arc<Mutex<VecDeque<InFlight>>>,
    stats: SimStats,
}

impl SimNetwork {
    pub fn new(config: SimConfig) -> Result<Self, KernelError> {
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let keys: Vec<KeyPair> = (0..config.validators)
            .map(|_| KeyPair::from_seed(&rng.gen()))
            .collect();
        let ids: Vec<NodeId> = keys.iter().map(|k| k.node_id()).collect();
        let validators: Vec<Validator> = keys
            .iter()
            .map(|k| Validator::accepted(k.node_id(), k.public_key()))
            .collect();

        let queue = Arc::new(Mutex::new(VecDeque::new()));
        let mut nodes = Vec::with_capacity(config.validators);
        let mut stores = Vec::with_capacity(config.validators);
        for key in &keys {
            let store = Arc::new(MemoryStore::new(ids.clone()));
            let peer = Arc::new(QueuedPeer {
                queue: queue.clone(),
            });
            nodes.push(Node::new(
                key.clone(),
                validators.clone(),
                KernelConfig {
                    snapshot_round_gap: config.snapshot_round_gap,
                },
                store.clone(),
                peer,
            )?);
            stores.push(store);
        }

        info!(validators = config.validators, seed = config.seed, "network ready");
        Ok(Self {
            keys,
            nodes,
            stores,
            queue,
            stats: SimStats::default(),
        })
    }

    pub fn validator_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, index: usize) -> &Node {
        &self.nodes[index]
    }

    pub fn store(&self, index: usize) -> &MemoryStore {
        &self.stores[index]
    }

    pub fn stats(&self) -> SimStats {
        self.stats
    }

    /// Snapshots finalized (persisted) at one validator.
    pub fn finalized_count(&self, index: usize) -> usize {
        self.stores[index].snapshot_count()
    }

    /// Seed the same spendable output into every validator's store.
    pub fn credit_everywhere(&self, source: Hash, index: u32, output: Output) {
        for store in &self.stores {
            store.credit_output(source, index, output);
        }
    }

    /// Inject a fresh locally produced snapshot at `origin`.
    pub fn submit(&mut self, origin: usize, transaction: Transaction) -> Result<(), KernelError> {
        let mut snapshot = Snapshot::new(self.keys[origin].node_id(), transaction);
        self.nodes[origin].handle_snapshot(&mut snapshot)
    }

    /// Deliver queued snapshots until the network is quiet or the message
    /// budget runs out.
    pub fn run_until_quiescent(&mut self, max_messages: usize) -> Result<(), KernelError> {
        for _ in 0..max_messages {
            let next = self.queue.lock().pop_front();
            let Some((to, mut snapshot)) = next else {
                return Ok(());
            };
            match self.keys.iter().position(|k| k.node_id() == to) {
                Some(node_index) => {
                    self.stats.delivered += 1;
                    self.nodes[node_index].handle_snapshot(&mut snapshot)?;
                }
                None => {
                    self.stats.dropped_unknown += 1;
                    warn!(peer = ?to, "snapshot addressed to unknown peer dropped");
                }
            }
        }
        debug!("message budget exhausted with traffic still in flight");
        Ok(())
    }
}
