//! End-to-end handler scenarios against the in-memory store and a
//! recording peer.

use parking_lot::Mutex;
use skein_kernel::{FinalRound, KernelConfig, Node, Peer, PeerError};
use skein_storage::{MemoryStore, Store};
use skein_types::{
    Hash, Input, KeyPair, NodeId, Output, Snapshot, Transaction, Validator, ValidatorState,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const GAP: Duration = Duration::from_secs(3);

fn gap_ns() -> u64 {
    GAP.as_nanos() as u64
}

/// Records every send; never fails.
#[derive(Default)]
struct RecordingPeer {
    sent: Mutex<Vec<(NodeId, Snapshot)>>,
}

impl RecordingPeer {
    fn sends(&self) -> Vec<(NodeId, Snapshot)> {
        self.sent.lock().clone()
    }
}

impl Peer for RecordingPeer {
    fn send_snapshot(&self, peer_id: &NodeId, snapshot: &Snapshot) -> Result<(), PeerError> {
        self.sent.lock().push((*peer_id, snapshot.clone()));
        Ok(())
    }
}

struct Fixture {
    keys: Vec<KeyPair>,
    store: Arc<MemoryStore>,
    peer: Arc<RecordingPeer>,
    node: Node,
}

impl Fixture {
    /// A validator set of `total` keys; the kernel runs as validator 0
    /// with the given state, everyone else accepted.
    fn new_with_self_state(total: usize, self_state: ValidatorState) -> Self {
        let keys: Vec<KeyPair> = (0..total)
            .map(|i| KeyPair::from_seed(&[i as u8 + 1; 32]))
            .collect();
        let validators: Vec<Validator> = keys
            .iter()
            .enumerate()
            .map(|(i, key)| Validator {
                node_id: key.node_id(),
                public_key: key.public_key(),
                state: if i == 0 {
                    self_state
                } else {
                    ValidatorState::Accepted
                },
            })
            .collect();
        let store = Arc::new(MemoryStore::new(
            keys.iter().map(|k| k.node_id()).collect(),
        ));
        let peer = Arc::new(RecordingPeer::default());
        let node = Node::new(
            keys[0].clone(),
            validators,
            KernelConfig {
                snapshot_round_gap: GAP,
            },
            store.clone(),
            peer.clone(),
        )
        .unwrap();
        Self {
            keys,
            store,
            peer,
            node,
        }
    }

    fn new(total: usize) -> Self {
        Self::new_with_self_state(total, ValidatorState::Accepted)
    }

    fn id(&self, index: usize) -> NodeId {
        self.keys[index].node_id()
    }

    /// Seed a spendable output and return a transaction consuming it.
    fn seeded_transaction(&self, tag: u8) -> Transaction {
        let source = Hash::from_bytes(&[tag]);
        let owner = self.keys[0].public_key();
        self.store.credit_output(source, 0, Output { amount: 50, owner });
        Transaction {
            inputs: vec![Input { source, index: 0 }],
            outputs: vec![Output { amount: 50, owner }],
            extra: vec![tag],
        }
    }

    /// An unsigned snapshot from `producer` referencing the producer's
    /// current final round and validator `other`'s final round.
    fn external_snapshot(
        &self,
        producer: usize,
        other: usize,
        tx: Transaction,
        round: u64,
        timestamp: u64,
    ) -> Snapshot {
        let producer_id = self.id(producer);
        let self_hash = self.node.graph().final_round(&producer_id).unwrap().hash;
        let other_hash = self
            .node
            .graph()
            .final_round(&self.id(other))
            .unwrap()
            .hash;
        let mut s = Snapshot::new(producer_id, tx);
        s.round_number = round;
        s.timestamp = timestamp;
        s.references = [self_hash, other_hash];
        s
    }
}

/// Scenario: a fresh locally produced snapshot is stamped, referenced,
/// co-signed, and broadcast to every accepted peer.
#[test]
fn fresh_local_snapshot_is_stamped_and_broadcast() {
    let mut fx = Fixture::new(4);
    let tx = fx.seeded_transaction(1);
    let mut s = Snapshot::new(fx.node.id(), tx);

    fx.node.handle_snapshot(&mut s).unwrap();

    assert!(s.timestamp > 0);
    assert_eq!(s.round_number, 1);
    assert_eq!(s.references[0], FinalRound::genesis(fx.node.id()).hash);
    let other_genesis: Vec<Hash> = (1..4)
        .map(|i| FinalRound::genesis(fx.id(i)).hash)
        .collect();
    assert!(other_genesis.contains(&s.references[1]));

    // Our own signature, normalized and pooled.
    assert_eq!(s.signatures.len(), 1);
    assert_eq!(
        fx.node.pooled_signatures(&s.payload_hash()).unwrap().len(),
        1
    );

    // One send per accepted peer, never to ourselves.
    let recipients: HashSet<NodeId> = fx.peer.sends().iter().map(|(to, _)| *to).collect();
    assert_eq!(recipients.len(), 3);
    assert!(!recipients.contains(&fx.node.id()));

    // The open round tracked the stamp; nothing persisted below threshold.
    let cache = fx.node.graph().cache_round(&fx.node.id()).unwrap();
    assert_eq!(cache.end, s.timestamp);
    assert_eq!(fx.store.snapshot_count(), 0);
}

/// Drive a producer's snapshot to the threshold by injecting copies each
/// carrying one more accepted validator's signature. Returns the base
/// snapshot and its timestamp.
fn accumulate_to_threshold(fx: &mut Fixture, tag: u8, round: u64, timestamp: u64) -> Snapshot {
    let tx = fx.seeded_transaction(tag);
    let base = fx.external_snapshot(1, 2, tx, round, timestamp);
    for signer in 1..4 {
        let mut copy = base.clone();
        copy.sign(&fx.keys[signer]);
        fx.node.handle_snapshot(&mut copy).unwrap();
    }
    base
}

/// Scenario: signature accumulation. With three accepted validators the
/// threshold is two, so the third distinct signature finalizes.
#[test]
fn signature_accumulation_persists_at_threshold() {
    // Run as a pending validator so our co-signature does not count.
    let mut fx = Fixture::new_with_self_state(4, ValidatorState::Pending);
    let producer = fx.id(1);
    let ts = gap_ns() + 1;

    let tx = fx.seeded_transaction(2);
    let base = fx.external_snapshot(1, 2, tx, 1, ts);

    let mut first = base.clone();
    first.sign(&fx.keys[1]);
    fx.node.handle_snapshot(&mut first).unwrap();
    assert_eq!(fx.store.snapshot_count(), 0);
    assert_eq!(
        fx.node.pooled_signatures(&base.payload_hash()).unwrap().len(),
        1
    );

    let mut second = base.clone();
    second.sign(&fx.keys[2]);
    fx.node.handle_snapshot(&mut second).unwrap();
    assert_eq!(fx.store.snapshot_count(), 0);
    assert_eq!(
        fx.node.pooled_signatures(&base.payload_hash()).unwrap().len(),
        2
    );

    let mut third = base.clone();
    third.sign(&fx.keys[3]);
    fx.node.handle_snapshot(&mut third).unwrap();

    // Persisted with three unique signatures, all verifying over the payload.
    assert_eq!(fx.store.snapshot_count(), 1);
    let persisted = fx
        .store
        .read_snapshot_by_transaction_hash(&base.transaction.payload_hash())
        .unwrap()
        .unwrap();
    assert_eq!(persisted.snapshot.signatures.len(), 3);
    let unique: HashSet<_> = persisted.snapshot.signatures.iter().collect();
    assert_eq!(unique.len(), 3);
    let payload = persisted.snapshot.payload();
    for signature in &persisted.snapshot.signatures {
        assert!((1..4)
            .any(|i| fx.keys[i].public_key().verify(&payload, signature)));
    }

    // Appended to the open round; no round-number change in the projection.
    let cache = fx.node.graph().cache_round(&producer).unwrap();
    assert_eq!(cache.number, 1);
    assert_eq!(cache.snapshots.len(), 1);
    assert_eq!(cache.end, ts);
    let summary = fx
        .node
        .graph()
        .final_cache()
        .iter()
        .find(|r| r.node_id == producer)
        .copied()
        .unwrap();
    assert_eq!(summary.number, 0);
}

/// Scenario: round advance. A snapshot past the gap seals the open round
/// and opens the next one.
#[test]
fn round_advances_past_the_gap() {
    let mut fx = Fixture::new_with_self_state(4, ValidatorState::Pending);
    let producer = fx.id(1);
    let ts = gap_ns() + 1;
    accumulate_to_threshold(&mut fx, 3, 1, ts);

    let sealed_expected = fx.node.graph().cache_round(&producer).unwrap().seal();

    let ts2 = ts + gap_ns() + 1;
    let tx2 = fx.seeded_transaction(4);
    let mut s2 = fx.external_snapshot(1, 2, tx2, 2, ts2);
    // external_snapshot read the pre-advance final; the reference must be
    // the round the advance will seal.
    s2.references[0] = sealed_expected.hash;
    s2.sign(&fx.keys[1]);
    fx.node.handle_snapshot(&mut s2).unwrap();

    let final_round = fx.node.graph().final_round(&producer).unwrap();
    assert_eq!(final_round.number, 1);
    assert_eq!(final_round.hash, sealed_expected.hash);
    assert_eq!(final_round.start, ts);

    let cache = fx.node.graph().cache_round(&producer).unwrap();
    assert_eq!(cache.number, 2);
    assert_eq!(cache.start, ts2);
    assert_eq!(cache.end, ts2);
    assert!(cache.snapshots.is_empty());

    let summary = fx
        .node
        .graph()
        .final_cache()
        .iter()
        .find(|r| r.node_id == producer)
        .copied()
        .unwrap();
    assert_eq!((summary.number, summary.start), (1, ts));
}

/// Scenario: a snapshot whose self-reference does not match the
/// producer's final round is dropped without any side effect.
#[test]
#[tracing_test::traced_test]
fn invalid_self_reference_is_dropped() {
    let mut fx = Fixture::new(4);
    let producer = fx.id(1);
    let tx = fx.seeded_transaction(5);
    let source = tx.inputs[0].source;

    let mut s = fx.external_snapshot(1, 2, tx, 1, gap_ns() + 1);
    s.references[0] = Hash::from_bytes(b"bogus");
    s.sign(&fx.keys[1]);

    fx.node.handle_snapshot(&mut s).unwrap();

    assert!(fx.peer.sends().is_empty());
    assert_eq!(fx.store.snapshot_count(), 0);
    assert!(fx.node.pooled_signatures(&s.payload_hash()).is_none());
    // The proposed round advance was discarded with the snapshot.
    let cache = fx.node.graph().cache_round(&producer).unwrap();
    assert_eq!((cache.number, cache.start), (1, 0));
    // Inputs were never locked.
    let utxo = fx.store.read_utxo(&source, 0).unwrap().unwrap();
    assert!(utxo.locked_by.is_none());
    // The rejection was logged, not surfaced.
    assert!(logs_contain("invalid references"));
}

/// Scenario: identical references are rejected.
#[test]
fn duplicate_references_are_dropped() {
    let mut fx = Fixture::new(4);
    let producer = fx.id(1);
    let tx = fx.seeded_transaction(6);

    let mut s = fx.external_snapshot(1, 2, tx, 1, gap_ns() + 1);
    let self_hash = s.references[0];
    s.references = [self_hash, self_hash];
    s.sign(&fx.keys[1]);

    fx.node.handle_snapshot(&mut s).unwrap();

    assert!(fx.peer.sends().is_empty());
    assert_eq!(fx.store.snapshot_count(), 0);
    let cache = fx.node.graph().cache_round(&producer).unwrap();
    assert_eq!((cache.number, cache.start), (1, 0));
}

/// Scenario: two candidates spending the same output. The second one
/// fails the input lock and is dropped; the first remains pooled.
#[test]
fn conflicting_inputs_drop_the_second_snapshot() {
    let mut fx = Fixture::new(4);
    let source = Hash::from_bytes(&[7]);
    let owner = fx.keys[0].public_key();
    fx.store.credit_output(source, 0, Output { amount: 10, owner });

    let tx_a = Transaction {
        inputs: vec![Input { source, index: 0 }],
        outputs: vec![],
        extra: vec![1],
    };
    let tx_b = Transaction {
        inputs: vec![Input { source, index: 0 }],
        outputs: vec![],
        extra: vec![2],
    };

    let mut a = fx.external_snapshot(1, 2, tx_a, 1, gap_ns() + 1);
    a.sign(&fx.keys[1]);
    fx.node.handle_snapshot(&mut a).unwrap();
    assert_eq!(fx.peer.sends().len(), 1);
    assert!(fx.node.pooled_signatures(&a.payload_hash()).is_some());

    let mut b = fx.external_snapshot(1, 2, tx_b, 1, gap_ns() + 2);
    b.sign(&fx.keys[1]);
    fx.node.handle_snapshot(&mut b).unwrap();

    // Dropped at the lock: success to the caller, no gossip, no pool entry.
    assert_eq!(fx.peer.sends().len(), 1);
    assert!(fx.node.pooled_signatures(&b.payload_hash()).is_none());
    assert_eq!(fx.store.snapshot_count(), 0);
    let utxo = fx.store.read_utxo(&source, 0).unwrap().unwrap();
    assert_eq!(utxo.locked_by, Some(a.transaction.payload_hash()));
}

/// Re-injecting a persisted snapshot is a no-op.
#[test]
fn persisted_snapshot_reinjection_is_a_noop() {
    let mut fx = Fixture::new_with_self_state(4, ValidatorState::Pending);
    let ts = gap_ns() + 1;
    let base = accumulate_to_threshold(&mut fx, 8, 1, ts);
    assert_eq!(fx.store.snapshot_count(), 1);
    let sends_before = fx.peer.sends().len();

    let mut replay = base.clone();
    replay.sign(&fx.keys[1]);
    fx.node.handle_snapshot(&mut replay).unwrap();

    assert_eq!(fx.store.snapshot_count(), 1);
    assert_eq!(fx.peer.sends().len(), sends_before);
    let cache = fx.node.graph().cache_round(&fx.id(1)).unwrap();
    assert_eq!(cache.snapshots.len(), 1);
}

/// Merging the same signature into the pool twice leaves the pool
/// unchanged.
#[test]
fn pool_merge_is_idempotent() {
    let mut fx = Fixture::new_with_self_state(4, ValidatorState::Pending);
    let tx = fx.seeded_transaction(9);
    let base = fx.external_snapshot(1, 2, tx, 1, gap_ns() + 1);

    let mut first = base.clone();
    first.sign(&fx.keys[1]);
    fx.node.handle_snapshot(&mut first).unwrap();
    let pool_before = fx
        .node
        .pooled_signatures(&base.payload_hash())
        .unwrap()
        .to_vec();

    let mut replay = base.clone();
    replay.sign(&fx.keys[1]);
    fx.node.handle_snapshot(&mut replay).unwrap();
    let pool_after = fx
        .node
        .pooled_signatures(&base.payload_hash())
        .unwrap()
        .to_vec();

    assert_eq!(pool_before, pool_after);
}

/// Invariants: per-validator round numbering, topological order, link
/// monotonicity, and reload-equals-live hashes across a full cycle of
/// finalization and round advancement.
#[test]
fn graph_invariants_hold_across_rounds() {
    let mut fx = Fixture::new_with_self_state(4, ValidatorState::Pending);
    let producer = fx.id(1);
    let ts = gap_ns() + 1;

    // Round 1 fills and finalizes.
    let first = accumulate_to_threshold(&mut fx, 10, 1, ts);
    let link_before = fx.store.read_round_link(&producer, &producer).unwrap();

    // Advance to round 2.
    let sealed = fx.node.graph().cache_round(&producer).unwrap().seal();
    let ts2 = ts + gap_ns() + 1;
    let tx2 = fx.seeded_transaction(11);
    let mut advance = fx.external_snapshot(1, 2, tx2, 2, ts2);
    advance.references[0] = sealed.hash;
    advance.sign(&fx.keys[1]);
    fx.node.handle_snapshot(&mut advance).unwrap();

    // Fill round 2 to the threshold.
    let tx3 = fx.seeded_transaction(12);
    let mut base = fx.external_snapshot(1, 2, tx3, 2, ts2 + 1);
    base.references[0] = sealed.hash;
    for signer in 1..4 {
        let mut copy = base.clone();
        copy.sign(&fx.keys[signer]);
        fx.node.handle_snapshot(&mut copy).unwrap();
    }

    // Topological order strictly increases in persistence order.
    let first_persisted = fx
        .store
        .read_snapshot_by_transaction_hash(&first.transaction.payload_hash())
        .unwrap()
        .unwrap();
    let second_persisted = fx
        .store
        .read_snapshot_by_transaction_hash(&base.transaction.payload_hash())
        .unwrap()
        .unwrap();
    assert!(second_persisted.topological_order > first_persisted.topological_order);

    // Recorded links never regressed.
    let link_after = fx.store.read_round_link(&producer, &producer).unwrap();
    assert!(link_after >= link_before);
    assert_eq!(link_after, 1);

    // cache.number == final.number + 1 for every validator.
    for id in fx.node.graph().nodes().to_vec() {
        let cache = fx.node.graph().cache_round(&id).unwrap();
        let final_round = fx.node.graph().final_round(&id).unwrap();
        assert_eq!(cache.number, final_round.number + 1);
    }

    // Reloading the graph from the store reproduces the live hashes.
    let reloaded = skein_kernel::RoundGraph::load(fx.store.as_ref()).unwrap();
    for id in fx.node.graph().nodes().to_vec() {
        assert_eq!(
            reloaded.final_round(&id).unwrap().hash,
            fx.node.graph().final_round(&id).unwrap().hash,
        );
    }
    assert_eq!(reloaded.cache_round(&producer).unwrap().number, 2);
}

/// The relay path forwards an external snapshot to its origin only.
#[test]
fn relay_sends_to_origin_only() {
    let mut fx = Fixture::new(4);
    let tx = fx.seeded_transaction(13);
    let mut s = fx.external_snapshot(1, 2, tx, 1, gap_ns() + 1);
    s.sign(&fx.keys[1]);

    fx.node.handle_snapshot(&mut s).unwrap();

    let sends = fx.peer.sends();
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0].0, fx.id(1));
    // The forwarded copy carries the origin's signature plus our co-sign.
    assert_eq!(sends[0].1.signatures.len(), 2);
}
