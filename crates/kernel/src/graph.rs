//! Per-node view of every validator's rounds.
//!
//! The graph is a mapping of values: no back-pointers from snapshots to
//! rounds or between rounds, so plain ownership suffices. It is mutated
//! only on the handler thread.

use crate::error::KernelError;
use crate::round::{CacheRound, FinalRound};
use skein_storage::Store;
use skein_types::NodeId;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info};

/// Read-only projection of one sealed round, refreshed after each handler
/// operation for consumers that must not observe intermediate state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoundSummary {
    pub node_id: NodeId,
    pub number: u64,
    pub start: u64,
}

/// The rounds of every known validator, as seen by one node.
#[derive(Debug)]
pub struct RoundGraph {
    pub(crate) nodes: Vec<NodeId>,
    pub(crate) cache_round: HashMap<NodeId, CacheRound>,
    pub(crate) final_round: HashMap<NodeId, FinalRound>,
    final_cache: Vec<RoundSummary>,
}

impl RoundGraph {
    /// Bootstrap the graph from persistent state.
    ///
    /// For each validator the head round becomes its open cache round and
    /// the round before it is re-sealed as the final round. A validator
    /// that has never finalized gets a synthetic empty cache at round one
    /// and the genesis final at round zero.
    pub fn load(store: &dyn Store) -> Result<Self, KernelError> {
        let mut graph = Self {
            nodes: Vec::new(),
            cache_round: HashMap::new(),
            final_round: HashMap::new(),
            final_cache: Vec::new(),
        };

        for node_id in store.read_nodes_list()? {
            graph.nodes.push(node_id);

            let cache = load_head_round(store, node_id)?;
            let final_number = if cache.number == 0 {
                graph
                    .cache_round
                    .insert(node_id, CacheRound::open(node_id, 1, 0));
                0
            } else {
                let number = cache.number - 1;
                graph.cache_round.insert(node_id, cache);
                number
            };

            let final_round = load_final_round(store, node_id, final_number)?;
            graph.final_round.insert(node_id, final_round);
        }

        info!(validators = graph.nodes.len(), "loaded round graph");
        debug!("\n{graph}");
        graph.update_final_cache();
        Ok(graph)
    }

    /// Validator ids known to this graph, in store order.
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.cache_round.contains_key(node_id)
    }

    pub fn cache_round(&self, node_id: &NodeId) -> Option<&CacheRound> {
        self.cache_round.get(node_id)
    }

    pub fn final_round(&self, node_id: &NodeId) -> Option<&FinalRound> {
        self.final_round.get(node_id)
    }

    /// All sealed rounds, one per validator.
    pub fn final_rounds(&self) -> impl Iterator<Item = &FinalRound> {
        self.final_round.values()
    }

    /// The read-only projection refreshed by [`Self::update_final_cache`].
    pub fn final_cache(&self) -> &[RoundSummary] {
        &self.final_cache
    }

    /// Rebuild the read-only projection from the current final rounds.
    ///
    /// Runs after every handler operation, always on the handler thread,
    /// so readers observe either the pre- or post-state but never a mix.
    pub fn update_final_cache(&mut self) {
        self.final_cache = self
            .nodes
            .iter()
            .filter_map(|id| self.final_round.get(id))
            .map(|f| RoundSummary {
                node_id: f.node_id,
                number: f.number,
                start: f.start,
            })
            .collect();
    }
}

impl fmt::Display for RoundGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "round graph:")?;
        for id in &self.nodes {
            if let (Some(final_round), Some(cache)) =
                (self.final_round.get(id), self.cache_round.get(id))
            {
                writeln!(
                    f,
                    "  {id} final {}@{} {} cache {}@{}",
                    final_round.number,
                    final_round.start,
                    final_round.hash,
                    cache.number,
                    cache.start,
                )?;
            }
        }
        Ok(())
    }
}

/// Load the open head round for one validator.
fn load_head_round(store: &dyn Store, node_id: NodeId) -> Result<CacheRound, KernelError> {
    let meta = store.read_round_meta(&node_id)?;
    let snapshots = store.read_snapshots_for_node_round(&node_id, meta.number)?;

    let mut end = 0;
    for s in &snapshots {
        if s.timestamp < meta.start {
            return Err(KernelError::Corrupted(format!(
                "snapshot at {} precedes round {} start {} on {node_id}",
                s.timestamp, meta.number, meta.start
            )));
        }
        end = end.max(s.timestamp);
    }

    Ok(CacheRound {
        node_id,
        number: meta.number,
        start: meta.start,
        end,
        snapshots,
    })
}

/// Re-seal a persisted round into its final form.
fn load_final_round(
    store: &dyn Store,
    node_id: NodeId,
    number: u64,
) -> Result<FinalRound, KernelError> {
    let snapshots = store.read_snapshots_for_node_round(&node_id, number)?;
    if snapshots.is_empty() {
        if number == 0 {
            return Ok(FinalRound::genesis(node_id));
        }
        return Err(KernelError::Corrupted(format!(
            "sealed round {number} on {node_id} has no snapshots"
        )));
    }

    let start = snapshots[0].timestamp;
    let end = snapshots[snapshots.len() - 1].timestamp;
    for s in &snapshots {
        if s.timestamp < start || s.timestamp > end {
            return Err(KernelError::Corrupted(format!(
                "unsorted snapshots for round {number} on {node_id}"
            )));
        }
    }

    Ok(CacheRound {
        node_id,
        number,
        start,
        end,
        snapshots,
    }
    .seal())
}
