//! Snapshot verifier.
//!
//! Decides whether an incoming snapshot may advance its producer's round
//! pointer. The verifier never mutates the graph: it works on fresh copies
//! of the producer's rounds and hands proposed replacements back to the
//! handler, which commits them only after the snapshot survives the rest
//! of the pipeline.

use crate::error::KernelError;
use crate::node::Node;
use crate::round::{CacheRound, FinalRound};
use skein_types::{RoundLinks, Snapshot};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Outcome of verifying an incoming snapshot.
pub(crate) enum Verdict {
    /// The snapshot may proceed; commit these rounds if it survives.
    Proceed {
        /// Round numbers referenced, keyed by referenced validator. Empty
        /// when no reference advancement occurred.
        links: RoundLinks,
        cache: CacheRound,
        final_round: FinalRound,
    },
    /// Handled rejection: already logged, snapshot dropped, graph
    /// untouched.
    Reject,
}

/// Result of reference validation.
enum ReferenceCheck {
    Valid(RoundLinks),
    Rejected(String),
}

impl Node {
    /// Strictly more than 2/3 of the accepted validator set has signed.
    pub(crate) fn verify_finalization(&self, s: &Snapshot) -> bool {
        let accepted = self.validators.iter().filter(|v| v.is_accepted()).count();
        s.signatures.len() > accepted * 2 / 3
    }

    /// Verify an incoming snapshot against the producer's current rounds.
    ///
    /// A snapshot whose payload already has pooled signatures, or that
    /// arrives past the threshold, is on the signature-merge path: its
    /// signature set is unioned with the pool and the rounds are left
    /// alone. Anything else may advance the producer's round before being
    /// checked for alignment and reference validity.
    pub(crate) fn verify_snapshot(&mut self, s: &mut Snapshot) -> Result<Verdict, KernelError> {
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

        let payload_hash = s.payload_hash();
        let pooled = self
            .signature_pool
            .get(&payload_hash)
            .cloned()
            .unwrap_or_default();

        if !pooled.is_empty() || self.verify_finalization(s) {
            let links = match self.verify_references(&final_round, s)? {
                ReferenceCheck::Valid(links) => links,
                ReferenceCheck::Rejected(reason) => {
                    warn!(%reason, tx = ?s.transaction.payload_hash(), "reference check failed on pooled snapshot");
                    RoundLinks::new()
                }
            };

            let mut seen: HashSet<_> = s.signatures.iter().copied().collect();
            for signature in pooled {
                if seen.insert(signature) {
                    s.signatures.push(signature);
                }
            }
            self.signature_pool
                .insert(payload_hash, s.signatures.clone());

            return Ok(Verdict::Proceed {
                links,
                cache,
                final_round,
            });
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

        if s.round_number != cache.number || s.timestamp < cache.end {
            debug!(
                node = ?s.node_id,
                round = s.round_number,
                expected = cache.number,
                timestamp = s.timestamp,
                round_end = cache.end,
                "round alignment mismatch, dropping snapshot"
            );
            return Ok(Verdict::Reject);
        }

        match self.verify_references(&final_round, s)? {
            ReferenceCheck::Valid(links) => Ok(Verdict::Proceed {
                links,
                cache,
                final_round,
            }),
            ReferenceCheck::Rejected(reason) => {
                warn!(%reason, node = ?s.node_id, "invalid references, dropping snapshot");
                Ok(Verdict::Reject)
            }
        }
    }

    /// Validate a snapshot's two references against the graph.
    ///
    /// `references[0]` must equal the producer's current final-round hash
    /// and `references[1]` must match some other validator's final round;
    /// both recorded links must be at or past what the store last saw for
    /// this producer.
    fn verify_references(
        &self,
        self_final: &FinalRound,
        s: &Snapshot,
    ) -> Result<ReferenceCheck, KernelError> {
        let [ref0, ref1] = s.references;
        if ref0 == ref1 {
            return Ok(ReferenceCheck::Rejected(format!(
                "identical references on {:?}",
                s.transaction.payload_hash()
            )));
        }
        if ref0 != self_final.hash {
            return Ok(ReferenceCheck::Rejected(format!(
                "self reference {ref0} does not match final round {}",
                self_final.hash
            )));
        }
        if s.node_id != self_final.node_id {
            return Err(KernelError::Inconsistent(format!(
                "final round {} checked against snapshot from {}",
                self_final.node_id, s.node_id
            )));
        }

        for final_round in self.graph.final_rounds() {
            if final_round.node_id == s.node_id || final_round.hash != ref1 {
                continue;
            }

            let self_link = self.store.read_round_link(&s.node_id, &self_final.node_id)?;
            if self_final.number < self_link {
                return Ok(ReferenceCheck::Rejected(format!(
                    "self link regression {self_link}=>{}",
                    self_final.number
                )));
            }
            let cross_link = self
                .store
                .read_round_link(&s.node_id, &final_round.node_id)?;
            if final_round.number < cross_link {
                return Ok(ReferenceCheck::Rejected(format!(
                    "cross link regression {cross_link}=>{}",
                    final_round.number
                )));
            }

            let mut links = RoundLinks::new();
            links.insert(self_final.node_id, self_final.number);
            links.insert(final_round.node_id, final_round.number);
            return Ok(ReferenceCheck::Valid(links));
        }

        Ok(ReferenceCheck::Rejected(format!(
            "references on {:?} do not match any final round",
            s.transaction.payload_hash()
        )))
    }
}
