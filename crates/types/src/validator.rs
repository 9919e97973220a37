//! Validator set entries.

use crate::{NodeId, PublicKey};

/// Lifecycle state of a validator in the consensus set.
///
/// Acceptance is a runtime predicate: a pending validator is known to the
/// network (it has rounds in the graph) but its signatures do not count
/// toward finalization and it receives no consensus broadcasts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidatorState {
    Pending,
    Accepted,
}

/// One entry in the fixed validator set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Validator {
    pub node_id: NodeId,
    pub public_key: PublicKey,
    pub state: ValidatorState,
}

impl Validator {
    pub fn accepted(node_id: NodeId, public_key: PublicKey) -> Self {
        Self {
            node_id,
            public_key,
            state: ValidatorState::Accepted,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.state == ValidatorState::Accepted
    }
}
