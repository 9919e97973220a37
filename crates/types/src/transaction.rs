//! Transaction types.
//!
//! The kernel treats transactions as opaque commitments: what matters to
//! consensus is a stable content hash and which previous outputs the
//! transaction claims. Validation policy (do the claimed inputs exist,
//! are they unlocked) lives in the kernel, executed against the store.

use crate::{Hash, PublicKey};

/// A reference to a previous transaction output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Input {
    /// Hash of the transaction that produced the output.
    pub source: Hash,
    /// Output index within that transaction.
    pub index: u32,
}

/// A spendable output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Output {
    pub amount: u64,
    pub owner: PublicKey,
}

/// A transfer of previous outputs to new owners.
///
/// Inputs may be empty (deposit-style transactions create outputs from
/// nothing); the kernel only cares that non-empty inputs resolve.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
    pub extra: Vec<u8>,
}

impl Transaction {
    /// Deterministic byte serialization.
    ///
    /// Field order is fixed, counts and integers are big-endian, and there
    /// is no self-describing framing: two equal transactions encode to
    /// identical bytes on every node.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12 + self.inputs.len() * 36 + self.outputs.len() * 40);
        out.extend_from_slice(&(self.inputs.len() as u32).to_be_bytes());
        for input in &self.inputs {
            out.extend_from_slice(input.source.as_bytes());
            out.extend_from_slice(&input.index.to_be_bytes());
        }
        out.extend_from_slice(&(self.outputs.len() as u32).to_be_bytes());
        for output in &self.outputs {
            out.extend_from_slice(&output.amount.to_be_bytes());
            out.extend_from_slice(output.owner.as_bytes());
        }
        out.extend_from_slice(&(self.extra.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.extra);
        out
    }

    /// Content hash of the encoded transaction.
    pub fn payload_hash(&self) -> Hash {
        Hash::from_bytes(&self.encode())
    }
}
