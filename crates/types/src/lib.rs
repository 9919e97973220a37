//! Core types for the Skein snapshot consensus kernel.
//!
//! This crate provides the foundational types used throughout the
//! workspace:
//!
//! - **Primitives**: [`Hash`], cryptographic keys and signatures
//! - **Identity**: [`NodeId`], [`Validator`]
//! - **Consensus units**: [`Snapshot`], [`Transaction`],
//!   [`SnapshotWithTopologicalOrder`]
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not
//! depend on any other workspace crates, making it the foundation layer.
//! All wire encodings here are hand-rolled and canonical: signatures and
//! round hashes are computed over these bytes, so two nodes must always
//! serialize the same value to the same string.

mod crypto;
mod hash;
mod snapshot;
mod transaction;
mod validator;

pub use crypto::{KeyPair, NodeId, PublicKey, Signature};
pub use hash::Hash;
pub use snapshot::{RoundLinks, Snapshot, SnapshotWithTopologicalOrder};
pub use transaction::{Input, Output, Transaction};
pub use validator::{Validator, ValidatorState};
