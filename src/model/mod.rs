//! Data Model Module
//!
//! Plain in-memory entities with their invariants and no I/O:
//! a [`service::Service`] owns [`cluster::Cluster`]s by value, a cluster owns
//! its [`instance::Instance`]s by value. Back references are names only.
//!
//! ## Core Concepts
//! - **Checksum**: MD5 over the service fields plus the sorted instance list,
//!   recomputed after every mutation.
//! - **Datum keys**: [`keys`] builds the replicated keys for service metadata,
//!   instance lists (one per consistency path) and the switch record.
//! - **Weights**: clamped to `[0, 10000]`, tiny positive values raised to `0.01`.

pub mod cluster;
pub mod datum;
pub mod instance;
pub mod keys;
pub mod selector;
pub mod service;
pub mod types;

#[cfg(test)]
mod tests;
