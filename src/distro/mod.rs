//! Distro Module
//!
//! Hash-partitioned ownership of service names across the healthy server
//! list, and the wire contract for the peer-to-peer anti-entropy protocol
//! that keeps ephemeral data converged.
//!
//! ## Core Concepts
//! - **Responsibility**: `hash(name) % servers` picks one slot; a node is
//!   responsible when that slot lies between its first and last occurrence in
//!   the sorted healthy list. Standalone nodes, a disabled distro switch, an
//!   empty list or a node missing from the list all degrade to "responsible".
//! - **Copy-on-write lists**: the server lists are swapped whole
//!   ([`arc_swap::ArcSwap`]) so readers never see a half-updated list.

pub mod mapper;
pub mod protocol;
