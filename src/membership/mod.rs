//! Membership & Discovery Module
//!
//! Gossip-based membership (SWIM-like) that produces the naming server list.
//! Distro responsibility and raft peers are derived from what this module
//! publishes.
//!
//! ## Core Mechanisms
//! - **Probes**: every probe interval one random up member is probed over UDP;
//!   probe and ack carry the sender's member digest.
//! - **Failure Detection**: silent members go Up -> Suspicious -> Down.
//! - **Incarnation Numbers**: a suspected server refutes with a higher incarnation.
//! - **Server List**: after every change the sorted HTTP addresses (all servers
//!   not down, servers up) go to every [`service::MemberChangeListener`].

pub mod service;
pub mod types;
