//! Distro Naming Library
//!
//! Service registry and discovery control plane. The binary (`main.rs`) only
//! parses arguments and hands a [`config::NamingConfig`] to [`server::Node`].
//!
//! ## Architecture Modules
//! - **`model`**: services, clusters, instances, datums and the key scheme.
//! - **`registry`**: the in-memory service map, instance operators (v1/v2),
//!   views served to clients and service status synchronization.
//! - **`consistency`**: the AP store (distro) for ephemeral data and a
//!   raft-style CP store for persistent data, behind one delegate.
//! - **`distro`**: hashing of services onto responsible servers and the
//!   peer wire types.
//! - **`membership`**: gossip (SWIM-like) discovery that produces the server list.
//! - **`health`**: client beat checks and active TCP/HTTP probes.
//! - **`push`**: UDP push of changed services to subscribed clients.
//! - **`auth`**: token login and namespace-scoped permissions.
//! - **`storage`**: the local key-value store with file snapshots.
//! - **`transport`**: HTTP calls between servers.
//! - **`api`**: the axum HTTP surface.

pub mod api;
pub mod auth;
pub mod config;
pub mod consistency;
pub mod distro;
pub mod error;
pub mod health;
pub mod membership;
pub mod model;
pub mod push;
pub mod registry;
pub mod server;
pub mod storage;
pub mod transport;
