//! Push Module
//!
//! Tells subscribed clients that a service changed, over UDP, without waiting
//! for their next poll.
//!
//! ## Core Concepts
//! - [`service::PushService`]: subscriber table keyed by service and client
//!   address. Change notifications are coalesced per service, re-rendered per
//!   subscriber through its [`DataSource`] and sent with ack tracking and a
//!   bounded retransmit.
//! - [`DataSource`]: renders what one subscriber should see. The registry
//!   provides it, so this module never reads the registry directly.
//! - [`PushTransport`]: the datagram seam. [`udp::UdpPushTransport`] in
//!   production, an in-memory fake in tests.

pub mod service;
pub mod udp;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use std::net::SocketAddr;

pub use service::{PushClient, PushService};
pub use udp::UdpPushTransport;

/// Renders the current view of a service for one subscriber.
pub trait DataSource: Send + Sync {
    /// `None` when there is nothing to send.
    fn data(&self, client: &PushClient) -> Option<serde_json::Value>;
}

#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn send(&self, target: SocketAddr, payload: &[u8]) -> anyhow::Result<()>;

    /// Next datagram addressed to this node.
    async fn recv(&self) -> anyhow::Result<(Vec<u8>, SocketAddr)>;
}
