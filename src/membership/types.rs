use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::config::ServerConfig;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MemberId(pub String);

impl MemberId {
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MemberState {
    Up,
    Suspicious,
    Down,
}

/// One naming server as seen by gossip.
///
/// `address` (the HTTP API address) identifies the server everywhere else:
/// distro mapping, raft peers and peer calls. `gossip_addr` only carries
/// membership traffic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub address: SocketAddr,
    pub gossip_addr: SocketAddr,
    pub state: MemberState,
    pub incarnation: u64,

    #[serde(skip)]
    pub last_contact: Option<Instant>,
}

impl Member {
    pub fn server_address(&self) -> String {
        self.address.to_string()
    }

    pub fn is_up(&self) -> bool {
        self.state == MemberState::Up
    }
}

/// Snapshot of the server list handed to membership listeners.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerList {
    /// Every server not declared down, sorted.
    pub all: Vec<String>,
    /// Servers currently up, sorted.
    pub healthy: Vec<String>,
}

/// Gossip wire messages, bincode-encoded over UDP.
///
/// Probes and their acks both carry a digest of the sender's member table,
/// so one exchange converges the two tables in both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MemberMessage {
    Probe {
        from: MemberId,
        incarnation: u64,
        digest: Vec<Member>,
    },
    ProbeAck {
        from: MemberId,
        incarnation: u64,
        digest: Vec<Member>,
    },
    Join {
        member: Member,
    },
    /// Graceful shutdown; the member is down at once instead of after the timeouts.
    Leave {
        id: MemberId,
        incarnation: u64,
    },
    Suspect {
        id: MemberId,
        incarnation: u64,
    },
    /// A suspected member proving it is up with a newer incarnation.
    Refute {
        id: MemberId,
        incarnation: u64,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct GossipTimings {
    pub probe_interval: Duration,
    pub suspect_after: Duration,
    pub down_after: Duration,
}

impl From<&ServerConfig> for GossipTimings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            probe_interval: Duration::from_millis(config.probe_interval_ms.max(1)),
            suspect_after: Duration::from_millis(config.suspect_after_ms),
            down_after: Duration::from_millis(config.down_after_ms),
        }
    }
}
