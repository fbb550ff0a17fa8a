//! Configuration Module
//!
//! Static node configuration ([`NamingConfig`]) plus the runtime switch record
//! ([`switches::SwitchDomain`]) that operators can change while the cluster runs.
//!
//! ## Sources (lowest to highest precedence)
//! - Built-in defaults (`Default` impls below).
//! - An optional config file (toml, json or yaml, picked by extension).
//! - Environment variables prefixed with `NAMING__`, sections separated by `__`
//!   (e.g. `NAMING__SERVER__HTTP_ADDR=0.0.0.0:8848`).
//!
//! Command line flags are applied on top by the binary.

pub mod logging;
pub mod switches;

#[cfg(test)]
mod tests;

use anyhow::{Result, bail};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::registry::operator::OperatorVersion;
use switches::SwitchDomain;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConfig {
    pub server: ServerConfig,
    pub switches: SwitchDomain,
    pub distro: DistroConfig,
    pub raft: RaftConfig,
    pub health: HealthConfig,
    pub push: PushConfig,
    pub registry: RegistryConfig,
    pub auth: AuthConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address served by the HTTP API; also this node's identity in the server list.
    pub http_addr: SocketAddr,
    pub gossip_addr: SocketAddr,
    /// Gossip addresses of existing members to join through.
    pub seeds: Vec<SocketAddr>,
    pub standalone: bool,
    pub data_dir: PathBuf,
    pub probe_interval_ms: u64,
    /// Silence after which an up member becomes suspicious.
    pub suspect_after_ms: u64,
    /// Silence after which a suspicious member is down.
    pub down_after_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([127, 0, 0, 1], 8848)),
            gossip_addr: SocketAddr::from(([127, 0, 0, 1], 7848)),
            seeds: Vec::new(),
            standalone: false,
            data_dir: PathBuf::from("data"),
            probe_interval_ms: 500,
            suspect_after_ms: 5_000,
            down_after_ms: 10_000,
        }
    }
}

impl ServerConfig {
    pub fn local_address(&self) -> String {
        self.http_addr.to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistroConfig {
    pub report_initial_delay_ms: u64,
    pub sync_delay_ms: u64,
    pub request_timeout_ms: u64,
    pub retry_attempts: usize,
}

impl Default for DistroConfig {
    fn default() -> Self {
        Self {
            report_initial_delay_ms: 60_000,
            sync_delay_ms: 1_000,
            request_timeout_ms: 5_000,
            retry_attempts: 3,
        }
    }
}

impl DistroConfig {
    pub fn report_initial_delay(&self) -> Duration {
        Duration::from_millis(self.report_initial_delay_ms)
    }

    pub fn sync_delay(&self) -> Duration {
        Duration::from_millis(self.sync_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RaftConfig {
    pub heartbeat_interval_ms: u64,
    pub election_timeout_ms: u64,
    pub publish_timeout_ms: u64,
    pub snapshot_interval_ms: u64,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 5_000,
            election_timeout_ms: 15_000,
            publish_timeout_ms: 5_000,
            snapshot_interval_ms: 30 * 60 * 1_000,
        }
    }
}

impl RaftConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn election_timeout(&self) -> Duration {
        Duration::from_millis(self.election_timeout_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.snapshot_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Upper bound on probes in flight at once.
    pub worker_threads: usize,
    pub beat_check_interval_ms: u64,
    pub heart_beat_timeout_ms: u64,
    pub ip_delete_timeout_ms: u64,
    pub probe_timeout_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            worker_threads: (num_cpus::get() * 2).max(4),
            beat_check_interval_ms: 5_000,
            heart_beat_timeout_ms: 15_000,
            ip_delete_timeout_ms: 30_000,
            probe_timeout_ms: 500,
        }
    }
}

impl HealthConfig {
    pub fn beat_check_interval(&self) -> Duration {
        Duration::from_millis(self.beat_check_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub udp_bind: SocketAddr,
    pub ack_timeout_ms: u64,
    pub max_retry: u32,
    pub delay_ms: u64,
    pub zombie_sweep_interval_ms: u64,
    /// Payloads at least this large are gzip-compressed.
    pub compress_threshold: usize,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            udp_bind: SocketAddr::from(([0, 0, 0, 0], 0)),
            ack_timeout_ms: 10_000,
            max_retry: 1,
            delay_ms: 1_000,
            zombie_sweep_interval_ms: 20_000,
            compress_threshold: 1024,
        }
    }
}

impl PushConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn zombie_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.zombie_sweep_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub operator: OperatorVersion,
    /// Create unknown services on first registration instead of rejecting.
    pub auto_create_service: bool,
    /// Create unknown clusters on first registration instead of rejecting.
    pub auto_create_cluster: bool,
    pub service_wait_timeout_ms: u64,
    pub client_expired_ms: u64,
    pub client_sweep_interval_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            operator: OperatorVersion::V1,
            auto_create_service: true,
            auto_create_cluster: true,
            service_wait_timeout_ms: 5_000,
            client_expired_ms: 30_000,
            client_sweep_interval_ms: 5_000,
        }
    }
}

impl RegistryConfig {
    pub fn service_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.service_wait_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: bool,
    pub users: Vec<UserEntry>,
    pub max_failed_logins: u32,
    pub lock_duration_ms: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            users: Vec::new(),
            max_failed_logins: 5,
            lock_duration_ms: 5 * 60 * 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEntry {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub admin: bool,
    /// Namespaces this user may write to; empty means read-only.
    #[serde(default)]
    pub writable_namespaces: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "plain".to_string(),
        }
    }
}

impl NamingConfig {
    /// Layer the optional file and `NAMING__*` environment over the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("NAMING")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: NamingConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.suspect_after_ms >= self.server.down_after_ms {
            bail!("server.suspect_after_ms must be below server.down_after_ms");
        }
        if self.health.worker_threads == 0 {
            bail!("health.worker_threads must be positive");
        }
        if self.raft.heartbeat_interval_ms >= self.raft.election_timeout_ms {
            bail!("raft.heartbeat_interval_ms must be below raft.election_timeout_ms");
        }
        if !(0.0..=1.0).contains(&self.switches.distro_threshold) {
            bail!("switches.distro_threshold must be within [0, 1]");
        }
        if self.switches.check_times == 0 {
            bail!("switches.check_times must be positive");
        }
        Ok(())
    }
}
