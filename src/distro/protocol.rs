//! Distro Network Protocol
//!
//! Endpoints and payloads exchanged between naming servers on the ephemeral
//! (AP) path, plus the transport seam the sync tasks call through.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::datum::Datum;

// --- API Endpoints ---

/// Peer reports `{datumKey: checksum}` for the keys it owns.
pub const ENDPOINT_CHECKSUM: &str = "/v1/ns/distro/checksum";
/// Peer pushes changed datums after a local write.
pub const ENDPOINT_DATUM: &str = "/v1/ns/distro/datum";
/// Pull datums by key.
pub const ENDPOINT_DATUM_QUERY: &str = "/v1/ns/distro/datum/query";
/// Pull every ephemeral datum (startup load).
pub const ENDPOINT_SNAPSHOT: &str = "/v1/ns/distro/snapshot";
/// Peer reports `{service: checksum}` per namespace.
pub const ENDPOINT_SERVICE_STATUS: &str = "/v1/ns/distro/service/status";
/// Pull the health bits of one service.
pub const ENDPOINT_SERVICE_HEALTH: &str = "/v1/ns/distro/service/health";

// --- Data Transfer Objects ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecksumReport {
    /// Sender's server address.
    pub source: String,
    pub checksums: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatumBatch {
    pub source: String,
    pub datums: Vec<Datum>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatumQuery {
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatusReport {
    pub source: String,
    pub namespace_id: String,
    /// Grouped service name to service checksum.
    pub checksums: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealthQuery {
    pub namespace_id: String,
    pub service_name: String,
}

/// `ip:port:cluster` to health bit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub checksum: String,
    pub health: BTreeMap<String, bool>,
}

/// Outbound calls of the ephemeral sync tasks.
///
/// Failures are reported as `anyhow` errors; callers log them and retry on
/// their next cycle.
#[async_trait]
pub trait DistroTransport: Send + Sync {
    async fn sync_checksums(&self, server: &str, report: &ChecksumReport) -> anyhow::Result<()>;

    async fn sync_datums(&self, server: &str, batch: &DatumBatch) -> anyhow::Result<()>;

    async fn fetch_datums(&self, server: &str, keys: &[String]) -> anyhow::Result<Vec<Datum>>;

    async fn fetch_snapshot(&self, server: &str) -> anyhow::Result<Vec<Datum>>;

    async fn sync_service_status(&self, server: &str, report: &ServiceStatusReport) -> anyhow::Result<()>;

    async fn fetch_service_health(
        &self,
        server: &str,
        query: &ServiceHealthQuery,
    ) -> anyhow::Result<ServiceHealth>;
}
