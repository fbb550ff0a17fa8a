use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use super::keys::DEFAULT_CLUSTER;
use super::types::BeatStamp;
use crate::error::{NamingError, Result};

pub const MAX_WEIGHT: f64 = 10_000.0;
pub const MIN_POSITIVE_WEIGHT: f64 = 0.01;

/// Site label embedded in datum keys.
pub const LOCALHOST_SITE: &str = "unknown";

pub const HEART_BEAT_TIMEOUT_KEY: &str = "preserved.heart.beat.timeout";
pub const IP_DELETE_TIMEOUT_KEY: &str = "preserved.ip.delete.timeout";
pub const HEART_BEAT_INTERVAL_KEY: &str = "preserved.heart.beat.interval";

static IPV4_LIKE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9.]+$").expect("static regex"));
static IPV4: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^((25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\.){3}(25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)$")
        .expect("static regex")
});

/// Clamp a weight into the routable range. Negative values pass through so
/// validation can reject them.
pub fn normalize_weight(weight: f64) -> f64 {
    if weight > MAX_WEIGHT {
        MAX_WEIGHT
    } else if weight > 0.0 && weight < MIN_POSITIVE_WEIGHT {
        MIN_POSITIVE_WEIGHT
    } else {
        weight
    }
}

fn deserialize_weight<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<f64, D::Error> {
    f64::deserialize(deserializer).map(normalize_weight)
}

fn default_weight() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_cluster() -> String {
    DEFAULT_CLUSTER.to_string()
}

/// One registered endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    #[serde(default)]
    pub instance_id: String,
    pub ip: String,
    /// `0` acts as a wildcard when matching.
    #[serde(default)]
    pub port: u16,
    #[serde(default = "default_weight", deserialize_with = "deserialize_weight")]
    pub weight: f64,
    #[serde(default = "default_true")]
    pub healthy: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub ephemeral: bool,
    /// Health pinned by an operator; syncs and checkers leave it alone.
    #[serde(default)]
    pub marked: bool,
    #[serde(default = "default_cluster")]
    pub cluster_name: String,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub last_beat: BeatStamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
}

impl Instance {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            instance_id: String::new(),
            ip: ip.into(),
            port,
            weight: 1.0,
            healthy: true,
            enabled: true,
            ephemeral: true,
            marked: false,
            cluster_name: default_cluster(),
            service_name: String::new(),
            metadata: BTreeMap::new(),
            last_beat: BeatStamp::now(),
            app: None,
        }
    }

    pub fn with_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster_name = cluster.into();
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_ephemeral(mut self, ephemeral: bool) -> Self {
        self.ephemeral = ephemeral;
        self
    }

    pub fn with_healthy(mut self, healthy: bool) -> Self {
        self.healthy = healthy;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// `ip:port`
    pub fn ip_addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// Map key used when merging instance lists.
    pub fn datum_key(&self) -> String {
        if self.port > 0 {
            format!(
                "{}:{}:{}:{}",
                self.ip, self.port, LOCALHOST_SITE, self.cluster_name
            )
        } else {
            format!("{}:{}:{}", self.ip, LOCALHOST_SITE, self.cluster_name)
        }
    }

    /// Rendering that participates in service checksums. Every field a
    /// discovering client can see is part of it.
    pub fn checksum_string(&self) -> String {
        format!(
            "{}:{}_{}_{}_{}_{}_{}_{}",
            self.ip,
            self.port,
            self.weight,
            self.healthy,
            self.enabled,
            self.ephemeral,
            self.cluster_name,
            self.metadata_string()
        )
    }

    /// Total order used to sort instances before hashing. Also the datum
    /// digest line, so any replicated field change alters it.
    pub fn sort_key(&self) -> String {
        format!(
            "{}_{}_{}_{}_{}_{}_{}",
            self.datum_key(),
            self.weight,
            self.healthy,
            self.enabled,
            self.ephemeral,
            self.marked,
            self.metadata_string()
        )
    }

    /// `k=v` pairs in key order.
    fn metadata_string(&self) -> String {
        self.metadata
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn generate_instance_id(&self) -> String {
        format!(
            "{}#{}#{}#{}",
            self.ip, self.port, self.cluster_name, self.service_name
        )
    }

    /// Address match where a zero port on either side matches any port.
    pub fn same_endpoint(&self, other: &Instance) -> bool {
        self.ip == other.ip
            && (self.port == other.port || self.port == 0 || other.port == 0)
            && self.ephemeral == other.ephemeral
    }

    /// Clamp weight and fill derived fields.
    pub fn normalize(&mut self) {
        self.weight = normalize_weight(self.weight);
        if self.cluster_name.is_empty() {
            self.cluster_name = default_cluster();
        }
        if self.instance_id.is_empty() {
            self.instance_id = self.generate_instance_id();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.ip.is_empty() {
            return Err(NamingError::invalid("instance ip can not be empty"));
        }
        if IPV4_LIKE.is_match(&self.ip) && !IPV4.is_match(&self.ip) {
            return Err(NamingError::invalid(format!("malformed ip: {}", self.ip)));
        }
        if !(0.0..=MAX_WEIGHT).contains(&self.weight) || self.weight.is_nan() {
            return Err(NamingError::invalid(format!(
                "weight must be within [0, {MAX_WEIGHT}], got {}",
                self.weight
            )));
        }
        super::cluster::validate_cluster_name(&self.cluster_name)?;
        Ok(())
    }

    fn metadata_millis(&self, key: &str) -> Option<u64> {
        self.metadata.get(key).and_then(|v| v.parse().ok())
    }

    pub fn heart_beat_timeout(&self, default_ms: u64) -> u64 {
        self.metadata_millis(HEART_BEAT_TIMEOUT_KEY)
            .unwrap_or(default_ms)
    }

    pub fn ip_delete_timeout(&self, default_ms: u64) -> u64 {
        self.metadata_millis(IP_DELETE_TIMEOUT_KEY)
            .unwrap_or(default_ms)
    }

    pub fn heart_beat_interval(&self, default_ms: u64) -> u64 {
        self.metadata_millis(HEART_BEAT_INTERVAL_KEY)
            .unwrap_or(default_ms)
    }
}
