use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Active health checker configured on a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum HealthChecker {
    #[default]
    Tcp,
    Http {
        #[serde(default)]
        path: String,
        /// `Name:Value` pairs separated by `|`.
        #[serde(default)]
        headers: String,
        #[serde(default = "default_expected_code")]
        expected_response_code: u16,
    },
    Mysql {
        #[serde(default)]
        user: String,
        #[serde(default)]
        pwd: String,
        #[serde(default)]
        cmd: String,
    },
    None,
}

fn default_expected_code() -> u16 {
    200
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealthCheckType {
    Tcp,
    Http,
    Mysql,
    None,
}

impl HealthChecker {
    pub fn kind(&self) -> HealthCheckType {
        match self {
            HealthChecker::Tcp => HealthCheckType::Tcp,
            HealthChecker::Http { .. } => HealthCheckType::Http,
            HealthChecker::Mysql { .. } => HealthCheckType::Mysql,
            HealthChecker::None => HealthCheckType::None,
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, HealthChecker::None)
    }
}

impl std::fmt::Display for HealthChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthChecker::Tcp => write!(f, "TCP"),
            HealthChecker::Http {
                path,
                expected_response_code,
                ..
            } => write!(f, "HTTP({path},{expected_response_code})"),
            HealthChecker::Mysql { user, .. } => write!(f, "MYSQL({user})"),
            HealthChecker::None => write!(f, "NONE"),
        }
    }
}

/// Last heartbeat time in epoch millis.
///
/// Clones share the same cell, so a beat recorded through any copy of an
/// instance is visible to every snapshot that copy was taken from.
#[derive(Debug, Clone)]
pub struct BeatStamp(Arc<AtomicU64>);

impl BeatStamp {
    pub fn new(millis: u64) -> Self {
        Self(Arc::new(AtomicU64::new(millis)))
    }

    pub fn now() -> Self {
        Self::new(now_millis())
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, millis: u64) {
        self.0.store(millis, Ordering::Release);
    }

    pub fn touch(&self) {
        self.set(now_millis());
    }

    /// Keep the newer of the two timestamps.
    pub fn merge(&self, other: &BeatStamp) {
        self.0.fetch_max(other.get(), Ordering::AcqRel);
    }
}

impl Default for BeatStamp {
    fn default() -> Self {
        Self::now()
    }
}

impl Serialize for BeatStamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.get())
    }
}

impl<'de> Deserialize<'de> for BeatStamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u64::deserialize(deserializer).map(BeatStamp::new)
    }
}
