//! Runtime switches.
//!
//! [`SwitchDomain`] is replicated through the persistent consistency path under
//! the switch key; [`Switches`] publishes the current value copy-on-write so
//! readers never see a half-applied update.

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{NamingError, Result};

/// Response-time tuning for one active health checker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthParams {
    pub min: u64,
    pub max: u64,
    pub factor: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchDomain {
    pub default_push_cache_millis: u64,
    pub client_beat_interval: u64,
    pub default_cache_millis: u64,
    pub distro_threshold: f32,
    pub health_check_enabled: bool,
    pub distro_enabled: bool,
    pub push_enabled: bool,
    pub light_beat_enabled: bool,
    pub default_instance_ephemeral: bool,
    pub check_times: u32,
    pub http_health_params: HealthParams,
    pub tcp_health_params: HealthParams,
    pub mysql_health_params: HealthParams,
    pub service_status_synchronization_period_millis: u64,
    pub server_status_synchronization_period_millis: u64,
    pub distro_server_expired_millis: u64,
    pub disable_add_ip: bool,
    pub enable_authentication: bool,
    /// Minimum client version per agent family allowed to receive pushes.
    pub push_version_floors: BTreeMap<String, String>,
}

impl Default for SwitchDomain {
    fn default() -> Self {
        let push_version_floors = [
            ("java", "0.1.0"),
            ("go", "0.1.0"),
            ("python", "0.4.3"),
            ("c", "1.0.12"),
            ("csharp", "0.9.0"),
            ("rust", "0.1.0"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            default_push_cache_millis: 10_000,
            client_beat_interval: 5_000,
            default_cache_millis: 3_000,
            distro_threshold: 0.7,
            health_check_enabled: true,
            distro_enabled: true,
            push_enabled: true,
            light_beat_enabled: true,
            default_instance_ephemeral: true,
            check_times: 3,
            http_health_params: HealthParams {
                min: 500,
                max: 5_000,
                factor: 0.85,
            },
            tcp_health_params: HealthParams {
                min: 1_000,
                max: 5_000,
                factor: 0.75,
            },
            mysql_health_params: HealthParams {
                min: 2_000,
                max: 3_000,
                factor: 0.65,
            },
            service_status_synchronization_period_millis: 5_000,
            server_status_synchronization_period_millis: 2_000,
            distro_server_expired_millis: 10_000,
            disable_add_ip: false,
            enable_authentication: false,
            push_version_floors,
        }
    }
}

impl SwitchDomain {
    /// Apply a single `entry=value` change, as sent by operators.
    pub fn apply(&mut self, entry: &str, value: &str) -> Result<()> {
        fn flag(v: &str) -> Result<bool> {
            v.parse()
                .map_err(|_| NamingError::invalid(format!("expected true/false, got {v}")))
        }
        fn millis(v: &str) -> Result<u64> {
            v.parse()
                .map_err(|_| NamingError::invalid(format!("expected milliseconds, got {v}")))
        }

        match entry {
            "defaultPushCacheMillis" => self.default_push_cache_millis = millis(value)?,
            "clientBeatInterval" => self.client_beat_interval = millis(value)?,
            "defaultCacheMillis" => self.default_cache_millis = millis(value)?,
            "distroThreshold" => {
                let threshold: f32 = value
                    .parse()
                    .map_err(|_| NamingError::invalid(format!("bad threshold {value}")))?;
                if !(0.0..=1.0).contains(&threshold) {
                    return Err(NamingError::invalid("distroThreshold must be within [0, 1]"));
                }
                self.distro_threshold = threshold;
            }
            "healthCheckEnabled" => self.health_check_enabled = flag(value)?,
            "distroEnabled" => self.distro_enabled = flag(value)?,
            "pushEnabled" => self.push_enabled = flag(value)?,
            "lightBeatEnabled" => self.light_beat_enabled = flag(value)?,
            "defaultInstanceEphemeral" => self.default_instance_ephemeral = flag(value)?,
            "checkTimes" => {
                let times: u32 = value
                    .parse()
                    .map_err(|_| NamingError::invalid(format!("bad checkTimes {value}")))?;
                if times == 0 {
                    return Err(NamingError::invalid("checkTimes must be positive"));
                }
                self.check_times = times;
            }
            "serviceStatusSynchronizationPeriodMillis" => {
                self.service_status_synchronization_period_millis = millis(value)?
            }
            "serverStatusSynchronizationPeriodMillis" => {
                self.server_status_synchronization_period_millis = millis(value)?
            }
            "distroServerExpiredMillis" => self.distro_server_expired_millis = millis(value)?,
            "disableAddIP" => self.disable_add_ip = flag(value)?,
            "enableAuthentication" => self.enable_authentication = flag(value)?,
            other => {
                if let Some(agent) = other.strip_prefix("pushVersion.") {
                    self.push_version_floors
                        .insert(agent.to_lowercase(), value.to_string());
                } else {
                    return Err(NamingError::invalid(format!("unknown switch entry {other}")));
                }
            }
        }

        Ok(())
    }
}

pub struct Switches {
    current: ArcSwap<SwitchDomain>,
}

impl Switches {
    pub fn new(initial: SwitchDomain) -> Arc<Self> {
        Arc::new(Self {
            current: ArcSwap::from_pointee(initial),
        })
    }

    pub fn load(&self) -> Arc<SwitchDomain> {
        self.current.load_full()
    }

    pub fn store(&self, domain: SwitchDomain) {
        self.current.store(Arc::new(domain));
    }
}
