use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

use super::instance::Instance;
use super::types::HealthChecker;
use crate::error::{NamingError, Result};

static CLUSTER_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-zA-Z-]+$").expect("static regex"));

pub fn validate_cluster_name(name: &str) -> Result<()> {
    if !CLUSTER_NAME.is_match(name) {
        return Err(NamingError::invalid(format!(
            "cluster name can only have these characters: 0-9a-zA-Z-, current: {name}"
        )));
    }
    Ok(())
}

fn default_port() -> u16 {
    80
}

fn default_true() -> bool {
    true
}

/// Outcome of replacing one instance set of a cluster.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct IpChanges {
    /// `ip:port` of instances not present before.
    pub added: Vec<String>,
    /// `ip:port` of instances that disappeared.
    pub removed: Vec<String>,
    /// `ip:port` of instances present in both whose rendering changed.
    pub updated: Vec<String>,
}

impl IpChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }

    pub fn extend(&mut self, other: IpChanges) {
        self.added.extend(other.added);
        self.removed.extend(other.removed);
        self.updated.extend(other.updated);
    }
}

/// A named group of instances inside one service.
///
/// The configuration fields replicate through service metadata; the two
/// instance sets are rebuilt from instance-list records and never serialized
/// with the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub name: String,
    /// Owning service's grouped name; a name, not a handle.
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub health_checker: HealthChecker,
    #[serde(default = "default_port")]
    pub default_check_port: u16,
    #[serde(default = "default_port")]
    pub default_port: u16,
    #[serde(default = "default_true")]
    pub use_instance_port_for_check: bool,
    #[serde(default)]
    pub site_group: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(skip)]
    persistent: BTreeMap<String, Instance>,
    #[serde(skip)]
    ephemeral: BTreeMap<String, Instance>,
}

impl Cluster {
    pub fn new(name: impl Into<String>, service_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            service_name: service_name.into(),
            health_checker: HealthChecker::default(),
            default_check_port: default_port(),
            default_port: default_port(),
            use_instance_port_for_check: true,
            site_group: String::new(),
            metadata: BTreeMap::new(),
            persistent: BTreeMap::new(),
            ephemeral: BTreeMap::new(),
        }
    }

    pub fn with_health_checker(mut self, checker: HealthChecker) -> Self {
        self.health_checker = checker;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_cluster_name(&self.name)
    }

    /// Configuration-only copy, with both instance sets empty.
    pub fn config_only(&self) -> Cluster {
        Cluster {
            name: self.name.clone(),
            service_name: self.service_name.clone(),
            health_checker: self.health_checker.clone(),
            default_check_port: self.default_check_port,
            default_port: self.default_port,
            use_instance_port_for_check: self.use_instance_port_for_check,
            site_group: self.site_group.clone(),
            metadata: self.metadata.clone(),
            persistent: BTreeMap::new(),
            ephemeral: BTreeMap::new(),
        }
    }

    pub fn all_ips(&self) -> Vec<Instance> {
        self.persistent
            .values()
            .chain(self.ephemeral.values())
            .cloned()
            .collect()
    }

    pub fn all_ips_by(&self, ephemeral: bool) -> Vec<Instance> {
        self.instances(ephemeral).values().cloned().collect()
    }

    pub fn instance_count(&self) -> usize {
        self.persistent.len() + self.ephemeral.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instance_count() == 0
    }

    /// No instances and no settings beyond what [`Cluster::new`] gives.
    pub fn is_blank(&self) -> bool {
        self.is_empty()
            && self.health_checker == HealthChecker::default()
            && self.default_check_port == default_port()
            && self.default_port == default_port()
            && self.use_instance_port_for_check
            && self.site_group.is_empty()
            && self.metadata.is_empty()
    }

    pub fn contains(&self, ip_addr: &str) -> bool {
        self.persistent.contains_key(ip_addr) || self.ephemeral.contains_key(ip_addr)
    }

    pub fn get_mut(&mut self, ip_addr: &str) -> Option<&mut Instance> {
        if let Some(found) = self.ephemeral.get_mut(ip_addr) {
            return Some(found);
        }
        self.persistent.get_mut(ip_addr)
    }

    pub fn get(&self, ip_addr: &str) -> Option<&Instance> {
        self.ephemeral
            .get(ip_addr)
            .or_else(|| self.persistent.get(ip_addr))
    }

    /// Port probed by active health checks for `instance`.
    pub fn check_port(&self, instance: &Instance) -> u16 {
        if self.use_instance_port_for_check && instance.port > 0 {
            instance.port
        } else {
            self.default_check_port
        }
    }

    fn instances(&self, ephemeral: bool) -> &BTreeMap<String, Instance> {
        if ephemeral {
            &self.ephemeral
        } else {
            &self.persistent
        }
    }

    /// Replace one instance set with `ips`.
    ///
    /// An instance present before and after keeps its previous health bit unless
    /// the incoming copy is marked; the local checker is the authority on health.
    pub fn update_ips(&mut self, ips: Vec<Instance>, ephemeral: bool) -> IpChanges {
        let old = if ephemeral {
            std::mem::take(&mut self.ephemeral)
        } else {
            std::mem::take(&mut self.persistent)
        };

        let mut changes = IpChanges::default();
        let mut next = BTreeMap::new();

        for mut ip in ips {
            ip.ephemeral = ephemeral;
            let key = ip.ip_addr();

            match old.get(&key) {
                Some(previous) => {
                    let changed = previous.sort_key() != ip.sort_key();
                    if changed {
                        if !ip.marked {
                            ip.healthy = previous.healthy;
                        }
                        if ip.healthy != previous.healthy {
                            info!(
                                "{} {{SYNC}} IP-{} {}@{}",
                                self.service_name,
                                if ip.healthy { "ENABLED" } else { "DISABLED" },
                                key,
                                self.name
                            );
                        }
                        if ip.weight != previous.weight {
                            info!(
                                "{} {{SYNC}} {{IP-UPDATED}} {} weight {} -> {}",
                                self.service_name, key, previous.weight, ip.weight
                            );
                        }
                        changes.updated.push(key.clone());
                    }
                    ip.last_beat.merge(&previous.last_beat);
                }
                None => changes.added.push(key.clone()),
            }

            next.insert(key, ip);
        }

        for key in old.keys() {
            if !next.contains_key(key) {
                changes.removed.push(key.clone());
            }
        }

        if !changes.added.is_empty() {
            info!(
                "{} {{SYNC}} {{IP-NEW}} cluster: {}, new ips: {:?}",
                self.service_name, self.name, changes.added
            );
        }
        if !changes.removed.is_empty() {
            info!(
                "{} {{SYNC}} {{IP-DEAD}} cluster: {}, dead ips: {:?}",
                self.service_name, self.name, changes.removed
            );
        }

        if ephemeral {
            self.ephemeral = next;
        } else {
            self.persistent = next;
        }

        changes
    }

    /// Copy configuration from `other`, leaving instances untouched.
    pub fn update(&mut self, other: &Cluster) {
        if self.health_checker != other.health_checker {
            info!(
                "[CLUSTER-UPDATE] {}:{}, healthChecker: {} -> {}",
                self.service_name, self.name, self.health_checker, other.health_checker
            );
            self.health_checker = other.health_checker.clone();
        }
        if self.default_check_port != other.default_check_port {
            info!(
                "[CLUSTER-UPDATE] {}:{}, defaultCheckPort: {} -> {}",
                self.service_name, self.name, self.default_check_port, other.default_check_port
            );
            self.default_check_port = other.default_check_port;
        }
        if self.default_port != other.default_port {
            self.default_port = other.default_port;
        }
        if self.site_group != other.site_group {
            info!(
                "[CLUSTER-UPDATE] {}:{}, siteGroup: {} -> {}",
                self.service_name, self.name, self.site_group, other.site_group
            );
            self.site_group = other.site_group.clone();
        }
        if self.use_instance_port_for_check != other.use_instance_port_for_check {
            self.use_instance_port_for_check = other.use_instance_port_for_check;
        }
        self.metadata = other.metadata.clone();
    }
}
