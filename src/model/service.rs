use md5::{Digest, Md5};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

use super::cluster::{Cluster, IpChanges};
use super::instance::Instance;
use super::keys::DEFAULT_CLUSTER;
use super::selector::Selector;
use super::types::now_millis;
use crate::error::{NamingError, Result};

static SERVICE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-zA-Z@.:_-]+$").expect("static regex"));

pub fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

fn default_true() -> bool {
    true
}

/// What [`Service::update_ips`] did.
#[derive(Debug, Default)]
pub struct IpUpdate {
    pub changes: IpChanges,
    /// Clusters created because an instance named them.
    pub new_clusters: Vec<String>,
    /// Instances dropped because their cluster did not exist and creation is off.
    pub rejected: usize,
}

/// A service in one namespace, owning its clusters by value.
///
/// Serializes to the service metadata record: configuration and cluster
/// configuration only. Instance sets come from instance-list records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub namespace_id: String,
    /// Grouped name, `group@@service`.
    pub name: String,
    #[serde(default)]
    pub protect_threshold: f32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub selector: Selector,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub reset_weight: bool,
    #[serde(default)]
    pub cluster_map: BTreeMap<String, Cluster>,
    #[serde(default)]
    pub last_modified_millis: u64,
    #[serde(skip)]
    checksum: String,
}

impl Service {
    pub fn new(namespace_id: impl Into<String>, name: impl Into<String>) -> Self {
        let mut service = Self {
            namespace_id: namespace_id.into(),
            name: name.into(),
            protect_threshold: 0.0,
            enabled: true,
            selector: Selector::None,
            metadata: BTreeMap::new(),
            reset_weight: false,
            cluster_map: BTreeMap::new(),
            last_modified_millis: now_millis(),
            checksum: String::new(),
        };
        service.recalculate_checksum();
        service
    }

    pub fn validate(&self) -> Result<()> {
        if !SERVICE_NAME.is_match(&self.name) {
            return Err(NamingError::invalid(format!(
                "service name can only have these characters: 0-9a-zA-Z@.:_-, current: {}",
                self.name
            )));
        }
        if !(0.0..=1.0).contains(&self.protect_threshold) {
            return Err(NamingError::invalid(format!(
                "protect threshold must be within [0, 1], got {}",
                self.protect_threshold
            )));
        }
        self.selector.validate()?;
        for cluster in self.cluster_map.values() {
            cluster.validate()?;
        }
        Ok(())
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn add_cluster(&mut self, mut cluster: Cluster) -> bool {
        if self.cluster_map.contains_key(&cluster.name) {
            return false;
        }
        cluster.service_name = self.name.clone();
        self.cluster_map.insert(cluster.name.clone(), cluster);
        true
    }

    pub fn all_ips(&self) -> Vec<Instance> {
        self.cluster_map
            .values()
            .flat_map(|cluster| cluster.all_ips())
            .collect()
    }

    pub fn all_ips_by(&self, ephemeral: bool) -> Vec<Instance> {
        self.cluster_map
            .values()
            .flat_map(|cluster| cluster.all_ips_by(ephemeral))
            .collect()
    }

    /// Instances of the named clusters, or of every cluster when `clusters` is empty.
    pub fn srv_ips(&self, clusters: &[String]) -> Vec<Instance> {
        if clusters.is_empty() {
            return self.all_ips();
        }
        clusters
            .iter()
            .filter_map(|name| self.cluster_map.get(name))
            .flat_map(|cluster| cluster.all_ips())
            .collect()
    }

    pub fn instance_count(&self) -> usize {
        self.cluster_map.values().map(Cluster::instance_count).sum()
    }

    pub fn healthy_instance_count(&self) -> usize {
        self.all_ips().iter().filter(|i| i.healthy).count()
    }

    pub fn is_empty(&self) -> bool {
        self.instance_count() == 0
    }

    /// Whether the protect threshold suspends health filtering right now.
    pub fn trigger_protect(&self) -> bool {
        let total = self.instance_count();
        if total == 0 {
            return false;
        }
        (self.healthy_instance_count() as f64 / total as f64) <= self.protect_threshold as f64
    }

    pub fn find_instance(&self, cluster: &str, ip: &str, port: u16) -> Option<&Instance> {
        self.cluster_map
            .get(cluster)?
            .get(&format!("{ip}:{port}"))
    }

    /// Flip the health bit of one instance. Returns whether anything changed.
    pub fn set_instance_health(&mut self, cluster: &str, ip_addr: &str, healthy: bool) -> bool {
        let Some(instance) = self
            .cluster_map
            .get_mut(cluster)
            .and_then(|c| c.get_mut(ip_addr))
        else {
            return false;
        };

        if instance.healthy == healthy {
            return false;
        }
        instance.healthy = healthy;
        self.last_modified_millis = now_millis();
        self.recalculate_checksum();
        true
    }

    /// Replace the ephemeral or persistent instance set across all clusters.
    pub fn update_ips(
        &mut self,
        instances: Vec<Instance>,
        ephemeral: bool,
        create_missing_clusters: bool,
    ) -> IpUpdate {
        let mut update = IpUpdate::default();
        let mut by_cluster: BTreeMap<String, Vec<Instance>> = self
            .cluster_map
            .keys()
            .map(|name| (name.clone(), Vec::new()))
            .collect();

        for mut instance in instances {
            if instance.cluster_name.is_empty() {
                instance.cluster_name = DEFAULT_CLUSTER.to_string();
            }

            if !self.cluster_map.contains_key(&instance.cluster_name) {
                if !create_missing_clusters {
                    warn!(
                        "cluster: {} not found in {}, dropping ip: {}",
                        instance.cluster_name,
                        self.name,
                        instance.ip_addr()
                    );
                    update.rejected += 1;
                    continue;
                }
                warn!(
                    "cluster: {} not found, ip: {}, will create new cluster with default configuration.",
                    instance.cluster_name,
                    instance.ip_addr()
                );
                let cluster = Cluster::new(instance.cluster_name.clone(), self.name.clone());
                self.add_cluster(cluster);
                update.new_clusters.push(instance.cluster_name.clone());
            }

            by_cluster
                .entry(instance.cluster_name.clone())
                .or_default()
                .push(instance);
        }

        for (name, ips) in by_cluster {
            if let Some(cluster) = self.cluster_map.get_mut(&name) {
                update.changes.extend(cluster.update_ips(ips, ephemeral));
            }
        }

        self.last_modified_millis = now_millis();
        self.recalculate_checksum();
        update
    }

    /// Deterministic rendering of the service-level fields. Blank clusters
    /// are left out, so a cluster auto-created for an instance that has since
    /// gone does not set this copy apart from peers that never saw it.
    fn service_string(&self) -> String {
        let metadata: Vec<String> = self
            .metadata
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        let clusters: Vec<String> = self
            .cluster_map
            .values()
            .filter(|c| !c.is_blank())
            .map(|c| {
                format!(
                    "{}|{}|{}|{}|{}",
                    c.name, c.health_checker, c.default_check_port, c.use_instance_port_for_check, c.site_group
                )
            })
            .collect();

        format!(
            "{}|{}|{}|{}|{:?}|{}|{}",
            self.namespace_id,
            self.name,
            self.protect_threshold,
            self.enabled,
            self.selector,
            metadata.join(","),
            clusters.join(";")
        )
    }

    pub fn recalculate_checksum(&mut self) {
        let mut ips = self.all_ips();
        ips.sort_by_key(|a| a.sort_key());

        let mut rendered = self.service_string();
        for ip in &ips {
            rendered.push_str(&ip.checksum_string());
            rendered.push(',');
        }

        self.checksum = md5_hex(&rendered);
    }

    /// Take configuration from a newer copy of the same service.
    pub fn update(&mut self, other: &Service) {
        if self.protect_threshold != other.protect_threshold {
            info!(
                "[SERVICE-UPDATE] service: {}, protectThreshold: {} -> {}",
                self.name, self.protect_threshold, other.protect_threshold
            );
            self.protect_threshold = other.protect_threshold;
        }
        if self.enabled != other.enabled {
            info!(
                "[SERVICE-UPDATE] service: {}, enabled: {} -> {}",
                self.name, self.enabled, other.enabled
            );
            self.enabled = other.enabled;
        }
        if self.selector != other.selector {
            info!(
                "[SERVICE-UPDATE] service: {}, selector: {:?} -> {:?}",
                self.name, self.selector, other.selector
            );
            self.selector = other.selector.clone();
        }
        self.reset_weight = other.reset_weight;
        self.metadata = other.metadata.clone();

        for cluster in other.cluster_map.values() {
            match self.cluster_map.get_mut(&cluster.name) {
                Some(existing) => existing.update(cluster),
                None => {
                    let mut fresh = cluster.config_only();
                    fresh.service_name = self.name.clone();
                    self.cluster_map.insert(fresh.name.clone(), fresh);
                }
            }
        }

        self.last_modified_millis = now_millis();
        self.recalculate_checksum();
    }

    /// Copy of the metadata record, without instances.
    pub fn to_record(&self) -> Service {
        let mut record = Service {
            namespace_id: self.namespace_id.clone(),
            name: self.name.clone(),
            protect_threshold: self.protect_threshold,
            enabled: self.enabled,
            selector: self.selector.clone(),
            metadata: self.metadata.clone(),
            reset_weight: self.reset_weight,
            cluster_map: BTreeMap::new(),
            last_modified_millis: self.last_modified_millis,
            checksum: String::new(),
        };
        for (name, cluster) in &self.cluster_map {
            record.cluster_map.insert(name.clone(), cluster.config_only());
        }
        record.recalculate_checksum();
        record
    }
}
