use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

use super::ServiceChangeListener;
use crate::consistency::RecordListener;
use crate::error::Result;
use crate::health::task::HealthCheckTask;
use crate::health::{CancelHandle, HealthEngine};
use crate::model::datum::Record;
use crate::model::instance::Instance;
use crate::model::keys;
use crate::model::service::Service;

/// One registered service and the machinery attached to it.
///
/// `state` guards short reads and in-place changes. `write_lock` serializes
/// the read-modify-write of an instance list across the consistency write,
/// so two registrations for the same service never race each other.
pub struct ManagedService {
    pub namespace_id: String,
    pub name: String,
    state: RwLock<Service>,
    write_lock: tokio::sync::Mutex<()>,
    beat_check: Mutex<Option<CancelHandle>>,
    cluster_checks: Mutex<HashMap<String, Arc<HealthCheckTask>>>,
    health: Arc<HealthEngine>,
    changes: Arc<dyn ServiceChangeListener>,
}

impl ManagedService {
    pub fn new(service: Service, health: Arc<HealthEngine>, changes: Arc<dyn ServiceChangeListener>) -> Self {
        Self {
            namespace_id: service.namespace_id.clone(),
            name: service.name.clone(),
            state: RwLock::new(service),
            write_lock: tokio::sync::Mutex::new(()),
            beat_check: Mutex::new(None),
            cluster_checks: Mutex::new(HashMap::new()),
            health,
            changes,
        }
    }

    /// Start the beat sweep and one probe task per cluster.
    pub fn init(&self) {
        let handle = self.health.start_beat_check(&self.namespace_id, &self.name);
        if let Some(previous) = self.beat_check.lock().replace(handle) {
            previous.cancel();
        }
        let clusters: Vec<String> = self.state.read().cluster_map.keys().cloned().collect();
        self.start_cluster_checks(&clusters);
    }

    fn start_cluster_checks(&self, clusters: &[String]) {
        let mut checks = self.cluster_checks.lock();
        for cluster in clusters {
            if checks.contains_key(cluster) {
                continue;
            }
            let task = self
                .health
                .start_cluster_check(&self.namespace_id, &self.name, cluster);
            checks.insert(cluster.clone(), task);
        }
    }

    /// Cancel every background task of this service.
    pub fn destroy(&self) {
        if let Some(handle) = self.beat_check.lock().take() {
            handle.cancel();
        }
        for (_, task) in self.cluster_checks.lock().drain() {
            task.cancel();
        }
        self.health.forget_service(&self.namespace_id, &self.name);
    }

    pub fn snapshot(&self) -> Service {
        self.state.read().clone()
    }

    pub fn read<R>(&self, f: impl FnOnce(&Service) -> R) -> R {
        f(&self.state.read())
    }

    pub fn checksum(&self) -> String {
        self.state.read().checksum().to_string()
    }

    pub fn instance_count(&self) -> usize {
        self.state.read().instance_count()
    }

    pub fn find_instance(&self, cluster: &str, ip: &str, port: u16) -> Option<Instance> {
        self.state.read().find_instance(cluster, ip, port).cloned()
    }

    /// Held while computing and writing the next instance list.
    pub async fn lock_writes(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    /// Take configuration from a newer service meta record.
    pub fn update_config(&self, record: &Service) {
        let clusters: Vec<String> = {
            let mut state = self.state.write();
            state.update(record);
            state.cluster_map.keys().cloned().collect()
        };
        self.start_cluster_checks(&clusters);
        self.changes.service_changed(&self.namespace_id, &self.name);
    }

    pub fn set_instance_health(&self, cluster: &str, ip_addr: &str, healthy: bool) -> bool {
        let changed = self.state.write().set_instance_health(cluster, ip_addr, healthy);
        if changed {
            self.changes.service_changed(&self.namespace_id, &self.name);
        }
        changed
    }

    /// `ip:port:cluster` → health bit, as answered to peers.
    pub fn health_map(&self) -> BTreeMap<String, bool> {
        self.state
            .read()
            .all_ips()
            .into_iter()
            .map(|instance| (health_key(&instance), instance.healthy))
            .collect()
    }

    /// Apply health bits pulled from the owner. Marked instances keep theirs.
    pub fn apply_health(&self, health: &BTreeMap<String, bool>) -> usize {
        let mut changed = 0;
        {
            let mut state = self.state.write();
            for instance in state.all_ips() {
                if instance.marked {
                    continue;
                }
                let Some(&healthy) = health.get(&health_key(&instance)) else {
                    continue;
                };
                if state.set_instance_health(&instance.cluster_name, &instance.ip_addr(), healthy) {
                    info!(
                        "{} {{SYNC}} IP-{} {}@{}",
                        self.name,
                        if healthy { "ENABLED" } else { "DISABLED" },
                        instance.ip_addr(),
                        instance.cluster_name
                    );
                    changed += 1;
                }
            }
        }
        if changed > 0 {
            self.changes.service_changed(&self.namespace_id, &self.name);
        }
        changed
    }

    fn apply_instances(&self, key: &str, instances: Vec<Instance>) {
        let ephemeral = keys::match_ephemeral_instance_list_key(key);
        let update = {
            let mut state = self.state.write();
            state.update_ips(instances, ephemeral, true)
        };
        if !update.new_clusters.is_empty() {
            self.start_cluster_checks(&update.new_clusters);
        }
        if !update.changes.is_empty() || !update.new_clusters.is_empty() {
            self.changes.service_changed(&self.namespace_id, &self.name);
        }
    }
}

fn health_key(instance: &Instance) -> String {
    format!("{}:{}", instance.ip_addr(), instance.cluster_name)
}

impl RecordListener for ManagedService {
    fn interests(&self, key: &str) -> bool {
        keys::match_instance_list_key_of(key, &self.namespace_id, &self.name)
    }

    fn match_unlisten_key(&self, key: &str) -> bool {
        keys::match_instance_list_key_of(key, &self.namespace_id, &self.name)
    }

    fn on_change(&self, key: &str, value: &Record) -> Result<()> {
        let Some(instances) = value.as_instances() else {
            warn!("[SERVICE] {} received a non-instance record under {}", self.name, key);
            return Ok(());
        };
        self.apply_instances(key, instances.instance_list.clone());
        Ok(())
    }

    fn on_delete(&self, key: &str) -> Result<()> {
        self.apply_instances(key, Vec::new());
        Ok(())
    }
}

impl std::fmt::Debug for ManagedService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedService")
            .field("namespace_id", &self.namespace_id)
            .field("name", &self.name)
            .finish()
    }
}
