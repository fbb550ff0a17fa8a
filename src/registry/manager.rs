use async_trait::async_trait;
use dashmap::DashMap;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;
use tracing::{info, warn};

use super::ServiceChangeListener;
use super::entry::ManagedService;
use crate::config::switches::Switches;
use crate::config::{HealthConfig, RegistryConfig};
use crate::consistency::{ConsistencyService, RecordListener};
use crate::distro::mapper::DistroMapper;
use crate::error::{NamingError, Result};
use crate::health::beat::BeatInfo;
use crate::health::{HealthEngine, HealthTarget};
use crate::model::cluster::Cluster;
use crate::model::datum::{Instances, Record};
use crate::model::instance::Instance;
use crate::model::keys;
use crate::model::selector::{LabelSource, NoLabels, Selector};
use crate::model::service::Service;

/// Beat answered normally.
pub const BEAT_OK: i32 = 10200;
/// Beat for an instance that is gone and carried nothing to re-register it.
pub const BEAT_RESOURCE_NOT_FOUND: i32 = 20404;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IpAction {
    Add,
    Remove,
}

/// Answer to a client beat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeatResult {
    pub code: i32,
    pub client_beat_interval: u64,
    pub light_beat_enabled: bool,
}

/// Fields an operator may change on an existing service.
#[derive(Debug, Clone, Default)]
pub struct ServiceUpdate {
    pub protect_threshold: Option<f32>,
    pub enabled: Option<bool>,
    pub selector: Option<Selector>,
    pub metadata: Option<BTreeMap<String, String>>,
}

/// Filters of a paged service listing.
#[derive(Debug, Clone, Default)]
pub struct ServiceQuery {
    /// Zero-based page index.
    pub start_page: usize,
    pub page_size: usize,
    /// Substring of the grouped name.
    pub keyword: Option<String>,
    /// `ip` or `ip:port` that must be registered in the service.
    pub contained_instance: Option<String>,
    /// Only services with at least one instance.
    pub has_ip_count: bool,
}

pub struct ServiceManager {
    /// namespace → grouped name → service
    services: DashMap<String, DashMap<String, Arc<ManagedService>>>,
    consistency: Arc<dyn ConsistencyService>,
    mapper: Arc<DistroMapper>,
    switches: Arc<Switches>,
    health: Arc<HealthEngine>,
    changes: Arc<dyn ServiceChangeListener>,
    labels: Arc<dyn LabelSource>,
    config: RegistryConfig,
    waiters: DashMap<String, Arc<Notify>>,
    me: Weak<ServiceManager>,
}

impl ServiceManager {
    pub fn new(
        config: RegistryConfig,
        health_config: HealthConfig,
        consistency: Arc<dyn ConsistencyService>,
        mapper: Arc<DistroMapper>,
        switches: Arc<Switches>,
        changes: Arc<dyn ServiceChangeListener>,
    ) -> Arc<Self> {
        Self::with_labels(
            config,
            health_config,
            consistency,
            mapper,
            switches,
            changes,
            Arc::new(NoLabels),
        )
    }

    pub fn with_labels(
        config: RegistryConfig,
        health_config: HealthConfig,
        consistency: Arc<dyn ConsistencyService>,
        mapper: Arc<DistroMapper>,
        switches: Arc<Switches>,
        changes: Arc<dyn ServiceChangeListener>,
        labels: Arc<dyn LabelSource>,
    ) -> Arc<Self> {
        let manager = Arc::new_cyclic(|me: &Weak<ServiceManager>| {
            let target: Weak<dyn HealthTarget> = me.clone();
            Self {
                services: DashMap::new(),
                health: HealthEngine::new(health_config, switches.clone(), mapper.clone(), target),
                consistency,
                mapper,
                switches,
                changes,
                labels,
                config,
                waiters: DashMap::new(),
                me: me.clone(),
            }
        });

        let listener: Arc<dyn RecordListener> = manager.clone();
        manager
            .consistency
            .listen(keys::SERVICE_META_KEY_PREFIX, listener);
        manager
    }

    pub fn health(&self) -> &Arc<HealthEngine> {
        &self.health
    }

    pub fn mapper(&self) -> &Arc<DistroMapper> {
        &self.mapper
    }

    pub fn switches(&self) -> &Arc<Switches> {
        &self.switches
    }

    pub fn labels(&self) -> &Arc<dyn LabelSource> {
        &self.labels
    }

    pub fn consistency(&self) -> &Arc<dyn ConsistencyService> {
        &self.consistency
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    // --- Lookups ---

    pub fn managed(&self, namespace_id: &str, service_name: &str) -> Option<Arc<ManagedService>> {
        self.services
            .get(namespace_id)
            .and_then(|services| services.get(service_name).map(|entry| entry.value().clone()))
    }

    pub fn get_service(&self, namespace_id: &str, service_name: &str) -> Option<Service> {
        self.managed(namespace_id, service_name)
            .map(|service| service.snapshot())
    }

    pub fn contains_service(&self, namespace_id: &str, service_name: &str) -> bool {
        self.managed(namespace_id, service_name).is_some()
    }

    fn require(&self, namespace_id: &str, service_name: &str) -> Result<Arc<ManagedService>> {
        self.managed(namespace_id, service_name).ok_or_else(|| {
            NamingError::not_found(format!("service not found: {namespace_id}##{service_name}"))
        })
    }

    pub fn namespaces(&self) -> Vec<String> {
        let mut namespaces: Vec<String> = self.services.iter().map(|e| e.key().clone()).collect();
        namespaces.sort();
        namespaces
    }

    pub fn get_all_service_names(&self, namespace_id: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .services
            .get(namespace_id)
            .map(|services| services.iter().map(|e| e.key().clone()).collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Every service of every namespace.
    pub fn all_services(&self) -> Vec<Arc<ManagedService>> {
        self.services
            .iter()
            .flat_map(|namespace| {
                namespace
                    .value()
                    .iter()
                    .map(|e| e.value().clone())
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    fn services_of(&self, namespace_id: &str) -> Vec<Arc<ManagedService>> {
        let mut services: Vec<Arc<ManagedService>> = self
            .services
            .get(namespace_id)
            .map(|services| services.iter().map(|e| e.value().clone()).collect())
            .unwrap_or_default();
        services.sort_by(|a, b| a.name.cmp(&b.name));
        services
    }

    /// Services whose grouped name fully matches `regex`.
    pub fn search_services(&self, namespace_id: &str, regex: &str) -> Result<Vec<String>> {
        let pattern = Regex::new(&format!("^(?:{regex})$"))
            .map_err(|e| NamingError::invalid(format!("bad service pattern {regex}: {e}")))?;
        Ok(self
            .services_of(namespace_id)
            .into_iter()
            .filter(|service| pattern.is_match(&service.name))
            .map(|service| service.name.clone())
            .collect())
    }

    /// `(total matches, requested page)`, sorted by name.
    pub fn get_paged_services(&self, namespace_id: &str, query: &ServiceQuery) -> (usize, Vec<Service>) {
        let matched: Vec<Arc<ManagedService>> = self
            .services_of(namespace_id)
            .into_iter()
            .filter(|service| {
                query
                    .keyword
                    .as_deref()
                    .map(|keyword| keyword.is_empty() || service.name.contains(keyword))
                    .unwrap_or(true)
            })
            .filter(|service| !query.has_ip_count || service.instance_count() > 0)
            .filter(|service| match query.contained_instance.as_deref() {
                None | Some("") => true,
                Some(wanted) => service.read(|s| {
                    s.all_ips()
                        .iter()
                        .any(|i| i.ip_addr() == wanted || i.ip == wanted)
                }),
            })
            .collect();

        let total = matched.len();
        let page_size = query.page_size.max(1);
        let page = matched
            .into_iter()
            .skip(query.start_page.saturating_mul(page_size))
            .take(page_size)
            .map(|service| service.snapshot())
            .collect();
        (total, page)
    }

    pub fn service_count(&self) -> usize {
        self.services.iter().map(|namespace| namespace.value().len()).sum()
    }

    pub fn instance_count(&self) -> usize {
        self.all_services().iter().map(|s| s.instance_count()).sum()
    }

    pub fn responsible_service_count(&self) -> usize {
        self.all_services()
            .iter()
            .filter(|s| self.mapper.responsible(&s.name))
            .count()
    }

    pub fn responsible_instance_count(&self) -> usize {
        self.all_services()
            .iter()
            .filter(|s| self.mapper.responsible(&s.name))
            .map(|s| s.instance_count())
            .sum()
    }

    // --- Service lifecycle ---

    /// Insert a service locally, start its health tasks and subscribe it to
    /// its instance-list keys.
    fn put_service_and_init(&self, service: Service) -> Arc<ManagedService> {
        let namespace_id = service.namespace_id.clone();
        let name = service.name.clone();
        let managed = {
            let namespace = self.services.entry(namespace_id.clone()).or_default();
            if let Some(existing) = namespace.get(&name) {
                return existing.value().clone();
            }
            let managed = Arc::new(ManagedService::new(
                service,
                self.health.clone(),
                self.changes.clone(),
            ));
            namespace.insert(name.clone(), managed.clone());
            managed
        };

        managed.init();
        let listener: Arc<dyn RecordListener> = managed.clone();
        self.consistency.listen(
            &keys::build_instance_list_key(&namespace_id, &name, true),
            listener.clone(),
        );
        self.consistency.listen(
            &keys::build_instance_list_key(&namespace_id, &name, false),
            listener,
        );
        info!("[NEW-SERVICE] {}##{}", namespace_id, name);
        self.wake_up(&namespace_id, &name);
        managed
    }

    fn remove_service_locally(&self, namespace_id: &str, service_name: &str) {
        let removed = self
            .services
            .get(namespace_id)
            .and_then(|services| services.remove(service_name));
        let Some((_, managed)) = removed else {
            return;
        };

        managed.destroy();
        let listener: Arc<dyn RecordListener> = managed.clone();
        self.consistency.unlisten(
            &keys::build_instance_list_key(namespace_id, service_name, true),
            &listener,
        );
        self.consistency.unlisten(
            &keys::build_instance_list_key(namespace_id, service_name, false),
            &listener,
        );
        self.changes.service_changed(namespace_id, service_name);
        info!("[DEAD-SERVICE] {}##{}", namespace_id, service_name);
    }

    /// Write service meta through the persistent path and wait until the
    /// change has been applied here.
    async fn put_service_meta(&self, service: &Service) -> Result<()> {
        let key = keys::build_service_meta_key(&service.namespace_id, &service.name);
        let expected = service.to_record().checksum().to_string();
        self.consistency
            .put(&key, Record::Service(Box::new(service.to_record())))
            .await?;

        let applied = || {
            self.managed(&service.namespace_id, &service.name)
                .map(|managed| managed.snapshot().to_record().checksum() == expected)
                .unwrap_or(false)
        };
        if !self
            .wait_for(&service.namespace_id, &service.name, applied)
            .await
        {
            return Err(NamingError::server(format!(
                "service {} was written but is not visible on this node yet",
                service.name
            )));
        }
        Ok(())
    }

    fn waiter(&self, namespace_id: &str, service_name: &str) -> Arc<Notify> {
        self.waiters
            .entry(keys::full_service_name(namespace_id, service_name))
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    fn wake_up(&self, namespace_id: &str, service_name: &str) {
        if let Some(notify) = self
            .waiters
            .get(&keys::full_service_name(namespace_id, service_name))
        {
            notify.notify_waiters();
        }
    }

    /// Wait, bounded by the configured timeout, until `ready` holds.
    async fn wait_for(&self, namespace_id: &str, service_name: &str, ready: impl Fn() -> bool) -> bool {
        let notify = self.waiter(namespace_id, service_name);
        let deadline = tokio::time::Instant::now() + self.config.service_wait_timeout();
        loop {
            let notified = notify.notified();
            if ready() {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return ready();
            }
        }
    }

    /// Wait until a service exists here.
    pub async fn wait_for_service(&self, namespace_id: &str, service_name: &str) -> bool {
        self.wait_for(namespace_id, service_name, || {
            self.contains_service(namespace_id, service_name)
        })
        .await
    }

    /// Create a service with default configuration unless it exists. Local
    /// creation is for ephemeral registrations; persistent ones go through
    /// the replicated meta record.
    pub async fn create_service_if_absent(
        &self,
        namespace_id: &str,
        service_name: &str,
        local: bool,
        cluster: Option<Cluster>,
    ) -> Result<()> {
        if self.contains_service(namespace_id, service_name) {
            return Ok(());
        }

        info!("creating empty service {}:{}", namespace_id, service_name);
        let mut service = Service::new(namespace_id, service_name);
        if let Some(cluster) = cluster {
            service.add_cluster(cluster);
        }
        service.recalculate_checksum();
        service.validate()?;

        if local {
            self.put_service_and_init(service);
            Ok(())
        } else {
            self.put_service_meta(&service).await
        }
    }

    /// Explicit creation; an existing service is an error.
    pub async fn create_service(&self, service: Service) -> Result<()> {
        if self.contains_service(&service.namespace_id, &service.name) {
            return Err(NamingError::invalid(format!(
                "specified service {} already exists",
                service.name
            )));
        }
        service.validate()?;
        self.put_service_meta(&service).await
    }

    pub async fn update_service(&self, namespace_id: &str, service_name: &str, update: ServiceUpdate) -> Result<()> {
        let managed = self.require(namespace_id, service_name)?;
        let mut record = managed.snapshot().to_record();
        if let Some(threshold) = update.protect_threshold {
            record.protect_threshold = threshold;
        }
        if let Some(enabled) = update.enabled {
            record.enabled = enabled;
        }
        if let Some(selector) = update.selector {
            record.selector = selector;
        }
        if let Some(metadata) = update.metadata {
            record.metadata = metadata;
        }
        record.recalculate_checksum();
        record.validate()?;
        self.put_service_meta(&record).await
    }

    /// Insert or replace the configuration of one cluster.
    pub async fn update_cluster(&self, namespace_id: &str, service_name: &str, cluster: Cluster) -> Result<()> {
        let managed = self.require(namespace_id, service_name)?;
        cluster.validate()?;
        let mut record = managed.snapshot().to_record();
        let mut cluster = cluster.config_only();
        cluster.service_name = record.name.clone();
        record.cluster_map.insert(cluster.name.clone(), cluster);
        record.recalculate_checksum();
        self.put_service_meta(&record).await
    }

    pub async fn delete_service(&self, namespace_id: &str, service_name: &str) -> Result<()> {
        let managed = self.require(namespace_id, service_name)?;
        if managed.instance_count() > 0 {
            return Err(NamingError::invalid(format!(
                "service {service_name} still has instances, deregister them first"
            )));
        }

        for ephemeral in [true, false] {
            self.consistency
                .remove(&keys::build_instance_list_key(namespace_id, service_name, ephemeral))
                .await?;
        }
        self.consistency
            .remove(&keys::build_service_meta_key(namespace_id, service_name))
            .await?;
        self.remove_service_locally(namespace_id, service_name);
        Ok(())
    }

    // --- Instance writes ---

    pub async fn register_instance(&self, namespace_id: &str, service_name: &str, mut instance: Instance) -> Result<()> {
        if self.switches.load().disable_add_ip {
            return Err(NamingError::server(format!(
                "adding instances is disabled, refused {} for {}",
                instance.ip_addr(),
                service_name
            )));
        }

        instance.service_name = service_name.to_string();
        instance.normalize();
        instance.validate()?;

        if !self.contains_service(namespace_id, service_name) {
            if !self.config.auto_create_service {
                return Err(NamingError::not_found(format!(
                    "service not found: {namespace_id}##{service_name}"
                )));
            }
            self.create_service_if_absent(namespace_id, service_name, instance.ephemeral, None)
                .await?;
        }

        let managed = self.managed(namespace_id, service_name).ok_or_else(|| {
            NamingError::server(format!("service not found: {namespace_id}##{service_name}"))
        })?;

        let has_cluster = managed.read(|s| s.cluster_map.contains_key(&instance.cluster_name));
        if !has_cluster && !self.config.auto_create_cluster {
            return Err(NamingError::not_found(format!(
                "cluster {} not found in {}",
                instance.cluster_name, service_name
            )));
        }

        let ephemeral = instance.ephemeral;
        self.update_ip_addresses(&managed, IpAction::Add, ephemeral, vec![instance])
            .await
    }

    pub async fn add_instances(&self, namespace_id: &str, service_name: &str, ephemeral: bool, ips: Vec<Instance>) -> Result<()> {
        let managed = self.require(namespace_id, service_name)?;
        self.update_ip_addresses(&managed, IpAction::Add, ephemeral, ips)
            .await
    }

    /// Deregister. A missing service is not an error.
    pub async fn remove_instances(
        &self,
        namespace_id: &str,
        service_name: &str,
        ephemeral: bool,
        ips: Vec<Instance>,
    ) -> Result<()> {
        let Some(managed) = self.managed(namespace_id, service_name) else {
            warn!("remove instance from non-exist service: {}##{}", namespace_id, service_name);
            return Ok(());
        };
        self.update_ip_addresses(&managed, IpAction::Remove, ephemeral, ips)
            .await
    }

    pub async fn update_instance(&self, namespace_id: &str, service_name: &str, mut instance: Instance) -> Result<()> {
        let managed = self.require(namespace_id, service_name)?;
        instance.service_name = service_name.to_string();
        instance.normalize();
        instance.validate()?;

        let exists = managed.read(|s| {
            s.all_ips_by(instance.ephemeral)
                .iter()
                .any(|i| i.ip_addr() == instance.ip_addr() && i.cluster_name == instance.cluster_name)
        });
        if !exists {
            return Err(NamingError::not_found(format!(
                "instance {} not found in {}",
                instance.ip_addr(),
                service_name
            )));
        }

        let ephemeral = instance.ephemeral;
        self.update_ip_addresses(&managed, IpAction::Add, ephemeral, vec![instance])
            .await
    }

    /// Compute the next instance list from the stored one and write it.
    ///
    /// Instances carried over keep the health and beat this node observed.
    async fn update_ip_addresses(
        &self,
        managed: &ManagedService,
        action: IpAction,
        ephemeral: bool,
        ips: Vec<Instance>,
    ) -> Result<()> {
        let _guard = managed.lock_writes().await;

        let key = keys::build_instance_list_key(&managed.namespace_id, &managed.name, ephemeral);
        let stored: Vec<Instance> = self
            .consistency
            .get(&key)
            .and_then(|datum| datum.value.as_instances().map(|i| i.instance_list.clone()))
            .unwrap_or_default();
        // one ip:port may sit in several clusters with separate health
        let current: HashMap<String, Instance> = managed
            .read(|s| s.all_ips_by(ephemeral))
            .into_iter()
            .map(|instance| (instance.datum_key(), instance))
            .collect();

        let mut next: BTreeMap<String, Instance> = BTreeMap::new();
        for mut instance in stored {
            if let Some(observed) = current.get(&instance.datum_key()) {
                instance.healthy = observed.healthy;
                instance.last_beat = observed.last_beat.clone();
            }
            next.insert(instance.datum_key(), instance);
        }

        for mut instance in ips {
            instance.ephemeral = ephemeral;
            match action {
                IpAction::Remove => {
                    next.retain(|_, existing| {
                        existing.cluster_name != instance.cluster_name || !existing.same_endpoint(&instance)
                    });
                }
                IpAction::Add => {
                    if let Some(observed) = current.get(&instance.datum_key())
                        && !instance.marked
                    {
                        instance.healthy = observed.healthy;
                        instance.last_beat = observed.last_beat.clone();
                    }
                    next.insert(instance.datum_key(), instance);
                }
            }
        }

        if next.is_empty() && action == IpAction::Add {
            return Err(NamingError::invalid(format!(
                "ip list can not be empty, service: {}",
                managed.name
            )));
        }

        let list: Vec<Instance> = next.into_values().collect();
        self.consistency
            .put(&key, Record::Instances(Instances::new(list)))
            .await
    }

    // --- Reads ---

    pub fn get_instance(&self, namespace_id: &str, service_name: &str, cluster: &str, ip: &str, port: u16) -> Result<Instance> {
        let managed = self.require(namespace_id, service_name)?;
        managed.find_instance(cluster, ip, port).ok_or_else(|| {
            NamingError::not_found(format!(
                "no instance {ip}:{port} in cluster {cluster} of {service_name}"
            ))
        })
    }

    pub fn heart_beat_interval(&self, namespace_id: &str, service_name: &str, cluster: &str, ip: &str, port: u16) -> u64 {
        let default = self.switches.load().client_beat_interval;
        self.managed(namespace_id, service_name)
            .and_then(|managed| managed.find_instance(cluster, ip, port))
            .map(|instance| instance.heart_beat_interval(default))
            .unwrap_or(default)
    }

    /// Record a client beat, re-registering the instance from the beat
    /// payload when it has been evicted.
    pub async fn handle_beat(
        &self,
        namespace_id: &str,
        service_name: &str,
        cluster: &str,
        ip: &str,
        port: u16,
        beat: Option<BeatInfo>,
    ) -> Result<BeatResult> {
        let switches = self.switches.load();
        let known = self
            .managed(namespace_id, service_name)
            .and_then(|managed| managed.find_instance(cluster, ip, port))
            .is_some();

        if !known {
            let Some(beat) = beat else {
                return Ok(BeatResult {
                    code: BEAT_RESOURCE_NOT_FOUND,
                    client_beat_interval: switches.client_beat_interval,
                    light_beat_enabled: switches.light_beat_enabled,
                });
            };
            warn!(
                "[CLIENT-BEAT] instance has been removed by the health mechanism, re-registering from beat {}:{} of {}",
                beat.ip, beat.port, service_name
            );
            let mut instance = beat.to_instance();
            instance.cluster_name = cluster.to_string();
            self.register_instance(namespace_id, service_name, instance)
                .await?;
        }

        if !self.contains_service(namespace_id, service_name) {
            return Err(NamingError::server(format!(
                "service not found: {service_name}@{namespace_id}"
            )));
        }

        self.health
            .handle_beat(namespace_id, service_name, cluster, ip, port);
        Ok(BeatResult {
            code: BEAT_OK,
            client_beat_interval: self.heart_beat_interval(namespace_id, service_name, cluster, ip, port),
            light_beat_enabled: switches.light_beat_enabled,
        })
    }
}

#[async_trait]
impl HealthTarget for ServiceManager {
    fn service_snapshot(&self, namespace_id: &str, service_name: &str) -> Option<Service> {
        self.get_service(namespace_id, service_name)
    }

    fn set_instance_health(&self, namespace_id: &str, service_name: &str, cluster: &str, ip_addr: &str, healthy: bool) -> bool {
        self.managed(namespace_id, service_name)
            .map(|managed| managed.set_instance_health(cluster, ip_addr, healthy))
            .unwrap_or(false)
    }

    async fn remove_expired(&self, namespace_id: &str, service_name: &str, instance: Instance) -> Result<()> {
        let ephemeral = instance.ephemeral;
        self.remove_instances(namespace_id, service_name, ephemeral, vec![instance])
            .await
    }
}

impl RecordListener for ServiceManager {
    fn interests(&self, key: &str) -> bool {
        keys::match_service_meta_key(key)
    }

    fn match_unlisten_key(&self, _key: &str) -> bool {
        false
    }

    fn on_change(&self, key: &str, value: &Record) -> Result<()> {
        let Record::Service(record) = value else {
            warn!("[SERVICE-META] ignoring non-service record under {}", key);
            return Ok(());
        };
        let mut record = record.as_ref().clone();
        if record.namespace_id.is_empty() {
            record.namespace_id = keys::DEFAULT_NAMESPACE.to_string();
        }

        match self.managed(&record.namespace_id, &record.name) {
            Some(existing) => {
                existing.update_config(&record);
                self.wake_up(&record.namespace_id, &record.name);
            }
            None => {
                record.recalculate_checksum();
                self.put_service_and_init(record);
            }
        }
        Ok(())
    }

    fn on_delete(&self, key: &str) -> Result<()> {
        if let Some((namespace_id, service_name)) = keys::parse_service_key(key) {
            self.remove_service_locally(&namespace_id, &service_name);
        }
        Ok(())
    }
}

impl ServiceManager {
    /// Handle to this manager for adapters that must not keep it alive.
    pub fn downgrade(&self) -> Weak<ServiceManager> {
        self.me.clone()
    }
}
