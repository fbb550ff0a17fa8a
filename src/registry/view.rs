use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Weak;

use super::manager::ServiceManager;
use crate::model::instance::Instance;
use crate::model::keys;
use crate::model::service::Service;
use crate::model::types::now_millis;
use crate::push::{DataSource, PushClient};

/// One host as returned to a discovering client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostView {
    pub instance_id: String,
    pub ip: String,
    pub port: u16,
    pub weight: f64,
    pub healthy: bool,
    pub enabled: bool,
    pub ephemeral: bool,
    pub marked: bool,
    pub cluster_name: String,
    pub service_name: String,
    pub metadata: BTreeMap<String, String>,
}

impl From<&Instance> for HostView {
    fn from(instance: &Instance) -> Self {
        Self {
            instance_id: instance.instance_id.clone(),
            ip: instance.ip.clone(),
            port: instance.port,
            weight: instance.weight,
            healthy: instance.healthy,
            enabled: instance.enabled,
            ephemeral: instance.ephemeral,
            marked: instance.marked,
            cluster_name: instance.cluster_name.clone(),
            service_name: instance.service_name.clone(),
            metadata: instance.metadata.clone(),
        }
    }
}

/// The answer to a discovery read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceView {
    pub name: String,
    pub group_name: String,
    pub clusters: String,
    pub hosts: Vec<HostView>,
    pub cache_millis: u64,
    pub last_ref_time: u64,
    pub checksum: String,
    pub reach_protect_threshold: bool,
    pub metadata: BTreeMap<String, String>,
}

/// What a consumer asked to see.
#[derive(Debug, Clone, Default)]
pub struct ViewRequest {
    pub clusters: Vec<String>,
    pub client_ip: String,
    pub healthy_only: bool,
}

impl ServiceView {
    pub fn empty(service_name: &str, clusters: &[String], cache_millis: u64) -> Self {
        Self {
            name: service_name.to_string(),
            group_name: keys::split_grouped_name(service_name).0.to_string(),
            clusters: clusters.join(","),
            hosts: Vec::new(),
            cache_millis,
            last_ref_time: now_millis(),
            checksum: String::new(),
            reach_protect_threshold: false,
            metadata: BTreeMap::new(),
        }
    }

    /// Selector, then health with the protect threshold, then enabled.
    pub fn build(
        service: &Service,
        request: &ViewRequest,
        consumer_labels: &BTreeMap<String, String>,
        cache_millis: u64,
    ) -> Self {
        let mut view = Self::empty(&service.name, &request.clusters, cache_millis);
        view.checksum = service.checksum().to_string();
        view.metadata = service.metadata.clone();
        if !service.enabled {
            return view;
        }

        let selected = service
            .selector
            .select(consumer_labels, service.srv_ips(&request.clusters));
        if selected.is_empty() {
            return view;
        }

        let total = selected.len();
        let healthy = selected.iter().filter(|i| i.healthy).count();
        view.reach_protect_threshold = (healthy as f32) / (total as f32) <= service.protect_threshold;

        view.hosts = selected
            .iter()
            .filter(|i| !request.healthy_only || view.reach_protect_threshold || i.healthy)
            .filter(|i| i.enabled)
            .map(HostView::from)
            .collect();
        view
    }
}

impl ServiceManager {
    /// Discovery read. A missing service yields an empty view.
    pub fn list_view(&self, namespace_id: &str, service_name: &str, request: &ViewRequest, cache_millis: u64) -> ServiceView {
        let Some(managed) = self.managed(namespace_id, service_name) else {
            return ServiceView::empty(service_name, &request.clusters, cache_millis);
        };
        let labels = self.labels().labels_of(&request.client_ip);
        managed.read(|service| ServiceView::build(service, request, &labels, cache_millis))
    }
}

/// Renders pushes from the live registry.
pub struct ServiceViewSource {
    manager: Weak<ServiceManager>,
}

impl ServiceViewSource {
    pub fn new(manager: Weak<ServiceManager>) -> Self {
        Self { manager }
    }
}

impl DataSource for ServiceViewSource {
    fn data(&self, client: &PushClient) -> Option<serde_json::Value> {
        let manager = self.manager.upgrade()?;
        let request = ViewRequest {
            clusters: client.cluster_list(),
            client_ip: client.addr.ip().to_string(),
            healthy_only: false,
        };
        let cache_millis = manager.switches().load().default_push_cache_millis;
        let view = manager.list_view(&client.namespace_id, &client.service_name, &request, cache_millis);
        serde_json::to_value(view).ok()
    }
}
