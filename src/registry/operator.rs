use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::client::{ClientManager, ServiceKey, Subscriber, client_id};
use super::manager::{BeatResult, ServiceManager};
use super::view::{ServiceView, ServiceViewSource, ViewRequest};
use crate::config::RegistryConfig;
use crate::error::{NamingError, Result};
use crate::health::beat::BeatInfo;
use crate::model::instance::Instance;
use crate::model::types::now_millis;
use crate::push::{PushClient, PushService};

/// Which write strategy serves client requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatorVersion {
    #[default]
    V1,
    V2,
}

/// A discovering client, as identified by its list request.
#[derive(Debug, Clone, Default)]
pub struct SubscriberInfo {
    pub ip: String,
    /// `0` when the client does not listen for pushes.
    pub udp_port: u16,
    pub agent: String,
    pub app: String,
}

#[async_trait]
pub trait InstanceOperator: Send + Sync {
    fn version(&self) -> OperatorVersion;

    /// Start background work, if the strategy has any.
    fn start(self: Arc<Self>) {}

    async fn register_instance(&self, namespace_id: &str, service_name: &str, instance: Instance) -> Result<()>;

    async fn remove_instance(&self, namespace_id: &str, service_name: &str, instance: Instance) -> Result<()>;

    async fn update_instance(&self, namespace_id: &str, service_name: &str, instance: Instance) -> Result<()>;

    fn list_instance(
        &self,
        namespace_id: &str,
        service_name: &str,
        subscriber: &SubscriberInfo,
        clusters: &str,
        healthy_only: bool,
    ) -> Result<ServiceView>;

    fn get_instance(&self, namespace_id: &str, service_name: &str, cluster: &str, ip: &str, port: u16) -> Result<Instance>;

    async fn handle_beat(
        &self,
        namespace_id: &str,
        service_name: &str,
        cluster: &str,
        ip: &str,
        port: u16,
        beat: Option<BeatInfo>,
    ) -> Result<BeatResult>;

    fn heart_beat_interval(&self, namespace_id: &str, service_name: &str, cluster: &str, ip: &str, port: u16) -> u64;

    /// Tracked clients; strategies without client tracking report none.
    fn client_count(&self) -> usize {
        0
    }
}

pub fn build(
    config: &RegistryConfig,
    manager: Arc<ServiceManager>,
    push: Arc<PushService>,
) -> Arc<dyn InstanceOperator> {
    info!("instance operator: {:?}", config.operator);
    match config.operator {
        OperatorVersion::V1 => Arc::new(InstanceOperatorV1::new(manager, push)),
        OperatorVersion::V2 => Arc::new(InstanceOperatorV2::new(config.clone(), manager, push)),
    }
}

fn split_clusters(clusters: &str) -> Vec<String> {
    clusters
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

/// Discovery read shared by both strategies: registers the subscriber for
/// pushes when it can take them, then renders the view.
fn list_and_subscribe(
    manager: &Arc<ServiceManager>,
    push: &PushService,
    namespace_id: &str,
    service_name: &str,
    subscriber: &SubscriberInfo,
    clusters: &str,
    healthy_only: bool,
) -> Result<ServiceView> {
    if service_name.is_empty() {
        return Err(NamingError::invalid("serviceName is required"));
    }

    let switches = manager.switches().load();
    let mut cache_millis = switches.default_cache_millis;

    if subscriber.udp_port > 0 && push.can_enable_push(&subscriber.agent) {
        match subscriber.ip.parse::<IpAddr>() {
            Ok(ip) => {
                push.add_client(PushClient::new(
                    namespace_id,
                    service_name,
                    clusters,
                    subscriber.agent.clone(),
                    SocketAddr::new(ip, subscriber.udp_port),
                    Arc::new(ServiceViewSource::new(Arc::downgrade(manager))),
                ));
                cache_millis = switches.default_push_cache_millis;
            }
            Err(e) => debug!("[PUSH] not subscribing {}: {}", subscriber.ip, e),
        }
    }

    let request = ViewRequest {
        clusters: split_clusters(clusters),
        client_ip: subscriber.ip.clone(),
        healthy_only,
    };
    Ok(manager.list_view(namespace_id, service_name, &request, cache_millis))
}

/// Writes go straight to the registry.
pub struct InstanceOperatorV1 {
    manager: Arc<ServiceManager>,
    push: Arc<PushService>,
}

impl InstanceOperatorV1 {
    pub fn new(manager: Arc<ServiceManager>, push: Arc<PushService>) -> Self {
        Self { manager, push }
    }
}

#[async_trait]
impl InstanceOperator for InstanceOperatorV1 {
    fn version(&self) -> OperatorVersion {
        OperatorVersion::V1
    }

    async fn register_instance(&self, namespace_id: &str, service_name: &str, instance: Instance) -> Result<()> {
        self.manager
            .register_instance(namespace_id, service_name, instance)
            .await
    }

    async fn remove_instance(&self, namespace_id: &str, service_name: &str, instance: Instance) -> Result<()> {
        let ephemeral = instance.ephemeral;
        self.manager
            .remove_instances(namespace_id, service_name, ephemeral, vec![instance])
            .await
    }

    async fn update_instance(&self, namespace_id: &str, service_name: &str, instance: Instance) -> Result<()> {
        self.manager
            .update_instance(namespace_id, service_name, instance)
            .await
    }

    fn list_instance(
        &self,
        namespace_id: &str,
        service_name: &str,
        subscriber: &SubscriberInfo,
        clusters: &str,
        healthy_only: bool,
    ) -> Result<ServiceView> {
        list_and_subscribe(
            &self.manager,
            &self.push,
            namespace_id,
            service_name,
            subscriber,
            clusters,
            healthy_only,
        )
    }

    fn get_instance(&self, namespace_id: &str, service_name: &str, cluster: &str, ip: &str, port: u16) -> Result<Instance> {
        self.manager
            .get_instance(namespace_id, service_name, cluster, ip, port)
    }

    async fn handle_beat(
        &self,
        namespace_id: &str,
        service_name: &str,
        cluster: &str,
        ip: &str,
        port: u16,
        beat: Option<BeatInfo>,
    ) -> Result<BeatResult> {
        self.manager
            .handle_beat(namespace_id, service_name, cluster, ip, port, beat)
            .await
    }

    fn heart_beat_interval(&self, namespace_id: &str, service_name: &str, cluster: &str, ip: &str, port: u16) -> u64 {
        self.manager
            .heart_beat_interval(namespace_id, service_name, cluster, ip, port)
    }
}

/// Writes are attributed to a tracked client, so a vanished client takes
/// its registrations and subscriptions with it.
pub struct InstanceOperatorV2 {
    config: RegistryConfig,
    manager: Arc<ServiceManager>,
    push: Arc<PushService>,
    clients: Arc<ClientManager>,
}

impl InstanceOperatorV2 {
    pub fn new(config: RegistryConfig, manager: Arc<ServiceManager>, push: Arc<PushService>) -> Self {
        Self {
            config,
            manager,
            push,
            clients: Arc::new(ClientManager::new()),
        }
    }

    pub fn clients(&self) -> &Arc<ClientManager> {
        &self.clients
    }

    /// Drop publish records of evicted instances, then release idle
    /// ephemeral clients. Returns the number of clients released.
    pub async fn sweep_expired(&self) -> usize {
        for client in self.clients.all() {
            for (service, instance) in client.published() {
                let present = self
                    .manager
                    .managed(&service.namespace_id, &service.service_name)
                    .and_then(|m| m.find_instance(&instance.cluster_name, &instance.ip, instance.port))
                    .is_some();
                if !present {
                    debug!(
                        "[CLIENT] {} no longer publishes {} to {}",
                        client.id(),
                        instance.ip_addr(),
                        service.service_name
                    );
                    self.clients.unpublish(&client, &service);
                }
            }
        }

        let expired = self
            .clients
            .expired(now_millis(), self.config.client_expired_ms);
        for client in &expired {
            self.release_client(client.id()).await;
        }
        expired.len()
    }

    /// Deregister everything a client published and forget it.
    pub async fn release_client(&self, id: &str) {
        let Some(client) = self.clients.release(id) else {
            return;
        };
        for (service, instance) in client.published() {
            let ephemeral = instance.ephemeral;
            if let Err(e) = self
                .manager
                .remove_instances(&service.namespace_id, &service.service_name, ephemeral, vec![instance])
                .await
            {
                warn!("[CLIENT-RELEASE] failed to deregister for {}: {}", id, e);
            }
        }
    }

    async fn sweep_loop(self: Arc<Self>) {
        let period = std::time::Duration::from_millis(self.config.client_sweep_interval_ms);
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let released = self.sweep_expired().await;
            if released > 0 {
                info!("[CLIENT-EXPIRE] released {} idle clients", released);
            }
        }
    }
}

#[async_trait]
impl InstanceOperator for InstanceOperatorV2 {
    fn version(&self) -> OperatorVersion {
        OperatorVersion::V2
    }

    fn start(self: Arc<Self>) {
        tokio::spawn(async move {
            self.sweep_loop().await;
        });
    }

    async fn register_instance(&self, namespace_id: &str, service_name: &str, instance: Instance) -> Result<()> {
        let id = client_id(&instance.ip, instance.port, instance.ephemeral);
        self.manager
            .register_instance(namespace_id, service_name, instance.clone())
            .await?;
        let client = self.clients.get_or_create(&id, instance.ephemeral);
        self.clients
            .publish(&client, ServiceKey::new(namespace_id, service_name), instance);
        Ok(())
    }

    async fn remove_instance(&self, namespace_id: &str, service_name: &str, instance: Instance) -> Result<()> {
        let id = client_id(&instance.ip, instance.port, instance.ephemeral);
        let ephemeral = instance.ephemeral;
        self.manager
            .remove_instances(namespace_id, service_name, ephemeral, vec![instance])
            .await?;
        if let Some(client) = self.clients.get(&id) {
            self.clients
                .unpublish(&client, &ServiceKey::new(namespace_id, service_name));
        } else {
            // registered before this node tracked it, or written by a peer
            debug!("removed instance of untracked client {}", id);
        }
        Ok(())
    }

    async fn update_instance(&self, namespace_id: &str, service_name: &str, instance: Instance) -> Result<()> {
        let id = client_id(&instance.ip, instance.port, instance.ephemeral);
        self.manager
            .update_instance(namespace_id, service_name, instance.clone())
            .await?;
        let client = self.clients.get_or_create(&id, instance.ephemeral);
        self.clients
            .publish(&client, ServiceKey::new(namespace_id, service_name), instance);
        Ok(())
    }

    fn list_instance(
        &self,
        namespace_id: &str,
        service_name: &str,
        subscriber: &SubscriberInfo,
        clusters: &str,
        healthy_only: bool,
    ) -> Result<ServiceView> {
        let view = list_and_subscribe(
            &self.manager,
            &self.push,
            namespace_id,
            service_name,
            subscriber,
            clusters,
            healthy_only,
        )?;

        if subscriber.udp_port > 0 {
            let client = self
                .clients
                .get_or_create(&client_id(&subscriber.ip, subscriber.udp_port, true), true);
            self.clients.subscribe(
                &client,
                ServiceKey::new(namespace_id, service_name),
                Subscriber {
                    addr: format!("{}:{}", subscriber.ip, subscriber.udp_port),
                    agent: subscriber.agent.clone(),
                    app: subscriber.app.clone(),
                    ip: subscriber.ip.clone(),
                    clusters: clusters.to_string(),
                },
            );
        }
        Ok(view)
    }

    fn get_instance(&self, namespace_id: &str, service_name: &str, cluster: &str, ip: &str, port: u16) -> Result<Instance> {
        self.manager
            .get_instance(namespace_id, service_name, cluster, ip, port)
    }

    async fn handle_beat(
        &self,
        namespace_id: &str,
        service_name: &str,
        cluster: &str,
        ip: &str,
        port: u16,
        beat: Option<BeatInfo>,
    ) -> Result<BeatResult> {
        // beats only ever keep ephemeral registrations alive
        let id = client_id(ip, port, true);
        let service = ServiceKey::new(namespace_id, service_name);
        let publishing = self
            .clients
            .get(&id)
            .map(|client| client.is_publishing(&service))
            .unwrap_or(false);

        if !publishing && let Some(beat) = &beat {
            let mut instance = beat.to_instance();
            instance.cluster_name = cluster.to_string();
            self.register_instance(namespace_id, service_name, instance)
                .await?;
        }

        let result = self
            .manager
            .handle_beat(namespace_id, service_name, cluster, ip, port, beat)
            .await?;
        if let Some(client) = self.clients.get(&id) {
            client.touch();
        }
        Ok(result)
    }

    fn heart_beat_interval(&self, namespace_id: &str, service_name: &str, cluster: &str, ip: &str, port: u16) -> u64 {
        self.manager
            .heart_beat_interval(namespace_id, service_name, cluster, ip, port)
    }

    fn client_count(&self) -> usize {
        self.clients.client_count()
    }
}
