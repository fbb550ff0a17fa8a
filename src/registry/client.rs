use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

use crate::model::instance::Instance;
use crate::model::types::now_millis;

/// (namespace, grouped service name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceKey {
    pub namespace_id: String,
    pub service_name: String,
}

impl ServiceKey {
    pub fn new(namespace_id: impl Into<String>, service_name: impl Into<String>) -> Self {
        Self {
            namespace_id: namespace_id.into(),
            service_name: service_name.into(),
        }
    }
}

/// A discovering client as recorded by its subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscriber {
    pub addr: String,
    pub agent: String,
    pub app: String,
    pub ip: String,
    pub clusters: String,
}

/// `ip:port#ephemeral`
pub fn client_id(ip: &str, port: u16, ephemeral: bool) -> String {
    format!("{ip}:{port}#{ephemeral}")
}

/// One publisher/subscriber endpoint.
#[derive(Debug)]
pub struct Client {
    id: String,
    ephemeral: bool,
    published: DashMap<ServiceKey, Instance>,
    subscribed: DashMap<ServiceKey, Subscriber>,
    last_updated: AtomicU64,
}

impl Client {
    pub fn new(id: impl Into<String>, ephemeral: bool) -> Self {
        Self {
            id: id.into(),
            ephemeral,
            published: DashMap::new(),
            subscribed: DashMap::new(),
            last_updated: AtomicU64::new(now_millis()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    pub fn touch(&self) {
        self.last_updated.store(now_millis(), Ordering::Relaxed);
    }

    pub fn last_updated(&self) -> u64 {
        self.last_updated.load(Ordering::Relaxed)
    }

    pub fn is_publishing(&self, service: &ServiceKey) -> bool {
        self.published.contains_key(service)
    }

    pub fn published(&self) -> Vec<(ServiceKey, Instance)> {
        self.published
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub fn subscriptions(&self) -> Vec<(ServiceKey, Subscriber)> {
        self.subscribed
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Ephemeral, publishing nothing and idle for longer than `expired_ms`.
    pub fn is_expired(&self, now: u64, expired_ms: u64) -> bool {
        self.ephemeral
            && self.published.is_empty()
            && now.saturating_sub(self.last_updated()) > expired_ms
    }
}

/// Reverse indexes: service → publishing clients, service → subscribing clients.
#[derive(Debug, Default)]
pub struct ClientServiceIndexes {
    publishers: DashMap<ServiceKey, HashSet<String>>,
    subscribers: DashMap<ServiceKey, HashSet<String>>,
}

impl ClientServiceIndexes {
    fn add(index: &DashMap<ServiceKey, HashSet<String>>, service: &ServiceKey, client_id: &str) {
        index
            .entry(service.clone())
            .or_default()
            .insert(client_id.to_string());
    }

    fn remove(index: &DashMap<ServiceKey, HashSet<String>>, service: &ServiceKey, client_id: &str) {
        if let Some(mut ids) = index.get_mut(service) {
            ids.remove(client_id);
        }
        index.remove_if(service, |_, ids| ids.is_empty());
    }

    fn members(index: &DashMap<ServiceKey, HashSet<String>>, service: &ServiceKey) -> Vec<String> {
        let mut ids: Vec<String> = index
            .get(service)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    pub fn publishers(&self, service: &ServiceKey) -> Vec<String> {
        Self::members(&self.publishers, service)
    }

    pub fn subscribers(&self, service: &ServiceKey) -> Vec<String> {
        Self::members(&self.subscribers, service)
    }

    pub fn subscribed_services(&self) -> Vec<ServiceKey> {
        self.subscribers.iter().map(|e| e.key().clone()).collect()
    }
}

#[derive(Debug, Default)]
pub struct ClientManager {
    clients: DashMap<String, Arc<Client>>,
    indexes: ClientServiceIndexes,
}

impl ClientManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, client_id: &str) -> Option<Arc<Client>> {
        self.clients.get(client_id).map(|c| c.value().clone())
    }

    pub fn get_or_create(&self, client_id: &str, ephemeral: bool) -> Arc<Client> {
        self.clients
            .entry(client_id.to_string())
            .or_insert_with(|| {
                info!("[CLIENT-CONNECT] {}", client_id);
                Arc::new(Client::new(client_id, ephemeral))
            })
            .clone()
    }

    pub fn all(&self) -> Vec<Arc<Client>> {
        self.clients.iter().map(|c| c.value().clone()).collect()
    }

    pub fn indexes(&self) -> &ClientServiceIndexes {
        &self.indexes
    }

    pub fn publish(&self, client: &Client, service: ServiceKey, instance: Instance) {
        ClientServiceIndexes::add(&self.indexes.publishers, &service, client.id());
        client.published.insert(service, instance);
        client.touch();
    }

    pub fn unpublish(&self, client: &Client, service: &ServiceKey) -> Option<Instance> {
        ClientServiceIndexes::remove(&self.indexes.publishers, service, client.id());
        client.touch();
        client.published.remove(service).map(|(_, instance)| instance)
    }

    pub fn subscribe(&self, client: &Client, service: ServiceKey, subscriber: Subscriber) {
        ClientServiceIndexes::add(&self.indexes.subscribers, &service, client.id());
        client.subscribed.insert(service, subscriber);
        client.touch();
    }

    pub fn unsubscribe(&self, client: &Client, service: &ServiceKey) {
        ClientServiceIndexes::remove(&self.indexes.subscribers, service, client.id());
        client.subscribed.remove(service);
    }

    /// Forget a client and everything indexed for it.
    pub fn release(&self, client_id: &str) -> Option<Arc<Client>> {
        let (_, client) = self.clients.remove(client_id)?;
        for entry in client.published.iter() {
            ClientServiceIndexes::remove(&self.indexes.publishers, entry.key(), client_id);
        }
        for entry in client.subscribed.iter() {
            ClientServiceIndexes::remove(&self.indexes.subscribers, entry.key(), client_id);
        }
        info!("[CLIENT-DISCONNECT] {}", client_id);
        Some(client)
    }

    pub fn expired(&self, now: u64, expired_ms: u64) -> Vec<Arc<Client>> {
        self.clients
            .iter()
            .filter(|c| c.value().is_expired(now, expired_ms))
            .map(|c| c.value().clone())
            .collect()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.clients.iter().map(|c| c.value().subscribed.len()).sum()
    }
}
