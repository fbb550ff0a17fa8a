use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

use super::{ConsistencyService, ListenerRegistry, RecordListener};
use crate::config::DistroConfig;
use crate::config::switches::Switches;
use crate::distro::mapper::DistroMapper;
use crate::distro::protocol::{ChecksumReport, DatumBatch, DistroTransport};
use crate::error::{NamingError, Result};
use crate::model::datum::{Datum, Record};
use crate::model::keys;
use crate::model::service::Service;

/// Ephemeral instance lists, owned per service by the distro mapper.
///
/// Writes apply locally and return; peers converge through a delayed push of
/// the changed datum and a periodic checksum report that lets every peer pull
/// what it is missing.
pub struct DistroConsistencyService {
    store: DashMap<String, Datum>,
    listeners: ListenerRegistry,
    mapper: Arc<DistroMapper>,
    switches: Arc<Switches>,
    transport: Arc<dyn DistroTransport>,
    config: DistroConfig,
    /// Keys with a push already scheduled.
    pending_sync: DashMap<String, ()>,
    /// Servers whose checksum report is being processed.
    syncing_with: DashMap<String, ()>,
    initialized: AtomicBool,
    me: Weak<DistroConsistencyService>,
}

impl DistroConsistencyService {
    pub fn new(
        mapper: Arc<DistroMapper>,
        switches: Arc<Switches>,
        transport: Arc<dyn DistroTransport>,
        config: DistroConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            store: DashMap::new(),
            listeners: ListenerRegistry::new(),
            mapper,
            switches,
            transport,
            config,
            pending_sync: DashMap::new(),
            syncing_with: DashMap::new(),
            initialized: AtomicBool::new(false),
            me: me.clone(),
        })
    }

    /// Load existing data from a peer, then start the checksum reporter.
    pub async fn start(self: Arc<Self>) {
        {
            let service = self.clone();
            tokio::spawn(async move {
                service.load_from_peers().await;
            });
        }

        {
            let service = self.clone();
            tokio::spawn(async move {
                service.checksum_report_loop().await;
            });
        }

        info!("[DISTRO] ephemeral consistency service started");
    }

    async fn load_from_peers(&self) {
        loop {
            let peers = self.mapper.peers();
            if self.mapper.is_standalone() || peers.is_empty() {
                self.initialized.store(true, Ordering::Release);
                info!("[DISTRO] no peers to load from, marking initialized");
                return;
            }

            for peer in &peers {
                match self.transport.fetch_snapshot(peer).await {
                    Ok(datums) => {
                        info!("[DISTRO] loaded {} datums from {}", datums.len(), peer);
                        self.process_data(datums);
                        self.initialized.store(true, Ordering::Release);
                        return;
                    }
                    Err(e) => warn!("[DISTRO] load from {} failed: {}", peer, e),
                }
            }

            tokio::time::sleep(self.config.sync_delay() * 5).await;
        }
    }

    async fn checksum_report_loop(self: Arc<Self>) {
        tokio::time::sleep(self.config.report_initial_delay()).await;

        loop {
            self.report_checksums().await;
            let period = self.switches.load().service_status_synchronization_period_millis;
            tokio::time::sleep(std::time::Duration::from_millis(period.max(100))).await;
        }
    }

    /// Send `{datumKey: checksum}` for every key this node owns to every peer.
    pub async fn report_checksums(&self) {
        if !self.switches.load().distro_enabled || self.mapper.is_standalone() {
            return;
        }

        let checksums = self.owned_checksums();
        if checksums.is_empty() {
            return;
        }

        let report = ChecksumReport {
            source: self.mapper.local_address().to_string(),
            checksums,
        };
        for peer in self.mapper.peers() {
            if let Err(e) = self.transport.sync_checksums(&peer, &report).await {
                debug!("[DISTRO] checksum report to {} failed: {}", peer, e);
            }
        }
    }

    pub fn owned_checksums(&self) -> BTreeMap<String, String> {
        self.store
            .iter()
            .filter(|entry| {
                keys::service_name_of(entry.key())
                    .map(|name| self.mapper.responsible(&name))
                    .unwrap_or(false)
            })
            .map(|entry| (entry.key().clone(), entry.value().value.checksum()))
            .collect()
    }

    pub fn keys(&self) -> Vec<String> {
        self.store.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn snapshot(&self) -> Vec<Datum> {
        self.store.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn datums(&self, keys: &[String]) -> Vec<Datum> {
        keys.iter()
            .filter_map(|key| self.store.get(key).map(|datum| datum.value().clone()))
            .collect()
    }

    /// Apply a write locally and notify listeners.
    pub fn on_put(&self, key: &str, value: Record) {
        if keys::match_ephemeral_instance_list_key(key) {
            let timestamp = self
                .store
                .get(key)
                .map(|datum| datum.timestamp + 1)
                .unwrap_or(1);
            self.store
                .insert(key.to_string(), Datum::new(key, value.clone(), timestamp));
        }

        self.listeners.notify_change(key, &value);
    }

    pub fn on_remove(&self, key: &str) {
        self.store.remove(key);
        self.listeners.notify_delete(key);
    }

    fn schedule_sync(&self, key: &str) {
        if !self.switches.load().distro_enabled || self.mapper.is_standalone() {
            return;
        }
        if self.pending_sync.insert(key.to_string(), ()).is_some() {
            return;
        }

        let Some(service) = self.me.upgrade() else {
            return;
        };
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(service.config.sync_delay()).await;
            service.pending_sync.remove(&key);

            let Some(datum) = service.store.get(&key).map(|d| d.value().clone()) else {
                return;
            };
            let batch = DatumBatch {
                source: service.mapper.local_address().to_string(),
                datums: vec![datum],
            };
            for peer in service.mapper.peers() {
                if let Err(e) = service.transport.sync_datums(&peer, &batch).await {
                    warn!("[DISTRO] sync of {} to {} failed: {}", key, peer, e);
                }
            }
        });
    }

    /// Datums pushed by a peer after its local write.
    pub fn on_receive_datums(&self, batch: DatumBatch) {
        let mut accepted = Vec::with_capacity(batch.datums.len());
        for datum in batch.datums {
            let owned_here = keys::service_name_of(&datum.key)
                .map(|name| self.mapper.responsible(&name))
                .unwrap_or(false);
            if owned_here {
                warn!(
                    "[DISTRO] ignoring {} from {}: key is owned by this node",
                    datum.key, batch.source
                );
                continue;
            }
            accepted.push(datum);
        }
        self.process_data(accepted);
    }

    /// Compare a peer's checksums with local data; drop what the peer no
    /// longer owns and pull what differs.
    pub async fn on_receive_checksums(&self, report: ChecksumReport) {
        let server = report.source.clone();
        if self.syncing_with.insert(server.clone(), ()).is_some() {
            warn!("[DISTRO] sync checksum task already in process with {}", server);
            return;
        }

        self.reconcile_checksums(&report).await;
        self.syncing_with.remove(&server);
    }

    async fn reconcile_checksums(&self, report: &ChecksumReport) {
        let server = &report.source;
        let mut to_update = Vec::new();
        let mut to_remove = Vec::new();

        for (key, checksum) in &report.checksums {
            let Some(name) = keys::service_name_of(key) else {
                continue;
            };
            if self.mapper.responsible(&name) {
                error!("[DISTRO] receive responsible key checksum of {} from {}", key, server);
                return;
            }

            let differs = self
                .store
                .get(key)
                .map(|datum| datum.value.checksum() != *checksum)
                .unwrap_or(true);
            if differs {
                to_update.push(key.clone());
            }
        }

        for entry in self.store.iter() {
            let Some(name) = keys::service_name_of(entry.key()) else {
                continue;
            };
            if self.mapper.map_srv(&name) == *server && !report.checksums.contains_key(entry.key()) {
                to_remove.push(entry.key().clone());
            }
        }

        info!(
            "[DISTRO] to remove keys: {:?}, to update keys: {:?}, source: {}",
            to_remove, to_update, server
        );

        for key in &to_remove {
            self.on_remove(key);
        }

        if to_update.is_empty() {
            return;
        }

        match self.transport.fetch_datums(server, &to_update).await {
            Ok(datums) => self.process_data(datums),
            Err(e) => error!("[DISTRO] get data from {} failed: {}", server, e),
        }
    }

    /// Apply datums from a peer, creating services this node has never seen.
    pub fn process_data(&self, datums: Vec<Datum>) {
        for datum in &datums {
            if self.listeners.has_exact(&datum.key) || !self.switches.load().default_instance_ephemeral {
                continue;
            }
            let Some((namespace_id, service_name)) = keys::parse_service_key(&datum.key) else {
                continue;
            };

            info!("[DISTRO] creating service {}", datum.key);
            let Some(meta_listener) = self.listeners.first(keys::SERVICE_META_KEY_PREFIX) else {
                warn!("[DISTRO] no service meta listener, cannot create {}", service_name);
                continue;
            };
            let service = Service::new(namespace_id.clone(), service_name.clone());
            let meta_key = keys::build_service_meta_key(&namespace_id, &service_name);
            if let Err(e) = meta_listener.on_change(&meta_key, &Record::Service(Box::new(service))) {
                error!("[DISTRO] failed to create service {}: {}", service_name, e);
            }
        }

        for datum in datums {
            if !self.listeners.has_exact(&datum.key) {
                warn!("[DISTRO] listener of {} not found", datum.key);
                continue;
            }

            let changed = self
                .store
                .get(&datum.key)
                .map(|existing| existing.value.checksum() != datum.value.checksum())
                .unwrap_or(true);
            if !changed {
                continue;
            }

            self.listeners.notify_change(&datum.key, &datum.value);
            self.store.insert(datum.key.clone(), datum);
        }
    }
}

#[async_trait]
impl ConsistencyService for DistroConsistencyService {
    async fn put(&self, key: &str, value: Record) -> Result<()> {
        if !keys::match_ephemeral_key(key) {
            return Err(NamingError::server(format!("{key} is not an ephemeral key")));
        }
        self.on_put(key, value);
        self.schedule_sync(key);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.on_remove(key);
        self.listeners.unlisten_matching(key);
        Ok(())
    }

    fn get(&self, key: &str) -> Option<Datum> {
        self.store.get(key).map(|datum| datum.value().clone())
    }

    fn listen(&self, key: &str, listener: Arc<dyn RecordListener>) {
        self.listeners.listen(key, listener);
    }

    fn unlisten(&self, key: &str, listener: &Arc<dyn RecordListener>) {
        self.listeners.unlisten(key, listener);
    }

    fn is_available(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }
}
