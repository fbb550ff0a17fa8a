use anyhow::Result;
use dashmap::DashMap;
use flate2::Compression;
use flate2::write::GzEncoder;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{DataSource, PushTransport};
use crate::config::PushConfig;
use crate::config::switches::Switches;
use crate::model::keys;
use crate::model::service::md5_hex;
use crate::model::types::now_millis;
use crate::registry::ServiceChangeListener;

/// Datagram body in both directions: `dom` pushes, `push-ack` answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPacket {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: String,
    pub last_ref_time: u64,
}

/// One subscriber of one service.
pub struct PushClient {
    pub namespace_id: String,
    pub service_name: String,
    /// Comma separated cluster filter, empty for all clusters.
    pub clusters: String,
    pub agent: String,
    pub addr: SocketAddr,
    data_source: Arc<dyn DataSource>,
    last_ref_time: AtomicU64,
    last_digest: Mutex<Option<String>>,
}

impl PushClient {
    pub fn new(
        namespace_id: impl Into<String>,
        service_name: impl Into<String>,
        clusters: impl Into<String>,
        agent: impl Into<String>,
        addr: SocketAddr,
        data_source: Arc<dyn DataSource>,
    ) -> Self {
        Self {
            namespace_id: namespace_id.into(),
            service_name: service_name.into(),
            clusters: clusters.into(),
            agent: agent.into(),
            addr,
            data_source,
            last_ref_time: AtomicU64::new(now_millis()),
            last_digest: Mutex::new(None),
        }
    }

    pub fn key(&self) -> String {
        format!("{}|{}", self.addr, self.clusters)
    }

    pub fn cluster_list(&self) -> Vec<String> {
        self.clusters
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn last_ref_time(&self) -> u64 {
        self.last_ref_time.load(Ordering::Relaxed)
    }

    /// The client polled again; it is still alive.
    pub fn refresh(&self) {
        self.last_ref_time.store(now_millis(), Ordering::Relaxed);
    }

    pub fn is_zombie(&self, now: u64, cache_millis: u64) -> bool {
        now.saturating_sub(self.last_ref_time()) > cache_millis
    }
}

impl std::fmt::Debug for PushClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushClient")
            .field("service", &self.service_name)
            .field("addr", &self.addr)
            .field("clusters", &self.clusters)
            .field("agent", &self.agent)
            .finish()
    }
}

#[derive(Clone)]
struct AckEntry {
    key: String,
    target: SocketAddr,
    payload: Arc<Vec<u8>>,
    sent_at: u64,
    retries: u32,
}

pub struct PushService {
    config: PushConfig,
    switches: Arc<Switches>,
    transport: Arc<dyn PushTransport>,
    /// full service name → client key → client
    clients: DashMap<String, DashMap<String, Arc<PushClient>>>,
    acks: DashMap<String, AckEntry>,
    scheduled: DashMap<String, ()>,
    last_ref_time: AtomicU64,
    total_push: AtomicU64,
    failed_push: AtomicU64,
    total_cost_millis: AtomicU64,
    me: Weak<PushService>,
}

impl PushService {
    pub fn new(config: PushConfig, switches: Arc<Switches>, transport: Arc<dyn PushTransport>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            config,
            switches,
            transport,
            clients: DashMap::new(),
            acks: DashMap::new(),
            scheduled: DashMap::new(),
            last_ref_time: AtomicU64::new(0),
            total_push: AtomicU64::new(0),
            failed_push: AtomicU64::new(0),
            total_cost_millis: AtomicU64::new(0),
            me: me.clone(),
        })
    }

    pub async fn start(self: Arc<Self>) {
        {
            let service = self.clone();
            tokio::spawn(async move {
                service.receive_loop().await;
            });
        }

        {
            let service = self.clone();
            tokio::spawn(async move {
                service.zombie_sweep_loop().await;
            });
        }

        info!("Push service started");
    }

    async fn receive_loop(self: Arc<Self>) {
        loop {
            match self.transport.recv().await {
                Ok((payload, from)) => self.on_ack(&payload, from),
                Err(e) => {
                    warn!("[PUSH] receive failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    async fn zombie_sweep_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.zombie_sweep_interval());
        loop {
            interval.tick().await;
            let removed = self.remove_zombies();
            if removed > 0 {
                debug!("[PUSH] swept {} zombie clients", removed);
            }
        }
    }

    /// Subscribe a client, or refresh it when already known.
    pub fn add_client(&self, client: PushClient) {
        let service_key = keys::full_service_name(&client.namespace_id, &client.service_name);
        let clients = self.clients.entry(service_key).or_default();
        let key = client.key();
        if let Some(existing) = clients.get(&key) {
            existing.refresh();
            return;
        }
        debug!("[PUSH] new client {} for {}", client.addr, client.service_name);
        clients.insert(key, Arc::new(client));
    }

    pub fn subscribers(&self, namespace_id: &str, service_name: &str) -> Vec<Arc<PushClient>> {
        self.clients
            .get(&keys::full_service_name(namespace_id, service_name))
            .map(|clients| clients.iter().map(|e| e.value().clone()).collect())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self) -> usize {
        self.clients.iter().map(|e| e.value().len()).sum()
    }

    pub fn total_push(&self) -> u64 {
        self.total_push.load(Ordering::Relaxed)
    }

    pub fn failed_push(&self) -> u64 {
        self.failed_push.load(Ordering::Relaxed)
    }

    pub fn pending_acks(&self) -> usize {
        self.acks.len()
    }

    /// Mean time between send and ack over all acknowledged pushes.
    pub fn average_cost_millis(&self) -> u64 {
        let acked = self
            .total_push()
            .saturating_sub(self.failed_push())
            .saturating_sub(self.acks.len() as u64);
        self.total_cost_millis
            .load(Ordering::Relaxed)
            .checked_div(acked)
            .unwrap_or(0)
    }

    /// Whether a client with this user agent may be pushed to.
    pub fn can_enable_push(&self, agent: &str) -> bool {
        let switches = self.switches.load();
        if !switches.push_enabled {
            return false;
        }
        let Some((family, version)) = parse_agent(agent) else {
            return false;
        };
        switches
            .push_version_floors
            .get(&family)
            .and_then(|floor| parse_version(floor))
            .map(|floor| version >= floor)
            .unwrap_or(false)
    }

    fn remove_zombies(&self) -> usize {
        let cache_millis = self.switches.load().default_push_cache_millis;
        let now = now_millis();
        let mut removed = 0;
        for service in self.clients.iter() {
            let before = service.value().len();
            service
                .value()
                .retain(|_, client| !client.is_zombie(now, cache_millis));
            removed += before - service.value().len();
        }
        self.clients.retain(|_, clients| !clients.is_empty());
        removed
    }

    /// Strictly increasing millisecond stamp, unique per push.
    fn next_ref_time(&self) -> u64 {
        let now = now_millis();
        let previous = self
            .last_ref_time
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        now.max(previous + 1)
    }

    fn encode(&self, packet: &PushPacket) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(packet)?;
        if json.len() < self.config.compress_threshold {
            return Ok(json);
        }
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json)?;
        Ok(encoder.finish()?)
    }

    /// Render and send the current view to every subscriber of a service.
    pub fn push_service(&self, namespace_id: &str, service_name: &str) {
        let Some(me) = self.me.upgrade() else {
            return;
        };
        let service_key = keys::full_service_name(namespace_id, service_name);
        let cache_millis = self.switches.load().default_push_cache_millis;
        let now = now_millis();

        for client in self.subscribers(namespace_id, service_name) {
            if client.is_zombie(now, cache_millis) {
                if let Some(clients) = self.clients.get(&service_key) {
                    clients.remove(&client.key());
                }
                debug!("[PUSH] dropping zombie client {} of {}", client.addr, service_name);
                continue;
            }

            let Some(data) = client.data_source.data(&client) else {
                continue;
            };
            let digest = content_digest(&data);
            let data = data.to_string();
            {
                let mut last = client.last_digest.lock();
                if last.as_deref() == Some(digest.as_str()) {
                    debug!("[PUSH] unchanged view for {}, skipped", client.addr);
                    continue;
                }
                *last = Some(digest);
            }

            let packet = PushPacket {
                kind: "dom".to_string(),
                data,
                last_ref_time: self.next_ref_time(),
            };
            let payload = match self.encode(&packet) {
                Ok(payload) => payload,
                Err(e) => {
                    error!("[PUSH] failed to encode push for {}: {}", service_name, e);
                    continue;
                }
            };
            let entry = AckEntry {
                key: ack_key(client.addr, packet.last_ref_time),
                target: client.addr,
                payload: Arc::new(payload),
                sent_at: now_millis(),
                retries: 0,
            };

            let service = me.clone();
            tokio::spawn(async move {
                service.push_with_retry(entry).await;
            });
        }
    }

    /// Send, then resend after each ack timeout until acked or out of retries.
    async fn push_with_retry(&self, mut entry: AckEntry) {
        loop {
            if entry.retries > self.config.max_retry {
                warn!(
                    "[PUSH] max retries reached, giving up on {} ({})",
                    entry.target, entry.key
                );
                self.acks.remove(&entry.key);
                self.failed_push.fetch_add(1, Ordering::Relaxed);
                return;
            }

            entry.sent_at = now_millis();
            self.acks.insert(entry.key.clone(), entry.clone());
            if let Err(e) = self.transport.send(entry.target, &entry.payload).await {
                error!("[PUSH] failed to send to {}: {}", entry.target, e);
                self.acks.remove(&entry.key);
                self.failed_push.fetch_add(1, Ordering::Relaxed);
                return;
            }
            if entry.retries == 0 {
                self.total_push.fetch_add(1, Ordering::Relaxed);
            }
            entry.retries += 1;

            tokio::time::sleep(self.config.ack_timeout()).await;
            if !self.acks.contains_key(&entry.key) {
                return;
            }
            debug!("[PUSH] no ack from {} yet, retransmitting", entry.target);
        }
    }

    /// Settle the pending push an ack answers.
    pub fn on_ack(&self, payload: &[u8], from: SocketAddr) {
        let ack: PushPacket = match serde_json::from_slice(payload) {
            Ok(ack) => ack,
            Err(e) => {
                warn!("[PUSH-ACK] malformed ack from {}: {}", from, e);
                return;
            }
        };

        let key = ack_key(from, ack.last_ref_time);
        match self.acks.remove(&key) {
            Some((_, entry)) => {
                let cost = now_millis().saturating_sub(entry.sent_at);
                self.total_cost_millis.fetch_add(cost, Ordering::Relaxed);
                debug!("[PUSH-ACK] {} acked after {}ms", key, cost);
            }
            None => warn!("[PUSH-ACK] ack for unknown push {}", key),
        }
    }
}

impl ServiceChangeListener for PushService {
    /// Coalesced: one push per service per delay window.
    fn service_changed(&self, namespace_id: &str, service_name: &str) {
        if !self.switches.load().push_enabled {
            return;
        }
        let service_key = keys::full_service_name(namespace_id, service_name);
        if !self.clients.contains_key(&service_key) {
            return;
        }
        if self.scheduled.insert(service_key.clone(), ()).is_some() {
            return;
        }
        let (Some(service), Ok(runtime)) = (self.me.upgrade(), tokio::runtime::Handle::try_current()) else {
            self.scheduled.remove(&service_key);
            return;
        };

        let delay = self.config.delay();
        let namespace_id = namespace_id.to_string();
        let service_name = service_name.to_string();
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            service.scheduled.remove(&service_key);
            service.push_service(&namespace_id, &service_name);
        });
    }
}

pub fn ack_key(addr: SocketAddr, last_ref_time: u64) -> String {
    format!("{},{},{}", addr.ip(), addr.port(), last_ref_time)
}

/// Fields that change on every render without the content changing.
const VOLATILE_VIEW_FIELDS: [&str; 2] = ["lastRefTime", "cacheMillis"];

/// md5 of a rendered view minus its volatile fields, so an unchanged
/// instance list hashes the same on every render.
pub(crate) fn content_digest(data: &serde_json::Value) -> String {
    match data {
        serde_json::Value::Object(fields) => {
            let mut stable = fields.clone();
            for field in VOLATILE_VIEW_FIELDS {
                stable.remove(field);
            }
            md5_hex(&serde_json::Value::Object(stable).to_string())
        }
        other => md5_hex(&other.to_string()),
    }
}

/// `Nacos-Java-Client:v1.2.1` → (`java`, `[1, 2, 1]`).
pub fn parse_agent(agent: &str) -> Option<(String, [u32; 3])> {
    let (name, version) = agent.split_once(':')?;
    let name = name.trim().to_ascii_lowercase();
    let name = name.strip_prefix("nacos-").unwrap_or(&name);
    let family = name.strip_suffix("-client")?;
    let version = parse_version(version.trim().trim_start_matches(['v', 'V']))?;
    Some((family.to_string(), version))
}

pub fn parse_version(version: &str) -> Option<[u32; 3]> {
    let version = version.split(['-', ' ']).next()?;
    let mut parsed = [0u32; 3];
    for (slot, part) in parsed.iter_mut().zip(version.split('.')) {
        *slot = part.parse().ok()?;
    }
    Some(parsed)
}
