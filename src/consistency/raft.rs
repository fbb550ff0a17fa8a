use arc_swap::ArcSwap;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::ListenerRegistry;
use super::RecordListener;
use super::protocol::{BeatEntry, BeatRequest, DeleteRequest, PublishRequest, VoteRequest, VoteResponse};
use crate::config::RaftConfig;
use crate::error::{NamingError, Result};
use crate::membership::service::MemberChangeListener;
use crate::membership::types::ServerList;
use crate::model::datum::{Datum, Record};
use crate::storage::KvStorage;

const DATUM_PREFIX: &str = "datum:";
const TERM_KEY: &str = "meta:term";
const TICK: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaftRole {
    Follower,
    Candidate,
    Leader,
}

/// Outbound calls of the replicated log.
#[async_trait]
pub trait RaftTransport: Send + Sync {
    async fn request_vote(&self, peer: &str, req: &VoteRequest) -> anyhow::Result<VoteResponse>;

    async fn send_beat(&self, peer: &str, beat: &BeatRequest) -> anyhow::Result<()>;

    async fn publish(&self, peer: &str, req: &PublishRequest) -> anyhow::Result<()>;

    async fn delete(&self, peer: &str, req: &DeleteRequest) -> anyhow::Result<()>;

    async fn forward_publish(&self, leader: &str, key: &str, value: &Record) -> anyhow::Result<()>;

    async fn forward_delete(&self, leader: &str, key: &str) -> anyhow::Result<()>;

    async fn fetch_datums(&self, peer: &str, keys: &[String]) -> anyhow::Result<Vec<Datum>>;
}

struct RaftState {
    term: u64,
    role: RaftRole,
    voted_for: Option<String>,
    leader: Option<String>,
    election_deadline: Instant,
    next_beat: Instant,
}

/// Leader-ordered key/value log for persistent data.
///
/// Every node keeps the full datum map; the leader stamps each write with a
/// per-key increasing timestamp and confirms it once a majority applied it.
pub struct RaftCore {
    local: String,
    peers: ArcSwap<Vec<String>>,
    state: Mutex<RaftState>,
    datums: DashMap<String, Datum>,
    listeners: ListenerRegistry,
    storage: Arc<dyn KvStorage>,
    transport: Arc<dyn RaftTransport>,
    config: RaftConfig,
    publish_lock: tokio::sync::Mutex<()>,
    initialized: AtomicBool,
}

fn remote_error(e: anyhow::Error) -> NamingError {
    match e.downcast::<NamingError>() {
        Ok(err) => err,
        Err(e) => NamingError::server(format!("leader call failed: {e}")),
    }
}

impl RaftCore {
    pub fn new(
        local: impl Into<String>,
        storage: Arc<dyn KvStorage>,
        transport: Arc<dyn RaftTransport>,
        config: RaftConfig,
    ) -> Arc<Self> {
        let local = local.into();
        let first_deadline = Instant::now()
            + Duration::from_millis(rand::thread_rng().gen_range(0..=config.election_timeout_ms.max(1)));
        Arc::new(Self {
            peers: ArcSwap::from_pointee(vec![local.clone()]),
            local,
            state: Mutex::new(RaftState {
                term: 0,
                role: RaftRole::Follower,
                voted_for: None,
                leader: None,
                election_deadline: first_deadline,
                next_beat: Instant::now(),
            }),
            datums: DashMap::new(),
            listeners: ListenerRegistry::new(),
            storage,
            transport,
            config,
            publish_lock: tokio::sync::Mutex::new(()),
            initialized: AtomicBool::new(false),
        })
    }

    /// Restore term and datums from storage. Listeners registered later get
    /// the restored datums replayed.
    pub fn init(&self) -> Result<()> {
        self.storage.snapshot_load()?;

        if let Some(raw) = self.storage.get(TERM_KEY)
            && let Ok(term) = String::from_utf8_lossy(&raw).parse::<u64>()
        {
            self.state.lock().term = term;
        }

        let mut loaded = 0;
        for key in self.storage.keys_with_prefix(DATUM_PREFIX) {
            let Some(raw) = self.storage.get(&key) else {
                continue;
            };
            match serde_json::from_slice::<Datum>(&raw) {
                Ok(datum) => {
                    self.datums.insert(datum.key.clone(), datum);
                    loaded += 1;
                }
                Err(e) => warn!("[RAFT] skipping unreadable datum {}: {}", key, e),
            }
        }

        self.initialized.store(true, Ordering::Release);
        info!("[RAFT] initialized with term {} and {} datums", self.term(), loaded);
        Ok(())
    }

    pub async fn start(self: Arc<Self>) {
        {
            let core = self.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(TICK);
                loop {
                    interval.tick().await;
                    core.tick().await;
                }
            });
        }

        {
            let core = self.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(core.config.snapshot_interval());
                interval.tick().await;
                loop {
                    interval.tick().await;
                    if let Err(e) = core.storage.do_snapshot() {
                        error!("[RAFT] snapshot failed: {}", e);
                    }
                }
            });
        }

        info!("[RAFT] started on {}", self.local);
    }

    pub fn local_address(&self) -> &str {
        &self.local
    }

    pub fn term(&self) -> u64 {
        self.state.lock().term
    }

    pub fn role(&self) -> RaftRole {
        self.state.lock().role
    }

    pub fn leader(&self) -> Option<String> {
        self.state.lock().leader.clone()
    }

    pub fn is_leader(&self) -> bool {
        self.state.lock().role == RaftRole::Leader
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn set_peers(&self, mut peers: Vec<String>) {
        if !peers.contains(&self.local) {
            peers.push(self.local.clone());
        }
        peers.sort();
        peers.dedup();
        self.peers.store(Arc::new(peers));
    }

    pub fn peers(&self) -> Arc<Vec<String>> {
        self.peers.load_full()
    }

    fn other_peers(&self) -> Vec<String> {
        self.peers
            .load()
            .iter()
            .filter(|peer| **peer != self.local)
            .cloned()
            .collect()
    }

    fn majority(&self) -> usize {
        self.peers.load().len() / 2 + 1
    }

    fn election_timeout(&self) -> Duration {
        let base = self.config.election_timeout_ms;
        let jitter = rand::thread_rng().gen_range(0..=base / 3);
        Duration::from_millis(base + jitter)
    }

    fn persist_term(&self, term: u64) {
        if let Err(e) = self.storage.put(TERM_KEY, term.to_string().into_bytes()) {
            warn!("[RAFT] failed to persist term {}: {}", term, e);
        }
    }

    /// One scheduler step: start an election when the leader went quiet, send
    /// heartbeats when leading.
    pub(crate) async fn tick(&self) {
        let now = Instant::now();
        let alone = self.peers.load().len() <= 1;
        let (election_due, beat_due) = {
            let mut st = self.state.lock();
            let election_due = st.role != RaftRole::Leader && (alone || now >= st.election_deadline);
            let beat_due = st.role == RaftRole::Leader && now >= st.next_beat;
            if beat_due {
                st.next_beat = now + self.config.heartbeat_interval();
            }
            (election_due, beat_due)
        };

        if election_due {
            self.run_election().await;
        }
        if beat_due {
            self.send_beats().await;
        }
    }

    pub(crate) async fn run_election(&self) {
        let term = {
            let mut st = self.state.lock();
            st.term += 1;
            st.role = RaftRole::Candidate;
            st.voted_for = Some(self.local.clone());
            st.leader = None;
            st.election_deadline = Instant::now() + self.election_timeout();
            st.term
        };
        self.persist_term(term);
        info!("[RAFT] {} starts election for term {}", self.local, term);

        let request = VoteRequest {
            candidate: self.local.clone(),
            term,
        };
        let peers = self.other_peers();
        let responses =
            futures::future::join_all(peers.iter().map(|peer| self.transport.request_vote(peer, &request))).await;

        let mut votes = 1;
        for (peer, response) in peers.iter().zip(responses) {
            match response {
                Ok(vote) => {
                    if vote.term > term {
                        self.step_down(vote.term, None);
                        return;
                    }
                    if vote.voted_for.as_deref() == Some(self.local.as_str()) {
                        votes += 1;
                    }
                }
                Err(e) => debug!("[RAFT] vote request to {} failed: {}", peer, e),
            }
        }

        let won = {
            let mut st = self.state.lock();
            let won = st.role == RaftRole::Candidate && st.term == term && votes >= self.majority();
            if won {
                st.role = RaftRole::Leader;
                st.leader = Some(self.local.clone());
                st.next_beat = Instant::now() + self.config.heartbeat_interval();
            }
            won
        };

        if won {
            info!("[RAFT] {} elected leader for term {} with {} votes", self.local, term, votes);
            self.send_beats().await;
        } else {
            debug!("[RAFT] election for term {} got {} votes, need {}", term, votes, self.majority());
        }
    }

    fn step_down(&self, term: u64, leader: Option<String>) {
        let changed = {
            let mut st = self.state.lock();
            let changed = st.term != term;
            if term > st.term {
                st.voted_for = None;
            }
            st.term = term.max(st.term);
            st.role = RaftRole::Follower;
            if leader.is_some() {
                st.voted_for = leader.clone();
                st.leader = leader;
            }
            st.election_deadline = Instant::now() + self.election_timeout();
            changed
        };
        if changed {
            self.persist_term(term);
        }
    }

    pub fn receive_vote(&self, request: &VoteRequest) -> VoteResponse {
        let (response, persist) = {
            let mut st = self.state.lock();
            if request.term <= st.term {
                debug!(
                    "[RAFT] refusing vote for {} (term {} <= {})",
                    request.candidate, request.term, st.term
                );
                (
                    VoteResponse {
                        voter: self.local.clone(),
                        term: st.term,
                        voted_for: st.voted_for.clone(),
                    },
                    None,
                )
            } else {
                st.term = request.term;
                st.role = RaftRole::Follower;
                st.voted_for = Some(request.candidate.clone());
                st.leader = None;
                st.election_deadline = Instant::now() + self.election_timeout();
                (
                    VoteResponse {
                        voter: self.local.clone(),
                        term: request.term,
                        voted_for: Some(request.candidate.clone()),
                    },
                    Some(request.term),
                )
            }
        };
        if let Some(term) = persist {
            self.persist_term(term);
            info!("[RAFT] voted for {} in term {}", request.candidate, term);
        }
        response
    }

    pub(crate) async fn send_beats(&self) {
        let term = self.term();
        let mut entries: Vec<BeatEntry> = self
            .datums
            .iter()
            .map(|entry| BeatEntry {
                key: entry.key().clone(),
                timestamp: entry.value().timestamp,
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        let beat = BeatRequest {
            leader: self.local.clone(),
            term,
            entries,
        };
        let peers = self.other_peers();
        let results =
            futures::future::join_all(peers.iter().map(|peer| self.transport.send_beat(peer, &beat))).await;
        for (peer, result) in peers.iter().zip(results) {
            if let Err(e) = result {
                debug!("[RAFT] beat to {} failed: {}", peer, e);
            }
        }
    }

    /// Follow the sender, then converge local datums to its key set.
    pub async fn receive_beat(&self, beat: &BeatRequest) -> Result<()> {
        if beat.leader == self.local {
            return Ok(());
        }
        {
            let st = self.state.lock();
            if beat.term < st.term {
                return Err(NamingError::invalid(format!(
                    "stale beat from {} (term {} < {})",
                    beat.leader, beat.term, st.term
                )));
            }
        }
        self.step_down(beat.term, Some(beat.leader.clone()));

        let remote: HashMap<&str, u64> = beat
            .entries
            .iter()
            .map(|entry| (entry.key.as_str(), entry.timestamp))
            .collect();

        let to_delete: Vec<String> = self
            .datums
            .iter()
            .filter(|entry| !remote.contains_key(entry.key().as_str()))
            .map(|entry| entry.key().clone())
            .collect();
        for key in to_delete {
            info!("[RAFT] key {} not on leader {}, deleting", key, beat.leader);
            self.apply_delete(&key);
        }

        let to_fetch: Vec<String> = beat
            .entries
            .iter()
            .filter(|entry| {
                self.datums
                    .get(&entry.key)
                    .map(|local| local.timestamp < entry.timestamp)
                    .unwrap_or(true)
            })
            .map(|entry| entry.key.clone())
            .collect();
        if to_fetch.is_empty() {
            return Ok(());
        }

        let datums = self
            .transport
            .fetch_datums(&beat.leader, &to_fetch)
            .await
            .map_err(remote_error)?;
        for datum in datums {
            let stale = self
                .datums
                .get(&datum.key)
                .map(|local| local.timestamp >= datum.timestamp)
                .unwrap_or(false);
            if !stale {
                self.apply_datum(datum)?;
            }
        }
        Ok(())
    }

    /// Write through the leader and wait for a majority.
    pub async fn signal_publish(&self, key: &str, value: Record) -> Result<()> {
        if !self.is_leader() {
            let leader = self
                .leader()
                .ok_or_else(|| NamingError::server("no raft leader elected yet"))?;
            return self
                .transport
                .forward_publish(&leader, key, &value)
                .await
                .map_err(remote_error);
        }

        let _guard = self.publish_lock.lock().await;
        let timestamp = self
            .datums
            .get(key)
            .map(|datum| datum.timestamp + 1)
            .unwrap_or(1);
        let datum = Datum::new(key, value, timestamp);
        self.apply_datum(datum.clone())?;

        let request = PublishRequest {
            source: self.local.clone(),
            term: self.term(),
            datum,
        };
        let transport = self.transport.clone();
        self.replicate(key, move |peer| {
            let transport = transport.clone();
            let request = request.clone();
            async move { transport.publish(&peer, &request).await }
        })
        .await
    }

    pub async fn signal_delete(&self, key: &str) -> Result<()> {
        if !self.is_leader() {
            let leader = self
                .leader()
                .ok_or_else(|| NamingError::server("no raft leader elected yet"))?;
            return self
                .transport
                .forward_delete(&leader, key)
                .await
                .map_err(remote_error);
        }

        let _guard = self.publish_lock.lock().await;
        self.apply_delete(key);

        let request = DeleteRequest {
            source: self.local.clone(),
            term: self.term(),
            key: key.to_string(),
        };
        let transport = self.transport.clone();
        self.replicate(key, move |peer| {
            let transport = transport.clone();
            let request = request.clone();
            async move { transport.delete(&peer, &request).await }
        })
        .await
    }

    /// Send to every follower and wait for enough acknowledgements to form a
    /// majority with the leader. Sends keep running after a timeout.
    async fn replicate<F, Fut>(&self, key: &str, send: F) -> Result<()>
    where
        F: Fn(String) -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let needed = self.majority().saturating_sub(1);
        if needed == 0 {
            return Ok(());
        }

        let peers = self.other_peers();
        let (tx, mut rx) = mpsc::channel(peers.len().max(1));
        for peer in peers {
            let tx = tx.clone();
            let fut = send(peer.clone());
            tokio::spawn(async move {
                let result = fut.await;
                if let Err(e) = &result {
                    warn!("[RAFT] replication to {} failed: {}", peer, e);
                }
                let _ = tx.send(result.is_ok()).await;
            });
        }
        drop(tx);

        let wait = async {
            let mut acks = 0;
            while let Some(ok) = rx.recv().await {
                if ok {
                    acks += 1;
                    if acks >= needed {
                        return true;
                    }
                }
            }
            false
        };

        match tokio::time::timeout(self.config.publish_timeout(), wait).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(NamingError::Timeout(format!(
                "write of {key} was not acknowledged by a majority"
            ))),
            Err(_) => Err(NamingError::Timeout(format!(
                "write of {key} not confirmed within {:?}",
                self.config.publish_timeout()
            ))),
        }
    }

    fn accept_leader(&self, source: &str, term: u64) -> Result<()> {
        {
            let st = self.state.lock();
            if term < st.term {
                return Err(NamingError::invalid(format!(
                    "stale write from {source} (term {term} < {})",
                    st.term
                )));
            }
        }
        self.step_down(term, Some(source.to_string()));
        Ok(())
    }

    pub fn receive_publish(&self, request: PublishRequest) -> Result<()> {
        self.accept_leader(&request.source, request.term)?;

        let stale = self
            .datums
            .get(&request.datum.key)
            .map(|local| local.timestamp >= request.datum.timestamp)
            .unwrap_or(false);
        if stale {
            debug!("[RAFT] ignoring stale datum {}", request.datum.key);
            return Ok(());
        }
        self.apply_datum(request.datum)
    }

    pub fn receive_delete(&self, request: DeleteRequest) -> Result<()> {
        self.accept_leader(&request.source, request.term)?;
        self.apply_delete(&request.key);
        Ok(())
    }

    fn apply_datum(&self, datum: Datum) -> Result<()> {
        let encoded = serde_json::to_vec(&datum)?;
        self.storage
            .put(&format!("{DATUM_PREFIX}{}", datum.key), encoded)?;

        let key = datum.key.clone();
        let value = datum.value.clone();
        self.datums.insert(key.clone(), datum);
        self.listeners.notify_change(&key, &value);
        debug!("[RAFT] applied {}", key);
        Ok(())
    }

    fn apply_delete(&self, key: &str) {
        if let Err(e) = self.storage.delete(&format!("{DATUM_PREFIX}{key}")) {
            warn!("[RAFT] failed to delete {} from storage: {}", key, e);
        }
        if self.datums.remove(key).is_some() {
            self.listeners.notify_delete(key);
        }
    }

    pub fn get(&self, key: &str) -> Option<Datum> {
        self.datums.get(key).map(|datum| datum.value().clone())
    }

    pub fn datums(&self, keys: &[String]) -> Vec<Datum> {
        keys.iter().filter_map(|key| self.get(key)).collect()
    }

    /// Register a listener and replay every datum it is interested in.
    pub fn listen(&self, key: &str, listener: Arc<dyn RecordListener>) {
        self.listeners.listen(key, listener.clone());

        let existing: Vec<Datum> = self
            .datums
            .iter()
            .filter(|entry| listener.interests(entry.key()))
            .map(|entry| entry.value().clone())
            .collect();
        for datum in existing {
            if let Err(e) = listener.on_change(&datum.key, &datum.value) {
                error!("[RAFT] listener replay of {} failed: {}", datum.key, e);
            }
        }
    }

    pub fn unlisten(&self, key: &str, listener: &Arc<dyn RecordListener>) {
        self.listeners.unlisten(key, listener);
    }

    pub fn unlisten_matching(&self, key: &str) {
        self.listeners.unlisten_matching(key);
    }
}

impl MemberChangeListener for RaftCore {
    fn on_member_change(&self, servers: &ServerList) {
        self.set_peers(servers.all.clone());
    }
}
