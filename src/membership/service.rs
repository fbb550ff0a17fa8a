use anyhow::Result;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rand::seq::SliceRandom;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use super::types::{GossipTimings, Member, MemberId, MemberMessage, MemberState, ServerList};
use crate::config::ServerConfig;

const MAX_DATAGRAM: usize = 65_536;

/// Receives the server list whenever membership changes.
pub trait MemberChangeListener: Send + Sync {
    fn on_member_change(&self, servers: &ServerList);
}

pub struct MembershipService {
    local: Member,
    members: DashMap<MemberId, Member>,
    socket: UdpSocket,
    seeds: Vec<SocketAddr>,
    incarnation: AtomicU64,
    timings: GossipTimings,
    listeners: RwLock<Vec<Arc<dyn MemberChangeListener>>>,
    published: Mutex<ServerList>,
}

impl MembershipService {
    /// Bind the gossip socket. Seeds are contacted once [`Self::start`] runs.
    pub async fn bind(config: &ServerConfig) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(config.gossip_addr).await?;
        let local = Member {
            id: MemberId::random(),
            address: config.http_addr,
            gossip_addr: socket.local_addr()?,
            state: MemberState::Up,
            incarnation: 1,
            last_contact: None,
        };
        info!(
            "gossip for {} bound to {} ({} seed(s))",
            local.address,
            local.gossip_addr,
            config.seeds.len()
        );

        let members = DashMap::new();
        members.insert(local.id.clone(), local.clone());
        let service = Arc::new(Self {
            local,
            members,
            socket,
            seeds: config.seeds.clone(),
            incarnation: AtomicU64::new(1),
            timings: GossipTimings::from(config),
            listeners: RwLock::new(Vec::new()),
            published: Mutex::new(ServerList::default()),
        });
        // the first real change must differ from the published list
        *service.published.lock() = service.server_list();
        Ok(service)
    }

    pub async fn start(self: Arc<Self>) {
        {
            let service = self.clone();
            tokio::spawn(async move { service.probe_loop().await });
        }
        {
            let service = self.clone();
            tokio::spawn(async move { service.receive_loop().await });
        }
        {
            let service = self.clone();
            tokio::spawn(async move { service.sweep_loop().await });
        }
        info!("membership started on {}", self.local.gossip_addr);
    }

    pub fn local_address(&self) -> String {
        self.local.server_address()
    }

    pub fn local_id(&self) -> &MemberId {
        &self.local.id
    }

    pub fn gossip_addr(&self) -> SocketAddr {
        self.local.gossip_addr
    }

    /// Register a listener and hand it the current list immediately.
    pub fn add_listener(&self, listener: Arc<dyn MemberChangeListener>) {
        listener.on_member_change(&self.server_list());
        self.listeners.write().push(listener);
    }

    pub fn member(&self, id: &MemberId) -> Option<Member> {
        self.members.get(id).map(|entry| entry.value().clone())
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn server_list(&self) -> ServerList {
        let mut list = ServerList::default();
        for entry in self.members.iter() {
            let member = entry.value();
            match member.state {
                MemberState::Up => {
                    list.all.push(member.server_address());
                    list.healthy.push(member.server_address());
                }
                MemberState::Suspicious => list.all.push(member.server_address()),
                MemberState::Down => {}
            }
        }
        for addresses in [&mut list.all, &mut list.healthy] {
            addresses.sort();
            addresses.dedup();
        }
        list
    }

    /// Tell every up member this server is leaving.
    pub async fn leave(&self) {
        let incarnation = self.incarnation.fetch_add(1, Ordering::AcqRel) + 1;
        info!("leaving the cluster (inc={})", incarnation);
        self.broadcast(&MemberMessage::Leave {
            id: self.local.id.clone(),
            incarnation,
        })
        .await;
    }

    fn publish_if_changed(&self) {
        let current = self.server_list();
        {
            let mut published = self.published.lock();
            if *published == current {
                return;
            }
            *published = current.clone();
        }

        info!(
            "server list changed: {} healthy of {} {:?}",
            current.healthy.len(),
            current.all.len(),
            current.healthy
        );
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.on_member_change(&current);
        }
    }

    fn digest(&self) -> Vec<Member> {
        self.members.iter().map(|entry| entry.value().clone()).collect()
    }

    fn peers_up(&self) -> Vec<Member> {
        self.members
            .iter()
            .filter(|entry| entry.value().id != self.local.id && entry.value().is_up())
            .map(|entry| entry.value().clone())
            .collect()
    }

    async fn send(&self, message: &MemberMessage, target: SocketAddr) {
        match bincode::serialize(message) {
            Ok(encoded) => {
                if let Err(e) = self.socket.send_to(&encoded, target).await {
                    warn!("gossip send to {} failed: {}", target, e);
                }
            }
            Err(e) => warn!("gossip encode failed: {}", e),
        }
    }

    async fn broadcast(&self, message: &MemberMessage) {
        for member in self.peers_up() {
            self.send(message, member.gossip_addr).await;
        }
    }

    async fn probe_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.timings.probe_interval);
        loop {
            interval.tick().await;

            let peers = self.peers_up();
            if peers.is_empty() {
                // alone: keep knocking on the seeds until one answers
                let join = MemberMessage::Join {
                    member: self.local.clone(),
                };
                for seed in &self.seeds {
                    self.send(&join, *seed).await;
                }
                continue;
            }

            let Some(target) = ({
                let mut rng = rand::thread_rng();
                peers.choose(&mut rng).cloned()
            }) else {
                continue;
            };
            let probe = MemberMessage::Probe {
                from: self.local.id.clone(),
                incarnation: self.incarnation.load(Ordering::Acquire),
                digest: self.digest(),
            };
            debug!("probing {}", target.address);
            self.send(&probe, target.gossip_addr).await;
        }
    }

    async fn receive_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (len, src) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    warn!("gossip receive failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };
            match bincode::deserialize::<MemberMessage>(&buf[..len]) {
                Ok(message) => self.handle_message(message, src).await,
                Err(e) => warn!("undecodable gossip from {}: {}", src, e),
            }
        }
    }

    pub(crate) async fn handle_message(&self, message: MemberMessage, src: SocketAddr) {
        match message {
            MemberMessage::Probe {
                from,
                incarnation,
                digest,
            } => {
                self.touch(&from, incarnation);
                self.merge(digest);
                let ack = MemberMessage::ProbeAck {
                    from: self.local.id.clone(),
                    incarnation: self.incarnation.load(Ordering::Acquire),
                    digest: self.digest(),
                };
                self.send(&ack, src).await;
            }
            MemberMessage::ProbeAck {
                from,
                incarnation,
                digest,
            } => {
                self.touch(&from, incarnation);
                self.merge(digest);
            }
            MemberMessage::Join { member } => {
                info!("{} joins through us", member.address);
                let mut member = member;
                member.state = MemberState::Up;
                member.last_contact = Some(Instant::now());
                self.members.insert(member.id.clone(), member);
                let ack = MemberMessage::ProbeAck {
                    from: self.local.id.clone(),
                    incarnation: self.incarnation.load(Ordering::Acquire),
                    digest: self.digest(),
                };
                self.send(&ack, src).await;
            }
            MemberMessage::Leave { id, incarnation } => {
                if let Some(mut member) = self.members.get_mut(&id)
                    && incarnation >= member.incarnation
                {
                    info!("{} left the cluster", member.address);
                    member.state = MemberState::Down;
                    member.incarnation = incarnation;
                }
            }
            MemberMessage::Suspect { id, incarnation } => self.on_suspect(id, incarnation).await,
            MemberMessage::Refute { id, incarnation } => {
                if let Some(mut member) = self.members.get_mut(&id)
                    && incarnation > member.incarnation
                {
                    info!("{} refuted suspicion (inc={})", member.address, incarnation);
                    member.state = MemberState::Up;
                    member.incarnation = incarnation;
                    member.last_contact = Some(Instant::now());
                }
            }
        }
        self.publish_if_changed();
    }

    /// Direct contact proves the sender is up.
    fn touch(&self, id: &MemberId, incarnation: u64) {
        if let Some(mut member) = self.members.get_mut(id) {
            member.last_contact = Some(Instant::now());
            member.incarnation = member.incarnation.max(incarnation);
            if member.state != MemberState::Up {
                info!("{} is reachable again", member.address);
                member.state = MemberState::Up;
            }
        }
    }

    /// Adopt whatever the digest knows with a newer incarnation.
    fn merge(&self, digest: Vec<Member>) {
        for mut remote in digest {
            if remote.id == self.local.id {
                continue;
            }
            match self.members.get_mut(&remote.id) {
                Some(mut known) => {
                    if remote.incarnation > known.incarnation {
                        known.state = remote.state;
                        known.incarnation = remote.incarnation;
                        known.last_contact = Some(Instant::now());
                    }
                }
                None if remote.state != MemberState::Down => {
                    info!("discovered {} (gossip {})", remote.address, remote.gossip_addr);
                    remote.last_contact = Some(Instant::now());
                    self.members.insert(remote.id.clone(), remote);
                }
                None => {}
            }
        }
    }

    async fn on_suspect(&self, id: MemberId, incarnation: u64) {
        if id == self.local.id {
            let refuted = {
                let current = self.incarnation.load(Ordering::Acquire);
                let next = current.max(incarnation) + 1;
                self.incarnation.store(next, Ordering::Release);
                next
            };
            if let Some(mut me) = self.members.get_mut(&id) {
                me.incarnation = refuted;
                me.state = MemberState::Up;
            }
            info!("refuting suspicion of this server (inc={})", refuted);
            self.broadcast(&MemberMessage::Refute { id, incarnation: refuted })
                .await;
            return;
        }

        if let Some(mut member) = self.members.get_mut(&id)
            && member.is_up()
            && incarnation >= member.incarnation
        {
            info!("{} is suspected by a peer", member.address);
            member.state = MemberState::Suspicious;
            member.incarnation = incarnation;
        }
    }

    async fn sweep_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.timings.probe_interval * 4);
        loop {
            interval.tick().await;
            for message in self.sweep(Instant::now()) {
                self.broadcast(&message).await;
            }
            self.publish_if_changed();
        }
    }

    /// Move silent members Up -> Suspicious -> Down; returns the suspicions to spread.
    pub(crate) fn sweep(&self, now: Instant) -> Vec<MemberMessage> {
        let mut suspicions = Vec::new();
        for mut entry in self.members.iter_mut() {
            let member = entry.value_mut();
            if member.id == self.local.id {
                continue;
            }
            let Some(last_contact) = member.last_contact else {
                member.last_contact = Some(now);
                continue;
            };
            let silence = now.saturating_duration_since(last_contact);

            match member.state {
                MemberState::Up if silence > self.timings.suspect_after => {
                    warn!("{} silent for {:?}, suspecting", member.address, silence);
                    member.state = MemberState::Suspicious;
                    suspicions.push(MemberMessage::Suspect {
                        id: member.id.clone(),
                        incarnation: member.incarnation,
                    });
                }
                MemberState::Suspicious if silence > self.timings.down_after => {
                    warn!("{} silent for {:?}, marking down", member.address, silence);
                    member.state = MemberState::Down;
                }
                _ => {}
            }
        }
        suspicions
    }
}
