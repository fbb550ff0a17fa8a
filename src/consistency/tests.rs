//! Consistency Module Tests
//!
//! ## Test Scopes
//! - **Listener registry**: prefix interest, dedup, unlisten.
//! - **Distro path**: local apply, peer pushes, checksum reconciliation, service auto-creation.
//! - **Raft path**: elections, replication, forwarding, majority timeout, beats, restore from storage.
//! - **Delegate**: per-key routing.

#[cfg(test)]
mod tests {
    use crate::config::switches::{SwitchDomain, Switches};
    use crate::config::{DistroConfig, RaftConfig};
    use crate::consistency::protocol::{
        BeatEntry, BeatRequest, DeleteRequest, PublishRequest, VoteRequest, VoteResponse,
    };
    use crate::consistency::raft::{RaftCore, RaftRole, RaftTransport};
    use crate::consistency::{
        ConsistencyService, DelegateConsistencyService, DistroConsistencyService, ListenerRegistry,
        RaftConsistencyService, RecordListener,
    };
    use crate::distro::mapper::DistroMapper;
    use crate::distro::protocol::{
        ChecksumReport, DatumBatch, DistroTransport, ServiceHealth, ServiceHealthQuery, ServiceStatusReport,
    };
    use crate::error::{NamingError, Result};
    use crate::model::datum::{Datum, Instances, Record};
    use crate::model::instance::Instance;
    use crate::model::keys;
    use crate::storage::{KvStorage, MemoryKvStorage};
    use async_trait::async_trait;
    use dashmap::DashMap;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Weak};

    // ============================================================
    // FIXTURES
    // ============================================================

    #[derive(Default)]
    struct RecordingListener {
        prefix: String,
        changes: Mutex<Vec<(String, Record)>>,
        deletes: Mutex<Vec<String>>,
    }

    impl RecordingListener {
        fn on(prefix: &str) -> Arc<Self> {
            Arc::new(Self {
                prefix: prefix.to_string(),
                ..Default::default()
            })
        }

        fn changed_keys(&self) -> Vec<String> {
            self.changes.lock().iter().map(|(k, _)| k.clone()).collect()
        }
    }

    impl RecordListener for RecordingListener {
        fn interests(&self, key: &str) -> bool {
            key.starts_with(&self.prefix)
        }

        fn match_unlisten_key(&self, key: &str) -> bool {
            key == self.prefix
        }

        fn on_change(&self, key: &str, value: &Record) -> Result<()> {
            self.changes.lock().push((key.to_string(), value.clone()));
            Ok(())
        }

        fn on_delete(&self, key: &str) -> Result<()> {
            self.deletes.lock().push(key.to_string());
            Ok(())
        }
    }

    fn instances(ips: &[&str]) -> Record {
        Record::Instances(Instances::new(
            ips.iter().map(|ip| Instance::new(*ip, 8080)).collect(),
        ))
    }

    fn ephemeral_key(service: &str) -> String {
        keys::build_instance_list_key("public", &keys::grouped_name("", service), true)
    }

    fn persistent_key(service: &str) -> String {
        keys::build_instance_list_key("public", &keys::grouped_name("", service), false)
    }

    // ============================================================
    // LISTENER REGISTRY TESTS
    // ============================================================

    #[test]
    fn test_registry_prefix_interest() {
        // ARRANGE
        let registry = ListenerRegistry::new();
        let exact_key = ephemeral_key("orders");
        let exact = RecordingListener::on(&exact_key);
        let prefix = RecordingListener::on(keys::INSTANCE_LIST_KEY_PREFIX);
        registry.listen(&exact_key, exact.clone());
        registry.listen(keys::INSTANCE_LIST_KEY_PREFIX, prefix.clone());

        // ACT
        let notified = registry.notify_change(&exact_key, &instances(&["10.0.0.1"]));
        let other = registry.notify_change(&ephemeral_key("billing"), &instances(&[]));

        // ASSERT
        assert_eq!(notified, 2);
        assert_eq!(other, 1);
        assert_eq!(exact.changed_keys(), vec![exact_key.clone()]);
        assert_eq!(prefix.changed_keys().len(), 2);
    }

    #[test]
    fn test_registry_dedups_and_unlistens() {
        let registry = ListenerRegistry::new();
        let key = ephemeral_key("orders");
        let listener: Arc<dyn RecordListener> = RecordingListener::on(&key);

        registry.listen(&key, listener.clone());
        registry.listen(&key, listener.clone());
        assert_eq!(registry.all().len(), 1);

        registry.unlisten(&key, &listener);
        assert!(!registry.has_exact(&key));
        assert_eq!(registry.notify_change(&key, &instances(&[])), 0);
    }

    #[test]
    fn test_registry_unlisten_matching() {
        let registry = ListenerRegistry::new();
        let key = ephemeral_key("orders");
        registry.listen(&key, RecordingListener::on(&key));
        registry.listen(&key, RecordingListener::on("naming."));

        registry.unlisten_matching(&key);

        assert!(registry.has_exact(&key));
        assert_eq!(registry.all().len(), 1);
    }

    // ============================================================
    // DISTRO FIXTURES
    // ============================================================

    #[derive(Default)]
    struct LocalDistroNet {
        nodes: DashMap<String, Weak<DistroConsistencyService>>,
        pushed: Mutex<Vec<(String, DatumBatch)>>,
        reports: Mutex<Vec<(String, ChecksumReport)>>,
    }

    impl LocalDistroNet {
        fn node(&self, server: &str) -> anyhow::Result<Arc<DistroConsistencyService>> {
            self.nodes
                .get(server)
                .and_then(|node| node.upgrade())
                .ok_or_else(|| anyhow::anyhow!("{server} unreachable"))
        }
    }

    #[async_trait]
    impl DistroTransport for LocalDistroNet {
        async fn sync_checksums(&self, server: &str, report: &ChecksumReport) -> anyhow::Result<()> {
            self.reports.lock().push((server.to_string(), report.clone()));
            Ok(())
        }

        async fn sync_datums(&self, server: &str, batch: &DatumBatch) -> anyhow::Result<()> {
            self.pushed.lock().push((server.to_string(), batch.clone()));
            self.node(server)?.on_receive_datums(batch.clone());
            Ok(())
        }

        async fn fetch_datums(&self, server: &str, keys: &[String]) -> anyhow::Result<Vec<Datum>> {
            Ok(self.node(server)?.datums(keys))
        }

        async fn fetch_snapshot(&self, server: &str) -> anyhow::Result<Vec<Datum>> {
            Ok(self.node(server)?.snapshot())
        }

        async fn sync_service_status(&self, _server: &str, _report: &ServiceStatusReport) -> anyhow::Result<()> {
            Ok(())
        }

        async fn fetch_service_health(
            &self,
            _server: &str,
            _query: &ServiceHealthQuery,
        ) -> anyhow::Result<ServiceHealth> {
            Ok(ServiceHealth {
                checksum: String::new(),
                health: BTreeMap::new(),
            })
        }
    }

    const NODE_A: &str = "10.0.0.1:8848";
    const NODE_B: &str = "10.0.0.2:8848";

    fn distro_pair() -> (Arc<LocalDistroNet>, Arc<DistroConsistencyService>, Arc<DistroConsistencyService>) {
        let net = Arc::new(LocalDistroNet::default());
        let servers = vec![NODE_A.to_string(), NODE_B.to_string()];
        let build = |local: &str| {
            let switches = Switches::new(SwitchDomain::default());
            let mapper = DistroMapper::new(local, false, switches.clone());
            mapper.update(servers.clone(), servers.clone());
            let config = DistroConfig {
                sync_delay_ms: 10,
                ..DistroConfig::default()
            };
            let node = DistroConsistencyService::new(mapper, switches, net.clone(), config);
            net.nodes.insert(local.to_string(), Arc::downgrade(&node));
            node
        };
        let a = build(NODE_A);
        let b = build(NODE_B);
        (net, a, b)
    }

    /// Service names owned by `owner` in the two-node ring.
    fn services_owned_by(owner: &str, count: usize) -> Vec<String> {
        let switches = Switches::new(SwitchDomain::default());
        let mapper = DistroMapper::new(owner, false, switches);
        let servers = vec![NODE_A.to_string(), NODE_B.to_string()];
        mapper.update(servers.clone(), servers);
        (0..1_000)
            .map(|i| format!("svc-{i}"))
            .filter(|name| mapper.map_srv(&keys::grouped_name("", name)) == owner)
            .take(count)
            .collect()
    }

    fn service_owned_by(owner: &str) -> String {
        services_owned_by(owner, 1).remove(0)
    }

    // ============================================================
    // DISTRO TESTS
    // ============================================================

    #[tokio::test]
    async fn test_distro_put_applies_and_notifies() {
        // ARRANGE
        let (_net, a, _b) = distro_pair();
        let key = ephemeral_key("orders");
        let listener = RecordingListener::on(&key);
        a.listen(&key, listener.clone());

        // ACT
        a.put(&key, instances(&["10.0.0.1"])).await.unwrap();
        a.put(&key, instances(&["10.0.0.1", "10.0.0.2"])).await.unwrap();

        // ASSERT
        let datum = a.get(&key).unwrap();
        assert_eq!(datum.timestamp, 2);
        assert_eq!(datum.value.as_instances().unwrap().instance_list.len(), 2);
        assert_eq!(listener.changed_keys().len(), 2);
    }

    #[tokio::test]
    async fn test_distro_rejects_persistent_keys() {
        let (_net, a, _b) = distro_pair();
        let err = a.put(&persistent_key("orders"), instances(&[])).await.unwrap_err();
        assert!(matches!(err, NamingError::ServerError(_)));
    }

    #[tokio::test]
    async fn test_distro_remove_notifies_and_drops_listener() {
        let (_net, a, _b) = distro_pair();
        let key = ephemeral_key("orders");
        let listener = RecordingListener::on(&key);
        a.listen(&key, listener.clone());
        a.put(&key, instances(&["10.0.0.1"])).await.unwrap();

        a.remove(&key).await.unwrap();

        assert!(a.get(&key).is_none());
        assert_eq!(*listener.deletes.lock(), vec![key.clone()]);
        a.put(&key, instances(&["10.0.0.9"])).await.unwrap();
        assert_eq!(listener.changed_keys().len(), 1);
    }

    #[tokio::test]
    async fn test_distro_write_is_pushed_to_peer() {
        // ARRANGE
        let (net, a, b) = distro_pair();
        let service = service_owned_by(NODE_A);
        let key = ephemeral_key(&service);
        let on_b = RecordingListener::on(&key);
        b.listen(&key, on_b.clone());

        // ACT
        a.put(&key, instances(&["10.0.0.1"])).await.unwrap();
        a.put(&key, instances(&["10.0.0.1", "10.0.0.2"])).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        // ASSERT: coalesced into one push carrying the latest value
        assert_eq!(net.pushed.lock().len(), 1);
        let on_peer = b.get(&key).unwrap();
        assert_eq!(on_peer.value.as_instances().unwrap().instance_list.len(), 2);
        assert_eq!(on_b.changed_keys(), vec![key]);
    }

    #[tokio::test]
    async fn test_distro_ignores_pushes_for_owned_keys() {
        let (_net, a, _b) = distro_pair();
        let service = service_owned_by(NODE_A);
        let key = ephemeral_key(&service);
        let listener = RecordingListener::on(&key);
        a.listen(&key, listener.clone());

        a.on_receive_datums(DatumBatch {
            source: NODE_B.to_string(),
            datums: vec![Datum::new(key.clone(), instances(&["10.9.9.9"]), 7)],
        });

        assert!(a.get(&key).is_none());
        assert!(listener.changed_keys().is_empty());
    }

    #[tokio::test]
    async fn test_distro_creates_unknown_service_from_peer_data() {
        // ARRANGE
        let (_net, a, _b) = distro_pair();
        let service = service_owned_by(NODE_B);
        let key = ephemeral_key(&service);
        let meta = RecordingListener::on(keys::SERVICE_META_KEY_PREFIX);
        a.listen(keys::SERVICE_META_KEY_PREFIX, meta.clone());

        // ACT
        a.on_receive_datums(DatumBatch {
            source: NODE_B.to_string(),
            datums: vec![Datum::new(key, instances(&["10.0.0.5"]), 1)],
        });

        // ASSERT
        let grouped = keys::grouped_name("", &service);
        assert_eq!(
            meta.changed_keys(),
            vec![keys::build_service_meta_key("public", &grouped)]
        );
        let (_, record) = meta.changes.lock()[0].clone();
        assert!(matches!(record, Record::Service(s) if s.name == grouped));
    }

    #[tokio::test]
    async fn test_distro_checksum_reconciliation() {
        // ARRANGE
        let (_net, a, b) = distro_pair();
        let owned_by_a = services_owned_by(NODE_A, 2);
        let fresh = ephemeral_key(&owned_by_a[0]);
        let stale = ephemeral_key(&owned_by_a[1]);

        let fresh_listener = RecordingListener::on(&fresh);
        b.listen(&fresh, fresh_listener.clone());
        let stale_listener = RecordingListener::on(&stale);
        b.listen(&stale, stale_listener.clone());

        a.on_put(&fresh, instances(&["10.0.0.1"]));
        b.process_data(vec![Datum::new(stale.clone(), instances(&["10.0.0.3"]), 1)]);

        // ACT
        let report = ChecksumReport {
            source: NODE_A.to_string(),
            checksums: a.owned_checksums(),
        };
        b.on_receive_checksums(report).await;

        // ASSERT: pulled what differs, dropped what the owner no longer has
        assert_eq!(b.get(&fresh).unwrap().value.checksum(), a.get(&fresh).unwrap().value.checksum());
        assert_eq!(fresh_listener.changed_keys(), vec![fresh]);
        assert!(b.get(&stale).is_none());
        assert_eq!(*stale_listener.deletes.lock(), vec![stale]);
    }

    #[tokio::test]
    async fn test_distro_applies_enabled_only_flip() {
        // ARRANGE
        let (_net, a, b) = distro_pair();
        let key = ephemeral_key(&service_owned_by(NODE_A));
        let listener = RecordingListener::on(&key);
        b.listen(&key, listener.clone());
        let enabled = Record::Instances(Instances::new(vec![Instance::new("10.0.0.1", 8080)]));
        let disabled = Record::Instances(Instances::new(vec![
            Instance::new("10.0.0.1", 8080).with_enabled(false),
        ]));
        b.process_data(vec![Datum::new(key.clone(), enabled, 1)]);

        // ACT
        b.process_data(vec![Datum::new(key.clone(), disabled.clone(), 2)]);

        // ASSERT
        assert_eq!(listener.changed_keys().len(), 2);
        let stored = b.get(&key).unwrap();
        assert!(!stored.value.as_instances().unwrap().instance_list[0].enabled);

        // ACT: the owner flips it back; the checksum report exposes the difference
        a.on_put(&key, Record::Instances(Instances::new(vec![Instance::new("10.0.0.1", 8080)])));
        b.on_receive_checksums(ChecksumReport {
            source: NODE_A.to_string(),
            checksums: a.owned_checksums(),
        })
        .await;

        // ASSERT
        assert_eq!(listener.changed_keys().len(), 3);
        assert!(b.get(&key).unwrap().value.as_instances().unwrap().instance_list[0].enabled);
    }

    #[tokio::test]
    async fn test_distro_report_only_covers_owned_keys() {
        let (net, a, _b) = distro_pair();
        let mine = ephemeral_key(&service_owned_by(NODE_A));
        let theirs = ephemeral_key(&service_owned_by(NODE_B));
        a.on_put(&mine, instances(&["10.0.0.1"]));
        a.on_put(&theirs, instances(&["10.0.0.2"]));

        a.report_checksums().await;

        let reports = net.reports.lock();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].0, NODE_B);
        assert!(reports[0].1.checksums.contains_key(&mine));
        assert!(!reports[0].1.checksums.contains_key(&theirs));
    }

    // ============================================================
    // RAFT FIXTURES
    // ============================================================

    #[derive(Default)]
    struct LocalRaftNet {
        nodes: DashMap<String, Weak<RaftCore>>,
        down: DashMap<String, ()>,
    }

    impl LocalRaftNet {
        fn node(&self, peer: &str) -> anyhow::Result<Arc<RaftCore>> {
            if self.down.contains_key(peer) {
                anyhow::bail!("{peer} unreachable");
            }
            self.nodes
                .get(peer)
                .and_then(|node| node.upgrade())
                .ok_or_else(|| anyhow::anyhow!("{peer} unknown"))
        }
    }

    #[async_trait]
    impl RaftTransport for LocalRaftNet {
        async fn request_vote(&self, peer: &str, req: &VoteRequest) -> anyhow::Result<VoteResponse> {
            Ok(self.node(peer)?.receive_vote(req))
        }

        async fn send_beat(&self, peer: &str, beat: &BeatRequest) -> anyhow::Result<()> {
            Ok(self.node(peer)?.receive_beat(beat).await?)
        }

        async fn publish(&self, peer: &str, req: &PublishRequest) -> anyhow::Result<()> {
            Ok(self.node(peer)?.receive_publish(req.clone())?)
        }

        async fn delete(&self, peer: &str, req: &DeleteRequest) -> anyhow::Result<()> {
            Ok(self.node(peer)?.receive_delete(req.clone())?)
        }

        async fn forward_publish(&self, leader: &str, key: &str, value: &Record) -> anyhow::Result<()> {
            Ok(self.node(leader)?.signal_publish(key, value.clone()).await?)
        }

        async fn forward_delete(&self, leader: &str, key: &str) -> anyhow::Result<()> {
            Ok(self.node(leader)?.signal_delete(key).await?)
        }

        async fn fetch_datums(&self, peer: &str, keys: &[String]) -> anyhow::Result<Vec<Datum>> {
            Ok(self.node(peer)?.datums(keys))
        }
    }

    fn raft_config() -> RaftConfig {
        RaftConfig {
            publish_timeout_ms: 300,
            ..RaftConfig::default()
        }
    }

    fn raft_cluster(n: usize) -> (Arc<LocalRaftNet>, Vec<Arc<RaftCore>>) {
        let net = Arc::new(LocalRaftNet::default());
        let peers: Vec<String> = (0..n).map(|i| format!("10.0.1.{}:8848", i + 1)).collect();
        let cores: Vec<Arc<RaftCore>> = peers
            .iter()
            .map(|local| {
                let core = RaftCore::new(
                    local.clone(),
                    Arc::new(MemoryKvStorage::new()),
                    net.clone(),
                    raft_config(),
                );
                core.set_peers(peers.clone());
                core.init().unwrap();
                net.nodes.insert(local.clone(), Arc::downgrade(&core));
                core
            })
            .collect();
        (net, cores)
    }

    // ============================================================
    // RAFT TESTS
    // ============================================================

    #[tokio::test]
    async fn test_single_node_elects_itself() {
        let (_net, cores) = raft_cluster(1);

        cores[0].tick().await;

        assert!(cores[0].is_leader());
        assert_eq!(cores[0].term(), 1);
        assert_eq!(cores[0].leader().as_deref(), Some(cores[0].local_address()));
    }

    #[tokio::test]
    async fn test_election_and_followers() {
        // ARRANGE
        let (_net, cores) = raft_cluster(3);

        // ACT
        cores[0].run_election().await;

        // ASSERT
        assert_eq!(cores[0].role(), RaftRole::Leader);
        for follower in &cores[1..] {
            assert_eq!(follower.role(), RaftRole::Follower);
            assert_eq!(follower.term(), 1);
            assert_eq!(follower.leader().as_deref(), Some(cores[0].local_address()));
        }
    }

    #[tokio::test]
    async fn test_vote_for_stale_term_is_refused() {
        let (_net, cores) = raft_cluster(3);
        cores[0].run_election().await;

        let response = cores[1].receive_vote(&VoteRequest {
            candidate: cores[2].local_address().to_string(),
            term: 1,
        });

        assert_eq!(response.term, 1);
        assert_eq!(response.voted_for.as_deref(), Some(cores[0].local_address()));
    }

    #[tokio::test]
    async fn test_election_fails_without_majority() {
        let (net, cores) = raft_cluster(3);
        net.down.insert(cores[1].local_address().to_string(), ());
        net.down.insert(cores[2].local_address().to_string(), ());

        cores[0].run_election().await;

        assert_eq!(cores[0].role(), RaftRole::Candidate);
        assert!(cores[0].leader().is_none());
    }

    #[tokio::test]
    async fn test_publish_replicates_and_notifies() {
        // ARRANGE
        let (_net, cores) = raft_cluster(3);
        cores[0].run_election().await;
        let key = persistent_key("orders");
        let follower_listener = RecordingListener::on(&key);
        cores[2].listen(&key, follower_listener.clone());

        // ACT
        cores[0].signal_publish(&key, instances(&["10.0.0.1"])).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        // ASSERT
        for core in &cores {
            let datum = core.get(&key).unwrap();
            assert_eq!(datum.timestamp, 1);
        }
        assert_eq!(follower_listener.changed_keys(), vec![key]);
    }

    #[tokio::test]
    async fn test_follower_forwards_to_leader() {
        let (_net, cores) = raft_cluster(3);
        cores[0].run_election().await;
        let key = persistent_key("orders");

        cores[1].signal_publish(&key, instances(&["10.0.0.1"])).await.unwrap();
        cores[1].signal_publish(&key, instances(&["10.0.0.2"])).await.unwrap();

        assert_eq!(cores[0].get(&key).unwrap().timestamp, 2);

        cores[2].signal_delete(&key).await.unwrap();
        assert!(cores[0].get(&key).is_none());
    }

    #[tokio::test]
    async fn test_publish_without_leader_fails() {
        let (_net, cores) = raft_cluster(3);
        let err = cores[1]
            .signal_publish(&persistent_key("orders"), instances(&[]))
            .await
            .unwrap_err();
        assert!(matches!(err, NamingError::ServerError(_)));
    }

    #[tokio::test]
    async fn test_publish_times_out_without_majority() {
        // ARRANGE
        let (net, cores) = raft_cluster(3);
        cores[0].run_election().await;
        net.down.insert(cores[1].local_address().to_string(), ());
        net.down.insert(cores[2].local_address().to_string(), ());
        let key = persistent_key("orders");

        // ACT
        let err = cores[0].signal_publish(&key, instances(&["10.0.0.1"])).await.unwrap_err();

        // ASSERT: outcome is unknown, the leader already applied it
        assert!(matches!(err, NamingError::Timeout(_)));
        assert!(cores[0].get(&key).is_some());
    }

    #[tokio::test]
    async fn test_beat_converges_follower() {
        // ARRANGE
        let (net, cores) = raft_cluster(3);
        cores[0].run_election().await;
        let kept = persistent_key("orders");
        let dropped = persistent_key("legacy");

        net.down.insert(cores[2].local_address().to_string(), ());
        cores[0].signal_publish(&kept, instances(&["10.0.0.1"])).await.unwrap();
        net.down.remove(cores[2].local_address());
        cores[2]
            .receive_publish(PublishRequest {
                source: cores[0].local_address().to_string(),
                term: cores[0].term(),
                datum: Datum::new(dropped.clone(), instances(&[]), 1),
            })
            .unwrap();

        // ACT
        cores[0].send_beats().await;

        // ASSERT
        assert!(cores[2].get(&kept).is_some());
        assert!(cores[2].get(&dropped).is_none());
    }

    #[tokio::test]
    async fn test_stale_beat_is_rejected() {
        let (_net, cores) = raft_cluster(3);
        cores[0].run_election().await;
        cores[0].run_election().await;

        let err = cores[1]
            .receive_beat(&BeatRequest {
                leader: cores[2].local_address().to_string(),
                term: 1,
                entries: vec![BeatEntry {
                    key: persistent_key("orders"),
                    timestamp: 1,
                }],
            })
            .await
            .unwrap_err();

        assert!(matches!(err, NamingError::InvalidParam(_)));
        assert_eq!(cores[1].leader().as_deref(), Some(cores[0].local_address()));
    }

    #[tokio::test]
    async fn test_listen_replays_existing_datums() {
        let (_net, cores) = raft_cluster(1);
        cores[0].tick().await;
        let key = persistent_key("orders");
        cores[0].signal_publish(&key, instances(&["10.0.0.1"])).await.unwrap();

        let late = RecordingListener::on(keys::INSTANCE_LIST_KEY_PREFIX);
        cores[0].listen(keys::INSTANCE_LIST_KEY_PREFIX, late.clone());

        assert_eq!(late.changed_keys(), vec![key]);
    }

    #[tokio::test]
    async fn test_state_restored_from_storage() {
        // ARRANGE
        let net = Arc::new(LocalRaftNet::default());
        let storage: Arc<dyn KvStorage> = Arc::new(MemoryKvStorage::new());
        let key = persistent_key("orders");
        {
            let core = RaftCore::new("10.0.1.1:8848", storage.clone(), net.clone(), raft_config());
            core.init().unwrap();
            core.tick().await;
            core.signal_publish(&key, instances(&["10.0.0.1"])).await.unwrap();
        }

        // ACT
        let restored = RaftCore::new("10.0.1.1:8848", storage, net, raft_config());
        restored.init().unwrap();

        // ASSERT
        assert_eq!(restored.term(), 1);
        assert_eq!(restored.get(&key).unwrap().timestamp, 1);
    }

    // ============================================================
    // DELEGATE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_delegate_routes_by_key() {
        // ARRANGE
        let (_dnet, distro, _b) = distro_pair();
        let (_rnet, cores) = raft_cluster(1);
        cores[0].tick().await;
        let raft = Arc::new(RaftConsistencyService::new(cores[0].clone()));
        let delegate = DelegateConsistencyService::new(distro.clone(), raft.clone());

        // ACT
        delegate.put(&ephemeral_key("orders"), instances(&["10.0.0.1"])).await.unwrap();
        delegate.put(&persistent_key("orders"), instances(&["10.0.0.2"])).await.unwrap();

        // ASSERT
        assert!(distro.get(&ephemeral_key("orders")).is_some());
        assert!(distro.get(&persistent_key("orders")).is_none());
        assert!(cores[0].get(&persistent_key("orders")).is_some());
        assert!(delegate.get(&persistent_key("orders")).is_some());
    }

    #[tokio::test]
    async fn test_delegate_meta_listener_on_both_paths() {
        let (_dnet, distro, _b) = distro_pair();
        let (_rnet, cores) = raft_cluster(1);
        let raft = Arc::new(RaftConsistencyService::new(cores[0].clone()));
        let delegate = DelegateConsistencyService::new(distro.clone(), raft);
        let meta = RecordingListener::on(keys::SERVICE_META_KEY_PREFIX);

        delegate.listen(keys::SERVICE_META_KEY_PREFIX, meta.clone());

        let service = service_owned_by(NODE_B);
        distro.on_receive_datums(DatumBatch {
            source: NODE_B.to_string(),
            datums: vec![Datum::new(ephemeral_key(&service), instances(&[]), 1)],
        });
        assert_eq!(meta.changed_keys().len(), 1);
    }
}
