//! Push Module Tests
//!
//! ## Test Scopes
//! - **Agents**: user agent parsing and per-family version floors.
//! - **Delivery**: send, ack settlement, retransmit and give-up, compression.
//! - **Dedup and coalescing**: unchanged views are skipped, bursts of changes push once.
//! - **Subscribers**: refresh of known clients, zombie removal.
//! - **UDP**: datagram round trip over loopback.

#[cfg(test)]
mod tests {
    use crate::config::PushConfig;
    use crate::config::switches::{SwitchDomain, Switches};
    use crate::push::service::{PushPacket, ack_key, content_digest, parse_agent, parse_version};
    use crate::push::{DataSource, PushClient, PushService, PushTransport, UdpPushTransport};
    use crate::registry::ServiceChangeListener;
    use async_trait::async_trait;
    use flate2::read::GzDecoder;
    use parking_lot::Mutex;
    use std::io::Read;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    const NS: &str = "public";
    const SERVICE: &str = "DEFAULT_GROUP@@orders";

    // ============================================================
    // FIXTURES
    // ============================================================

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(SocketAddr, Vec<u8>)>>,
    }

    impl RecordingTransport {
        fn count(&self) -> usize {
            self.sent.lock().len()
        }

        fn packet(&self, index: usize) -> PushPacket {
            serde_json::from_slice(&self.sent.lock()[index].1).unwrap()
        }
    }

    #[async_trait]
    impl PushTransport for RecordingTransport {
        async fn send(&self, target: SocketAddr, payload: &[u8]) -> anyhow::Result<()> {
            self.sent.lock().push((target, payload.to_vec()));
            Ok(())
        }

        async fn recv(&self) -> anyhow::Result<(Vec<u8>, SocketAddr)> {
            std::future::pending().await
        }
    }

    /// Serves whatever view the test last set.
    struct FixedView {
        view: Mutex<serde_json::Value>,
    }

    impl FixedView {
        fn new(hosts: usize) -> Arc<Self> {
            Arc::new(Self {
                view: Mutex::new(serde_json::json!({ "hosts": hosts })),
            })
        }

        fn set(&self, value: serde_json::Value) {
            *self.view.lock() = value;
        }
    }

    impl DataSource for FixedView {
        fn data(&self, _client: &PushClient) -> Option<serde_json::Value> {
            Some(self.view.lock().clone())
        }
    }

    fn subscriber_addr() -> SocketAddr {
        "10.0.0.50:5353".parse().unwrap()
    }

    fn service_with(config: PushConfig) -> (Arc<PushService>, Arc<RecordingTransport>, Arc<Switches>) {
        let transport = Arc::new(RecordingTransport::default());
        let switches = Switches::new(SwitchDomain::default());
        let service = PushService::new(config, switches.clone(), transport.clone());
        (service, transport, switches)
    }

    fn quick_config() -> PushConfig {
        PushConfig {
            ack_timeout_ms: 30,
            max_retry: 1,
            delay_ms: 20,
            ..PushConfig::default()
        }
    }

    fn subscribe(service: &PushService, view: &Arc<FixedView>) {
        service.add_client(PushClient::new(
            NS,
            SERVICE,
            "",
            "Nacos-Java-Client:v1.4.0",
            subscriber_addr(),
            view.clone(),
        ));
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..100 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    // ============================================================
    // AGENT TESTS
    // ============================================================

    #[test]
    fn test_parse_agent() {
        assert_eq!(
            parse_agent("Nacos-Java-Client:v1.2.1"),
            Some(("java".to_string(), [1, 2, 1]))
        );
        assert_eq!(
            parse_agent("Nacos-Go-Client:v2.0"),
            Some(("go".to_string(), [2, 0, 0]))
        );
        assert_eq!(
            parse_agent("Nacos-Python-Client:v0.4.3-beta"),
            Some(("python".to_string(), [0, 4, 3]))
        );
        assert_eq!(parse_agent("curl/8.0"), None);
        assert_eq!(parse_agent("Nacos-Server:v1.0.0"), None);
        assert_eq!(parse_version("1.x"), None);
    }

    #[test]
    fn test_version_floors_gate_push() {
        // ARRANGE
        let (service, _, switches) = service_with(PushConfig::default());

        // ACT + ASSERT
        assert!(service.can_enable_push("Nacos-Python-Client:v0.4.3"));
        assert!(!service.can_enable_push("Nacos-Python-Client:v0.4.2"));
        assert!(!service.can_enable_push("Nacos-Fortran-Client:v9.9.9"));

        switches.store(SwitchDomain {
            push_enabled: false,
            ..SwitchDomain::default()
        });
        assert!(!service.can_enable_push("Nacos-Java-Client:v1.4.0"));
    }

    // ============================================================
    // DELIVERY TESTS
    // ============================================================

    #[tokio::test]
    async fn test_push_is_settled_by_ack() {
        // ARRANGE
        let (service, transport, _) = service_with(PushConfig {
            ack_timeout_ms: 5_000,
            ..quick_config()
        });
        let view = FixedView::new(1);
        subscribe(&service, &view);

        // ACT
        service.push_service(NS, SERVICE);
        wait_until(|| transport.count() == 1).await;

        // ASSERT
        let packet = transport.packet(0);
        assert_eq!(packet.kind, "dom");
        assert_eq!(packet.data, r#"{"hosts":1}"#);
        assert_eq!(service.pending_acks(), 1);
        assert_eq!(service.total_push(), 1);

        // ACT: the client answers
        let ack = serde_json::to_vec(&PushPacket {
            kind: "push-ack".to_string(),
            data: String::new(),
            last_ref_time: packet.last_ref_time,
        })
        .unwrap();
        service.on_ack(&ack, subscriber_addr());

        // ASSERT
        assert_eq!(service.pending_acks(), 0);
        assert_eq!(service.failed_push(), 0);
    }

    #[tokio::test]
    async fn test_unacked_push_is_retried_then_failed() {
        // ARRANGE
        let (service, transport, _) = service_with(quick_config());
        let view = FixedView::new(1);
        subscribe(&service, &view);

        // ACT
        service.push_service(NS, SERVICE);
        wait_until(|| service.failed_push() == 1).await;

        // ASSERT: first send plus one retransmit of the same payload
        assert_eq!(transport.count(), 2);
        let sent = transport.sent.lock();
        assert_eq!(sent[0].1, sent[1].1);
        drop(sent);
        assert_eq!(service.total_push(), 1);
        assert_eq!(service.pending_acks(), 0);
    }

    #[tokio::test]
    async fn test_unknown_or_malformed_ack_is_ignored() {
        let (service, transport, _) = service_with(PushConfig {
            ack_timeout_ms: 5_000,
            ..quick_config()
        });
        let view = FixedView::new(1);
        subscribe(&service, &view);
        service.push_service(NS, SERVICE);
        wait_until(|| transport.count() == 1).await;

        service.on_ack(b"not json", subscriber_addr());
        let stale = serde_json::to_vec(&PushPacket {
            kind: "push-ack".to_string(),
            data: String::new(),
            last_ref_time: 1,
        })
        .unwrap();
        service.on_ack(&stale, subscriber_addr());

        assert_eq!(service.pending_acks(), 1);
    }

    #[tokio::test]
    async fn test_large_payloads_are_gzipped() {
        // ARRANGE
        let (service, transport, _) = service_with(PushConfig {
            compress_threshold: 64,
            ack_timeout_ms: 5_000,
            ..quick_config()
        });
        let view = FixedView::new(0);
        view.set(serde_json::json!({ "hosts": "x".repeat(512) }));
        subscribe(&service, &view);

        // ACT
        service.push_service(NS, SERVICE);
        wait_until(|| transport.count() == 1).await;

        // ASSERT
        let payload = transport.sent.lock()[0].1.clone();
        assert_eq!(&payload[..2], &[0x1f, 0x8b]);
        let mut json = String::new();
        GzDecoder::new(payload.as_slice())
            .read_to_string(&mut json)
            .unwrap();
        let packet: PushPacket = serde_json::from_str(&json).unwrap();
        assert!(packet.data.contains(&"x".repeat(512)));
    }

    #[test]
    fn test_ack_key_format() {
        assert_eq!(ack_key(subscriber_addr(), 42), "10.0.0.50,5353,42");
    }

    // ============================================================
    // DEDUP AND COALESCING TESTS
    // ============================================================

    #[tokio::test]
    async fn test_unchanged_view_is_not_pushed_again() {
        // ARRANGE
        let (service, transport, _) = service_with(PushConfig {
            ack_timeout_ms: 5_000,
            ..quick_config()
        });
        let view = FixedView::new(1);
        subscribe(&service, &view);
        service.push_service(NS, SERVICE);
        wait_until(|| transport.count() == 1).await;

        // ACT
        service.push_service(NS, SERVICE);
        view.set(serde_json::json!({ "hosts": 1, "lastRefTime": 2, "cacheMillis": 10_000 }));
        service.push_service(NS, SERVICE);
        view.set(serde_json::json!({ "hosts": 2 }));
        service.push_service(NS, SERVICE);
        wait_until(|| transport.count() >= 2).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        // ASSERT
        assert_eq!(transport.count(), 2);
        assert_eq!(transport.packet(1).data, r#"{"hosts":2}"#);
        assert!(transport.packet(1).last_ref_time > transport.packet(0).last_ref_time);
    }

    #[test]
    fn test_content_digest_ignores_render_time() {
        let first = serde_json::json!({ "hosts": [1], "lastRefTime": 100, "cacheMillis": 3_000 });
        let later = serde_json::json!({ "hosts": [1], "lastRefTime": 250, "cacheMillis": 10_000 });
        let changed = serde_json::json!({ "hosts": [1, 2], "lastRefTime": 250 });

        assert_eq!(content_digest(&first), content_digest(&later));
        assert_ne!(content_digest(&first), content_digest(&changed));
    }

    #[tokio::test]
    async fn test_change_bursts_are_coalesced() {
        // ARRANGE
        let (service, transport, _) = service_with(PushConfig {
            ack_timeout_ms: 5_000,
            ..quick_config()
        });
        let view = FixedView::new(1);
        subscribe(&service, &view);

        // ACT
        for _ in 0..5 {
            service.service_changed(NS, SERVICE);
        }
        wait_until(|| transport.count() == 1).await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        // ASSERT
        assert_eq!(transport.count(), 1);
    }

    #[tokio::test]
    async fn test_changes_without_subscribers_or_with_push_off_are_dropped() {
        let (service, transport, switches) = service_with(quick_config());
        let view = FixedView::new(1);

        service.service_changed(NS, SERVICE);
        subscribe(&service, &view);
        switches.store(SwitchDomain {
            push_enabled: false,
            ..SwitchDomain::default()
        });
        service.service_changed(NS, SERVICE);
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(transport.count(), 0);
    }

    // ============================================================
    // SUBSCRIBER TESTS
    // ============================================================

    #[tokio::test]
    async fn test_known_client_is_refreshed_not_duplicated() {
        let (service, _, _) = service_with(quick_config());
        let view = FixedView::new(1);

        subscribe(&service, &view);
        subscribe(&service, &view);
        service.add_client(PushClient::new(
            NS,
            SERVICE,
            "c1",
            "Nacos-Java-Client:v1.4.0",
            subscriber_addr(),
            view.clone(),
        ));

        assert_eq!(service.subscriber_count(), 2);
        let keys: Vec<String> = service
            .subscribers(NS, SERVICE)
            .iter()
            .map(|c| c.key())
            .collect();
        assert!(keys.contains(&"10.0.0.50:5353|c1".to_string()));
    }

    #[tokio::test]
    async fn test_zombie_clients_are_not_pushed() {
        // ARRANGE
        let (service, transport, switches) = service_with(quick_config());
        let view = FixedView::new(1);
        subscribe(&service, &view);
        switches.store(SwitchDomain {
            default_push_cache_millis: 0,
            ..SwitchDomain::default()
        });
        tokio::time::sleep(Duration::from_millis(5)).await;

        // ACT
        service.push_service(NS, SERVICE);
        tokio::time::sleep(Duration::from_millis(20)).await;

        // ASSERT
        assert_eq!(transport.count(), 0);
        assert_eq!(service.subscriber_count(), 0);
    }

    #[test]
    fn test_client_cluster_list() {
        let client = PushClient::new(
            NS,
            SERVICE,
            "c1, c2,,",
            "Nacos-Java-Client:v1.4.0",
            subscriber_addr(),
            FixedView::new(0),
        );

        assert_eq!(client.cluster_list(), vec!["c1", "c2"]);
        assert!(!client.is_zombie(client.last_ref_time() + 10, 10));
        assert!(client.is_zombie(client.last_ref_time() + 11, 10));
    }

    // ============================================================
    // UDP TESTS
    // ============================================================

    #[tokio::test]
    async fn test_udp_round_trip() {
        // ARRANGE
        let loopback: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let server = UdpPushTransport::bind(loopback).await.unwrap();
        let client = UdpPushTransport::bind(loopback).await.unwrap();

        // ACT
        server
            .send(client.local_addr().unwrap(), b"{\"type\":\"dom\"}")
            .await
            .unwrap();
        let (payload, from) = client.recv().await.unwrap();

        // ASSERT
        assert_eq!(payload, b"{\"type\":\"dom\"}");
        assert_eq!(from, server.local_addr().unwrap());
    }
}
