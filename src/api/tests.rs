//! HTTP API Tests
//!
//! ## Test Scopes
//! - **Parameter helpers**: metadata parsing and grouped service names.
//! - **Client API**: register, list, detail and beat against a served standalone node.
//! - **Operations**: switches, login, auth enforcement and forwarded requests.

#[cfg(test)]
mod tests {
    use crate::api::{grouped_service_name, parse_metadata};
    use crate::config::{NamingConfig, UserEntry};
    use crate::error::NamingError;
    use crate::server::Node;
    use crate::transport::FORWARDED_HEADER;
    use serde_json::Value;
    use std::net::SocketAddr;
    use std::sync::Arc;

    // ============================================================
    // FIXTURES
    // ============================================================

    struct Served {
        node: Arc<Node>,
        base: String,
        http: reqwest::Client,
    }

    impl Served {
        fn url(&self, path_and_query: &str) -> String {
            format!("{}{}", self.base, path_and_query)
        }
    }

    fn standalone_config(addr: SocketAddr) -> NamingConfig {
        let mut config = NamingConfig::default();
        config.server.http_addr = addr;
        config.server.standalone = true;
        config.server.data_dir = std::env::temp_dir().join(format!("naming-api-{}", uuid::Uuid::new_v4()));
        config.push.udp_bind = SocketAddr::from(([127, 0, 0, 1], 0));
        config
    }

    async fn serve_with(configure: impl FnOnce(&mut NamingConfig)) -> Served {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut config = standalone_config(addr);
        configure(&mut config);

        let node = Node::build(config).await.unwrap();
        // a lone raft member elects itself on the first tick
        node.raft.tick().await;
        assert!(node.raft.is_leader());
        node.distro.clone().start().await;

        let router = node.router();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Served {
            node: Arc::new(node),
            base: format!("http://{addr}"),
            http: reqwest::Client::new(),
        }
    }

    async fn serve() -> Served {
        serve_with(|_| {}).await
    }

    fn with_users(config: &mut NamingConfig) {
        config.auth.enabled = true;
        config.auth.users = vec![
            UserEntry {
                username: "root".to_string(),
                password: "secret".to_string(),
                admin: true,
                writable_namespaces: Vec::new(),
            },
            UserEntry {
                username: "dev".to_string(),
                password: "dev-pw".to_string(),
                admin: false,
                writable_namespaces: vec!["dev".to_string()],
            },
        ];
    }

    async fn login(served: &Served, username: &str, password: &str) -> reqwest::Response {
        served
            .http
            .post(served.url(&format!("/v1/ns/auth/login?username={username}&password={password}")))
            .send()
            .await
            .unwrap()
    }

    async fn token(served: &Served, username: &str, password: &str) -> String {
        let principal: Value = login(served, username, password).await.json().await.unwrap();
        principal["accessToken"].as_str().unwrap().to_string()
    }

    // ============================================================
    // PARAMETER HELPER TESTS
    // ============================================================

    #[test]
    fn test_parse_metadata_accepts_both_forms() {
        let from_pairs = parse_metadata("zone=a, version = 2").unwrap();
        assert_eq!(from_pairs.get("zone").map(String::as_str), Some("a"));
        assert_eq!(from_pairs.get("version").map(String::as_str), Some("2"));

        let from_json = parse_metadata(r#"{"zone":"b"}"#).unwrap();
        assert_eq!(from_json.get("zone").map(String::as_str), Some("b"));

        assert!(parse_metadata("   ").unwrap().is_empty());
    }

    #[test]
    fn test_parse_metadata_rejects_garbage() {
        assert!(matches!(parse_metadata("novalue"), Err(NamingError::InvalidParam(_))));
        assert!(matches!(parse_metadata(r#"{"n":1}"#), Err(NamingError::InvalidParam(_))));
    }

    #[test]
    fn test_grouped_service_name() {
        assert_eq!(
            grouped_service_name("orders", Some("shop")).unwrap(),
            "shop@@orders"
        );
        assert_eq!(
            grouped_service_name(" orders ", None).unwrap(),
            "DEFAULT_GROUP@@orders"
        );
        assert!(matches!(
            grouped_service_name("  ", None),
            Err(NamingError::InvalidParam(_))
        ));
    }

    // ============================================================
    // CLIENT API TESTS
    // ============================================================

    #[tokio::test]
    async fn test_register_then_list_and_detail() {
        // ARRANGE
        let served = serve().await;

        // ACT
        let registered = served
            .http
            .post(served.url(
                "/v1/ns/instance?serviceName=orders&ip=10.1.1.1&port=8080&weight=2&metadata=zone%3Da",
            ))
            .send()
            .await
            .unwrap();
        let listed: Value = served
            .http
            .get(served.url("/v1/ns/instance/list?serviceName=orders"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let detail: Value = served
            .http
            .get(served.url("/v1/ns/instance?serviceName=orders&ip=10.1.1.1&port=8080"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        // ASSERT
        assert_eq!(registered.status(), 200);
        assert_eq!(registered.text().await.unwrap(), "ok");

        let hosts = listed["hosts"].as_array().unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0]["ip"], "10.1.1.1");
        assert_eq!(hosts[0]["port"], 8080);
        assert_eq!(hosts[0]["clusterName"], "DEFAULT");

        assert_eq!(detail["weight"], 2.0);
        assert_eq!(detail["metadata"]["zone"], "a");
    }

    #[tokio::test]
    async fn test_deregister_removes_host() {
        let served = serve().await;
        let register = "/v1/ns/instance?serviceName=orders&ip=10.1.1.2&port=8080";
        served.http.post(served.url(register)).send().await.unwrap();

        let removed = served.http.delete(served.url(register)).send().await.unwrap();
        assert_eq!(removed.status(), 200);

        let listed: Value = served
            .http
            .get(served.url("/v1/ns/instance/list?serviceName=orders"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(listed["hosts"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bad_requests_map_to_400_and_404() {
        let served = serve().await;

        let missing_name = served
            .http
            .post(served.url("/v1/ns/instance?ip=10.1.1.1&port=80"))
            .send()
            .await
            .unwrap();
        assert_eq!(missing_name.status(), 400);

        let unknown_service = served
            .http
            .get(served.url("/v1/ns/service?serviceName=ghost"))
            .send()
            .await
            .unwrap();
        assert_eq!(unknown_service.status(), 404);
        let body: Value = unknown_service.json().await.unwrap();
        assert!(body["message"].as_str().unwrap().contains("ghost"));
    }

    #[tokio::test]
    async fn test_beat_for_unknown_instance_asks_for_registration() {
        let served = serve().await;

        let answer: Value = served
            .http
            .put(served.url("/v1/ns/instance/beat?serviceName=orders&ip=10.9.9.9&port=1"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(answer["code"], 20404);
    }

    #[tokio::test]
    async fn test_beat_with_payload_registers_instance() {
        // ARRANGE
        let served = serve().await;
        let beat = r#"{"ip":"10.2.2.2","port":9000,"serviceName":"orders"}"#;

        // ACT
        let answer: Value = served
            .http
            .put(served.url("/v1/ns/instance/beat?serviceName=orders"))
            .query(&[("beat", beat)])
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        // ASSERT
        assert_eq!(answer["code"], 10200);
        let listed: Value = served
            .http
            .get(served.url("/v1/ns/instance/list?serviceName=orders"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(listed["hosts"][0]["ip"], "10.2.2.2");
    }

    #[tokio::test]
    async fn test_service_create_and_page() {
        let served = serve().await;
        for name in ["alpha", "beta", "gamma"] {
            let created = served
                .http
                .post(served.url(&format!("/v1/ns/service?serviceName={name}&protectThreshold=0.5")))
                .send()
                .await
                .unwrap();
            assert_eq!(created.status(), 200);
        }

        let page: Value = served
            .http
            .get(served.url("/v1/ns/service/list?pageNo=1&pageSize=2"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(page["count"], 3);
        assert_eq!(page["doms"].as_array().unwrap().len(), 2);

        let detail: Value = served
            .http
            .get(served.url("/v1/ns/service?serviceName=beta"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(detail["name"], "beta");
        assert_eq!(detail["protectThreshold"], 0.5);
    }

    #[tokio::test]
    async fn test_standalone_node_never_forwards() {
        let served = serve().await;
        assert!(served.node.mapper.is_standalone());

        let registered = served
            .http
            .post(served.url("/v1/ns/instance?serviceName=payments&ip=10.3.3.3&port=1"))
            .send()
            .await
            .unwrap();
        assert_eq!(registered.status(), 200);
        assert!(served.node.manager.get_service("public", "DEFAULT_GROUP@@payments").is_some());
    }

    // ============================================================
    // OPERATIONS TESTS
    // ============================================================

    #[tokio::test]
    async fn test_switch_update_is_visible() {
        let served = serve().await;

        let updated = served
            .http
            .put(served.url("/v1/ns/operator/switches?entry=checkTimes&value=7"))
            .send()
            .await
            .unwrap();
        assert_eq!(updated.status(), 200);

        let switches: Value = served
            .http
            .get(served.url("/v1/ns/operator/switches"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(switches["check_times"], 7);

        let empty = served
            .http
            .put(served.url("/v1/ns/operator/switches?value=7"))
            .send()
            .await
            .unwrap();
        assert_eq!(empty.status(), 400);
    }

    #[tokio::test]
    async fn test_servers_reports_local_leader() {
        let served = serve().await;

        let servers: Value = served
            .http
            .get(served.url("/v1/ns/operator/servers"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        let local = served.node.mapper.local_address().to_string();
        assert_eq!(servers["standalone"], true);
        assert_eq!(servers["local"], local.as_str());
        assert_eq!(servers["raftLeader"], local.as_str());
    }

    #[tokio::test]
    async fn test_writes_need_a_token_when_auth_is_on() {
        // ARRANGE
        let served = serve_with(with_users).await;
        let register = "/v1/ns/instance?serviceName=orders&ip=10.4.4.4&port=1";

        // ACT
        let anonymous = served.http.post(served.url(register)).send().await.unwrap();
        let root = token(&served, "root", "secret").await;
        let with_param = served
            .http
            .post(served.url(&format!("{register}&accessToken={root}")))
            .send()
            .await
            .unwrap();
        let with_header = served
            .http
            .put(served.url(register))
            .bearer_auth(&root)
            .send()
            .await
            .unwrap();

        // ASSERT
        assert_eq!(anonymous.status(), 403);
        assert_eq!(with_param.status(), 200);
        assert_eq!(with_header.status(), 200);
    }

    #[tokio::test]
    async fn test_writes_are_scoped_to_namespaces() {
        let served = serve_with(with_users).await;
        let dev = token(&served, "dev", "dev-pw").await;

        let own = served
            .http
            .post(served.url("/v1/ns/instance?namespaceId=dev&serviceName=orders&ip=10.5.5.5&port=1"))
            .bearer_auth(&dev)
            .send()
            .await
            .unwrap();
        let foreign = served
            .http
            .post(served.url("/v1/ns/instance?serviceName=orders&ip=10.5.5.5&port=1"))
            .bearer_auth(&dev)
            .send()
            .await
            .unwrap();
        let read = served
            .http
            .get(served.url("/v1/ns/instance/list?namespaceId=dev&serviceName=orders"))
            .bearer_auth(&dev)
            .send()
            .await
            .unwrap();

        assert_eq!(own.status(), 200);
        assert_eq!(foreign.status(), 403);
        assert_eq!(read.status(), 200);
    }

    #[tokio::test]
    async fn test_login_rejects_bad_password() {
        let served = serve_with(with_users).await;

        let rejected = login(&served, "root", "wrong").await;
        assert_eq!(rejected.status(), 403);

        let accepted = login(&served, "root", "secret").await;
        assert_eq!(accepted.status(), 200);
        let principal: Value = accepted.json().await.unwrap();
        assert_eq!(principal["username"], "root");
        assert_eq!(principal["admin"], true);
    }

    #[tokio::test]
    async fn test_forwarded_requests_skip_auth() {
        let served = serve_with(with_users).await;

        let forwarded = served
            .http
            .post(served.url("/v1/ns/instance?serviceName=orders&ip=10.6.6.6&port=1"))
            .header(FORWARDED_HEADER, "true")
            .send()
            .await
            .unwrap();

        assert_eq!(forwarded.status(), 200);
    }

    #[tokio::test]
    async fn test_switch_updates_need_admin() {
        let served = serve_with(with_users).await;
        let dev = token(&served, "dev", "dev-pw").await;
        let root = token(&served, "root", "secret").await;

        let as_dev = served
            .http
            .put(served.url("/v1/ns/operator/switches?entry=pushEnabled&value=false"))
            .bearer_auth(&dev)
            .send()
            .await
            .unwrap();
        let as_root = served
            .http
            .put(served.url("/v1/ns/operator/switches?entry=pushEnabled&value=false"))
            .bearer_auth(&root)
            .send()
            .await
            .unwrap();

        assert_eq!(as_dev.status(), 403);
        assert_eq!(as_root.status(), 200);
        assert!(!served.node.context.switches.current().push_enabled);
    }
}
