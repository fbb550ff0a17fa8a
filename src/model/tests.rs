//! Data Model Tests
//!
//! ## Test Scopes
//! - **Instances**: weight clamping, datum keys, wildcard endpoint matching, validation.
//! - **Clusters**: instance-set replacement, health carry-over, change reports.
//! - **Services**: checksum determinism, protect threshold, lazy cluster creation.
//! - **Keys & Selectors**: key round trips and label filtering.

#[cfg(test)]
mod tests {
    use crate::model::cluster::Cluster;
    use crate::model::datum::{Instances, Record};
    use crate::model::instance::{Instance, normalize_weight};
    use crate::model::keys;
    use crate::model::selector::Selector;
    use crate::model::service::Service;
    use crate::model::types::HealthChecker;
    use std::collections::BTreeMap;

    fn service_with(ips: Vec<Instance>) -> Service {
        let mut service = Service::new("public", "DEFAULT_GROUP@@orders");
        service.update_ips(ips, true, true);
        service
    }

    // ============================================================
    // INSTANCE TESTS
    // ============================================================

    #[test]
    fn test_weight_clamping() {
        assert_eq!(normalize_weight(0.005), 0.01);
        assert_eq!(normalize_weight(15_000.0), 10_000.0);
        assert_eq!(normalize_weight(0.0), 0.0);
        assert_eq!(normalize_weight(3.5), 3.5);
    }

    #[test]
    fn test_weight_clamped_on_deserialization() {
        let json = r#"{"ip":"10.0.0.1","port":8080,"weight":15000}"#;
        let instance: Instance = serde_json::from_str(json).unwrap();
        assert_eq!(instance.weight, 10_000.0);

        let json = r#"{"ip":"10.0.0.1","port":8080,"weight":0.001}"#;
        let instance: Instance = serde_json::from_str(json).unwrap();
        assert_eq!(instance.weight, 0.01);
    }

    #[test]
    fn test_deserialization_defaults() {
        let instance: Instance = serde_json::from_str(r#"{"ip":"10.0.0.1"}"#).unwrap();

        assert_eq!(instance.port, 0);
        assert_eq!(instance.weight, 1.0);
        assert!(instance.healthy);
        assert!(instance.enabled);
        assert!(instance.ephemeral);
        assert_eq!(instance.cluster_name, keys::DEFAULT_CLUSTER);
    }

    #[test]
    fn test_datum_key() {
        let instance = Instance::new("10.0.0.1", 8080).with_cluster("c1");
        assert_eq!(instance.datum_key(), "10.0.0.1:8080:unknown:c1");

        let wild = Instance::new("10.0.0.1", 0).with_cluster("c1");
        assert_eq!(wild.datum_key(), "10.0.0.1:unknown:c1");
    }

    #[test]
    fn test_zero_port_matches_any_port() {
        let a = Instance::new("10.0.0.1", 8080);
        let wild = Instance::new("10.0.0.1", 0);
        let other = Instance::new("10.0.0.1", 9090);

        assert!(wild.same_endpoint(&a));
        assert!(a.same_endpoint(&wild));
        assert!(!a.same_endpoint(&other));
        assert!(!a.same_endpoint(&a.clone().with_ephemeral(false)));
    }

    #[test]
    fn test_instance_validation() {
        assert!(Instance::new("10.0.0.1", 80).validate().is_ok());
        assert!(Instance::new("my-host.local", 80).validate().is_ok());
        assert!(Instance::new("10.0.0.256", 80).validate().is_err());
        assert!(Instance::new("", 80).validate().is_err());
        assert!(Instance::new("10.0.0.1", 80).with_weight(-1.0).validate().is_err());
        assert!(Instance::new("10.0.0.1", 80).with_cluster("bad_name").validate().is_err());
    }

    #[test]
    fn test_metadata_timeouts() {
        let instance = Instance::new("10.0.0.1", 80)
            .with_metadata("preserved.heart.beat.timeout", "3000")
            .with_metadata("preserved.ip.delete.timeout", "oops");

        assert_eq!(instance.heart_beat_timeout(15_000), 3_000);
        assert_eq!(instance.ip_delete_timeout(30_000), 30_000);
        assert_eq!(instance.heart_beat_interval(5_000), 5_000);
    }

    // ============================================================
    // CLUSTER TESTS
    // ============================================================

    #[test]
    fn test_cluster_name_validation() {
        assert!(Cluster::new("c-9", "svc").validate().is_ok());
        assert!(Cluster::new("c_9", "svc").validate().is_err());
        assert!(Cluster::new("", "svc").validate().is_err());
    }

    #[test]
    fn test_update_ips_reports_changes() {
        let mut cluster = Cluster::new("DEFAULT", "svc");

        let changes = cluster.update_ips(
            vec![Instance::new("10.0.0.1", 80), Instance::new("10.0.0.2", 80)],
            true,
        );
        assert_eq!(changes.added.len(), 2);
        assert!(changes.removed.is_empty());

        let changes = cluster.update_ips(
            vec![Instance::new("10.0.0.2", 80).with_weight(5.0)],
            true,
        );
        assert_eq!(changes.removed, vec!["10.0.0.1:80".to_string()]);
        assert_eq!(changes.updated, vec!["10.0.0.2:80".to_string()]);
        assert_eq!(cluster.instance_count(), 1);
    }

    #[test]
    fn test_update_ips_keeps_local_health_unless_marked() {
        let mut cluster = Cluster::new("DEFAULT", "svc");
        cluster.update_ips(vec![Instance::new("10.0.0.1", 80).with_healthy(false)], true);

        // incoming copy claims healthy, local view says otherwise
        cluster.update_ips(vec![Instance::new("10.0.0.1", 80).with_healthy(true)], true);
        assert!(!cluster.get("10.0.0.1:80").unwrap().healthy);

        let mut pinned = Instance::new("10.0.0.1", 80).with_healthy(true);
        pinned.marked = true;
        cluster.update_ips(vec![pinned], true);
        assert!(cluster.get("10.0.0.1:80").unwrap().healthy);
    }

    #[test]
    fn test_instance_sets_are_disjoint() {
        let mut cluster = Cluster::new("DEFAULT", "svc");
        cluster.update_ips(vec![Instance::new("10.0.0.1", 80)], true);
        cluster.update_ips(vec![Instance::new("10.0.0.2", 80).with_ephemeral(false)], false);

        assert_eq!(cluster.all_ips_by(true).len(), 1);
        assert_eq!(cluster.all_ips_by(false).len(), 1);
        assert!(!cluster.all_ips_by(false)[0].ephemeral);

        cluster.update_ips(Vec::new(), true);
        assert_eq!(cluster.instance_count(), 1);
    }

    #[test]
    fn test_check_port() {
        let mut cluster = Cluster::new("DEFAULT", "svc");
        assert_eq!(cluster.check_port(&Instance::new("10.0.0.1", 8080)), 8080);

        cluster.use_instance_port_for_check = false;
        cluster.default_check_port = 9000;
        assert_eq!(cluster.check_port(&Instance::new("10.0.0.1", 8080)), 9000);
    }

    // ============================================================
    // SERVICE TESTS
    // ============================================================

    #[test]
    fn test_service_name_validation() {
        assert!(Service::new("public", "DEFAULT_GROUP@@orders.v1:api").validate().is_ok());
        assert!(Service::new("public", "orders/v1").validate().is_err());

        let mut service = Service::new("public", "orders");
        service.protect_threshold = 1.5;
        assert!(service.validate().is_err());
    }

    #[test]
    fn test_checksum_is_stable_without_mutation() {
        let mut service = service_with(vec![
            Instance::new("10.0.0.2", 80),
            Instance::new("10.0.0.1", 80),
        ]);
        let first = service.checksum().to_string();
        service.recalculate_checksum();

        assert_eq!(first, service.checksum());
    }

    #[test]
    fn test_checksum_ignores_instance_order() {
        let a = service_with(vec![Instance::new("10.0.0.1", 80), Instance::new("10.0.0.2", 80)]);
        let b = service_with(vec![Instance::new("10.0.0.2", 80), Instance::new("10.0.0.1", 80)]);

        assert_eq!(a.checksum(), b.checksum());
    }

    #[test]
    fn test_add_then_remove_restores_checksum() {
        let base = vec![Instance::new("10.0.0.1", 80)];
        let mut service = service_with(base.clone());
        let original = service.checksum().to_string();

        let mut grown = base.clone();
        grown.push(Instance::new("10.0.0.9", 80));
        service.update_ips(grown, true, true);
        assert_ne!(original, service.checksum());

        service.update_ips(base, true, true);
        assert_eq!(original, service.checksum());
    }

    #[test]
    fn test_unknown_cluster_is_created_lazily() {
        let mut service = Service::new("public", "orders");
        let update = service.update_ips(
            vec![
                Instance::new("10.0.0.1", 80).with_cluster("c9"),
                Instance::new("10.0.0.2", 80).with_cluster("c9"),
            ],
            true,
            true,
        );

        assert_eq!(update.new_clusters, vec!["c9".to_string()]);
        let cluster = service.cluster_map.get("c9").unwrap();
        assert_eq!(cluster.health_checker, HealthChecker::Tcp);
        assert_eq!(cluster.instance_count(), 2);
    }

    #[test]
    fn test_unknown_cluster_rejected_when_creation_disabled() {
        let mut service = Service::new("public", "orders");
        let update = service.update_ips(
            vec![Instance::new("10.0.0.1", 80).with_cluster("c9")],
            true,
            false,
        );

        assert_eq!(update.rejected, 1);
        assert!(service.cluster_map.is_empty());
    }

    #[test]
    fn test_protect_threshold_trigger() {
        let mut ips = Vec::new();
        for i in 0..10 {
            ips.push(Instance::new(format!("10.0.0.{i}"), 80).with_healthy(i < 4));
        }
        let mut service = service_with(ips);
        service.protect_threshold = 0.5;
        // healthy bits carried over on first insert since nothing existed before
        assert_eq!(service.healthy_instance_count(), 4);
        assert!(service.trigger_protect());

        service.protect_threshold = 0.3;
        assert!(!service.trigger_protect());
    }

    #[test]
    fn test_set_instance_health_changes_checksum() {
        let mut service = service_with(vec![Instance::new("10.0.0.1", 80)]);
        let before = service.checksum().to_string();

        assert!(service.set_instance_health("DEFAULT", "10.0.0.1:80", false));
        assert_ne!(before, service.checksum());
        assert!(!service.set_instance_health("DEFAULT", "10.0.0.1:80", false));
        assert!(!service.set_instance_health("DEFAULT", "10.9.9.9:80", false));
    }

    #[test]
    fn test_service_update_copies_configuration() {
        let mut service = service_with(vec![Instance::new("10.0.0.1", 80)]);
        let mut newer = Service::new("public", "DEFAULT_GROUP@@orders");
        newer.protect_threshold = 0.8;
        newer.enabled = false;
        newer.add_cluster(Cluster::new("c2", "").with_health_checker(HealthChecker::None));

        service.update(&newer);

        assert_eq!(service.protect_threshold, 0.8);
        assert!(!service.enabled);
        assert!(service.cluster_map.contains_key("c2"));
        assert_eq!(service.instance_count(), 1);
    }

    #[test]
    fn test_record_serialization_drops_instances() {
        let service = service_with(vec![Instance::new("10.0.0.1", 80)]);
        let json = serde_json::to_string(&Record::Service(Box::new(service.to_record()))).unwrap();
        let restored: Record = serde_json::from_str(&json).unwrap();

        match restored {
            Record::Service(restored) => {
                assert!(restored.cluster_map.contains_key("DEFAULT"));
                assert_eq!(restored.instance_count(), 0);
            }
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[test]
    fn test_instances_checksum_ignores_order() {
        let a = Instances::new(vec![Instance::new("10.0.0.1", 80), Instance::new("10.0.0.2", 80)]);
        let b = Instances::new(vec![Instance::new("10.0.0.2", 80), Instance::new("10.0.0.1", 80)]);
        assert_eq!(a.checksum(), b.checksum());
    }

    #[test]
    fn test_instances_checksum_covers_replicated_fields() {
        let base = Instances::new(vec![Instance::new("10.0.0.1", 80)]);
        let disabled = Instances::new(vec![Instance::new("10.0.0.1", 80).with_enabled(false)]);
        let persistent = Instances::new(vec![Instance::new("10.0.0.1", 80).with_ephemeral(false)]);
        let tagged = Instances::new(vec![Instance::new("10.0.0.1", 80).with_metadata("zone", "a")]);
        let retagged = Instances::new(vec![Instance::new("10.0.0.1", 80).with_metadata("zone", "b")]);

        let digests = [
            base.checksum(),
            disabled.checksum(),
            persistent.checksum(),
            tagged.checksum(),
            retagged.checksum(),
        ];
        for (i, a) in digests.iter().enumerate() {
            for b in &digests[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_service_checksum_sees_enabled_and_metadata() {
        let mut service = service_with(vec![Instance::new("10.0.0.1", 80)]);
        let before = service.checksum().to_string();

        service.update_ips(vec![Instance::new("10.0.0.1", 80).with_enabled(false)], true, true);
        let disabled = service.checksum().to_string();
        service.update_ips(vec![Instance::new("10.0.0.1", 80).with_metadata("zone", "a")], true, true);

        assert_ne!(before, disabled);
        assert_ne!(disabled, service.checksum());
        assert_ne!(before, service.checksum());
    }

    #[test]
    fn test_emptied_auto_created_cluster_keeps_checksum() {
        // ARRANGE
        let base = vec![Instance::new("10.0.0.1", 80)];
        let mut service = service_with(base.clone());
        let original = service.checksum().to_string();

        // ACT: an instance lands in a new cluster, then leaves
        let mut grown = base.clone();
        grown.push(Instance::new("10.0.0.9", 80).with_cluster("c9"));
        let update = service.update_ips(grown, true, true);
        service.update_ips(base, true, true);

        // ASSERT
        assert_eq!(update.new_clusters, vec!["c9".to_string()]);
        assert!(service.cluster_map.contains_key("c9"));
        assert_eq!(original, service.checksum());
    }

    #[test]
    fn test_configured_empty_cluster_still_counts() {
        let mut service = service_with(vec![Instance::new("10.0.0.1", 80)]);
        let before = service.checksum().to_string();

        let mut newer = Service::new("public", "DEFAULT_GROUP@@orders");
        newer.add_cluster(Cluster::new("c2", "").with_health_checker(HealthChecker::None));
        service.update(&newer);

        assert!(Cluster::new("c3", "svc").is_blank());
        assert!(!service.cluster_map["c2"].is_blank());
        assert_ne!(before, service.checksum());
    }

    // ============================================================
    // KEY TESTS
    // ============================================================

    #[test]
    fn test_instance_list_keys() {
        let ephemeral = keys::build_instance_list_key("public", "DEFAULT_GROUP@@orders", true);
        let persistent = keys::build_instance_list_key("public", "DEFAULT_GROUP@@orders", false);

        assert!(keys::match_ephemeral_instance_list_key(&ephemeral));
        assert!(!keys::match_ephemeral_instance_list_key(&persistent));
        assert!(keys::match_instance_list_key(&persistent));
        assert!(keys::match_instance_list_key_of(&ephemeral, "public", "DEFAULT_GROUP@@orders"));
        assert!(!keys::match_instance_list_key_of(&ephemeral, "public", "DEFAULT_GROUP@@order"));

        assert_eq!(
            keys::parse_service_key(&ephemeral),
            Some(("public".to_string(), "DEFAULT_GROUP@@orders".to_string()))
        );
    }

    #[test]
    fn test_meta_and_switch_keys() {
        let meta = keys::build_service_meta_key("dev", "g@@svc");

        assert!(keys::match_service_meta_key(&meta));
        assert!(!keys::match_service_meta_key(keys::SWITCH_KEY));
        assert!(keys::match_switch_key(keys::SWITCH_KEY));
        assert_eq!(keys::service_name_of(&meta), Some("g@@svc".to_string()));
        assert_eq!(keys::parse_service_key("naming.meta.broken"), None);
    }

    #[test]
    fn test_grouped_names() {
        assert_eq!(keys::grouped_name("", "orders"), "DEFAULT_GROUP@@orders");
        assert_eq!(keys::grouped_name("g", "g2@@orders"), "g2@@orders");
        assert_eq!(keys::split_grouped_name("g@@orders"), ("g", "orders"));
        assert_eq!(keys::split_grouped_name("orders"), ("DEFAULT_GROUP", "orders"));
    }

    // ============================================================
    // SELECTOR TESTS
    // ============================================================

    #[test]
    fn test_label_selector_prefers_same_site() {
        let selector = Selector::label("CONSUMER.label.site = PROVIDER.label.site");
        let providers = vec![
            Instance::new("10.0.0.1", 80).with_metadata("site", "a"),
            Instance::new("10.0.0.2", 80).with_metadata("site", "b"),
        ];
        let mut consumer = BTreeMap::new();
        consumer.insert("site".to_string(), "b".to_string());

        let selected = selector.select(&consumer, providers.clone());
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].ip, "10.0.0.2");

        // no label on the consumer: everything
        assert_eq!(selector.select(&BTreeMap::new(), providers.clone()).len(), 2);

        // no provider matches: everything
        consumer.insert("site".to_string(), "z".to_string());
        assert_eq!(selector.select(&consumer, providers).len(), 2);
    }

    #[test]
    fn test_bad_selector_expression_rejected() {
        assert!(Selector::label("site = site").validate().is_err());
        assert!(Selector::label("CONSUMER.label.a = PROVIDER.label.b").validate().is_err());
        assert!(Selector::label("").validate().is_err());
        assert!(Selector::None.validate().is_ok());
    }
}
