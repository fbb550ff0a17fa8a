//! Configuration Tests
//!
//! ## Test Scopes
//! - **Loading**: defaults, file layering, validation failures.
//! - **Switches**: operator entry parsing and copy-on-write publication.

#[cfg(test)]
mod tests {
    use crate::config::NamingConfig;
    use crate::config::switches::{SwitchDomain, Switches};
    use crate::registry::operator::OperatorVersion;
    use std::io::Write;

    fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("naming-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    // ============================================================
    // LOADING TESTS
    // ============================================================

    #[test]
    fn test_defaults_are_valid() {
        let config = NamingConfig::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.server.http_addr.port(), 8848);
        assert_eq!(config.health.heart_beat_timeout_ms, 15_000);
        assert_eq!(config.health.ip_delete_timeout_ms, 30_000);
        assert_eq!(config.registry.operator, OperatorVersion::V1);
        assert!(config.registry.auto_create_service);
    }

    #[test]
    fn test_load_from_toml_file() {
        let path = write_temp(
            "naming.toml",
            r#"
[server]
http_addr = "127.0.0.1:9848"
standalone = true

[switches]
distro_threshold = 0.5
check_times = 5

[registry]
operator = "v2"
auto_create_cluster = false
"#,
        );

        let config = NamingConfig::load(Some(&path)).unwrap();

        assert_eq!(config.server.http_addr.port(), 9848);
        assert!(config.server.standalone);
        assert_eq!(config.switches.distro_threshold, 0.5);
        assert_eq!(config.switches.check_times, 5);
        assert_eq!(config.registry.operator, OperatorVersion::V2);
        assert!(!config.registry.auto_create_cluster);
        // untouched sections keep their defaults
        assert_eq!(config.push.ack_timeout_ms, 10_000);
    }

    #[test]
    fn test_invalid_raft_timing_rejected() {
        let path = write_temp(
            "naming.toml",
            r#"
[raft]
heartbeat_interval_ms = 20000
election_timeout_ms = 10000
"#,
        );

        assert!(NamingConfig::load(Some(&path)).is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let path = std::env::temp_dir().join("definitely-not-here-naming.toml");
        assert!(NamingConfig::load(Some(&path)).is_err());
    }

    // ============================================================
    // SWITCH TESTS
    // ============================================================

    #[test]
    fn test_switch_entries_apply() {
        let mut domain = SwitchDomain::default();

        domain.apply("distroThreshold", "0.4").unwrap();
        domain.apply("pushEnabled", "false").unwrap();
        domain.apply("clientBeatInterval", "3000").unwrap();
        domain.apply("pushVersion.Python", "0.5.0").unwrap();

        assert_eq!(domain.distro_threshold, 0.4);
        assert!(!domain.push_enabled);
        assert_eq!(domain.client_beat_interval, 3_000);
        assert_eq!(domain.push_version_floors.get("python").unwrap(), "0.5.0");
    }

    #[test]
    fn test_bad_switch_entries_rejected() {
        let mut domain = SwitchDomain::default();

        assert!(domain.apply("distroThreshold", "1.5").is_err());
        assert!(domain.apply("checkTimes", "0").is_err());
        assert!(domain.apply("pushEnabled", "maybe").is_err());
        assert!(domain.apply("noSuchSwitch", "1").is_err());
        assert_eq!(domain, SwitchDomain::default());
    }

    #[test]
    fn test_switch_store_replaces_snapshot() {
        let switches = Switches::new(SwitchDomain::default());
        let before = switches.load();

        let mut next = (*before).clone();
        next.health_check_enabled = false;
        switches.store(next);

        assert!(before.health_check_enabled);
        assert!(!switches.load().health_check_enabled);
    }
}
