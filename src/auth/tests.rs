//! Auth Module Tests
//!
//! ## Test Scopes
//! - **Login**: token issue, bad credentials, token lookup.
//! - **Lockout**: lock after repeated failures, expiry, reset on success.
//! - **Permissions**: admin, read, namespace-scoped writes.

#[cfg(test)]
mod tests {
    use crate::auth::attempts::LoginAttemptTracker;
    use crate::auth::{Action, AllowAll, Authenticator, Permission, StaticUserAuthenticator, build};
    use crate::config::{AuthConfig, UserEntry};
    use crate::error::NamingError;
    use crate::storage::{KvStorage, MemoryKvStorage};
    use std::sync::Arc;

    // ============================================================
    // FIXTURES
    // ============================================================

    fn users() -> Vec<UserEntry> {
        vec![
            UserEntry {
                username: "nacos".to_string(),
                password: "nacos".to_string(),
                admin: true,
                writable_namespaces: Vec::new(),
            },
            UserEntry {
                username: "dev".to_string(),
                password: "secret".to_string(),
                admin: false,
                writable_namespaces: vec!["dev".to_string()],
            },
        ]
    }

    fn authenticator(max_failures: u32, lock_millis: u64) -> StaticUserAuthenticator {
        let storage: Arc<dyn KvStorage> = Arc::new(MemoryKvStorage::new());
        StaticUserAuthenticator::new(users(), LoginAttemptTracker::new(storage, max_failures, lock_millis))
    }

    // ============================================================
    // LOGIN TESTS
    // ============================================================

    #[test]
    fn test_login_issues_resolvable_token() {
        // ARRANGE
        let auth = authenticator(5, 60_000);

        // ACT
        let principal = auth.login("dev", "secret").unwrap();

        // ASSERT
        assert_eq!(principal.username, "dev");
        assert!(uuid::Uuid::parse_str(&principal.access_token).is_ok());
        assert_eq!(auth.identify(&principal.access_token), Some(principal));
        assert!(auth.identify("made-up").is_none());
    }

    #[test]
    fn test_bad_credentials_are_forbidden() {
        let auth = authenticator(5, 60_000);

        let wrong_password = auth.login("dev", "guess").unwrap_err();
        let unknown_user = auth.login("mallory", "secret").unwrap_err();

        assert!(matches!(wrong_password, NamingError::Forbidden(_)));
        assert!(matches!(unknown_user, NamingError::Forbidden(_)));
        assert_eq!(auth.attempts().failures("dev"), 1);
    }

    // ============================================================
    // LOCKOUT TESTS
    // ============================================================

    #[test]
    fn test_lockout_after_repeated_failures() {
        // ARRANGE
        let auth = authenticator(3, 60_000);

        // ACT
        for _ in 0..3 {
            let _ = auth.login("dev", "guess");
        }
        let locked = auth.login("dev", "secret");

        // ASSERT: even the right password is refused while locked
        assert!(matches!(locked, Err(NamingError::Forbidden(_))));
        assert!(auth.attempts().is_locked("dev", crate::model::types::now_millis()));
        assert!(auth.login("nacos", "nacos").is_ok());
    }

    #[test]
    fn test_lock_expires() {
        // ARRANGE
        let storage: Arc<dyn KvStorage> = Arc::new(MemoryKvStorage::new());
        let tracker = LoginAttemptTracker::new(storage, 2, 1_000);

        // ACT
        tracker.record_failure("dev", 10_000).unwrap();
        tracker.record_failure("dev", 10_100).unwrap();

        // ASSERT
        assert!(tracker.check("dev", 10_500).is_err());
        assert!(tracker.check("dev", 11_100).is_ok());

        // ACT: the next failure after expiry starts counting afresh
        tracker.record_failure("dev", 12_000).unwrap();
        assert_eq!(tracker.failures("dev"), 1);
        assert!(!tracker.is_locked("dev", 12_000));
    }

    #[test]
    fn test_success_resets_failures() {
        let auth = authenticator(3, 60_000);

        let _ = auth.login("dev", "guess");
        let _ = auth.login("dev", "guess");
        auth.login("dev", "secret").unwrap();
        let _ = auth.login("dev", "guess");

        assert_eq!(auth.attempts().failures("dev"), 1);
        assert!(auth.login("dev", "secret").is_ok());
    }

    // ============================================================
    // PERMISSION TESTS
    // ============================================================

    #[test]
    fn test_write_permissions_are_namespace_scoped() {
        // ARRANGE
        let auth = authenticator(5, 60_000);
        let dev = auth.login("dev", "secret").unwrap();
        let admin = auth.login("nacos", "nacos").unwrap();
        let write_dev = Permission::service("dev", "DEFAULT_GROUP@@orders", Action::Write);
        let write_public = Permission::service("public", "DEFAULT_GROUP@@orders", Action::Write);
        let read_public = Permission::service("public", "DEFAULT_GROUP@@orders", Action::Read);

        // ACT + ASSERT
        assert!(auth.auth(&write_dev, &dev).is_ok());
        assert!(matches!(auth.auth(&write_public, &dev), Err(NamingError::Forbidden(_))));
        assert!(auth.auth(&read_public, &dev).is_ok());
        assert!(auth.auth(&write_public, &admin).is_ok());
        assert_eq!(write_dev.namespace(), "dev");
        assert_eq!(Permission::new("public", Action::Write).namespace(), "public");
    }

    #[test]
    fn test_build_without_users_allows_everything() {
        let storage: Arc<dyn KvStorage> = Arc::new(MemoryKvStorage::new());
        let auth = build(
            &AuthConfig {
                enabled: true,
                ..AuthConfig::default()
            },
            storage,
        );

        let principal = auth.identify("anything").unwrap();
        assert!(auth.auth(&Permission::new("public", Action::Write), &principal).is_ok());
        assert!(AllowAll.login("who", "ever").unwrap().admin);
    }
}
