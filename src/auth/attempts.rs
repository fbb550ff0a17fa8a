use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::error::{NamingError, Result};
use crate::storage::KvStorage;

const KEY_PREFIX: &str = "auth.failed.";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Attempts {
    failures: u32,
    locked_until: u64,
}

/// Failed-login counts kept in the node-local store.
pub struct LoginAttemptTracker {
    storage: Arc<dyn KvStorage>,
    max_failures: u32,
    lock_millis: u64,
}

impl LoginAttemptTracker {
    pub fn new(storage: Arc<dyn KvStorage>, max_failures: u32, lock_millis: u64) -> Self {
        Self {
            storage,
            max_failures: max_failures.max(1),
            lock_millis,
        }
    }

    fn key(username: &str) -> String {
        format!("{KEY_PREFIX}{username}")
    }

    fn load(&self, username: &str) -> Attempts {
        self.storage
            .get(&Self::key(username))
            .and_then(|raw| serde_json::from_slice(&raw).ok())
            .unwrap_or_default()
    }

    fn save(&self, username: &str, attempts: &Attempts) -> Result<()> {
        self.storage
            .put(&Self::key(username), serde_json::to_vec(attempts)?)
    }

    pub fn is_locked(&self, username: &str, now: u64) -> bool {
        self.load(username).locked_until > now
    }

    /// Fails with `Forbidden` while the user is locked out.
    pub fn check(&self, username: &str, now: u64) -> Result<()> {
        let attempts = self.load(username);
        if attempts.locked_until > now {
            return Err(NamingError::Forbidden(format!(
                "user {username} is locked for another {}ms",
                attempts.locked_until - now
            )));
        }
        Ok(())
    }

    pub fn failures(&self, username: &str) -> u32 {
        self.load(username).failures
    }

    pub fn record_failure(&self, username: &str, now: u64) -> Result<()> {
        let mut attempts = self.load(username);
        if attempts.locked_until != 0 && attempts.locked_until <= now {
            attempts = Attempts::default();
        }
        attempts.failures += 1;
        if attempts.failures >= self.max_failures {
            attempts.locked_until = now + self.lock_millis;
            warn!(
                "[AUTH] {} locked after {} failed logins",
                username, attempts.failures
            );
        }
        self.save(username, &attempts)
    }

    pub fn record_success(&self, username: &str) -> Result<()> {
        self.storage.delete(&Self::key(username))
    }
}
