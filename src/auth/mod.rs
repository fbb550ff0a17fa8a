//! Auth Module
//!
//! Pluggable check consulted before mutating operations. The registry itself
//! never looks at credentials; the HTTP layer asks an [`Authenticator`] and
//! either proceeds or answers `403`.
//!
//! ## Core Concepts
//! - **Principal**: who is calling, resolved from a login or a token.
//! - **Permission**: a resource (`namespace##service`) plus read or write.
//! - **Lockout**: [`attempts::LoginAttemptTracker`] locks a user out after
//!   repeated failed logins.

pub mod attempts;

#[cfg(test)]
mod tests;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{AuthConfig, UserEntry};
use crate::error::{NamingError, Result};
use crate::model::keys;
use crate::model::types::now_millis;
use crate::storage::KvStorage;
use attempts::LoginAttemptTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Read,
    Write,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permission {
    /// `namespace##grouped service`, or a bare namespace.
    pub resource: String,
    pub action: Action,
}

impl Permission {
    pub fn new(resource: impl Into<String>, action: Action) -> Self {
        Self {
            resource: resource.into(),
            action,
        }
    }

    pub fn service(namespace_id: &str, service_name: &str, action: Action) -> Self {
        Self::new(keys::full_service_name(namespace_id, service_name), action)
    }

    pub fn namespace(&self) -> &str {
        self.resource
            .split_once(keys::NAMESPACE_CONNECTOR)
            .map(|(namespace, _)| namespace)
            .unwrap_or(&self.resource)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub username: String,
    pub access_token: String,
    pub admin: bool,
    #[serde(skip)]
    pub writable_namespaces: Vec<String>,
}

pub trait Authenticator: Send + Sync {
    /// Exchange credentials for a principal carrying a fresh token.
    fn login(&self, username: &str, password: &str) -> Result<Principal>;

    /// The principal a token was issued to.
    fn identify(&self, token: &str) -> Option<Principal>;

    fn auth(&self, permission: &Permission, principal: &Principal) -> Result<()>;
}

/// Users from config when there are any, otherwise everything is allowed.
pub fn build(config: &AuthConfig, storage: Arc<dyn KvStorage>) -> Arc<dyn Authenticator> {
    if config.users.is_empty() {
        if config.enabled {
            warn!("auth is enabled but no users are configured, allowing every request");
        }
        return Arc::new(AllowAll);
    }
    info!("auth: {} static users", config.users.len());
    Arc::new(StaticUserAuthenticator::new(
        config.users.clone(),
        LoginAttemptTracker::new(storage, config.max_failed_logins, config.lock_duration_ms),
    ))
}

pub struct AllowAll;

impl Authenticator for AllowAll {
    fn login(&self, username: &str, _password: &str) -> Result<Principal> {
        Ok(Principal {
            username: username.to_string(),
            access_token: uuid::Uuid::new_v4().to_string(),
            admin: true,
            writable_namespaces: Vec::new(),
        })
    }

    fn identify(&self, token: &str) -> Option<Principal> {
        Some(Principal {
            username: "anonymous".to_string(),
            access_token: token.to_string(),
            admin: true,
            writable_namespaces: Vec::new(),
        })
    }

    fn auth(&self, _permission: &Permission, _principal: &Principal) -> Result<()> {
        Ok(())
    }
}

/// Checks passwords against the configured users and issues uuid tokens.
pub struct StaticUserAuthenticator {
    users: Vec<UserEntry>,
    tokens: DashMap<String, Principal>,
    attempts: LoginAttemptTracker,
}

impl StaticUserAuthenticator {
    pub fn new(users: Vec<UserEntry>, attempts: LoginAttemptTracker) -> Self {
        Self {
            users,
            tokens: DashMap::new(),
            attempts,
        }
    }

    pub fn attempts(&self) -> &LoginAttemptTracker {
        &self.attempts
    }
}

impl Authenticator for StaticUserAuthenticator {
    fn login(&self, username: &str, password: &str) -> Result<Principal> {
        let now = now_millis();
        self.attempts.check(username, now)?;

        let Some(user) = self
            .users
            .iter()
            .find(|u| u.username == username && u.password == password)
        else {
            self.attempts.record_failure(username, now)?;
            warn!("[AUTH] failed login for {}", username);
            return Err(NamingError::Forbidden("invalid username or password".to_string()));
        };

        self.attempts.record_success(username)?;
        let principal = Principal {
            username: user.username.clone(),
            access_token: uuid::Uuid::new_v4().to_string(),
            admin: user.admin,
            writable_namespaces: user.writable_namespaces.clone(),
        };
        self.tokens
            .insert(principal.access_token.clone(), principal.clone());
        info!("[AUTH] {} logged in", username);
        Ok(principal)
    }

    fn identify(&self, token: &str) -> Option<Principal> {
        self.tokens.get(token).map(|p| p.value().clone())
    }

    fn auth(&self, permission: &Permission, principal: &Principal) -> Result<()> {
        if principal.admin || permission.action == Action::Read {
            return Ok(());
        }
        let namespace = permission.namespace();
        if principal.writable_namespaces.iter().any(|n| n == namespace) {
            return Ok(());
        }
        Err(NamingError::Forbidden(format!(
            "{} may not write to {}",
            principal.username, permission.resource
        )))
    }
}
