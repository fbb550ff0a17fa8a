//! Consistency Module
//!
//! One `put/remove/get/listen/unlisten` contract with two implementations,
//! picked per key by [`delegate::DelegateConsistencyService`]:
//!
//! - **Ephemeral (AP)**: [`ephemeral::DistroConsistencyService`]. The owning
//!   node applies writes locally and converges peers through delayed datum
//!   pushes and periodic checksum comparison with pull-on-mismatch.
//! - **Persistent (CP)**: [`persistent::RaftConsistencyService`] over
//!   [`raft::RaftCore`]. Leader-ordered writes, majority acknowledgement with a
//!   bounded wait, state kept in a pluggable [`crate::storage::KvStorage`].
//!
//! Both paths report changes through [`RecordListener`]s. Notification is
//! synchronous with the local apply, so a write that returns `Ok` is already
//! visible to in-process readers.

pub mod delegate;
pub mod ephemeral;
pub mod persistent;
pub mod protocol;
pub mod raft;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::error;

use crate::error::Result;
use crate::model::datum::{Datum, Record};

pub use delegate::DelegateConsistencyService;
pub use ephemeral::DistroConsistencyService;
pub use persistent::RaftConsistencyService;

#[async_trait]
pub trait ConsistencyService: Send + Sync {
    async fn put(&self, key: &str, value: Record) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    fn get(&self, key: &str) -> Option<Datum>;

    fn listen(&self, key: &str, listener: Arc<dyn RecordListener>);

    fn unlisten(&self, key: &str, listener: &Arc<dyn RecordListener>);

    fn is_available(&self) -> bool;
}

/// Callback seam between the consistency paths and the registry.
pub trait RecordListener: Send + Sync {
    /// Whether this listener wants changes to `key`.
    fn interests(&self, key: &str) -> bool;

    /// Whether this listener should be dropped when `key` is removed.
    fn match_unlisten_key(&self, key: &str) -> bool;

    fn on_change(&self, key: &str, value: &Record) -> Result<()>;

    fn on_delete(&self, key: &str) -> Result<()>;
}

/// Listeners keyed by the key (or key prefix) they registered on.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: DashMap<String, Vec<Arc<dyn RecordListener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listen(&self, key: &str, listener: Arc<dyn RecordListener>) {
        let mut entry = self.listeners.entry(key.to_string()).or_default();
        if entry.iter().any(|existing| Arc::ptr_eq(existing, &listener)) {
            return;
        }
        entry.push(listener);
    }

    pub fn unlisten(&self, key: &str, listener: &Arc<dyn RecordListener>) {
        if let Some(mut entry) = self.listeners.get_mut(key) {
            entry.retain(|existing| !Arc::ptr_eq(existing, listener));
        }
        self.listeners.remove_if(key, |_, list| list.is_empty());
    }

    /// Drop listeners registered on `key` that ask to go with it.
    pub fn unlisten_matching(&self, key: &str) {
        if let Some(mut entry) = self.listeners.get_mut(key) {
            entry.retain(|existing| !existing.match_unlisten_key(key));
        }
        self.listeners.remove_if(key, |_, list| list.is_empty());
    }

    /// Whether something listens on exactly `key`.
    pub fn has_exact(&self, key: &str) -> bool {
        self.listeners
            .get(key)
            .map(|list| !list.is_empty())
            .unwrap_or(false)
    }

    /// First listener registered on exactly `key`.
    pub fn first(&self, key: &str) -> Option<Arc<dyn RecordListener>> {
        self.listeners.get(key).and_then(|list| list.first().cloned())
    }

    /// Listeners interested in `key`: those on the key itself and those on a
    /// prefix of it.
    pub fn interested(&self, key: &str) -> Vec<Arc<dyn RecordListener>> {
        let mut found: Vec<Arc<dyn RecordListener>> = Vec::new();
        for entry in self.listeners.iter() {
            if !key.starts_with(entry.key().as_str()) {
                continue;
            }
            for listener in entry.value() {
                if listener.interests(key) && !found.iter().any(|f| Arc::ptr_eq(f, listener)) {
                    found.push(listener.clone());
                }
            }
        }
        found
    }

    /// Every registered listener, once.
    pub fn all(&self) -> Vec<Arc<dyn RecordListener>> {
        let mut found: Vec<Arc<dyn RecordListener>> = Vec::new();
        for entry in self.listeners.iter() {
            for listener in entry.value() {
                if !found.iter().any(|f| Arc::ptr_eq(f, listener)) {
                    found.push(listener.clone());
                }
            }
        }
        found
    }

    /// Call `on_change` on every interested listener. Listener errors are logged.
    pub fn notify_change(&self, key: &str, value: &Record) -> usize {
        let listeners = self.interested(key);
        for listener in &listeners {
            if let Err(e) = listener.on_change(key, value) {
                error!("[NOTIFIER] error while notifying listener of key {}: {}", key, e);
            }
        }
        listeners.len()
    }

    pub fn notify_delete(&self, key: &str) -> usize {
        let listeners = self.interested(key);
        for listener in &listeners {
            if let Err(e) = listener.on_delete(key) {
                error!("[NOTIFIER] error while notifying delete of key {}: {}", key, e);
            }
        }
        listeners.len()
    }
}
