use async_trait::async_trait;
use std::sync::Arc;

use super::{ConsistencyService, DistroConsistencyService, RaftConsistencyService, RecordListener};
use crate::error::Result;
use crate::model::datum::{Datum, Record};
use crate::model::keys;

/// Routes ephemeral keys to distro and everything else to raft.
pub struct DelegateConsistencyService {
    ephemeral: Arc<DistroConsistencyService>,
    persistent: Arc<RaftConsistencyService>,
}

impl DelegateConsistencyService {
    pub fn new(ephemeral: Arc<DistroConsistencyService>, persistent: Arc<RaftConsistencyService>) -> Self {
        Self {
            ephemeral,
            persistent,
        }
    }

    pub fn ephemeral(&self) -> &Arc<DistroConsistencyService> {
        &self.ephemeral
    }

    pub fn persistent(&self) -> &Arc<RaftConsistencyService> {
        &self.persistent
    }

    fn route(&self, key: &str) -> &dyn ConsistencyService {
        if keys::match_ephemeral_key(key) {
            self.ephemeral.as_ref()
        } else {
            self.persistent.as_ref()
        }
    }
}

#[async_trait]
impl ConsistencyService for DelegateConsistencyService {
    async fn put(&self, key: &str, value: Record) -> Result<()> {
        self.route(key).put(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.route(key).remove(key).await
    }

    fn get(&self, key: &str) -> Option<Datum> {
        self.route(key).get(key)
    }

    fn listen(&self, key: &str, listener: Arc<dyn RecordListener>) {
        // service meta listeners also create services for distro data
        if key == keys::SERVICE_META_KEY_PREFIX {
            self.ephemeral.listen(key, listener.clone());
            self.persistent.listen(key, listener);
            return;
        }
        self.route(key).listen(key, listener);
    }

    fn unlisten(&self, key: &str, listener: &Arc<dyn RecordListener>) {
        if key == keys::SERVICE_META_KEY_PREFIX {
            self.ephemeral.unlisten(key, listener);
            self.persistent.unlisten(key, listener);
            return;
        }
        self.route(key).unlisten(key, listener);
    }

    fn is_available(&self) -> bool {
        self.ephemeral.is_available() || self.persistent.is_available()
    }
}
