use async_trait::async_trait;
use std::sync::Arc;

use super::raft::RaftCore;
use super::{ConsistencyService, RecordListener};
use crate::error::{NamingError, Result};
use crate::model::datum::{Datum, Record};
use crate::model::keys;

/// Persistent keys through the replicated log.
pub struct RaftConsistencyService {
    core: Arc<RaftCore>,
}

impl RaftConsistencyService {
    pub fn new(core: Arc<RaftCore>) -> Self {
        Self { core }
    }

    pub fn core(&self) -> &Arc<RaftCore> {
        &self.core
    }
}

#[async_trait]
impl ConsistencyService for RaftConsistencyService {
    async fn put(&self, key: &str, value: Record) -> Result<()> {
        if keys::match_ephemeral_key(key) {
            return Err(NamingError::server(format!("{key} is an ephemeral key")));
        }
        self.core.signal_publish(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.core.signal_delete(key).await?;
        self.core.unlisten_matching(key);
        Ok(())
    }

    fn get(&self, key: &str) -> Option<Datum> {
        self.core.get(key)
    }

    fn listen(&self, key: &str, listener: Arc<dyn RecordListener>) {
        self.core.listen(key, listener);
    }

    fn unlisten(&self, key: &str, listener: &Arc<dyn RecordListener>) {
        self.core.unlisten(key, listener);
    }

    fn is_available(&self) -> bool {
        self.core.is_initialized() && self.core.leader().is_some()
    }
}
