use std::sync::Arc;
use tracing::{info, warn};

use crate::config::switches::{SwitchDomain, Switches};
use crate::consistency::{ConsistencyService, RecordListener};
use crate::error::Result;
use crate::model::datum::Record;
use crate::model::keys;

/// Owns the replicated switch record.
pub struct SwitchManager {
    switches: Arc<Switches>,
    consistency: Arc<dyn ConsistencyService>,
}

impl SwitchManager {
    /// Build and subscribe to the switch key.
    pub fn new(switches: Arc<Switches>, consistency: Arc<dyn ConsistencyService>) -> Arc<Self> {
        let manager = Arc::new(Self {
            switches,
            consistency,
        });
        let listener: Arc<dyn RecordListener> = manager.clone();
        manager.consistency.listen(keys::SWITCH_KEY, listener);
        manager
    }

    pub fn current(&self) -> Arc<SwitchDomain> {
        self.switches.load()
    }

    /// Change one switch. `debug` applies it to this node only; otherwise the
    /// change is replicated to the whole cluster.
    pub async fn update(&self, entry: &str, value: &str, debug: bool) -> Result<()> {
        let mut domain = (*self.switches.load()).clone();
        domain.apply(entry, value)?;

        if debug {
            info!("[SWITCH] local-only update {}={}", entry, value);
            self.switches.store(domain);
            return Ok(());
        }
        self.consistency
            .put(keys::SWITCH_KEY, Record::Switch(Box::new(domain)))
            .await
    }
}

impl RecordListener for SwitchManager {
    fn interests(&self, key: &str) -> bool {
        keys::match_switch_key(key)
    }

    fn match_unlisten_key(&self, key: &str) -> bool {
        keys::match_switch_key(key)
    }

    fn on_change(&self, key: &str, value: &Record) -> Result<()> {
        let Record::Switch(domain) = value else {
            warn!("[SWITCH] ignoring non-switch record under {}", key);
            return Ok(());
        };
        info!("[SWITCH] switch domain updated");
        self.switches.store(domain.as_ref().clone());
        Ok(())
    }

    fn on_delete(&self, key: &str) -> Result<()> {
        warn!("[SWITCH] switch record {} removed, keeping current values", key);
        Ok(())
    }
}
