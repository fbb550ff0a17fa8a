use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::model::keys;

/// Per-instance probe bookkeeping kept beside the replicated model.
///
/// `mock_valid` is what this node last observed for the instance when it was
/// not allowed to change the replicated health bit itself.
#[derive(Debug)]
pub struct HealthCheckStatus {
    being_checked: AtomicBool,
    ok_count: AtomicU32,
    fail_count: AtomicU32,
    mock_valid: AtomicBool,
}

impl Default for HealthCheckStatus {
    fn default() -> Self {
        Self {
            being_checked: AtomicBool::new(false),
            ok_count: AtomicU32::new(0),
            fail_count: AtomicU32::new(0),
            mock_valid: AtomicBool::new(true),
        }
    }
}

impl HealthCheckStatus {
    /// Claim the instance for one probe. `false` when a probe is already running.
    pub fn try_begin(&self) -> bool {
        self.being_checked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn finish(&self) {
        self.being_checked.store(false, Ordering::Release);
    }

    pub fn is_being_checked(&self) -> bool {
        self.being_checked.load(Ordering::Acquire)
    }

    pub fn incr_ok(&self) -> u32 {
        self.ok_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn incr_fail(&self) -> u32 {
        self.fail_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn reset_ok(&self) {
        self.ok_count.store(0, Ordering::Release);
    }

    pub fn reset_fail(&self) {
        self.fail_count.store(0, Ordering::Release);
    }

    pub fn ok_count(&self) -> u32 {
        self.ok_count.load(Ordering::Acquire)
    }

    pub fn fail_count(&self) -> u32 {
        self.fail_count.load(Ordering::Acquire)
    }

    pub fn mock_valid(&self) -> bool {
        self.mock_valid.load(Ordering::Acquire)
    }

    pub fn set_mock_valid(&self, valid: bool) {
        self.mock_valid.store(valid, Ordering::Release);
    }
}

/// Statuses keyed by `namespace##service#cluster#ip:port`.
#[derive(Default)]
pub struct HealthStatusRegistry {
    statuses: DashMap<String, Arc<HealthCheckStatus>>,
}

impl HealthStatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(namespace_id: &str, service_name: &str, cluster: &str, ip_addr: &str) -> String {
        format!(
            "{}#{cluster}#{ip_addr}",
            keys::full_service_name(namespace_id, service_name)
        )
    }

    pub fn get_or_create(&self, key: &str) -> Arc<HealthCheckStatus> {
        self.statuses
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(HealthCheckStatus::default()))
            .clone()
    }

    pub fn get(&self, key: &str) -> Option<Arc<HealthCheckStatus>> {
        self.statuses.get(key).map(|status| status.clone())
    }

    pub fn remove(&self, key: &str) {
        self.statuses.remove(key);
    }

    /// Drop every status of a service.
    pub fn remove_service(&self, namespace_id: &str, service_name: &str) {
        let prefix = format!("{}#", keys::full_service_name(namespace_id, service_name));
        self.statuses.retain(|key, _| !key.starts_with(&prefix));
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }
}
