use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::HealthConfig;
use crate::model::instance::Instance;
use crate::model::keys;
use crate::model::service::Service;

/// Heartbeat payload a client sends with every beat.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BeatInfo {
    pub ip: String,
    pub port: u16,
    pub cluster: String,
    pub service_name: String,
    pub weight: f64,
    pub ephemeral: bool,
    pub scheduled: bool,
    pub period: u64,
    pub metadata: BTreeMap<String, String>,
}

impl BeatInfo {
    pub fn cluster_or_default(&self) -> &str {
        if self.cluster.is_empty() {
            keys::DEFAULT_CLUSTER
        } else {
            &self.cluster
        }
    }

    /// Instance a beat registers when its target is missing.
    pub fn to_instance(&self) -> Instance {
        let mut instance = Instance::new(self.ip.clone(), self.port)
            .with_cluster(self.cluster_or_default())
            .with_ephemeral(true)
            .with_weight(if self.weight > 0.0 { self.weight } else { 1.0 });
        instance.metadata = self.metadata.clone();
        instance.service_name = self.service_name.clone();
        instance.normalize();
        instance
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeatAction {
    MarkUnhealthy,
    Delete,
}

/// What one beat sweep should do to a service's instances.
///
/// Ephemeral instances are always beat-driven. Persistent instances are
/// beat-driven only in clusters without an active checker, and are never
/// deleted. Marked instances are left alone.
pub fn sweep_actions(service: &Service, now: u64, config: &HealthConfig) -> Vec<(Instance, BeatAction)> {
    let mut actions = Vec::new();

    for cluster in service.cluster_map.values() {
        let actively_checked = cluster.health_checker.is_active();
        for instance in cluster.all_ips() {
            if instance.marked || (!instance.ephemeral && actively_checked) {
                continue;
            }

            let elapsed = now.saturating_sub(instance.last_beat.get());
            if instance.ephemeral && elapsed > instance.ip_delete_timeout(config.ip_delete_timeout_ms) {
                actions.push((instance, BeatAction::Delete));
            } else if instance.healthy && elapsed > instance.heart_beat_timeout(config.heart_beat_timeout_ms) {
                actions.push((instance, BeatAction::MarkUnhealthy));
            }
        }
    }

    actions
}
