use arc_swap::ArcSwap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::switches::Switches;
use crate::membership::service::MemberChangeListener;
use crate::membership::types::ServerList;

/// 31-based string hash over UTF-16 code units with `i32` wrap-around,
/// folded into a non-negative value. Every node computes the same value for
/// the same name, whatever its platform.
pub fn distro_hash(name: &str) -> usize {
    let mut h: i32 = 0;
    for unit in name.encode_utf16() {
        h = h.wrapping_mul(31).wrapping_add(unit as i32);
    }
    (h % i32::MAX).unsigned_abs() as usize
}

/// Decides which server owns a service name.
///
/// The healthy list may contain an address more than once; each occurrence is
/// one slot, and a node owns every slot between its first and last occurrence.
pub struct DistroMapper {
    local: String,
    standalone: bool,
    healthy: ArcSwap<Vec<String>>,
    all: ArcSwap<Vec<String>>,
    switches: Arc<Switches>,
}

impl DistroMapper {
    pub fn new(local: impl Into<String>, standalone: bool, switches: Arc<Switches>) -> Arc<Self> {
        let local = local.into();
        Arc::new(Self {
            healthy: ArcSwap::from_pointee(vec![local.clone()]),
            all: ArcSwap::from_pointee(vec![local.clone()]),
            local,
            standalone,
            switches,
        })
    }

    pub fn local_address(&self) -> &str {
        &self.local
    }

    pub fn is_standalone(&self) -> bool {
        self.standalone
    }

    pub fn healthy_servers(&self) -> Arc<Vec<String>> {
        self.healthy.load_full()
    }

    pub fn all_servers(&self) -> Arc<Vec<String>> {
        self.all.load_full()
    }

    /// Healthy servers other than this one, without duplicates.
    pub fn peers(&self) -> Vec<String> {
        let mut peers: Vec<String> = self
            .healthy
            .load()
            .iter()
            .filter(|server| **server != self.local)
            .cloned()
            .collect();
        peers.dedup();
        peers
    }

    pub fn responsible(&self, service_name: &str) -> bool {
        if self.standalone || !self.switches.load().distro_enabled {
            return true;
        }

        let servers = self.healthy.load();
        if servers.is_empty() {
            return true;
        }

        let (Some(index), Some(last_index)) = (
            servers.iter().position(|s| *s == self.local),
            servers.iter().rposition(|s| *s == self.local),
        ) else {
            return true;
        };

        let target = distro_hash(service_name) % servers.len();
        index <= target && target <= last_index
    }

    /// Owner of `service_name`; this node when no server list is known.
    pub fn map_srv(&self, service_name: &str) -> String {
        let servers = self.healthy.load();
        if servers.is_empty() || !self.switches.load().distro_enabled {
            return self.local.clone();
        }
        servers[distro_hash(service_name) % servers.len()].clone()
    }

    /// Replace both lists. A healthy list that would drop below the distro
    /// threshold of the full list in one step is not taken.
    pub fn update(&self, mut all: Vec<String>, mut healthy: Vec<String>) {
        all.sort();
        healthy.sort();

        let threshold = self.switches.load().distro_threshold;
        let previous = self.healthy.load();
        let shrinking = healthy.len() < previous.len();
        if shrinking && !all.is_empty() && (healthy.len() as f32) < threshold * all.len() as f32 {
            warn!(
                "[DISTRO] healthy server list would shrink from {} to {} of {} (threshold {}), keeping previous list",
                previous.len(),
                healthy.len(),
                all.len(),
                threshold
            );
            self.all.store(Arc::new(all));
            return;
        }

        if **previous != healthy {
            info!("[DISTRO] healthy server list updated: {:?}", healthy);
        }
        self.all.store(Arc::new(all));
        self.healthy.store(Arc::new(healthy));
    }
}

impl MemberChangeListener for DistroMapper {
    fn on_member_change(&self, servers: &ServerList) {
        self.update(servers.all.clone(), servers.healthy.clone());
    }
}
