use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::manager::ServiceManager;
use crate::distro::protocol::{DistroTransport, ServiceHealth, ServiceHealthQuery, ServiceStatusReport};

/// Keeps health bits of services owned elsewhere in line with the owner.
///
/// Each node periodically tells its peers the checksum of every service it
/// is responsible for. A peer holding a different checksum for a service
/// the sender owns pulls the owner's health list and applies it.
pub struct ServiceStatusSynchronizer {
    manager: Arc<ServiceManager>,
    transport: Arc<dyn DistroTransport>,
}

impl ServiceStatusSynchronizer {
    pub fn new(manager: Arc<ServiceManager>, transport: Arc<dyn DistroTransport>) -> Arc<Self> {
        Arc::new(Self { manager, transport })
    }

    pub async fn start(self: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                let period = self
                    .manager
                    .switches()
                    .load()
                    .service_status_synchronization_period_millis;
                tokio::time::sleep(Duration::from_millis(period)).await;
                self.report().await;
            }
        });
        info!("Service status synchronizer started");
    }

    /// One report per namespace with the checksums of locally owned services.
    pub fn build_reports(&self) -> Vec<ServiceStatusReport> {
        let mapper = self.manager.mapper();
        self.manager
            .namespaces()
            .into_iter()
            .filter_map(|namespace_id| {
                let checksums: BTreeMap<String, String> = self
                    .manager
                    .get_all_service_names(&namespace_id)
                    .into_iter()
                    .filter(|name| mapper.responsible(name))
                    .filter_map(|name| {
                        let managed = self.manager.managed(&namespace_id, &name)?;
                        Some((name, managed.checksum()))
                    })
                    .collect();
                (!checksums.is_empty()).then(|| ServiceStatusReport {
                    source: mapper.local_address().to_string(),
                    namespace_id,
                    checksums,
                })
            })
            .collect()
    }

    pub async fn report(&self) {
        let mapper = self.manager.mapper();
        if mapper.is_standalone() {
            return;
        }
        let peers = mapper.peers();
        if peers.is_empty() {
            return;
        }

        for report in self.build_reports() {
            for peer in &peers {
                if let Err(e) = self.transport.sync_service_status(peer, &report).await {
                    warn!("[STATUS-SYNCHRONIZE] failed to report to {}: {}", peer, e);
                }
            }
        }
    }

    /// Services in `report` whose local checksum differs from the owner's.
    pub fn mismatched(&self, report: &ServiceStatusReport) -> Vec<String> {
        let mapper = self.manager.mapper();
        report
            .checksums
            .iter()
            .filter(|(name, checksum)| {
                let Some(managed) = self.manager.managed(&report.namespace_id, name) else {
                    return false;
                };
                if mapper.responsible(name) || mapper.map_srv(name) != report.source {
                    return false;
                }
                managed.checksum() != **checksum
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Pull health from the sender for every mismatched service.
    pub async fn on_receive(&self, report: ServiceStatusReport) {
        for service_name in self.mismatched(&report) {
            match self
                .pull_health(&report.source, &report.namespace_id, &service_name)
                .await
            {
                Ok(changed) => debug!(
                    "[STATUS-SYNCHRONIZE] {} health bits of {} taken from {}",
                    changed, service_name, report.source
                ),
                Err(e) => warn!(
                    "[STATUS-SYNCHRONIZE] failed to pull {} from {}: {}",
                    service_name, report.source, e
                ),
            }
        }
    }

    async fn pull_health(&self, source: &str, namespace_id: &str, service_name: &str) -> anyhow::Result<usize> {
        let query = ServiceHealthQuery {
            namespace_id: namespace_id.to_string(),
            service_name: service_name.to_string(),
        };
        let health = self.transport.fetch_service_health(source, &query).await?;
        let managed = self
            .manager
            .managed(namespace_id, service_name)
            .ok_or_else(|| anyhow::anyhow!("service {service_name} vanished"))?;
        Ok(managed.apply_health(&health.health))
    }

    /// Answer a peer asking for the health of a service.
    pub fn service_health(&self, namespace_id: &str, service_name: &str) -> Option<ServiceHealth> {
        let managed = self.manager.managed(namespace_id, service_name)?;
        Some(ServiceHealth {
            checksum: managed.checksum(),
            health: managed.health_map(),
        })
    }
}
