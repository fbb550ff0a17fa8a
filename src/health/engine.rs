use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

use super::HealthTarget;
use super::beat::{BeatAction, sweep_actions};
use super::common::HealthCheckCommon;
use super::processor::{HealthCheckProcessor, ProcessorDelegate};
use super::reactor::{CancelHandle, HealthCheckReactor};
use super::status::HealthStatusRegistry;
use super::task::HealthCheckTask;
use crate::config::HealthConfig;
use crate::config::switches::{HealthParams, Switches};
use crate::distro::mapper::DistroMapper;
use crate::model::cluster::Cluster;
use crate::model::instance::Instance;
use crate::model::types::{HealthCheckType, now_millis};

/// Owns the health machinery: probe processors, the bounded reactor, the
/// per-instance statuses and the hysteresis rules.
pub struct HealthEngine {
    common: HealthCheckCommon,
    processors: ProcessorDelegate,
    reactor: HealthCheckReactor,
    statuses: Arc<HealthStatusRegistry>,
    switches: Arc<Switches>,
    mapper: Arc<DistroMapper>,
    target: Weak<dyn HealthTarget>,
    config: HealthConfig,
}

impl HealthEngine {
    pub fn new(
        config: HealthConfig,
        switches: Arc<Switches>,
        mapper: Arc<DistroMapper>,
        target: Weak<dyn HealthTarget>,
    ) -> Arc<Self> {
        Self::with_processors(config, switches, mapper, target, ProcessorDelegate::default())
    }

    pub fn with_processors(
        config: HealthConfig,
        switches: Arc<Switches>,
        mapper: Arc<DistroMapper>,
        target: Weak<dyn HealthTarget>,
        processors: ProcessorDelegate,
    ) -> Arc<Self> {
        Arc::new(Self {
            common: HealthCheckCommon::new(switches.clone(), mapper.clone(), target.clone()),
            processors,
            reactor: HealthCheckReactor::new(config.worker_threads),
            statuses: Arc::new(HealthStatusRegistry::new()),
            switches,
            mapper,
            target,
            config,
        })
    }

    pub fn statuses(&self) -> &Arc<HealthStatusRegistry> {
        &self.statuses
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    fn params_for(&self, kind: HealthCheckType) -> HealthParams {
        let switches = self.switches.load();
        match kind {
            HealthCheckType::Http => switches.http_health_params,
            HealthCheckType::Mysql => switches.mysql_health_params,
            _ => switches.tcp_health_params,
        }
    }

    /// Periodic beat sweep of one service.
    pub fn start_beat_check(self: &Arc<Self>, namespace_id: &str, service_name: &str) -> CancelHandle {
        let engine = Arc::downgrade(self);
        let interval = self.config.beat_check_interval();
        let namespace_id = namespace_id.to_string();
        let service_name = service_name.to_string();
        let name = format!("beat:{namespace_id}##{service_name}");

        self.reactor.schedule(
            name,
            CancelHandle::new(),
            move || interval,
            move || {
                let engine = engine.clone();
                let namespace_id = namespace_id.clone();
                let service_name = service_name.clone();
                async move {
                    if let Some(engine) = engine.upgrade() {
                        engine.check_beats(&namespace_id, &service_name).await;
                    }
                }
            },
        )
    }

    /// Periodic active probing of one cluster.
    pub fn start_cluster_check(
        self: &Arc<Self>,
        namespace_id: &str,
        service_name: &str,
        cluster_name: &str,
    ) -> Arc<HealthCheckTask> {
        let task = Arc::new(HealthCheckTask::new(
            namespace_id,
            service_name,
            cluster_name,
            self.switches.load().tcp_health_params,
        ));
        let engine = Arc::downgrade(self);
        let delay_task = task.clone();
        let run_task = task.clone();

        self.reactor.schedule(
            task.task_key(),
            task.cancel_handle(),
            move || delay_task.next_delay(),
            move || {
                let engine = engine.clone();
                let task = run_task.clone();
                async move {
                    if let Some(engine) = engine.upgrade() {
                        engine.run_cluster_check(&task).await;
                    }
                }
            },
        );
        task
    }

    /// One probe round over the persistent instances of a cluster.
    pub async fn run_cluster_check(&self, task: &HealthCheckTask) {
        if !self.switches.load().health_check_enabled || !self.mapper.responsible(&task.service_name) {
            return;
        }
        let Some(target) = self.target.upgrade() else {
            return;
        };
        let Some(service) = target.service_snapshot(&task.namespace_id, &task.service_name) else {
            return;
        };
        let Some(cluster) = service.cluster_map.get(&task.cluster_name) else {
            return;
        };
        let kind = cluster.health_checker.kind();
        let Some(processor) = self.processors.get(kind) else {
            return;
        };
        let params = self.params_for(kind);

        let probes = cluster
            .all_ips_by(false)
            .into_iter()
            .filter(|instance| !instance.marked)
            .map(|instance| self.probe_one(task, cluster, instance, processor.clone(), params));
        futures::future::join_all(probes).await;
    }

    async fn probe_one(
        &self,
        task: &HealthCheckTask,
        cluster: &Cluster,
        instance: Instance,
        processor: Arc<dyn HealthCheckProcessor>,
        params: HealthParams,
    ) {
        let key = HealthStatusRegistry::key(
            &task.namespace_id,
            &task.service_name,
            &cluster.name,
            &instance.ip_addr(),
        );
        let status = self.statuses.get_or_create(&key);
        if !status.try_begin() {
            warn!(
                "[HEALTH-CHECK] {} is being checked, skipping this round",
                instance.ip_addr()
            );
            return;
        }

        let Some(_permit) = self.reactor.acquire().await else {
            status.finish();
            return;
        };

        let port = cluster.check_port(&instance);
        let result = processor
            .probe(&cluster.health_checker, &instance.ip, port, self.config.probe_timeout())
            .await;
        debug!(
            "[HEALTH-CHECK] {}:{} in {} -> {:?} ({})",
            instance.ip, port, task.cluster_name, result.outcome, result.msg
        );
        self.common.apply(task, &instance, &status, &result, &params);
    }

    /// One beat sweep: mark stale instances unhealthy and evict expired
    /// ephemeral ones. Only the responsible node acts.
    pub async fn check_beats(&self, namespace_id: &str, service_name: &str) {
        if !self.switches.load().health_check_enabled || !self.mapper.responsible(service_name) {
            return;
        }
        let Some(target) = self.target.upgrade() else {
            return;
        };
        let Some(service) = target.service_snapshot(namespace_id, service_name) else {
            return;
        };

        for (instance, action) in sweep_actions(&service, now_millis(), &self.config) {
            match action {
                BeatAction::MarkUnhealthy => {
                    if target.set_instance_health(
                        namespace_id,
                        service_name,
                        &instance.cluster_name,
                        &instance.ip_addr(),
                        false,
                    ) {
                        info!(
                            "{{POS}} {{IP-DISABLED}} valid: {}:{}@{}@{}, region: unknown, msg: client timeout after {}, last beat: {}",
                            instance.ip,
                            instance.port,
                            instance.cluster_name,
                            service_name,
                            instance.heart_beat_timeout(self.config.heart_beat_timeout_ms),
                            instance.last_beat.get()
                        );
                    }
                }
                BeatAction::Delete => {
                    info!(
                        "[AUTO-DELETE-IP] service: {}, ip: {}",
                        service_name,
                        instance.ip_addr()
                    );
                    let ip_addr = instance.ip_addr();
                    let cluster_name = instance.cluster_name.clone();
                    if let Err(e) = target.remove_expired(namespace_id, service_name, instance).await {
                        error!("[IP-DEAD] failed to delete ip automatically, ip: {}, error: {}", ip_addr, e);
                    } else {
                        self.statuses.remove(&HealthStatusRegistry::key(
                            namespace_id,
                            service_name,
                            &cluster_name,
                            &ip_addr,
                        ));
                    }
                }
            }
        }
    }

    /// Record a client beat. Returns `false` when the instance is unknown.
    pub fn handle_beat(&self, namespace_id: &str, service_name: &str, cluster: &str, ip: &str, port: u16) -> bool {
        let Some(target) = self.target.upgrade() else {
            return false;
        };
        let Some(service) = target.service_snapshot(namespace_id, service_name) else {
            return false;
        };
        let Some(instance) = service.find_instance(cluster, ip, port) else {
            return false;
        };

        instance.last_beat.touch();
        if !instance.marked && !instance.healthy {
            let ip_addr = instance.ip_addr();
            if target.set_instance_health(namespace_id, service_name, cluster, &ip_addr, true) {
                info!(
                    "serviceName: {} {{POS}} {{IP-ENABLED}} valid: {}@{}, msg: client beat ok",
                    service_name, ip_addr, cluster
                );
            }
        }
        true
    }

    /// Forget probe state of a removed service.
    pub fn forget_service(&self, namespace_id: &str, service_name: &str) {
        self.statuses.remove_service(namespace_id, service_name);
    }
}
