use serde::{Deserialize, Serialize};

use super::manager::ServiceManager;
use super::operator::InstanceOperator;
use crate::push::PushService;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub status: String,
    pub service_count: usize,
    pub instance_count: usize,
    pub subscribe_count: usize,
    pub client_count: usize,
    pub responsible_service_count: usize,
    pub responsible_instance_count: usize,
    pub cpu: usize,
    pub load: f64,
    pub mem: f64,
    pub total_push: u64,
    pub failed_push: u64,
}

pub fn collect(
    status: &str,
    manager: &ServiceManager,
    operator: &dyn InstanceOperator,
    push: &PushService,
) -> MetricsSnapshot {
    MetricsSnapshot {
        status: status.to_string(),
        service_count: manager.service_count(),
        instance_count: manager.instance_count(),
        subscribe_count: push.subscriber_count(),
        client_count: operator.client_count(),
        responsible_service_count: manager.responsible_service_count(),
        responsible_instance_count: manager.responsible_instance_count(),
        cpu: num_cpus::get(),
        load: load_average(),
        mem: memory_usage(),
        total_push: push.total_push(),
        failed_push: push.failed_push(),
    }
}

fn load_average() -> f64 {
    std::fs::read_to_string("/proc/loadavg")
        .ok()
        .and_then(|text| parse_loadavg(&text))
        .unwrap_or(0.0)
}

fn memory_usage() -> f64 {
    std::fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|text| parse_meminfo(&text))
        .unwrap_or(0.0)
}

/// 1-minute load average.
pub fn parse_loadavg(text: &str) -> Option<f64> {
    text.split_whitespace().next()?.parse().ok()
}

/// Used fraction of memory, `1 - MemAvailable / MemTotal`.
pub fn parse_meminfo(text: &str) -> Option<f64> {
    let field = |name: &str| -> Option<f64> {
        text.lines()
            .find(|line| line.starts_with(name))?
            .split_whitespace()
            .nth(1)?
            .parse()
            .ok()
    };
    let total = field("MemTotal:")?;
    let available = field("MemAvailable:")?;
    (total > 0.0).then(|| 1.0 - available / total)
}
