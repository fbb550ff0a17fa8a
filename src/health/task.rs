use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::reactor::CancelHandle;
use crate::config::switches::HealthParams;

const INITIAL_RT_BASE_MS: u64 = 2_000;

/// Active-probe schedule of one cluster.
///
/// The period between rounds is the normalized response time, which moves
/// toward what the probes observe and stays inside the checker's bounds.
#[derive(Debug)]
pub struct HealthCheckTask {
    pub namespace_id: String,
    pub service_name: String,
    pub cluster_name: String,
    check_rt_normalized: AtomicU64,
    check_rt_best: AtomicU64,
    check_rt_worst: AtomicU64,
    check_rt_last: AtomicU64,
    cancel: CancelHandle,
}

impl HealthCheckTask {
    pub fn new(
        namespace_id: impl Into<String>,
        service_name: impl Into<String>,
        cluster_name: impl Into<String>,
        tcp_params: HealthParams,
    ) -> Self {
        let spread = rand::thread_rng().gen_range(0..=tcp_params.max.max(1));
        let initial = INITIAL_RT_BASE_MS + rand::thread_rng().gen_range(0..=spread);
        Self {
            namespace_id: namespace_id.into(),
            service_name: service_name.into(),
            cluster_name: cluster_name.into(),
            check_rt_normalized: AtomicU64::new(initial),
            check_rt_best: AtomicU64::new(u64::MAX),
            check_rt_worst: AtomicU64::new(0),
            check_rt_last: AtomicU64::new(0),
            cancel: CancelHandle::new(),
        }
    }

    pub fn task_key(&self) -> String {
        format!("{}##{}#{}", self.namespace_id, self.service_name, self.cluster_name)
    }

    pub fn check_rt_normalized(&self) -> u64 {
        self.check_rt_normalized.load(Ordering::Acquire)
    }

    pub fn check_rt_best(&self) -> u64 {
        self.check_rt_best.load(Ordering::Acquire)
    }

    pub fn check_rt_worst(&self) -> u64 {
        self.check_rt_worst.load(Ordering::Acquire)
    }

    pub fn check_rt_last(&self) -> u64 {
        self.check_rt_last.load(Ordering::Acquire)
    }

    pub fn next_delay(&self) -> Duration {
        Duration::from_millis(self.check_rt_normalized())
    }

    /// Fold an observed response time into the schedule.
    pub fn re_evaluate_check_rt(&self, observed_ms: u64, params: &HealthParams) {
        self.check_rt_last.store(observed_ms, Ordering::Release);
        self.check_rt_worst.fetch_max(observed_ms, Ordering::AcqRel);
        self.check_rt_best.fetch_min(observed_ms, Ordering::AcqRel);

        let factor = f64::from(params.factor);
        let previous = self.check_rt_normalized() as f64;
        let blended = (factor * previous + (1.0 - factor) * observed_ms as f64) as u64;
        let clamped = blended.clamp(params.min, params.max.max(params.min));
        self.check_rt_normalized.store(clamped, Ordering::Release);
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
