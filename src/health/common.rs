use std::sync::{Arc, Weak};
use tracing::info;

use super::HealthTarget;
use super::processor::{ProbeOutcome, ProbeResult};
use super::status::HealthCheckStatus;
use super::task::HealthCheckTask;
use crate::config::switches::{HealthParams, Switches};
use crate::distro::mapper::DistroMapper;
use crate::model::instance::Instance;

/// Hysteresis shared by every active checker.
///
/// A probe result moves the ok/fail counters; only after `checkTimes`
/// consecutive results in the same direction does the instance flip. The
/// replicated health bit is written only by the node responsible for the
/// service; other nodes keep their observation in `mock_valid`.
pub struct HealthCheckCommon {
    switches: Arc<Switches>,
    mapper: Arc<DistroMapper>,
    target: Weak<dyn HealthTarget>,
}

impl HealthCheckCommon {
    pub fn new(switches: Arc<Switches>, mapper: Arc<DistroMapper>, target: Weak<dyn HealthTarget>) -> Self {
        Self {
            switches,
            mapper,
            target,
        }
    }

    fn write_health(&self, task: &HealthCheckTask, instance: &Instance, healthy: bool) -> bool {
        match self.target.upgrade() {
            Some(target) => target.set_instance_health(
                &task.namespace_id,
                &task.service_name,
                &task.cluster_name,
                &instance.ip_addr(),
                healthy,
            ),
            None => false,
        }
    }

    pub fn check_ok(&self, task: &HealthCheckTask, instance: &Instance, status: &HealthCheckStatus, msg: &str) {
        if !instance.healthy || !status.mock_valid() {
            let ok_count = status.incr_ok();
            if ok_count >= self.switches.load().check_times {
                if self.mapper.responsible(&task.service_name) {
                    status.set_mock_valid(true);
                    self.write_health(task, instance, true);
                    info!(
                        "serviceName: {} {{POS}} {{IP-ENABLED}} valid: {}@{}, msg: {}",
                        task.service_name,
                        instance.ip_addr(),
                        task.cluster_name,
                        msg
                    );
                } else if !status.mock_valid() {
                    status.set_mock_valid(true);
                    info!(
                        "serviceName: {} {{PROBE}} {{IP-ENABLED}} valid: {}@{}, msg: {}",
                        task.service_name,
                        instance.ip_addr(),
                        task.cluster_name,
                        msg
                    );
                }
            } else {
                info!(
                    "serviceName: {} {{OTHER}} {{IP-ENABLED}} pre-valid: {}@{} in {}, msg: {}",
                    task.service_name,
                    instance.ip_addr(),
                    task.cluster_name,
                    ok_count,
                    msg
                );
            }
        }

        status.reset_fail();
        status.finish();
    }

    pub fn check_fail(&self, task: &HealthCheckTask, instance: &Instance, status: &HealthCheckStatus, msg: &str) {
        if instance.healthy || status.mock_valid() {
            let fail_count = status.incr_fail();
            if fail_count >= self.switches.load().check_times {
                if self.mapper.responsible(&task.service_name) {
                    status.set_mock_valid(false);
                    self.write_health(task, instance, false);
                    info!(
                        "serviceName: {} {{POS}} {{IP-DISABLED}} invalid: {}@{}, msg: {}",
                        task.service_name,
                        instance.ip_addr(),
                        task.cluster_name,
                        msg
                    );
                } else {
                    info!(
                        "serviceName: {} {{PROBE}} {{IP-DISABLED}} invalid: {}@{}, msg: {}",
                        task.service_name,
                        instance.ip_addr(),
                        task.cluster_name,
                        msg
                    );
                }
            } else {
                info!(
                    "serviceName: {} {{OTHER}} {{IP-DISABLED}} pre-invalid: {}@{} in {}, msg: {}",
                    task.service_name,
                    instance.ip_addr(),
                    task.cluster_name,
                    fail_count,
                    msg
                );
            }
        }

        status.reset_ok();
        status.finish();
    }

    pub fn check_fail_now(
        &self,
        task: &HealthCheckTask,
        instance: &Instance,
        status: &HealthCheckStatus,
        msg: &str,
    ) {
        if instance.healthy || status.mock_valid() {
            if self.mapper.responsible(&task.service_name) {
                status.set_mock_valid(false);
                self.write_health(task, instance, false);
                info!(
                    "serviceName: {} {{POS}} {{IP-DISABLED}} invalid-now: {}@{}, msg: {}",
                    task.service_name,
                    instance.ip_addr(),
                    task.cluster_name,
                    msg
                );
            } else if status.mock_valid() {
                status.set_mock_valid(false);
                info!(
                    "serviceName: {} {{PROBE}} {{IP-DISABLED}} invalid-now: {}@{}, msg: {}",
                    task.service_name,
                    instance.ip_addr(),
                    task.cluster_name,
                    msg
                );
            }
        }

        status.reset_ok();
        status.finish();
    }

    /// Feed one probe result through the counters and the RT schedule.
    pub fn apply(
        &self,
        task: &HealthCheckTask,
        instance: &Instance,
        status: &HealthCheckStatus,
        result: &ProbeResult,
        params: &HealthParams,
    ) {
        match result.outcome {
            ProbeOutcome::Ok => self.check_ok(task, instance, status, &result.msg),
            ProbeOutcome::Fail => self.check_fail(task, instance, status, &result.msg),
            ProbeOutcome::FailNow => self.check_fail_now(task, instance, status, &result.msg),
        }

        // a timed-out probe says the target is at least twice as slow as usual
        let observed = result
            .rt
            .map(|rt| rt.as_millis() as u64)
            .unwrap_or_else(|| task.check_rt_normalized() * 2);
        task.re_evaluate_check_rt(observed, params);
    }
}
