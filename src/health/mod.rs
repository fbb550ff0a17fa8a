//! Health Module
//!
//! Decides whether instances are alive. Two independent drivers feed the
//! same health bit:
//!
//! - **Client beats**: every beat refreshes `lastBeat` and revives an
//!   unhealthy instance. A per-service sweep marks instances whose beat is
//!   older than their heartbeat timeout unhealthy and evicts ephemeral ones
//!   past the delete timeout.
//! - **Active probes**: per-cluster TCP, HTTP or MySQL checks, run on the
//!   node responsible for the service, with ok/fail hysteresis so one lost
//!   probe does not flap an instance.
//!
//! ## Core Concepts
//! - [`HealthTarget`]: the seam to the registry. The engine reads service
//!   snapshots through it and writes health changes back; the registry
//!   recomputes checksums and pushes.
//! - [`status::HealthCheckStatus`]: probe counters and the "being checked"
//!   claim, kept beside the model rather than inside it.
//! - [`reactor::HealthCheckReactor`]: recurring jobs with cooperative
//!   cancellation and a semaphore bounding probes in flight.

pub mod beat;
pub mod common;
pub mod engine;
pub mod processor;
pub mod reactor;
pub mod status;
pub mod task;


use async_trait::async_trait;

use crate::error::Result;
use crate::model::instance::Instance;
use crate::model::service::Service;

pub use engine::HealthEngine;
pub use reactor::CancelHandle;

#[async_trait]
pub trait HealthTarget: Send + Sync {
    /// Current state of a service, instances included.
    fn service_snapshot(&self, namespace_id: &str, service_name: &str) -> Option<Service>;

    /// Write one instance's health bit. Returns whether it changed.
    fn set_instance_health(
        &self,
        namespace_id: &str,
        service_name: &str,
        cluster: &str,
        ip_addr: &str,
        healthy: bool,
    ) -> bool;

    /// Deregister an ephemeral instance whose beats stopped.
    async fn remove_expired(&self, namespace_id: &str, service_name: &str, instance: Instance) -> Result<()>;
}
