//! Registry Module
//!
//! The in-memory service registry and everything that mutates it.
//!
//! ## Core Concepts
//! - [`manager::ServiceManager`]: namespace → service map. Writes compute the
//!   next instance list, hand it to the consistency layer and let the
//!   resulting change callback update the in-memory model, so local and
//!   replicated writes take the same path.
//! - [`entry::ManagedService`]: one service plus its lock discipline. It is
//!   the [`crate::consistency::RecordListener`] for its two instance-list keys.
//! - [`view::ServiceView`]: what discovery reads return, after selector,
//!   health (with protect threshold) and enabled filtering.
//! - [`operator::InstanceOperator`]: the client-facing write strategy, either
//!   direct (`v1`) or client-tracked (`v2`), picked once at startup.

pub mod client;
pub mod entry;
pub mod manager;
pub mod metrics;
pub mod operator;
pub mod status_sync;
pub mod switch_manager;
pub mod view;


pub use entry::ManagedService;
pub use manager::ServiceManager;
pub use view::ServiceView;

/// Receives a call whenever the visible state of a service changes.
pub trait ServiceChangeListener: Send + Sync {
    fn service_changed(&self, namespace_id: &str, service_name: &str);
}
