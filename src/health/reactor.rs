use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Cooperative cancellation flag checked before every run of a task.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Schedules recurring health jobs and bounds how many probes run at once.
pub struct HealthCheckReactor {
    permits: Arc<Semaphore>,
}

impl HealthCheckReactor {
    pub fn new(workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Wait for a probe slot.
    pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        self.permits.clone().acquire_owned().await.ok()
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `job` after `next_delay()` again and again until cancelled.
    /// The delay is asked for before every run, so a job can stretch or
    /// shrink its own period.
    pub fn schedule<D, J, Fut>(&self, name: String, handle: CancelHandle, next_delay: D, job: J) -> CancelHandle
    where
        D: Fn() -> Duration + Send + 'static,
        J: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = handle.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(next_delay()).await;
                if cancel.is_cancelled() {
                    debug!("[HEALTH-CHECK] task {} cancelled", name);
                    return;
                }
                job().await;
            }
        });
        handle
    }
}
