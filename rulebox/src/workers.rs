//! Bounded worker pool for action tasks.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;

use rulebox_shared::Event;

use crate::index::ActionInfo;

/// Executes one matched action.
///
/// Implementations do the actual `exec`/`relay`/`log` work (HTTP calls,
/// script execution); the engine only schedules them. A runner must tolerate
/// being invoked concurrently with itself.
#[async_trait]
pub trait ActionRunner: Send + Sync {
    async fn run(&self, event: Event, action: ActionInfo);
}

/// Schedules action tasks on the shared tokio runtime, at most `width` at a
/// time.
///
/// Submission never blocks: tasks over the width wait on the pool semaphore
/// inside their own task. Tasks run concurrently with no ordering guarantee;
/// outstanding tasks are not awaited at engine shutdown.
pub struct WorkerPool {
    handle: Handle,
    permits: Arc<Semaphore>,
    runner: Arc<dyn ActionRunner>,
}

impl WorkerPool {
    /// Create a pool of the given width.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime context.
    pub fn new(width: usize, runner: Arc<dyn ActionRunner>) -> Self {
        Self {
            handle: Handle::current(),
            permits: Arc::new(Semaphore::new(width.max(1))),
            runner,
        }
    }

    /// Queue one action task. Returns as soon as the task is spawned.
    pub fn submit(&self, event: Event, action: ActionInfo) {
        let permits = Arc::clone(&self.permits);
        let runner = Arc::clone(&self.runner);
        self.handle.spawn(async move {
            // Closed only if the pool's semaphore is dropped mid-shutdown;
            // the task is then abandoned with the rest of the pool.
            if let Ok(_permit) = permits.acquire_owned().await {
                runner.run(event, action).await;
            }
        });
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("available", &self.permits.available_permits())
            .finish()
    }
}
