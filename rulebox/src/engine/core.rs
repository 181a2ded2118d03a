//! Engine facade and process-wide lifecycle.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use rulebox_shared::{EngineError, EngineResult, Event};

use crate::broker::EventPublisher;
use crate::config::EngineOptions;
use crate::locks::CellLockManager;
use crate::store::CellStore;
use crate::timer::TimerSink;
use crate::workers::ActionRunner;

use super::engine_impl::{EngineImpl, SharedEngineImpl};
use super::subscriber::spawn_subscriber;

/// Grace period for the subscriber task at shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

// ============================================================================
// PROCESS-WIDE SLOT
// ============================================================================

/// Explicitly installed process-wide engine.
///
/// Filled by [`RuleEngine::install`] at startup and cleared by
/// [`RuleEngine::shutdown_global`]; there is no lazy initialization.
static GLOBAL_ENGINE: Mutex<Option<Arc<RuleEngine>>> = Mutex::new(None);

// ============================================================================
// PUBLIC API
// ============================================================================

/// The rule engine: a live-updated, per-cell index of rules with matching,
/// action dispatch, and control-plane replay.
///
/// Construction performs the full initialization: the index is loaded from
/// the store and the control-plane subscriber is running before `new`
/// returns. All methods are safe to call from any thread; `judge` returns as
/// soon as its action submissions are queued.
pub struct RuleEngine {
    inner: SharedEngineImpl,
    stop: watch::Sender<bool>,
    subscriber: Mutex<Option<JoinHandle<()>>>,
}

impl RuleEngine {
    /// Build and start an engine.
    ///
    /// `subscription` is the control-plane feed (for in-process wiring, the
    /// receiver half of [`LocalBroker::channel`](crate::broker::LocalBroker));
    /// `publisher` carries republished control events back out. The timer
    /// sink is honored only when `options.timer_event_threads` is positive.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime context.
    pub fn new(
        options: EngineOptions,
        store: Arc<dyn CellStore>,
        locks: Arc<dyn CellLockManager>,
        publisher: Arc<dyn EventPublisher>,
        runner: Arc<dyn ActionRunner>,
        timer: Option<Arc<dyn TimerSink>>,
        subscription: mpsc::UnboundedReceiver<Event>,
    ) -> Arc<Self> {
        let inner = EngineImpl::new(options, store, locks, publisher, runner, timer);
        inner.load();

        let (stop, stop_rx) = watch::channel(false);
        let subscriber = spawn_subscriber(Arc::clone(&inner), subscription, stop_rx);
        tracing::info!(topic = %inner.options.rule_topic, "Rule engine started");

        Arc::new(Self {
            inner,
            stop,
            subscriber: Mutex::new(Some(subscriber)),
        })
    }

    /// Install an engine as the process-wide instance.
    ///
    /// Fails if one is already installed; shut it down first.
    pub fn install(engine: Arc<RuleEngine>) -> EngineResult<()> {
        let mut slot = GLOBAL_ENGINE.lock();
        if slot.is_some() {
            return Err(EngineError::Internal(
                "a rule engine is already installed".to_string(),
            ));
        }
        *slot = Some(engine);
        Ok(())
    }

    /// The installed process-wide engine, if any.
    pub fn global() -> Option<Arc<RuleEngine>> {
        GLOBAL_ENGINE.lock().clone()
    }

    /// Shut down and clear the process-wide engine. A later [`install`]
    /// starts fresh.
    ///
    /// [`install`]: RuleEngine::install
    pub async fn shutdown_global() {
        let engine = GLOBAL_ENGINE.lock().take();
        if let Some(engine) = engine {
            engine.shutdown().await;
        }
    }

    // ========================================================================
    // DISPATCH AND CONTROL (delegate to EngineImpl)
    // ========================================================================

    /// Match an inbound event and queue its actions. See
    /// [`EngineImpl::judge`].
    pub fn judge(&self, event: Event) {
        self.inner.judge(event);
    }

    /// Apply one control event; the returned flag feeds logging only.
    pub fn handle_rule_event(&self, event: &Event) -> bool {
        self.inner.handle_rule_event(event)
    }

    /// Structured view of a cell's indexed rules and boxes (inspection).
    pub fn rules_document(&self, cell_id: &str) -> serde_json::Value {
        self.inner.rules_document(cell_id)
    }

    /// Number of rules currently indexed for a cell (inspection).
    pub fn rule_count(&self, cell_id: &str) -> usize {
        self.inner.index.rule_count(cell_id)
    }

    /// Refcount of an indexed box entry, if present (inspection).
    pub fn box_refcount(&self, cell_id: &str, box_id: &str) -> Option<u64> {
        self.inner.index.box_refcount(cell_id, box_id)
    }

    // ========================================================================
    // SHUTDOWN
    // ========================================================================

    /// Stop the engine: close the publisher, shut the timer sink down, and
    /// stop the subscriber, aborting it after a 1 s grace period.
    ///
    /// Outstanding action tasks are not awaited.
    pub async fn shutdown(&self) {
        self.inner.publisher.close();
        if let Some(timer) = &self.inner.timer {
            timer.shutdown();
        }

        let _ = self.stop.send(true);
        let subscriber = self.subscriber.lock().take();
        if let Some(mut subscriber) = subscriber {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut subscriber).await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    tracing::warn!(error = %error, "Subscriber task ended abnormally");
                }
                Err(_) => {
                    tracing::warn!("Subscriber did not stop in time, aborting");
                    subscriber.abort();
                }
            }
        }
        tracing::info!("Rule engine stopped");
    }
}

impl std::fmt::Debug for RuleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleEngine").finish()
    }
}

// ============================================================================
// THREAD SAFETY ASSERTIONS
// ============================================================================

// Compile-time assertion that the engine can be shared across threads.
const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    let _ = assert_send_sync::<RuleEngine>;
};
