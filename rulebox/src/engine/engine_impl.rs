//! Shared engine state and index maintenance.

use std::sync::Arc;

use serde_json::{Value, json};

use rulebox_shared::{EngineError, EngineResult};

use crate::broker::EventPublisher;
use crate::config::EngineOptions;
use crate::index::{RuleIndex, RuleInfo};
use crate::locks::CellLockManager;
use crate::store::{CellStore, RuleRecord};
use crate::timer::{TimerRule, TimerSink};
use crate::workers::{ActionRunner, WorkerPool};

/// Shared engine state, cloned cheaply via `Arc`.
pub type SharedEngineImpl = Arc<EngineImpl>;

/// Engine internals shared by the dispatcher, the subscriber, and the loader.
///
/// All mutable state lives in [`RuleIndex`] behind its own locks; everything
/// else is immutable after construction or internally synchronized.
pub struct EngineImpl {
    pub(crate) options: EngineOptions,
    pub(crate) index: RuleIndex,
    pub(crate) store: Arc<dyn CellStore>,
    pub(crate) locks: Arc<dyn CellLockManager>,
    pub(crate) publisher: Arc<dyn EventPublisher>,
    pub(crate) workers: WorkerPool,
    /// Present only when timer routing is configured on.
    pub(crate) timer: Option<Arc<dyn TimerSink>>,
}

impl EngineImpl {
    /// Assemble the engine state.
    ///
    /// The timer sink is honored only when `timer_event_threads` is positive;
    /// otherwise it is discarded and never notified.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime context (the worker pool
    /// captures the runtime handle).
    pub fn new(
        options: EngineOptions,
        store: Arc<dyn CellStore>,
        locks: Arc<dyn CellLockManager>,
        publisher: Arc<dyn EventPublisher>,
        runner: Arc<dyn ActionRunner>,
        timer: Option<Arc<dyn TimerSink>>,
    ) -> SharedEngineImpl {
        let timer = if options.timer_event_threads > 0 {
            timer
        } else {
            None
        };
        let workers = WorkerPool::new(options.action_workers, runner);

        Arc::new(Self {
            options,
            index: RuleIndex::new(),
            store,
            locks,
            publisher,
            workers,
            timer,
        })
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Read a rule from the store by its compound key and index it.
    pub(crate) fn register_rule(
        &self,
        cell_id: &str,
        name: &str,
        box_name: Option<&str>,
    ) -> EngineResult<Arc<RuleInfo>> {
        let record = self
            .store
            .read_rule(cell_id, name, box_name)?
            .ok_or_else(|| {
                EngineError::Storage(format!(
                    "rule '{}' (box {:?}) not found in store",
                    name, box_name
                ))
            })?;
        self.register_record(cell_id, &record)
    }

    /// Index an already-read rule record, resolving its box from the store.
    pub(crate) fn register_record(
        &self,
        cell_id: &str,
        record: &RuleRecord,
    ) -> EngineResult<Arc<RuleInfo>> {
        let box_record = match &record.box_name {
            Some(box_name) => Some(
                self.store
                    .find_box_by_name(cell_id, box_name)?
                    .ok_or_else(|| {
                        EngineError::Registration(format!(
                            "rule '{}' references missing box '{}'",
                            record.name, box_name
                        ))
                    })?,
            ),
            None => None,
        };

        let rule = self.index.register(cell_id, record, box_record.as_ref())?;
        self.notify_timer(cell_id, &rule, true);
        Ok(rule)
    }

    /// Remove a rule from the index by name and box linkage.
    pub(crate) fn unregister_rule(
        &self,
        cell_id: &str,
        name: &str,
        box_name: Option<&str>,
    ) -> Option<Arc<RuleInfo>> {
        let removed = self.index.unregister(cell_id, name, box_name)?;
        self.notify_timer(cell_id, &removed, false);
        Some(removed)
    }

    /// Drop a cell's rules and boxes, mirroring removals to the timer sink.
    pub(crate) fn purge_cell(&self, cell_id: &str) {
        if self.timer.is_some() {
            let (rules, _) = self.index.snapshot(cell_id);
            for rule in &rules {
                self.notify_timer(cell_id, rule, false);
            }
        }
        self.index.purge_cell(cell_id);
    }

    pub(super) fn notify_timer(&self, cell_id: &str, rule: &RuleInfo, register: bool) {
        let Some(timer) = &self.timer else { return };
        if !rule.is_timer() {
            return;
        }
        let notification = TimerRule {
            name: rule.name.clone(),
            subject: rule.subject.clone(),
            event_type: rule.event_type.clone().unwrap_or_default(),
            object: rule.object.clone(),
            info: rule.info.clone(),
            cell_id: cell_id.to_string(),
            box_id: rule.box_ref.as_ref().map(|b| b.id().to_string()),
        };
        if register {
            timer.register(notification);
        } else {
            timer.unregister(notification);
        }
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Structured view of a cell's indexed rules and boxes.
    pub fn rules_document(&self, cell_id: &str) -> Value {
        let (rules, boxes) = self.index.snapshot(cell_id);

        let rules: Vec<Value> = rules
            .iter()
            .map(|rule| {
                json!({
                    "name": rule.name,
                    "external": rule.external,
                    "subject": rule.subject,
                    "type": rule.event_type,
                    "object": rule.object,
                    "info": rule.info,
                    "action": rule.action.as_str(),
                    "service": rule.service,
                    "boxname": rule.box_ref.as_ref().map(|b| b.name()),
                })
            })
            .collect();
        let boxes: Vec<Value> = boxes
            .iter()
            .map(|entry| {
                json!({
                    "id": entry.id(),
                    "name": entry.name(),
                    "schema": entry.schema(),
                    "refs": entry.refs(),
                })
            })
            .collect();

        let mut doc = json!({ "rules": rules, "boxes": boxes });
        if let Some(timer) = &self.timer {
            doc["timers"] = timer.timer_document(cell_id);
        }
        doc
    }
}

impl std::fmt::Debug for EngineImpl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineImpl")
            .field("options", &self.options)
            .finish()
    }
}
