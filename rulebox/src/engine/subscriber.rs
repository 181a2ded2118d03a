//! Applying control-plane events to the indexes.

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use rulebox_shared::{EngineError, EngineResult, Event, event::control};

use crate::keys;
use crate::locks::{CellRefGuard, CellStatus};

use super::engine_impl::{EngineImpl, SharedEngineImpl};

/// Parse `(rule name, box linkage)` out of the first key of a fragment.
fn rule_key_parts(fragment: &str) -> EngineResult<(String, Option<String>)> {
    let key = keys::first_key(fragment)
        .ok_or_else(|| EngineError::MalformedKey(fragment.to_string()))?;
    let name = keys::complex_value(&key, keys::FIELD_NAME)
        .ok_or_else(|| EngineError::MalformedKey(fragment.to_string()))?;
    let box_name = keys::complex_value(&key, keys::FIELD_BOX_NAME);
    Ok((name, box_name))
}

/// Parse the entity name out of the n-th key of a link fragment.
fn nth_name(fragment: &str, second: bool) -> EngineResult<String> {
    let key = if second {
        keys::second_key(fragment)
    } else {
        keys::first_key(fragment)
    };
    key.and_then(|key| keys::complex_value(&key, keys::FIELD_NAME))
        .ok_or_else(|| EngineError::MalformedKey(fragment.to_string()))
}

fn object_of(event: &Event) -> EngineResult<&str> {
    event
        .object
        .as_deref()
        .ok_or_else(|| EngineError::MalformedKey("control event without object".to_string()))
}

fn info_of(event: &Event) -> EngineResult<&str> {
    event
        .info
        .as_deref()
        .ok_or_else(|| EngineError::MalformedKey("control event without info".to_string()))
}

impl EngineImpl {
    /// Apply one control event to the indexes.
    ///
    /// Returns whether the event was applied; the flag feeds logging only,
    /// there is no retry. Errors never escape to the subscriber loop.
    pub fn handle_rule_event(&self, event: &Event) -> bool {
        let Some(event_type) = event.event_type.as_deref() else {
            return false;
        };
        let Some(cell_id) = event.cell_id.as_deref() else {
            return false;
        };

        // Pre-flight: a vanished cell leaves only cleanup to do; a cell under
        // bulk deletion is left alone entirely.
        match self.store.find_cell(cell_id) {
            Ok(Some(_)) => {}
            Ok(None) => {
                self.purge_cell(cell_id);
                return true;
            }
            Err(error) => {
                tracing::warn!(cell_id = %cell_id, error = %error, "Cell lookup failed, skipping control event");
                return false;
            }
        }
        if self.locks.status(cell_id) == CellStatus::BulkDeletion {
            return true;
        }
        let _cell_ref = CellRefGuard::new(self.locks.as_ref(), cell_id);

        let result = match event_type {
            control::RULE_CREATE => self.on_rule_create(cell_id, event),
            control::RULE_UPDATE | control::RULE_MERGE => self.on_rule_update(cell_id, event),
            control::RULE_DELETE => self.on_rule_delete(cell_id, event),
            control::RULE_LINK_BOX_CREATE | control::RULE_NAVPROP_BOX_CREATE => {
                self.on_rule_gains_box(cell_id, event)
            }
            control::RULE_LINK_BOX_DELETE => self.on_rule_loses_box(cell_id, event, false),
            control::BOX_LINK_RULE_CREATE => self.on_box_gains_rule(cell_id, event),
            control::BOX_NAVPROP_RULE_CREATE => self.on_rule_created_in_box(cell_id, event),
            control::BOX_LINK_RULE_DELETE => self.on_rule_loses_box(cell_id, event, true),
            control::BOX_UPDATE | control::BOX_MERGE => self.on_box_update(cell_id, event),
            control::CELL_IMPORT => self.on_cell_import(cell_id),
            _ => {
                tracing::trace!(event_type = %event_type, "Ignoring non-control event");
                return false;
            }
        };

        match result {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(
                    cell_id = %cell_id,
                    event_type = %event_type,
                    error = %error,
                    "Control event was not applied"
                );
                false
            }
        }
    }

    // ========================================================================
    // Per-type handlers
    // ========================================================================

    fn on_rule_create(&self, cell_id: &str, event: &Event) -> EngineResult<()> {
        let (name, box_name) = rule_key_parts(object_of(event)?)?;
        self.register_rule(cell_id, &name, box_name.as_deref())?;
        Ok(())
    }

    /// Replace a rule: the old key comes from `object`, the new one from
    /// `info`. The register step runs even when the old key was never
    /// indexed, so an update seen before its create is not dropped.
    fn on_rule_update(&self, cell_id: &str, event: &Event) -> EngineResult<()> {
        let (old_name, old_box) = rule_key_parts(object_of(event)?)?;
        if self
            .unregister_rule(cell_id, &old_name, old_box.as_deref())
            .is_none()
        {
            tracing::debug!(cell_id = %cell_id, rule = %old_name, "Updated rule was not indexed");
        }

        let (new_name, new_box) = rule_key_parts(info_of(event)?)?;
        self.register_rule(cell_id, &new_name, new_box.as_deref())?;
        Ok(())
    }

    fn on_rule_delete(&self, cell_id: &str, event: &Event) -> EngineResult<()> {
        let (name, box_name) = rule_key_parts(object_of(event)?)?;
        if self
            .unregister_rule(cell_id, &name, box_name.as_deref())
            .is_none()
        {
            tracing::debug!(cell_id = %cell_id, rule = %name, "Deleted rule was not indexed");
        }
        Ok(())
    }

    /// A rule was linked to a box (`Rule(...)/$links/Box(...)` order): drop
    /// its unlinked registration and re-read it under the compound key.
    fn on_rule_gains_box(&self, cell_id: &str, event: &Event) -> EngineResult<()> {
        let fragment = object_of(event)?;
        let rule_name = nth_name(fragment, false)?;
        let box_name = nth_name(fragment, true)?;

        self.unregister_rule(cell_id, &rule_name, None);
        self.register_rule(cell_id, &rule_name, Some(&box_name))?;
        Ok(())
    }

    /// A rule lost its box linkage. `box_first` flips the key order for the
    /// `Box(...)/$links/Rule(...)` form.
    fn on_rule_loses_box(&self, cell_id: &str, event: &Event, box_first: bool) -> EngineResult<()> {
        let fragment = object_of(event)?;
        let rule_name = nth_name(fragment, box_first)?;
        let box_name = nth_name(fragment, !box_first)?;

        self.unregister_rule(cell_id, &rule_name, Some(&box_name));
        self.register_rule(cell_id, &rule_name, None)?;
        Ok(())
    }

    /// An existing rule was linked through a box (`Box(...)` key first):
    /// drop its unlinked registration and re-read it under the compound key.
    fn on_box_gains_rule(&self, cell_id: &str, event: &Event) -> EngineResult<()> {
        let fragment = object_of(event)?;
        let box_name = nth_name(fragment, false)?;
        let rule_name = nth_name(fragment, true)?;

        self.unregister_rule(cell_id, &rule_name, None);
        self.register_rule(cell_id, &rule_name, Some(&box_name))?;
        Ok(())
    }

    /// A rule was created through a box's navigation (`Box(...)` key first).
    /// The rule is born linked, so there is no prior registration to drop;
    /// an unrelated unlinked rule of the same name must survive.
    fn on_rule_created_in_box(&self, cell_id: &str, event: &Event) -> EngineResult<()> {
        let fragment = object_of(event)?;
        let box_name = nth_name(fragment, false)?;
        let rule_name = nth_name(fragment, true)?;

        self.register_rule(cell_id, &rule_name, Some(&box_name))?;
        Ok(())
    }

    /// A box changed: re-read it by its new name and rewrite the shared entry
    /// in place, keyed by box id. Rules keep their registrations.
    fn on_box_update(&self, cell_id: &str, event: &Event) -> EngineResult<()> {
        let fragment = info_of(event)?;
        let box_name = nth_name(fragment, false)?;

        let Some(record) = self.store.find_box_by_name(cell_id, &box_name)? else {
            tracing::debug!(cell_id = %cell_id, box = %box_name, "Updated box not found in store");
            return Ok(());
        };
        if !self
            .index
            .update_box(cell_id, &record.id, &record.name, record.schema.as_deref())
        {
            tracing::debug!(cell_id = %cell_id, box = %box_name, "Updated box has no indexed entry");
        }
        Ok(())
    }

    /// A cell was imported: rebuild its slice of the index from the store.
    /// The swap is atomic, so concurrent dispatch never sees a partial merge
    /// of the old and new rule sets.
    fn on_cell_import(&self, cell_id: &str) -> EngineResult<()> {
        let loaded = self.reload_cell(cell_id)?;
        tracing::info!(cell_id = %cell_id, rules = loaded, "Reloaded cell after import");
        Ok(())
    }
}

/// Run the control-plane consumer until the subscription closes or a stop is
/// signalled. Single-tasked on purpose: parallel application would reorder
/// control events.
pub(crate) fn spawn_subscriber(
    inner: SharedEngineImpl,
    mut subscription: mpsc::UnboundedReceiver<Event>,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("Control-plane subscriber started");
        loop {
            tokio::select! {
                _ = stop.changed() => break,
                maybe_event = subscription.recv() => match maybe_event {
                    Some(event) => {
                        let applied = inner.handle_rule_event(&event);
                        tracing::debug!(
                            event_type = ?event.event_type,
                            applied,
                            "Consumed control event"
                        );
                    }
                    None => break,
                },
            }
        }
        tracing::info!("Control-plane subscriber stopped");
    })
}
