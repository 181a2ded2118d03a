//! Judging inbound events: match, build actions, submit, republish.

use rulebox_shared::{Event, event};

use crate::index::ActionInfo;
use crate::locks::{CellRefGuard, CellStatus};
use crate::matcher;
use crate::uri;

use super::engine_impl::EngineImpl;

impl EngineImpl {
    /// Match one inbound event against its cell's rules and queue the
    /// resulting actions.
    ///
    /// Returns once submissions are queued, not when they complete. Invalid
    /// input (no cell id, unknown cell) is a silent no-op. The rules lock is
    /// held only while building the action list; submission and the optional
    /// republish happen after release, so a slow action never blocks
    /// matching or control-plane updates.
    pub fn judge(&self, mut event: Event) {
        let Some(cell_id) = event.cell_id.clone() else {
            return;
        };
        let cell = match self.store.find_cell(&cell_id) {
            Ok(Some(cell)) => cell,
            Ok(None) => return,
            Err(error) => {
                tracing::warn!(cell_id = %cell_id, error = %error, "Cell lookup failed, dropping event");
                return;
            }
        };
        if self.locks.status(&cell_id) == CellStatus::BulkDeletion {
            tracing::debug!(cell_id = %cell_id, "Cell under bulk deletion, dropping event");
            return;
        }
        let _cell_ref = CellRefGuard::new(self.locks.as_ref(), &cell_id);

        if event.event_id.is_none() {
            event.event_id = Some(uuid::Uuid::new_v4().to_string());
        }

        // Advance the hop counter; past the ceiling (or unparseable) the
        // event produces no actions but still flows through to republish.
        let within_hop = match event.rule_chain.as_deref().unwrap_or("0").parse::<u32>() {
            Ok(hops) => {
                let advanced = hops.saturating_add(1);
                if advanced > self.options.max_event_hop {
                    tracing::debug!(cell_id = %cell_id, hops, "Hop ceiling reached, skipping match");
                    false
                } else {
                    event.rule_chain = Some(advanced.to_string());
                    true
                }
            }
            Err(_) => {
                tracing::warn!(
                    cell_id = %cell_id,
                    rule_chain = ?event.rule_chain,
                    "Unparseable rule chain, skipping match"
                );
                false
            }
        };

        let mut actions: Vec<ActionInfo> = Vec::new();
        if within_hop {
            let event_id = event.event_id.clone().unwrap_or_default();
            let rule_chain = event.rule_chain.clone().unwrap_or_default();

            self.index.for_each_rule(&cell_id, |rule| {
                if !matcher::rule_matches(rule, &event) {
                    return;
                }
                let service = match &rule.service {
                    Some(service) if service.starts_with(uri::SCHEME_LOCALBOX) => {
                        match &rule.box_ref {
                            Some(box_ref) => {
                                Some(uri::local_box_to_http(&cell.url, &box_ref.name(), service))
                            }
                            None => {
                                tracing::warn!(
                                    cell_id = %cell_id,
                                    rule = %rule.name,
                                    "Box-relative service without a resolved box, skipping action"
                                );
                                return;
                            }
                        }
                    }
                    Some(service) => Some(uri::local_cell_to_http(&cell.url, service)),
                    None => None,
                };
                actions.push(ActionInfo {
                    action: rule.action,
                    service,
                    event_id: event_id.clone(),
                    rule_chain: rule_chain.clone(),
                });
            });
        }

        // Locks released; put the event into its publishable form.
        if let Some(object) = event.object.take() {
            event.object = Some(uri::local_cell_to_http(&cell.url, &object));
        }
        if event.event_type.as_deref().is_some_and(event::is_timer_type)
            && !event
                .subject
                .as_deref()
                .is_some_and(|subject| subject.starts_with(&cell.url))
        {
            event.subject = None;
        }

        let queued = actions.len();
        for action in actions {
            self.workers.submit(event.clone(), action);
        }
        if queued > 0 {
            tracing::debug!(cell_id = %cell_id, actions = queued, "Queued actions");
        }

        if event.is_republishable()
            && let Err(error) = self.publisher.send(&event)
        {
            tracing::warn!(cell_id = %cell_id, error = %error, "Failed to republish control event");
        }
    }
}
