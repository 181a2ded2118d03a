//! The authoritative in-memory rule and box indexes.
//!
//! Two per-cell maps guarded by two distinct mutexes: rules by compound rule
//! key, and shared box entries by box id. When both locks are needed the
//! rules lock is acquired first, then the boxes lock, never the reverse.
//! Box `name`/`schema` reads go through each entry's own lock (the `Arc` is
//! pinned by the referencing rule), so matching never retakes the boxes-map
//! lock; map membership and refcounts stay under it.
//!
//! Neither lock is ever held across store reads, broker sends, or task
//! submission.

mod types;

pub use types::{Action, ActionInfo, BoxEntry, RuleInfo, rule_key};

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use rulebox_shared::{EngineError, EngineResult};

use crate::store::{BoxRecord, RuleRecord};

type CellRules = HashMap<String, Arc<RuleInfo>>;
type CellBoxes = HashMap<String, Arc<BoxEntry>>;

/// Per-cell index of active rules and their shared box entries.
#[derive(Debug, Default)]
pub struct RuleIndex {
    rules: Mutex<HashMap<String, CellRules>>,
    boxes: Mutex<HashMap<String, CellBoxes>>,
}

impl RuleIndex {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Insert a rule, resolving its box linkage to a shared entry.
    ///
    /// A rule that declares a box linkage must come with the box's stored
    /// record; registration fails otherwise and the index is left unchanged.
    /// Registering over an existing key overwrites it and releases the old
    /// entry's box reference.
    pub fn register(
        &self,
        cell_id: &str,
        record: &RuleRecord,
        box_record: Option<&BoxRecord>,
    ) -> EngineResult<Arc<RuleInfo>> {
        if record.box_name.is_some() && box_record.is_none() {
            return Err(EngineError::Registration(format!(
                "rule '{}' references unresolvable box '{}'",
                record.name,
                record.box_name.as_deref().unwrap_or_default()
            )));
        }

        // Validate before touching any refcount.
        let mut rule = RuleInfo::from_record(record, None)?;
        rule.box_ref = box_record.map(|b| self.attach_box(cell_id, b));
        let key = rule.key();
        let rule = Arc::new(rule);

        let previous = {
            let mut rules = self.rules.lock();
            rules
                .entry(cell_id.to_string())
                .or_default()
                .insert(key.clone(), Arc::clone(&rule))
        };

        if let Some(previous) = previous {
            tracing::debug!(cell_id = %cell_id, rule_key = %key, "Overwrote indexed rule");
            if let Some(old_box) = &previous.box_ref {
                self.release_box(cell_id, old_box);
            }
        } else {
            tracing::debug!(cell_id = %cell_id, rule_key = %key, "Indexed rule");
        }

        Ok(rule)
    }

    /// Remove a rule by name and declared box linkage.
    ///
    /// Returns the removed rule, releasing its box reference; the box entry
    /// disappears with its last referencing rule.
    pub fn unregister(
        &self,
        cell_id: &str,
        name: &str,
        box_name: Option<&str>,
    ) -> Option<Arc<RuleInfo>> {
        let box_id = match box_name {
            Some(box_name) => match self.box_id_by_name(cell_id, box_name) {
                Some(id) => Some(id),
                // Unknown box: no rule can be indexed under that key.
                None => return None,
            },
            None => None,
        };
        let key = rule_key(name, box_id.as_deref());

        let removed = {
            let mut rules = self.rules.lock();
            let cell = rules.get_mut(cell_id)?;
            let removed = cell.remove(&key);
            if cell.is_empty() {
                rules.remove(cell_id);
            }
            removed
        }?;

        if let Some(box_ref) = &removed.box_ref {
            self.release_box(cell_id, box_ref);
        }
        tracing::debug!(cell_id = %cell_id, rule_key = %key, "Removed indexed rule");
        Some(removed)
    }

    /// Drop every rule and box entry of a cell.
    pub fn purge_cell(&self, cell_id: &str) {
        let rules = self.rules.lock().remove(cell_id).map_or(0, |m| m.len());
        let boxes = self.boxes.lock().remove(cell_id).map_or(0, |m| m.len());
        if rules > 0 || boxes > 0 {
            tracing::info!(cell_id = %cell_id, rules, boxes, "Purged cell from index");
        }
    }

    /// Atomically replace a cell's slice of the index.
    ///
    /// Staged records are validated and wired to fresh box entries outside
    /// the locks; the two per-cell maps are then swapped in one critical
    /// section, so a concurrent reader sees the old set or the new set,
    /// never a mix. Records that fail validation are logged and skipped.
    /// Returns the rules that made it in.
    pub fn replace_cell(
        &self,
        cell_id: &str,
        staged: Vec<(RuleRecord, Option<BoxRecord>)>,
    ) -> Vec<Arc<RuleInfo>> {
        let mut new_rules: CellRules = HashMap::new();
        let mut new_boxes: CellBoxes = HashMap::new();

        for (record, box_record) in &staged {
            if record.box_name.is_some() && box_record.is_none() {
                tracing::warn!(
                    cell_id = %cell_id,
                    rule = %record.name,
                    "Skipping rule with unresolvable box"
                );
                continue;
            }
            let mut rule = match RuleInfo::from_record(record, None) {
                Ok(rule) => rule,
                Err(error) => {
                    tracing::warn!(cell_id = %cell_id, rule = %record.name, error = %error, "Skipping rule");
                    continue;
                }
            };
            if let Some(box_record) = box_record {
                let entry = new_boxes.entry(box_record.id.clone()).or_insert_with(|| {
                    Arc::new(BoxEntry::new(
                        &box_record.id,
                        &box_record.name,
                        box_record.schema.as_deref(),
                    ))
                });
                entry.inc_refs();
                rule.box_ref = Some(Arc::clone(entry));
            }
            if let Some(previous) = new_rules.insert(rule.key(), Arc::new(rule))
                && let Some(old_box) = &previous.box_ref
                && old_box.dec_refs() == 0
            {
                new_boxes.remove(old_box.id());
            }
        }

        let registered: Vec<Arc<RuleInfo>> = new_rules.values().cloned().collect();

        // Swap both maps in one critical section (rules, then boxes).
        let mut rules = self.rules.lock();
        let mut boxes = self.boxes.lock();
        if new_rules.is_empty() {
            rules.remove(cell_id);
        } else {
            rules.insert(cell_id.to_string(), new_rules);
        }
        if new_boxes.is_empty() {
            boxes.remove(cell_id);
        } else {
            boxes.insert(cell_id.to_string(), new_boxes);
        }
        tracing::info!(cell_id = %cell_id, rules = registered.len(), "Replaced cell in index");
        registered
    }

    /// Rewrite a shared box entry's name and schema in place, keyed by box
    /// id. Every rule referencing the entry sees the new values immediately.
    pub fn update_box(
        &self,
        cell_id: &str,
        box_id: &str,
        name: &str,
        schema: Option<&str>,
    ) -> bool {
        let boxes = self.boxes.lock();
        match boxes.get(cell_id).and_then(|cell| cell.get(box_id)) {
            Some(entry) => {
                entry.update_attrs(name, schema);
                tracing::debug!(cell_id = %cell_id, box_id = %box_id, name = %name, "Updated box entry");
                true
            }
            None => false,
        }
    }

    // ========================================================================
    // Read access
    // ========================================================================

    /// Run `f` over each rule of a cell while holding the rules lock.
    ///
    /// `f` must not call back into the index and must not block; the caller
    /// collects its matches and does all I/O after this returns.
    pub fn for_each_rule<F>(&self, cell_id: &str, mut f: F)
    where
        F: FnMut(&Arc<RuleInfo>),
    {
        let rules = self.rules.lock();
        if let Some(cell) = rules.get(cell_id) {
            for rule in cell.values() {
                f(rule);
            }
        }
    }

    /// Snapshot a cell's rules and box entries (inspection only).
    pub fn snapshot(&self, cell_id: &str) -> (Vec<Arc<RuleInfo>>, Vec<Arc<BoxEntry>>) {
        let rules = {
            let rules = self.rules.lock();
            rules
                .get(cell_id)
                .map(|cell| cell.values().cloned().collect())
                .unwrap_or_default()
        };
        let boxes = {
            let boxes = self.boxes.lock();
            boxes
                .get(cell_id)
                .map(|cell| cell.values().cloned().collect())
                .unwrap_or_default()
        };
        (rules, boxes)
    }

    /// Number of rules indexed for a cell.
    pub fn rule_count(&self, cell_id: &str) -> usize {
        self.rules.lock().get(cell_id).map_or(0, |cell| cell.len())
    }

    /// Refcount of a box entry, if present.
    pub fn box_refcount(&self, cell_id: &str, box_id: &str) -> Option<u64> {
        self.boxes
            .lock()
            .get(cell_id)
            .and_then(|cell| cell.get(box_id))
            .map(|entry| entry.refs())
    }

    // ========================================================================
    // Internal
    // ========================================================================

    /// Resolve or create the shared entry for a box and take a reference.
    fn attach_box(&self, cell_id: &str, record: &BoxRecord) -> Arc<BoxEntry> {
        let mut boxes = self.boxes.lock();
        let entry = boxes
            .entry(cell_id.to_string())
            .or_default()
            .entry(record.id.clone())
            .or_insert_with(|| {
                Arc::new(BoxEntry::new(
                    &record.id,
                    &record.name,
                    record.schema.as_deref(),
                ))
            });
        entry.inc_refs();
        Arc::clone(entry)
    }

    /// Release one reference; the entry leaves the map with its last one.
    fn release_box(&self, cell_id: &str, entry: &Arc<BoxEntry>) {
        let mut boxes = self.boxes.lock();
        if entry.dec_refs() == 0
            && let Some(cell) = boxes.get_mut(cell_id)
        {
            cell.remove(entry.id());
            if cell.is_empty() {
                boxes.remove(cell_id);
            }
        }
    }

    fn box_id_by_name(&self, cell_id: &str, box_name: &str) -> Option<String> {
        let boxes = self.boxes.lock();
        boxes.get(cell_id).and_then(|cell| {
            cell.values()
                .find(|entry| entry.name() == box_name)
                .map(|entry| entry.id().to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn box_record() -> BoxRecord {
        BoxRecord {
            id: "b1".to_string(),
            name: "box1".to_string(),
            schema: None,
        }
    }

    fn rule_record(name: &str, box_name: Option<&str>) -> RuleRecord {
        RuleRecord {
            name: name.to_string(),
            external: Some(false),
            action: "log".to_string(),
            box_name: box_name.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_register_and_unregister_round_trip() {
        let index = RuleIndex::new();
        index
            .register("cell1", &rule_record("r1", None), None)
            .unwrap();
        assert_eq!(index.rule_count("cell1"), 1);

        let removed = index.unregister("cell1", "r1", None).unwrap();
        assert_eq!(removed.name, "r1");
        assert_eq!(index.rule_count("cell1"), 0);
    }

    #[test]
    fn test_register_same_key_overwrites() {
        let index = RuleIndex::new();
        index
            .register("cell1", &rule_record("r1", None), None)
            .unwrap();
        let mut replacement = rule_record("r1", None);
        replacement.action = "exec".to_string();
        index.register("cell1", &replacement, None).unwrap();

        assert_eq!(index.rule_count("cell1"), 1);
        let (rules, _) = index.snapshot("cell1");
        assert_eq!(rules[0].action, Action::Exec);
    }

    #[test]
    fn test_box_refcount_tracks_rules() {
        let index = RuleIndex::new();
        index
            .register("cell1", &rule_record("r1", Some("box1")), Some(&box_record()))
            .unwrap();
        index
            .register("cell1", &rule_record("r2", Some("box1")), Some(&box_record()))
            .unwrap();
        assert_eq!(index.box_refcount("cell1", "b1"), Some(2));

        index.unregister("cell1", "r1", Some("box1"));
        assert_eq!(index.box_refcount("cell1", "b1"), Some(1));

        index.unregister("cell1", "r2", Some("box1"));
        assert_eq!(index.box_refcount("cell1", "b1"), None);
    }

    #[test]
    fn test_overwrite_with_same_box_keeps_refcount() {
        let index = RuleIndex::new();
        index
            .register("cell1", &rule_record("r1", Some("box1")), Some(&box_record()))
            .unwrap();
        index
            .register("cell1", &rule_record("r1", Some("box1")), Some(&box_record()))
            .unwrap();
        assert_eq!(index.box_refcount("cell1", "b1"), Some(1));
    }

    #[test]
    fn test_linked_rules_share_one_entry() {
        let index = RuleIndex::new();
        let r1 = index
            .register("cell1", &rule_record("r1", Some("box1")), Some(&box_record()))
            .unwrap();
        let r2 = index
            .register("cell1", &rule_record("r2", Some("box1")), Some(&box_record()))
            .unwrap();

        let e1 = r1.box_ref.as_ref().unwrap();
        let e2 = r2.box_ref.as_ref().unwrap();
        assert!(Arc::ptr_eq(e1, e2));

        // A rename through the index is visible through both rules.
        assert!(index.update_box("cell1", "b1", "box2", Some("http://app.example/")));
        assert_eq!(e1.name(), "box2");
        assert_eq!(e2.schema().as_deref(), Some("http://app.example/"));
    }

    #[test]
    fn test_register_unresolvable_box_fails_cleanly() {
        let index = RuleIndex::new();
        let result = index.register("cell1", &rule_record("r1", Some("ghost")), None);
        assert!(result.is_err());
        assert_eq!(index.rule_count("cell1"), 0);
    }

    #[test]
    fn test_invalid_action_does_not_leak_box_entry() {
        let index = RuleIndex::new();
        let mut record = rule_record("r1", Some("box1"));
        record.action = "explode".to_string();

        assert!(index.register("cell1", &record, Some(&box_record())).is_err());
        assert_eq!(index.box_refcount("cell1", "b1"), None);
    }

    #[test]
    fn test_unregister_unknown_box_name_is_noop() {
        let index = RuleIndex::new();
        index
            .register("cell1", &rule_record("r1", None), None)
            .unwrap();
        assert!(index.unregister("cell1", "r1", Some("ghost")).is_none());
        assert_eq!(index.rule_count("cell1"), 1);
    }

    #[test]
    fn test_replace_cell_swaps_whole_slice() {
        let index = RuleIndex::new();
        index
            .register("cell1", &rule_record("old", Some("box1")), Some(&box_record()))
            .unwrap();

        let staged = vec![
            (rule_record("new1", None), None),
            (rule_record("new2", Some("box1")), Some(box_record())),
            (
                RuleRecord {
                    name: "bad".to_string(),
                    action: "explode".to_string(),
                    ..Default::default()
                },
                None,
            ),
        ];
        let registered = index.replace_cell("cell1", staged);

        assert_eq!(registered.len(), 2);
        assert_eq!(index.rule_count("cell1"), 2);
        assert_eq!(index.box_refcount("cell1", "b1"), Some(1));
        let (rules, _) = index.snapshot("cell1");
        assert!(rules.iter().all(|rule| rule.name != "old"));
    }

    #[test]
    fn test_replace_cell_with_empty_set_clears() {
        let index = RuleIndex::new();
        index
            .register("cell1", &rule_record("r1", Some("box1")), Some(&box_record()))
            .unwrap();

        let registered = index.replace_cell("cell1", Vec::new());

        assert!(registered.is_empty());
        assert_eq!(index.rule_count("cell1"), 0);
        assert_eq!(index.box_refcount("cell1", "b1"), None);
    }

    #[test]
    fn test_purge_cell_drops_both_maps() {
        let index = RuleIndex::new();
        index
            .register("cell1", &rule_record("r1", Some("box1")), Some(&box_record()))
            .unwrap();
        index.purge_cell("cell1");

        assert_eq!(index.rule_count("cell1"), 0);
        assert_eq!(index.box_refcount("cell1", "b1"), None);
    }
}
