//! Populating the index from the store.

use rulebox_shared::EngineResult;

use crate::store::{BoxRecord, RuleRecord};

use super::engine_impl::EngineImpl;

impl EngineImpl {
    /// Enumerate every cell and index its rules.
    ///
    /// One cell's failure is logged and enumeration continues; the engine
    /// starts with whatever loaded.
    pub(crate) fn load(&self) {
        let cells = match self.store.list_cells() {
            Ok(cells) => cells,
            Err(error) => {
                tracing::error!(error = %error, "Cell enumeration failed, starting with an empty index");
                return;
            }
        };

        tracing::info!(cells = cells.len(), "Loading rules");
        for cell in &cells {
            if let Err(error) = self.reload_cell(&cell.id) {
                tracing::warn!(cell_id = %cell.id, error = %error, "Failed to load cell, continuing");
            }
        }
        tracing::info!("Rule load complete");
    }

    /// Rebuild one cell's slice of the index from the store.
    ///
    /// Everything is read from the store first, with no index lock held;
    /// the cell's maps are then swapped atomically, so concurrent dispatch
    /// sees the old set or the new one, never a partial mix. Rules that fail
    /// to stage (missing box, bad record) are logged and skipped. Returns
    /// how many registered.
    pub(crate) fn reload_cell(&self, cell_id: &str) -> EngineResult<usize> {
        let records = self.store.list_rules(cell_id)?;

        let mut staged: Vec<(RuleRecord, Option<BoxRecord>)> = Vec::with_capacity(records.len());
        for record in records {
            let box_record = match &record.box_name {
                Some(box_name) => match self.store.find_box_by_name(cell_id, box_name)? {
                    Some(box_record) => Some(box_record),
                    None => {
                        tracing::warn!(
                            cell_id = %cell_id,
                            rule = %record.name,
                            box_name = %box_name,
                            "Skipping rule with missing box"
                        );
                        continue;
                    }
                },
                None => None,
            };
            staged.push((record, box_record));
        }

        if self.timer.is_some() {
            let (old_rules, _) = self.index.snapshot(cell_id);
            for rule in &old_rules {
                self.notify_timer(cell_id, rule, false);
            }
        }

        let registered = self.index.replace_cell(cell_id, staged);
        for rule in &registered {
            self.notify_timer(cell_id, rule, true);
        }
        Ok(registered.len())
    }
}
