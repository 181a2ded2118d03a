//! In-memory cell store for tests and single-process embedding.

use std::collections::HashMap;

use parking_lot::Mutex;

use rulebox_shared::EngineResult;

use super::{BoxRecord, CellRecord, CellStore, RuleRecord};

#[derive(Debug, Default)]
struct CellData {
    url: String,
    boxes: Vec<BoxRecord>,
    rules: Vec<RuleRecord>,
}

/// Single-process [`CellStore`] backed by a mutex-protected map.
///
/// Mutators mirror what the control plane does to the real store, so tests
/// can stage a store change and then replay the matching control event.
#[derive(Debug, Default)]
pub struct InMemoryCellStore {
    cells: Mutex<HashMap<String, CellData>>,
}

impl InMemoryCellStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a cell with its root URL.
    pub fn add_cell(&self, cell_id: &str, url: &str) {
        self.cells.lock().entry(cell_id.to_string()).or_default().url = url.to_string();
    }

    /// Remove a cell and everything in it.
    pub fn remove_cell(&self, cell_id: &str) {
        self.cells.lock().remove(cell_id);
    }

    /// Add a box to a cell. The cell must have been added first.
    pub fn add_box(&self, cell_id: &str, record: BoxRecord) {
        if let Some(cell) = self.cells.lock().get_mut(cell_id) {
            cell.boxes.retain(|b| b.id != record.id);
            cell.boxes.push(record);
        }
    }

    /// Rename a box (and replace its schema) in place, keyed by box id.
    pub fn rename_box(&self, cell_id: &str, box_id: &str, name: &str, schema: Option<&str>) {
        if let Some(cell) = self.cells.lock().get_mut(cell_id)
            && let Some(existing) = cell.boxes.iter_mut().find(|b| b.id == box_id)
        {
            existing.name = name.to_string();
            existing.schema = schema.map(str::to_string);
        }
    }

    /// Add or replace a rule, keyed by (name, box linkage).
    pub fn add_rule(&self, cell_id: &str, record: RuleRecord) {
        if let Some(cell) = self.cells.lock().get_mut(cell_id) {
            cell.rules
                .retain(|r| !(r.name == record.name && r.box_name == record.box_name));
            cell.rules.push(record);
        }
    }

    /// Remove a rule by its compound key.
    pub fn remove_rule(&self, cell_id: &str, name: &str, box_name: Option<&str>) {
        if let Some(cell) = self.cells.lock().get_mut(cell_id) {
            cell.rules
                .retain(|r| !(r.name == name && r.box_name.as_deref() == box_name));
        }
    }
}

impl CellStore for InMemoryCellStore {
    fn list_cells(&self) -> EngineResult<Vec<CellRecord>> {
        Ok(self
            .cells
            .lock()
            .iter()
            .map(|(id, data)| CellRecord {
                id: id.clone(),
                url: data.url.clone(),
            })
            .collect())
    }

    fn find_cell(&self, cell_id: &str) -> EngineResult<Option<CellRecord>> {
        Ok(self.cells.lock().get(cell_id).map(|data| CellRecord {
            id: cell_id.to_string(),
            url: data.url.clone(),
        }))
    }

    fn list_rules(&self, cell_id: &str) -> EngineResult<Vec<RuleRecord>> {
        Ok(self
            .cells
            .lock()
            .get(cell_id)
            .map(|data| data.rules.clone())
            .unwrap_or_default())
    }

    fn read_rule(
        &self,
        cell_id: &str,
        name: &str,
        box_name: Option<&str>,
    ) -> EngineResult<Option<RuleRecord>> {
        Ok(self.cells.lock().get(cell_id).and_then(|data| {
            data.rules
                .iter()
                .find(|r| r.name == name && r.box_name.as_deref() == box_name)
                .cloned()
        }))
    }

    fn find_box_by_name(&self, cell_id: &str, name: &str) -> EngineResult<Option<BoxRecord>> {
        Ok(self.cells.lock().get(cell_id).and_then(|data| {
            data.boxes.iter().find(|b| b.name == name).cloned()
        }))
    }
}
