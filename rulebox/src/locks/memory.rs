//! In-memory cell lock service for tests and single-process embedding.

use std::collections::HashMap;

use parking_lot::Mutex;

use super::{CellLockManager, CellStatus};

#[derive(Debug)]
struct CellLockState {
    status: CellStatus,
    refs: u64,
}

impl Default for CellLockState {
    fn default() -> Self {
        Self {
            status: CellStatus::Normal,
            refs: 0,
        }
    }
}

/// Single-process [`CellLockManager`].
///
/// Cells are created on first touch with `Normal` status. Not multiprocess
/// safe.
#[derive(Debug, Default)]
pub struct InMemoryCellLocks {
    cells: Mutex<HashMap<String, CellLockState>>,
}

impl InMemoryCellLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a cell's administrative status (test hook for bulk deletion).
    pub fn set_status(&self, cell_id: &str, status: CellStatus) {
        self.cells.lock().entry(cell_id.to_string()).or_default().status = status;
    }

    /// Current reference count of a cell (0 for unseen cells).
    pub fn refs(&self, cell_id: &str) -> u64 {
        self.cells.lock().get(cell_id).map_or(0, |s| s.refs)
    }
}

impl CellLockManager for InMemoryCellLocks {
    fn status(&self, cell_id: &str) -> CellStatus {
        self.cells
            .lock()
            .get(cell_id)
            .map_or(CellStatus::Normal, |s| s.status)
    }

    fn inc_ref(&self, cell_id: &str) {
        self.cells.lock().entry(cell_id.to_string()).or_default().refs += 1;
    }

    fn dec_ref(&self, cell_id: &str) {
        let mut cells = self.cells.lock();
        if let Some(state) = cells.get_mut(cell_id) {
            state.refs = state.refs.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_status() {
        let locks = InMemoryCellLocks::new();
        locks.set_status("cell1", CellStatus::BulkDeletion);
        assert_eq!(locks.status("cell1"), CellStatus::BulkDeletion);
        assert_eq!(locks.status("cell2"), CellStatus::Normal);
    }

    #[test]
    fn test_dec_ref_never_underflows() {
        let locks = InMemoryCellLocks::new();
        locks.dec_ref("cell1");
        assert_eq!(locks.refs("cell1"), 0);
        locks.inc_ref("cell1");
        locks.dec_ref("cell1");
        locks.dec_ref("cell1");
        assert_eq!(locks.refs("cell1"), 0);
    }
}
