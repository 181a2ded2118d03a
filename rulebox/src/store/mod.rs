//! Read-only store seam for cells, boxes, and rules.
//!
//! The authoritative store lives outside this crate; the engine only ever
//! reads from it: at startup (loader), on control events (subscriber), and
//! for the cell-existence guard in the dispatcher. The rule index is a
//! derived cache of this store and is never written back.
//!
//! [`InMemoryCellStore`] is the single-process implementation used by tests
//! and embedders.

mod memory;

pub use memory::InMemoryCellStore;

use rulebox_shared::EngineResult;
use serde::{Deserialize, Serialize};

/// A cell as known to the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellRecord {
    /// Opaque cell id.
    pub id: String,
    /// Absolute root URL of the cell, with trailing slash.
    pub url: String,
}

/// A box as known to the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoxRecord {
    /// Opaque box id, stable across renames.
    pub id: String,
    /// Box name, unique within its cell.
    pub name: String,
    /// Schema URL of the application installed in the box.
    pub schema: Option<String>,
}

/// A rule as persisted by the store.
///
/// `action` is kept as the raw stored string; it is validated against the
/// closed action set at registration time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleRecord {
    pub name: String,
    pub external: Option<bool>,
    pub subject: Option<String>,
    pub event_type: Option<String>,
    pub object: Option<String>,
    pub info: Option<String>,
    pub action: String,
    pub service: Option<String>,
    /// Name of the box this rule is linked to, if any.
    pub box_name: Option<String>,
}

/// Read access to cells and their rules and boxes.
pub trait CellStore: Send + Sync {
    /// Enumerate every cell in the unit.
    fn list_cells(&self) -> EngineResult<Vec<CellRecord>>;

    /// Look up one cell by id.
    fn find_cell(&self, cell_id: &str) -> EngineResult<Option<CellRecord>>;

    /// Enumerate all rules of a cell.
    fn list_rules(&self, cell_id: &str) -> EngineResult<Vec<RuleRecord>>;

    /// Read one rule by its compound key (name + optional box linkage).
    fn read_rule(
        &self,
        cell_id: &str,
        name: &str,
        box_name: Option<&str>,
    ) -> EngineResult<Option<RuleRecord>>;

    /// Look up a box by name within a cell.
    fn find_box_by_name(&self, cell_id: &str, name: &str) -> EngineResult<Option<BoxRecord>>;
}
