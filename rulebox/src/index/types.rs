//! Entry types held by the rule and box indexes.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use rulebox_shared::{EngineError, EngineResult, event};

use crate::store::RuleRecord;

// ============================================================================
// ACTION
// ============================================================================

/// The closed set of actions a rule may carry.
///
/// Registration rejects any stored action string outside this set; a rule in
/// the index therefore always has a valid action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "exec")]
    Exec,
    #[serde(rename = "relay")]
    Relay,
    #[serde(rename = "relay.event")]
    RelayEvent,
    #[serde(rename = "relay.data")]
    RelayData,
    #[serde(rename = "log")]
    Log,
    #[serde(rename = "log.info")]
    LogInfo,
    #[serde(rename = "log.warn")]
    LogWarn,
    #[serde(rename = "log.error")]
    LogError,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Exec => "exec",
            Action::Relay => "relay",
            Action::RelayEvent => "relay.event",
            Action::RelayData => "relay.data",
            Action::Log => "log",
            Action::LogInfo => "log.info",
            Action::LogWarn => "log.warn",
            Action::LogError => "log.error",
        }
    }
}

impl std::str::FromStr for Action {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exec" => Ok(Action::Exec),
            "relay" => Ok(Action::Relay),
            "relay.event" => Ok(Action::RelayEvent),
            "relay.data" => Ok(Action::RelayData),
            "log" => Ok(Action::Log),
            "log.info" => Ok(Action::LogInfo),
            "log.warn" => Ok(Action::LogWarn),
            "log.error" => Ok(Action::LogError),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// BOX ENTRY
// ============================================================================

#[derive(Debug, Clone)]
struct BoxAttrs {
    name: String,
    schema: Option<String>,
}

/// Shared, reference-counted box record.
///
/// The box id is immutable; `name` and `schema` can be rewritten in place by
/// box-update control events, and every rule holding the entry sees the new
/// values on its next read. The refcount is mutated only under the boxes-map
/// lock and equals the number of rules referencing the entry.
#[derive(Debug)]
pub struct BoxEntry {
    id: String,
    attrs: RwLock<BoxAttrs>,
    refs: AtomicU64,
}

impl BoxEntry {
    pub(crate) fn new(id: &str, name: &str, schema: Option<&str>) -> Self {
        Self {
            id: id.to_string(),
            attrs: RwLock::new(BoxAttrs {
                name: name.to_string(),
                schema: schema.map(str::to_string),
            }),
            refs: AtomicU64::new(0),
        }
    }

    /// Opaque box id, stable across renames.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current box name.
    pub fn name(&self) -> String {
        self.attrs.read().name.clone()
    }

    /// Current schema URL, if the box has an installed application.
    pub fn schema(&self) -> Option<String> {
        self.attrs.read().schema.clone()
    }

    /// Number of rules referencing this entry.
    pub fn refs(&self) -> u64 {
        self.refs.load(Ordering::SeqCst)
    }

    pub(crate) fn update_attrs(&self, name: &str, schema: Option<&str>) {
        let mut attrs = self.attrs.write();
        attrs.name = name.to_string();
        attrs.schema = schema.map(str::to_string);
    }

    pub(crate) fn inc_refs(&self) {
        self.refs.fetch_add(1, Ordering::SeqCst);
    }

    /// Decrement and return the remaining count.
    pub(crate) fn dec_refs(&self) -> u64 {
        self.refs.fetch_sub(1, Ordering::SeqCst) - 1
    }
}

// ============================================================================
// RULE INFO
// ============================================================================

/// Compose the per-cell primary key of a rule: `name + "." + box id or empty`.
pub fn rule_key(name: &str, box_id: Option<&str>) -> String {
    format!("{}.{}", name, box_id.unwrap_or(""))
}

/// An indexed rule.
///
/// Owned by the rule index; `box_ref` is a borrowed share of the box index's
/// entry, never ownership; box lifetime is dictated by the refcount there.
#[derive(Debug)]
pub struct RuleInfo {
    pub name: String,
    /// Origin filter. `None` disables the rule without deleting it.
    pub external: Option<bool>,
    pub subject: Option<String>,
    /// Dotted event-type prefix.
    pub event_type: Option<String>,
    /// Object URL prefix, possibly in `localbox:` form.
    pub object: Option<String>,
    /// Info prefix.
    pub info: Option<String>,
    pub action: Action,
    /// Target URL, possibly in `localcell:` or `localbox:` form.
    pub service: Option<String>,
    pub box_ref: Option<Arc<BoxEntry>>,
}

impl RuleInfo {
    /// Build an index entry from a stored record and its resolved box.
    ///
    /// Fails on an empty name or an action outside the closed set; such rules
    /// never enter the index.
    pub(crate) fn from_record(
        record: &RuleRecord,
        box_ref: Option<Arc<BoxEntry>>,
    ) -> EngineResult<Self> {
        if record.name.is_empty() {
            return Err(EngineError::Registration("rule has no name".to_string()));
        }
        let action: Action = record.action.parse().map_err(|_| {
            EngineError::Registration(format!(
                "rule '{}' has unknown action '{}'",
                record.name, record.action
            ))
        })?;

        Ok(Self {
            name: record.name.clone(),
            external: record.external,
            subject: record.subject.clone(),
            event_type: record.event_type.clone(),
            object: record.object.clone(),
            info: record.info.clone(),
            action,
            service: record.service.clone(),
            box_ref,
        })
    }

    /// This rule's primary key within its cell.
    pub fn key(&self) -> String {
        rule_key(&self.name, self.box_ref.as_deref().map(BoxEntry::id))
    }

    /// Whether this rule belongs to the timer sink.
    pub fn is_timer(&self) -> bool {
        self.event_type.as_deref().is_some_and(event::is_timer_type)
    }
}

// ============================================================================
// ACTION INFO
// ============================================================================

/// One action produced by a match, ready for the worker pool.
///
/// `service` is already rewritten to absolute form. Immutable once built.
#[derive(Debug, Clone, Serialize)]
pub struct ActionInfo {
    pub action: Action,
    pub service: Option<String>,
    pub event_id: String,
    pub rule_chain: String,
}
