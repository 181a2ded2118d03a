//! The event type carried between cells, the engine, and brokers.
//!
//! An [`Event`] is produced by data-plane callers (HTTP handlers, timers) and
//! by the control plane when rules, boxes, or cells change. The engine never
//! persists events; they live on channels and in worker tasks only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Control-plane event type strings.
///
/// The subscriber consumes exactly these types, and the dispatcher republishes
/// an internal event to the broker only when its type is one of them.
pub mod control {
    pub const RULE_CREATE: &str = "rule.create";
    pub const RULE_UPDATE: &str = "rule.update";
    pub const RULE_MERGE: &str = "rule.merge";
    pub const RULE_DELETE: &str = "rule.delete";
    pub const RULE_LINK_BOX_CREATE: &str = "rule.links.box.create";
    pub const RULE_LINK_BOX_DELETE: &str = "rule.links.box.delete";
    pub const BOX_LINK_RULE_CREATE: &str = "box.links.rule.create";
    pub const BOX_LINK_RULE_DELETE: &str = "box.links.rule.delete";
    pub const RULE_NAVPROP_BOX_CREATE: &str = "rule.navprop.box.create";
    pub const BOX_NAVPROP_RULE_CREATE: &str = "box.navprop.rule.create";
    pub const BOX_UPDATE: &str = "box.update";
    pub const BOX_MERGE: &str = "box.merge";
    pub const CELL_IMPORT: &str = "cell.import";

    /// All control-plane types, in subscriber dispatch order.
    pub const ALL: &[&str] = &[
        RULE_CREATE,
        RULE_UPDATE,
        RULE_MERGE,
        RULE_DELETE,
        RULE_LINK_BOX_CREATE,
        RULE_LINK_BOX_DELETE,
        BOX_LINK_RULE_CREATE,
        BOX_LINK_RULE_DELETE,
        RULE_NAVPROP_BOX_CREATE,
        BOX_NAVPROP_RULE_CREATE,
        BOX_UPDATE,
        BOX_MERGE,
        CELL_IMPORT,
    ];
}

/// Timer event type strings, routed to the timer sink.
pub const TIMER_PERIODIC: &str = "timer.periodic";
pub const TIMER_ONESHOT: &str = "timer.oneshot";

/// Check whether an event type is one of the control-plane types.
pub fn is_control_type(event_type: &str) -> bool {
    control::ALL.contains(&event_type)
}

/// Check whether an event type is a timer type.
pub fn is_timer_type(event_type: &str) -> bool {
    event_type == TIMER_PERIODIC || event_type == TIMER_ONESHOT
}

/// An event flowing through the platform.
///
/// `external` distinguishes events originating outside the platform from
/// internal ones; only internal events are ever republished to the broker.
/// `rule_chain` is a string-encoded hop counter bounding cascades where
/// actions themselves emit events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Owning cell. Events without a cell are dropped by the dispatcher.
    pub cell_id: Option<String>,
    /// True when the event originated outside the platform.
    pub external: bool,
    /// Schema URL of the box the event relates to, if any.
    pub schema: Option<String>,
    /// Subject URL of the acting principal.
    pub subject: Option<String>,
    /// Dotted event type, e.g. `odata.create`.
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    /// Target of the event, URL or key fragment depending on type.
    pub object: Option<String>,
    /// Auxiliary payload; for control events, the follow-up key fragment.
    pub info: Option<String>,
    /// Opaque event id; generated by the dispatcher when absent.
    pub event_id: Option<String>,
    /// String-encoded nonnegative hop count.
    pub rule_chain: Option<String>,
    /// Publish timestamp (UTC), stamped at construction.
    pub time: DateTime<Utc>,
}

impl Event {
    /// Create an event with the given cell, type, and origin flag.
    pub fn new(cell_id: impl Into<String>, event_type: impl Into<String>, external: bool) -> Self {
        Self {
            cell_id: Some(cell_id.into()),
            external,
            schema: None,
            subject: None,
            event_type: Some(event_type.into()),
            object: None,
            info: None,
            event_id: None,
            rule_chain: None,
            time: Utc::now(),
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_object(mut self, object: impl Into<String>) -> Self {
        self.object = Some(object.into());
        self
    }

    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = Some(info.into());
        self
    }

    pub fn with_rule_chain(mut self, rule_chain: impl Into<String>) -> Self {
        self.rule_chain = Some(rule_chain.into());
        self
    }

    /// Whether this event should be republished by the dispatcher: internal
    /// origin and a control-plane type.
    pub fn is_republishable(&self) -> bool {
        !self.external
            && self
                .event_type
                .as_deref()
                .is_some_and(is_control_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_type_membership() {
        assert!(is_control_type("rule.create"));
        assert!(is_control_type("cell.import"));
        assert!(!is_control_type("odata.create"));
        assert!(!is_control_type("rule.created"));
    }

    #[test]
    fn test_timer_type_membership() {
        assert!(is_timer_type("timer.periodic"));
        assert!(is_timer_type("timer.oneshot"));
        assert!(!is_timer_type("timer"));
    }

    #[test]
    fn test_republishable_requires_internal_and_control() {
        let internal = Event::new("cell1", "rule.create", false);
        assert!(internal.is_republishable());

        let external = Event::new("cell1", "rule.create", true);
        assert!(!external.is_republishable());

        let data_plane = Event::new("cell1", "odata.create", false);
        assert!(!data_plane.is_republishable());
    }

    #[test]
    fn test_event_roundtrips_through_json() {
        let event = Event::new("cell1", "odata.create", false)
            .with_object("localcell:/box/col")
            .with_rule_chain("2");

        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();

        assert_eq!(back.cell_id.as_deref(), Some("cell1"));
        assert_eq!(back.event_type.as_deref(), Some("odata.create"));
        assert_eq!(back.object.as_deref(), Some("localcell:/box/col"));
        assert_eq!(back.rule_chain.as_deref(), Some("2"));
    }
}
