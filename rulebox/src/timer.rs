//! Timer sink seam.
//!
//! Rules whose event type is `timer.periodic` or `timer.oneshot` are also
//! owned by a sibling timer component. The engine treats it as a pluggable
//! sink: when configured on, every register/unregister of a timer-typed rule
//! is mirrored to it, and its view appears in the inspection document.

use serde::Serialize;

/// Notification payload for timer rule registration and removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimerRule {
    pub name: String,
    pub subject: Option<String>,
    pub event_type: String,
    pub object: Option<String>,
    pub info: Option<String>,
    pub cell_id: String,
    pub box_id: Option<String>,
}

/// Receiver of timer rule lifecycle notifications.
pub trait TimerSink: Send + Sync {
    /// A timer-typed rule entered the index.
    fn register(&self, rule: TimerRule);

    /// A timer-typed rule left the index.
    fn unregister(&self, rule: TimerRule);

    /// The sink's view of a cell, for the inspection document.
    fn timer_document(&self, cell_id: &str) -> serde_json::Value;

    /// Stop timer threads. Called once during engine shutdown.
    fn shutdown(&self);
}
