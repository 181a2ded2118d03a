//! Engine configuration.

use serde::Deserialize;

/// Options consumed by [`RuleEngine::new`](crate::engine::RuleEngine::new).
///
/// Hosts typically deserialize this from their own configuration layer;
/// defaults are usable for tests and small embedders.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Worker threads reserved for the timer sink. Zero disables timer
    /// routing entirely; the sink is then never notified.
    pub timer_event_threads: usize,
    /// Ceiling on the event hop counter. Events whose advanced counter
    /// exceeds this produce no actions.
    pub max_event_hop: u32,
    /// Broker topic carrying control-plane events.
    pub rule_topic: String,
    /// Width of the action worker pool (concurrent action tasks).
    pub action_workers: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            timer_event_threads: 0,
            max_event_hop: 2,
            rule_topic: "rule".to_string(),
            action_workers: 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = EngineOptions::default();
        assert_eq!(options.timer_event_threads, 0);
        assert_eq!(options.max_event_hop, 2);
        assert_eq!(options.rule_topic, "rule");
        assert_eq!(options.action_workers, 4);
    }

    #[test]
    fn test_partial_deserialization_fills_defaults() {
        let options: EngineOptions =
            serde_json::from_str(r#"{"max_event_hop": 5}"#).unwrap();
        assert_eq!(options.max_event_hop, 5);
        assert_eq!(options.rule_topic, "rule");
    }
}
