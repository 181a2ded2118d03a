//! Deciding whether an event triggers a rule.

use rulebox_shared::Event;

use crate::index::RuleInfo;
use crate::uri;

/// Evaluate a rule's predicate against an event.
///
/// All conditions must hold, in order: origin flag equality, event-type
/// prefix, box schema equality, exact subject, object prefix (with the rule's
/// `localbox:` object rewritten against the resolved box name), and info
/// prefix. Comparisons are case-sensitive. A rule with no origin flag is
/// disabled and never matches.
pub fn rule_matches(rule: &RuleInfo, event: &Event) -> bool {
    match rule.external {
        Some(external) if external == event.external => {}
        _ => return false,
    }

    if let Some(type_prefix) = &rule.event_type {
        match &event.event_type {
            Some(event_type) if event_type.starts_with(type_prefix) => {}
            _ => return false,
        }
    }

    if let Some(box_ref) = &rule.box_ref
        && let Some(schema) = box_ref.schema()
        && event.schema.as_deref() != Some(schema.as_str())
    {
        return false;
    }

    if let Some(subject) = &rule.subject
        && event.subject.as_ref() != Some(subject)
    {
        return false;
    }

    if let Some(object_prefix) = &rule.object {
        let object_prefix = match &rule.box_ref {
            Some(box_ref) => uri::local_box_to_local_cell(object_prefix, &box_ref.name()),
            None => object_prefix.clone(),
        };
        match &event.object {
            Some(object) if object.starts_with(&object_prefix) => {}
            _ => return false,
        }
    }

    if let Some(info_prefix) = &rule.info {
        match &event.info {
            Some(info) if info.starts_with(info_prefix) => {}
            _ => return false,
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::RuleIndex;
    use crate::store::{BoxRecord, RuleRecord};
    use std::sync::Arc;

    fn indexed(record: RuleRecord, box_record: Option<BoxRecord>) -> Arc<RuleInfo> {
        let index = RuleIndex::new();
        index
            .register("cell1", &record, box_record.as_ref())
            .unwrap()
    }

    fn base_rule() -> RuleRecord {
        RuleRecord {
            name: "r1".to_string(),
            external: Some(false),
            action: "log".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_external_flag_must_match() {
        let rule = indexed(base_rule(), None);
        assert!(rule_matches(&rule, &Event::new("cell1", "odata.create", false)));
        assert!(!rule_matches(&rule, &Event::new("cell1", "odata.create", true)));
    }

    #[test]
    fn test_disabled_rule_never_matches() {
        let mut record = base_rule();
        record.external = None;
        let rule = indexed(record, None);
        assert!(!rule_matches(&rule, &Event::new("cell1", "odata.create", false)));
        assert!(!rule_matches(&rule, &Event::new("cell1", "odata.create", true)));
    }

    #[test]
    fn test_type_prefix() {
        let mut record = base_rule();
        record.event_type = Some("odata.".to_string());
        let rule = indexed(record, None);

        assert!(rule_matches(&rule, &Event::new("cell1", "odata.create", false)));
        assert!(rule_matches(&rule, &Event::new("cell1", "odata.delete", false)));
        assert!(!rule_matches(&rule, &Event::new("cell1", "dav.put", false)));

        let mut untyped = Event::new("cell1", "x", false);
        untyped.event_type = None;
        assert!(!rule_matches(&rule, &untyped));
    }

    #[test]
    fn test_subject_exact() {
        let mut record = base_rule();
        record.subject = Some("http://cell/#me".to_string());
        let rule = indexed(record, None);

        let event = Event::new("cell1", "odata.create", false)
            .with_subject("http://cell/#me");
        assert!(rule_matches(&rule, &event));

        let other = Event::new("cell1", "odata.create", false)
            .with_subject("http://cell/#me2");
        assert!(!rule_matches(&rule, &other));
    }

    #[test]
    fn test_box_schema_gate() {
        let mut record = base_rule();
        record.box_name = Some("box1".to_string());
        let rule = indexed(
            record,
            Some(BoxRecord {
                id: "b1".to_string(),
                name: "box1".to_string(),
                schema: Some("http://app.example/".to_string()),
            }),
        );

        let with_schema =
            Event::new("cell1", "odata.create", false).with_schema("http://app.example/");
        assert!(rule_matches(&rule, &with_schema));

        let wrong_schema =
            Event::new("cell1", "odata.create", false).with_schema("http://other.example/");
        assert!(!rule_matches(&rule, &wrong_schema));

        let no_schema = Event::new("cell1", "odata.create", false);
        assert!(!rule_matches(&rule, &no_schema));
    }

    #[test]
    fn test_object_prefix_with_localbox_rewrite() {
        let mut record = base_rule();
        record.box_name = Some("box1".to_string());
        record.object = Some("localbox:/col".to_string());
        let rule = indexed(
            record,
            Some(BoxRecord {
                id: "b1".to_string(),
                name: "box1".to_string(),
                schema: None,
            }),
        );

        let event = Event::new("cell1", "odata.create", false)
            .with_object("localcell:/box1/col/entity");
        assert!(rule_matches(&rule, &event));

        let other_box = Event::new("cell1", "odata.create", false)
            .with_object("localcell:/box2/col/entity");
        assert!(!rule_matches(&rule, &other_box));
    }

    #[test]
    fn test_info_prefix() {
        let mut record = base_rule();
        record.info = Some("status=2".to_string());
        let rule = indexed(record, None);

        let event = Event::new("cell1", "odata.create", false).with_info("status=201");
        assert!(rule_matches(&rule, &event));

        let miss = Event::new("cell1", "odata.create", false).with_info("status=404");
        assert!(!rule_matches(&rule, &miss));
    }
}
