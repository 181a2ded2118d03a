//! Parsing of compound entity keys from control-plane event payloads.
//!
//! Control events carry OData-style key fragments such as `Rule('r1')`,
//! `Rule(Name='r1',_Box.Name='b1')`, or `Rule('r1')/$links/Box('b1')`. The
//! codec extracts the parenthesized key text and resolves named fields out of
//! it. A `null` component is masked with [`DUMMY_KEY`] before parsing so that
//! compound keys with nullable members round-trip; the sentinel maps back to
//! `None` on extraction.
//!
//! Parse failures are logged and yield `None`; callers treat `None` as "skip
//! this control event".

/// Primary name field of rule and box keys.
pub const FIELD_NAME: &str = "Name";
/// Box-linkage field of compound rule keys.
pub const FIELD_BOX_NAME: &str = "_Box.Name";

/// Sentinel standing in for `null` key components.
pub const DUMMY_KEY: &str = "dummy";

/// Extract the text inside the first `(`…`)` pair, with `null` masked.
pub fn first_key(s: &str) -> Option<String> {
    nth_key(s, 0)
}

/// Extract the text inside the second `(`…`)` pair, with `null` masked.
pub fn second_key(s: &str) -> Option<String> {
    nth_key(s, 1)
}

fn nth_key(s: &str, n: usize) -> Option<String> {
    let mut rest = s;
    for _ in 0..n {
        let close = rest.find(')')?;
        rest = &rest[close + 1..];
    }
    let open = rest.find('(')?;
    let rest = &rest[open + 1..];
    let close = match rest.find(')') {
        Some(i) => i,
        None => {
            tracing::warn!(fragment = %s, "Unbalanced parentheses in key fragment");
            return None;
        }
    };
    Some(mask_null(&rest[..close]))
}

/// Replace `null` value components with the quoted dummy sentinel.
fn mask_null(key: &str) -> String {
    key.split(',')
        .map(|part| {
            let part = part.trim();
            match part.split_once('=') {
                Some((name, value)) if value.trim() == "null" => {
                    format!("{}='{}'", name.trim(), DUMMY_KEY)
                }
                None if part == "null" => format!("'{}'", DUMMY_KEY),
                _ => part.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Strip one layer of single quotes, if present.
fn unquote(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .unwrap_or(value)
}

/// Resolve a named field out of an extracted key.
///
/// Complex keys (`Name='r1',_Box.Name='b1'`) are searched for the field by
/// name. A single key (`'r1'`) carries only the entity's primary name field,
/// so it answers [`FIELD_NAME`] and nothing else. The dummy sentinel and
/// missing fields both come back as `None`.
pub fn complex_value(key: &str, field: &str) -> Option<String> {
    let value = if key.contains('=') {
        key.split(',')
            .filter_map(|pair| pair.split_once('='))
            .find(|(name, _)| name.trim() == field)
            .map(|(_, value)| unquote(value).to_string())?
    } else if field == FIELD_NAME {
        unquote(key).to_string()
    } else {
        return None;
    };

    if value == DUMMY_KEY {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_key_single() {
        let key = first_key("Rule('r1')").unwrap();
        assert_eq!(key, "'r1'");
        assert_eq!(complex_value(&key, FIELD_NAME).as_deref(), Some("r1"));
        assert_eq!(complex_value(&key, FIELD_BOX_NAME), None);
    }

    #[test]
    fn test_first_key_complex() {
        let key = first_key("/__ctl/Rule(Name='r1',_Box.Name='b1')").unwrap();
        assert_eq!(complex_value(&key, FIELD_NAME).as_deref(), Some("r1"));
        assert_eq!(complex_value(&key, FIELD_BOX_NAME).as_deref(), Some("b1"));
    }

    #[test]
    fn test_second_key_from_link_fragment() {
        let s = "Rule('r1')/$links/Box('b1')";
        assert_eq!(
            complex_value(&first_key(s).unwrap(), FIELD_NAME).as_deref(),
            Some("r1")
        );
        assert_eq!(
            complex_value(&second_key(s).unwrap(), FIELD_NAME).as_deref(),
            Some("b1")
        );
    }

    #[test]
    fn test_null_component_masks_to_none() {
        let key = first_key("Rule(Name='r1',_Box.Name=null)").unwrap();
        assert_eq!(complex_value(&key, FIELD_NAME).as_deref(), Some("r1"));
        assert_eq!(complex_value(&key, FIELD_BOX_NAME), None);
    }

    #[test]
    fn test_single_null_key() {
        let key = first_key("Rule(null)").unwrap();
        assert_eq!(complex_value(&key, FIELD_NAME), None);
    }

    #[test]
    fn test_missing_or_unbalanced_key() {
        assert_eq!(first_key("Rule"), None);
        assert_eq!(first_key("Rule('r1'"), None);
        assert_eq!(second_key("Rule('r1')"), None);
    }

    #[test]
    fn test_spaces_around_pairs() {
        let key = first_key("Rule( Name='r1', _Box.Name='b1' )").unwrap();
        assert_eq!(complex_value(&key, FIELD_NAME).as_deref(), Some("r1"));
        assert_eq!(complex_value(&key, FIELD_BOX_NAME).as_deref(), Some("b1"));
    }
}
