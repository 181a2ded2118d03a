//! Rewriting between local URL schemes and absolute form.
//!
//! Three deployment-relative schemes participate: `localunit:` (relative to
//! the unit), `localcell:` (relative to a cell), and `localbox:` (relative to
//! a box within a cell). All rewriters are pure string functions; inputs that
//! do not carry the scheme pass through unchanged.

/// Scheme prefix for unit-relative URLs.
pub const SCHEME_LOCALUNIT: &str = "localunit:";
/// Scheme prefix for cell-relative URLs.
pub const SCHEME_LOCALCELL: &str = "localcell:";
/// Scheme prefix for box-relative URLs.
pub const SCHEME_LOCALBOX: &str = "localbox:";

/// Join a base URL and a path fragment with exactly one `/` between them.
fn join(base: &str, rest: &str) -> String {
    let base = base.trim_end_matches('/');
    let rest = rest.trim_start_matches('/');
    if rest.is_empty() {
        format!("{}/", base)
    } else {
        format!("{}/{}", base, rest)
    }
}

/// Replace a leading `localunit:` with the unit URL.
pub fn local_unit_to_http(unit_url: &str, s: &str) -> String {
    match s.strip_prefix(SCHEME_LOCALUNIT) {
        Some(rest) => join(unit_url, rest),
        None => s.to_string(),
    }
}

/// Replace a leading `localcell:` with the cell URL.
pub fn local_cell_to_http(cell_url: &str, s: &str) -> String {
    match s.strip_prefix(SCHEME_LOCALCELL) {
        Some(rest) => join(cell_url, rest),
        None => s.to_string(),
    }
}

/// Rewrite a leading `localbox:` to the cell-relative form for the named box:
/// `localbox:/col` becomes `localcell:/<box_name>/col`.
pub fn local_box_to_local_cell(s: &str, box_name: &str) -> String {
    match s.strip_prefix(SCHEME_LOCALBOX) {
        Some(rest) => format!(
            "{}/{}/{}",
            SCHEME_LOCALCELL,
            box_name,
            rest.trim_start_matches('/')
        ),
        None => s.to_string(),
    }
}

/// Expand a leading `localbox:` directly to absolute form:
/// `localbox:/svc` becomes `<cell_url><box_name>/svc`.
pub fn local_box_to_http(cell_url: &str, box_name: &str, s: &str) -> String {
    match s.strip_prefix(SCHEME_LOCALBOX) {
        Some(rest) => join(&join(cell_url, box_name), rest),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_unit_to_http() {
        assert_eq!(
            local_unit_to_http("http://unit.example/", "localunit:/cell1/"),
            "http://unit.example/cell1/"
        );
        // Pass-through for absolute URLs
        assert_eq!(
            local_unit_to_http("http://unit.example/", "http://other/x"),
            "http://other/x"
        );
    }

    #[test]
    fn test_local_cell_to_http() {
        assert_eq!(
            local_cell_to_http("http://unit.example/cell1/", "localcell:/box/col"),
            "http://unit.example/cell1/box/col"
        );
        assert_eq!(
            local_cell_to_http("http://unit.example/cell1", "localcell:/box/col"),
            "http://unit.example/cell1/box/col"
        );
        assert_eq!(
            local_cell_to_http("http://unit.example/cell1/", "http://s/x"),
            "http://s/x"
        );
    }

    #[test]
    fn test_local_box_to_local_cell() {
        assert_eq!(
            local_box_to_local_cell("localbox:/col/ent", "box1"),
            "localcell:/box1/col/ent"
        );
        // Other schemes untouched
        assert_eq!(
            local_box_to_local_cell("localcell:/box1/col", "box1"),
            "localcell:/box1/col"
        );
    }

    #[test]
    fn test_local_box_to_http() {
        assert_eq!(
            local_box_to_http("http://cell/", "box1", "localbox:/svc"),
            "http://cell/box1/svc"
        );
        assert_eq!(
            local_box_to_http("http://cell/", "box1", "http://s/x"),
            "http://s/x"
        );
    }

    #[test]
    fn test_join_handles_empty_rest() {
        assert_eq!(local_cell_to_http("http://cell/", "localcell:/"), "http://cell/");
        assert_eq!(local_cell_to_http("http://cell", "localcell:"), "http://cell/");
    }
}
