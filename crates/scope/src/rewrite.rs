/// Token a tool response body may contain, to be replaced with a compact
/// JSON summary of live home state (§4.8 Design Notes).
pub const STATE_PLACEHOLDER: &str = "__HOMECAST_STATE__";

/// Splice `state_json` into `body` wherever [`STATE_PLACEHOLDER`] appears,
/// escaped for embedding inside a JSON string.
///
/// Returns `None` when the placeholder isn't present at all — callers
/// should stream the original response through unchanged rather than
/// buffer it, since buffering is only needed to perform this rewrite.
pub fn splice_state(body: &[u8], state_json: &str) -> Option<Vec<u8>> {
    let body_str = String::from_utf8_lossy(body);
    if !body_str.contains(STATE_PLACEHOLDER) {
        return None;
    }
    let escaped = state_json.replace('\\', "\\\\").replace('"', "\\\"");
    Some(body_str.replace(STATE_PLACEHOLDER, &escaped).into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_placeholder_returns_none() {
        let body = br#"{"ok":true}"#;
        assert!(splice_state(body, "{}").is_none());
    }

    #[test]
    fn present_placeholder_gets_replaced() {
        let body = br#"{"description":"__HOMECAST_STATE__"}"#;
        let spliced = splice_state(body, r#"{"Kitchen":{}}"#).unwrap();
        let spliced_str = String::from_utf8(spliced).unwrap();
        assert_eq!(spliced_str, r#"{"description":"{\"Kitchen\":{}}"}"#);
    }

    #[test]
    fn escapes_backslashes_and_quotes_in_state() {
        let body = br#""__HOMECAST_STATE__""#;
        let spliced = splice_state(body, r#"say "hi" \ bye"#).unwrap();
        let spliced_str = String::from_utf8(spliced).unwrap();
        assert_eq!(spliced_str, r#""say \"hi\" \\ bye""#);
    }

    #[test]
    fn replaces_every_occurrence() {
        let body = b"__HOMECAST_STATE__ and __HOMECAST_STATE__";
        let spliced = splice_state(body, "x").unwrap();
        assert_eq!(spliced, b"x and x");
    }
}
