use regex::Regex;
use std::sync::OnceLock;

use crate::error::{Error, Result};

fn home_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[0-9a-fA-F]{8}$").expect("static pattern"))
}

/// Validate and normalize a home id prefix from a URL path segment (§4.8).
/// Accepts exactly 8 hex characters, case-insensitively, and lowercases the
/// result.
pub fn validate_home_id(raw: &str) -> Result<String> {
    if home_id_pattern().is_match(raw) {
        Ok(raw.to_lowercase())
    } else {
        Err(Error::InvalidHomeId(raw.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_and_lowercases_valid_prefix() {
        assert_eq!(validate_home_id("A7F2B910").unwrap(), "a7f2b910");
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(validate_home_id("a7f2").is_err());
        assert!(validate_home_id("a7f2b9100").is_err());
    }

    #[test]
    fn rejects_non_hex() {
        assert!(validate_home_id("a7f2b91g").is_err());
    }

    #[test]
    fn rejects_empty() {
        assert!(validate_home_id("").is_err());
    }
}
