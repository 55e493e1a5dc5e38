use chrono::{DateTime, Utc};

/// Returns `true` when `last_heartbeat` is older than `window_secs` relative
/// to `now`, or when there has never been a heartbeat at all.
pub fn is_stale(last_heartbeat: Option<DateTime<Utc>>, window_secs: i64, now: DateTime<Utc>) -> bool {
    match last_heartbeat {
        None => true,
        Some(t) => now.signed_duration_since(t).num_seconds() > window_secs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn fresh_heartbeat_is_not_stale() {
        let now = Utc::now();
        let hb = now - Duration::seconds(10);
        assert!(!is_stale(Some(hb), 120, now));
    }

    #[test]
    fn old_heartbeat_is_stale() {
        let now = Utc::now();
        let hb = now - Duration::seconds(121);
        assert!(is_stale(Some(hb), 120, now));
    }

    #[test]
    fn missing_heartbeat_is_stale() {
        assert!(is_stale(None, 120, Utc::now()));
    }

    #[test]
    fn boundary_is_not_stale() {
        let now = Utc::now();
        let hb = now - Duration::seconds(120);
        assert!(!is_stale(Some(hb), 120, now));
    }
}
