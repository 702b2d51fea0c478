//! Small formatting helpers shared across command handlers.

use chrono::{Local, TimeZone, Utc};

/// Current wall-clock time as a Unix timestamp, used for `last_activity`
/// and topic-set times.
pub fn now() -> i64 {
    Utc::now().timestamp()
}

/// Human-readable timestamp for `RPL_CREATED`/`RPL_TIME` and similar
/// replies, in the server's local timezone.
pub fn time_str(unix_ts: i64) -> String {
    Local
        .timestamp_opt(unix_ts, 0)
        .single()
        .map(|dt| dt.format("%a %b %e %Y at %H:%M:%S %Z").to_string())
        .unwrap_or_else(|| "unknown".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_str_does_not_panic_on_epoch() {
        assert!(!time_str(0).is_empty());
    }
}
