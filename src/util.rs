//! Small shared helpers — canonical timestamps and id generation.

use chrono::{Duration, SecondsFormat, Utc};

/// Current UTC time as a fixed-width RFC 3339 string (`2026-08-02T10:15:00.123Z`).
///
/// Fixed width with a `Z` suffix so that lexicographic comparison of stored
/// timestamps matches chronological order.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// UTC time `ms` milliseconds from now, same format as [`now_iso`].
pub fn iso_after_millis(ms: i64) -> String {
    (Utc::now() + Duration::milliseconds(ms)).to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// UTC time `days` days from now, same format as [`now_iso`].
pub fn iso_after_days(days: i64) -> String {
    (Utc::now() + Duration::days(days)).to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// UTC time `ms` milliseconds in the past, same format as [`now_iso`].
pub fn iso_before_millis(ms: i64) -> String {
    (Utc::now() - Duration::milliseconds(ms)).to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Fresh random identifier for a new row.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
