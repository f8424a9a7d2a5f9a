//! Timestamp encoding for the shared store.
//!
//! Every process writes timestamps as fixed-width RFC 3339 UTC strings with
//! millisecond precision, e.g. `2026-10-19T18:00:00.000Z`. Fixed width makes
//! lexicographic order equal chronological order, so `WHERE created_at < ?`
//! works directly on TEXT columns.

use chrono::{DateTime, SecondsFormat, Utc};

/// Encode a timestamp for storage.
pub fn to_db(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Decode a stored timestamp. Accepts any RFC 3339 offset, not only `Z`,
/// so rows written by other tools still parse.
pub fn from_db(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}
