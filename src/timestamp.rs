use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

/// The wire format of the timestamp header: `yyyy-MM-dd'T'HH:mm:ss'Z'`, always UTC.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Formats an instant using the timestamp wire format. Sub-second precision
/// is dropped.
pub fn format_timestamp(instant: DateTime<Utc>) -> String {
    instant.format(TIMESTAMP_FORMAT).to_string()
}

/// The current time in the timestamp wire format.
pub fn now() -> String {
    format_timestamp(Utc::now())
}

/// Parses a timestamp produced by `format_timestamp`.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}
