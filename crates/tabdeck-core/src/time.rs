use chrono::Utc;

/// Current wall-clock time as epoch milliseconds. All activation and
/// persistence timestamps in the protocol use this resolution.
pub fn epoch_ms() -> i64 {
    Utc::now().timestamp_millis()
}
