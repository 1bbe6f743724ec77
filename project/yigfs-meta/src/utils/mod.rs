pub mod intervals;

/// Wall-clock time in nanoseconds, the unit every persisted timestamp uses.
pub fn now_nanos() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)
}
