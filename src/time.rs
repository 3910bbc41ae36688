//! Time utilities.
//!
//! Sessions, handshake TTLs, and signature timestamp policy all reason
//! about Unix time; these helpers keep the call sites uniform.

/// Returns the current Unix timestamp in seconds.
pub fn now_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Returns the current Unix timestamp in milliseconds.
pub fn now_timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
