// src/utils/timestamp.rs
// Small time helpers shared by cooldown registries and chat metadata.

use chrono::Utc;

/// Current UTC unix timestamp in seconds.
pub fn get_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Current UTC unix timestamp in milliseconds.
pub fn get_timestamp_millis() -> i64 {
    Utc::now().timestamp_millis()
}
