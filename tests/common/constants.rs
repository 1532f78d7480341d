//! Shared constants for integration tests

use chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;

/// Frozen "now" for every clock built by the fixtures.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap()
}

pub const LOOKAHEAD_DAYS: i64 = 3;

pub const VALIDITY: Duration = Duration::from_secs(30 * 24 * 3600);

/// Service key accepted by [`super::MockStorageApi`].
pub const STORAGE_API_KEY: &str = "service-role-test-key";

pub const STORAGE_BUCKET: &str = "audio";
