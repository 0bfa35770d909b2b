use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Serialize;

use crate::provider::WeatherSnapshot;

/// How old the data behind an entity is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Staleness {
    /// Unix seconds of the last successful fetch
    pub last_success: Option<u64>,
    /// Unix seconds of the last failed fetch
    pub last_failure: Option<u64>,
    pub consecutive_failures: u32,
}

/// Latest good snapshot of one station.
///
/// A failed poll never clears the snapshot; it only bumps the failure
/// counters, so entities keep reporting the last known values.
#[derive(Debug, Default)]
pub struct SnapshotCache {
    snapshot: Option<WeatherSnapshot>,
    staleness: Staleness,
}

impl SnapshotCache {
    pub fn record_success(&mut self, snapshot: WeatherSnapshot) {
        self.snapshot = Some(snapshot);
        self.staleness.last_success = Some(unix_now());
        self.staleness.consecutive_failures = 0;
    }

    /// Returns the number of consecutive failures including this one.
    pub fn record_failure(&mut self) -> u32 {
        self.staleness.last_failure = Some(unix_now());
        self.staleness.consecutive_failures += 1;
        self.staleness.consecutive_failures
    }

    pub fn snapshot(&self) -> Option<&WeatherSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn staleness(&self) -> Staleness {
        self.staleness
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
