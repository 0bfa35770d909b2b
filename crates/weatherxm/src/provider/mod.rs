//! Client for the WeatherXM public device API.
//!
//! The API is a single unauthenticated endpoint returning the latest
//! observations of one station. Callers go through the [`WeatherClient`] trait
//! so the setup flow and the publisher can run against a scripted client in
//! tests.

mod client;
mod snapshot;

use serde::Deserialize;
use serde::Serialize;

pub use client::FetchError;
pub use client::HttpWeatherClient;
pub use client::WeatherClient;
#[cfg(test)]
pub(crate) use client::MockWeatherClient;
pub use snapshot::DeviceReport;
pub use snapshot::WeatherSnapshot;

/// Base URL of the public WeatherXM API.
pub const DEFAULT_BASE_URL: &str = "https://api.weatherxm.com/api/v1";

/// Locates one station on the WeatherXM network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceReference {
    /// H3 cell the station reports into.
    pub cell_index: String,
    pub device_id: String,
}

impl DeviceReference {
    pub fn new(cell_index: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            cell_index: cell_index.into(),
            device_id: device_id.into(),
        }
    }
}

impl std::fmt::Display for DeviceReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.cell_index, self.device_id)
    }
}
