use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

/// Key inside `current_weather` that carries the observation time rather than a metric.
const TIMESTAMP_KEY: &str = "timestamp";

/// Current observations of one station, taken from a single API call.
///
/// Values are the raw numbers the provider sent; no unit conversion happens here.
/// A metric reported as `null` is kept with a `None` value so callers can tell
/// "reported but empty" from "absent".
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WeatherSnapshot {
    pub metrics: BTreeMap<String, Option<f64>>,
    pub timestamp: Option<String>,
}

impl WeatherSnapshot {
    /// Value of a metric, `None` when it is missing or null.
    pub fn value(&self, metric: &str) -> Option<f64> {
        self.metrics.get(metric).copied().flatten()
    }
}

/// Parsed body of the device endpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceReport {
    /// Human-readable station name, if the provider sent one.
    pub name: Option<String>,
    pub snapshot: WeatherSnapshot,
}

#[derive(Debug, Deserialize)]
struct RawDevice {
    #[serde(default)]
    name: Option<String>,
    current_weather: serde_json::Map<String, serde_json::Value>,
}

impl DeviceReport {
    /// Parse a device document.
    ///
    /// The body must be a JSON object with a `current_weather` object. Numeric
    /// fields become metrics, `null` fields become empty metrics, and anything
    /// else (icons, strings) is ignored apart from `timestamp`.
    pub fn from_json(body: &[u8]) -> Result<Self, serde_json::Error> {
        let raw: RawDevice = serde_json::from_slice(body)?;

        let mut snapshot = WeatherSnapshot::default();
        for (key, value) in raw.current_weather {
            if key == TIMESTAMP_KEY {
                snapshot.timestamp = value.as_str().map(String::from);
                continue;
            }
            match value {
                serde_json::Value::Number(n) => {
                    snapshot.metrics.insert(key, n.as_f64());
                }
                serde_json::Value::Null => {
                    snapshot.metrics.insert(key, None);
                }
                _ => {}
            }
        }

        Ok(Self {
            name: raw.name.filter(|n| !n.trim().is_empty()),
            snapshot,
        })
    }
}
