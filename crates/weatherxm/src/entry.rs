//! Configuration records created by the setup flow.

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use strum::Display;
use strum::EnumString;

use crate::provider::DeviceReference;

/// Unit selector for the polling interval.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum IntervalUnit {
    Seconds,
    #[default]
    Minutes,
    Hours,
}

/// How often a station is polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingInterval {
    pub value: u64,
    pub unit: IntervalUnit,
}

impl Default for PollingInterval {
    fn default() -> Self {
        Self {
            value: 5,
            unit: IntervalUnit::Minutes,
        }
    }
}

impl PollingInterval {
    pub fn as_duration(&self) -> Duration {
        let secs = match self.unit {
            IntervalUnit::Seconds => self.value,
            IntervalUnit::Minutes => self.value.saturating_mul(60),
            IntervalUnit::Hours => self.value.saturating_mul(3600),
        };
        Duration::from_secs(secs)
    }
}

impl std::fmt::Display for PollingInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}

/// Operator-editable settings of a record.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryOptions {
    #[serde(default)]
    pub polling_interval: PollingInterval,
}

/// A configured station.
///
/// `entry_id` is the normalized device id and is what duplicate detection
/// keys on. The device reference never changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigRecord {
    pub entry_id: String,
    pub device: DeviceReference,
    pub display_name: String,
    #[serde(default)]
    pub options: EntryOptions,
}

impl ConfigRecord {
    pub fn new(device: DeviceReference, display_name: String) -> Self {
        Self {
            entry_id: normalize_device_id(&device.device_id),
            device,
            display_name,
            options: EntryOptions::default(),
        }
    }
}

/// Stable key for a device id: non-word characters stripped, lowercased.
pub fn normalize_device_id(device_id: &str) -> String {
    device_id
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .flat_map(char::to_lowercase)
        .collect()
}
