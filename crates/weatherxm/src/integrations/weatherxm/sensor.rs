use serde::Serialize;

use super::DOMAIN;
use super::cache::SnapshotCache;
use super::cache::Staleness;
use super::catalog::Language;
use super::catalog::Metric;
use crate::engine::Device;
use crate::engine::Entity;
use crate::provider::DeviceReference;

const MANUFACTURER: &str = "WeatherXM";
const MODEL: &str = "WeatherXM Station";
const SW_VERSION: &str = "1.0";

/// State of a weather sensor entity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherSensorState {
    pub value: Option<f64>,
    pub unit_of_measurement: Option<&'static str>,
    pub icon: &'static str,
    pub friendly_name: &'static str,
    /// Observation time reported by the station
    pub observed_at: Option<String>,
    #[serde(flatten)]
    pub staleness: Staleness,
}

/// One metric of one station.
#[derive(Debug, Clone)]
pub struct WeatherSensor {
    unique_id: String,
    name: String,
    metric: Metric,
    device: Device,
    state: WeatherSensorState,
}

impl WeatherSensor {
    /// Unique id of the sensor for `metric` on `device`.
    ///
    /// Must not change across releases: the engine matches entities by it.
    pub fn unique_id_for(device: &DeviceReference, metric: Metric) -> String {
        format!("{}_{}_{}", device.cell_index, device.device_id, metric.key())
    }

    pub fn new(
        device_ref: &DeviceReference,
        metric: Metric,
        device_name: &str,
        language: Language,
    ) -> Self {
        let mut device = Device::new(device_name.to_string()).with_identifier(
            DOMAIN,
            format!("{}_{}", device_ref.cell_index, device_ref.device_id),
        );
        device.manufacturer = Some(MANUFACTURER.to_string());
        device.model = Some(MODEL.to_string());
        device.sw_version = Some(SW_VERSION.to_string());

        Self {
            unique_id: Self::unique_id_for(device_ref, metric),
            name: format!("{}_{}", device_name, metric.key()),
            metric,
            device,
            state: WeatherSensorState {
                value: None,
                unit_of_measurement: metric.unit(),
                icon: metric.icon(),
                friendly_name: metric.description(language),
                observed_at: None,
                staleness: Staleness::default(),
            },
        }
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn value(&self) -> Option<f64> {
        self.state.value
    }

    pub fn state(&self) -> &WeatherSensorState {
        &self.state
    }

    /// Take value and staleness from the cache.
    ///
    /// With no snapshot cached the value stays empty.
    pub fn apply(&mut self, cache: &SnapshotCache) {
        if let Some(snapshot) = cache.snapshot() {
            self.state.value = snapshot.value(self.metric.key());
            self.state.observed_at = snapshot.timestamp.clone();
        }
        self.state.staleness = cache.staleness();
    }
}

impl Entity for WeatherSensor {
    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn platform(&self) -> &'static str {
        "sensor"
    }

    fn device(&self) -> Option<&Device> {
        Some(&self.device)
    }

    fn state_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.state).unwrap_or_default()
    }
}
