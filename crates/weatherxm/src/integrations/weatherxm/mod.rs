//! WeatherXM station integration.
//!
//! Each configured station becomes one [`WeatherXmIntegration`] registered
//! with the engine under its entry id, publishing one sensor per metric in
//! the [`Metric`] catalog.

mod cache;
mod catalog;
mod publisher;
mod sensor;

pub use cache::SnapshotCache;
pub use cache::Staleness;
pub use catalog::Language;
pub use catalog::Metric;
pub use publisher::WeatherXmIntegration;
pub use sensor::WeatherSensor;
pub use sensor::WeatherSensorState;

/// Device identifier domain
pub const DOMAIN: &str = "weatherxm";
