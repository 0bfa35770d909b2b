use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use strum::IntoEnumIterator;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::cache::SnapshotCache;
use super::catalog::Language;
use super::catalog::Metric;
use super::sensor::WeatherSensor;
use crate::engine::BoxError;
use crate::engine::Entity;
use crate::engine::EntityState;
use crate::engine::FromIntegrationMessage;
use crate::engine::FromIntegrationSender;
use crate::engine::Integration;
use crate::engine::ToIntegrationMessage;
use crate::entry::ConfigRecord;
use crate::provider::DeviceReference;
use crate::provider::FetchError;
use crate::provider::WeatherClient;

/// Shortest period the timer accepts; `tokio::time::interval` panics on zero
const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

struct PollerState {
    cache: SnapshotCache,
    sensors: Vec<WeatherSensor>,
}

/// Shared between the integration and its timer task.
///
/// The state lock is held for the whole fetch, so a manual refresh and a
/// timer tick for the same station never run concurrently.
struct Poller {
    entry_id: String,
    device: DeviceReference,
    client: Arc<dyn WeatherClient>,
    state: Mutex<PollerState>,
    to_engine: FromIntegrationSender,
}

impl Poller {
    /// Fetch once and push every sensor's state to the engine in one batch.
    ///
    /// On failure the cached snapshot is kept, so values stay at their last
    /// known readings and only the staleness attributes move.
    async fn poll(&self) -> Result<(), FetchError> {
        let mut state = self.state.lock().await;

        let outcome = match self.client.fetch(&self.device).await {
            Ok(report) => {
                debug!(
                    "[{}] Poll succeeded: {} metrics at {:?}",
                    self.entry_id,
                    report.snapshot.metrics.len(),
                    report.snapshot.timestamp
                );
                state.cache.record_success(report.snapshot);
                Ok(())
            }
            Err(e) => {
                let failures = state.cache.record_failure();
                warn!(
                    "[{}] Poll failed ({} in a row), keeping last known values: {}",
                    self.entry_id, failures, e
                );
                Err(e)
            }
        };

        let PollerState { cache, sensors } = &mut *state;
        for sensor in sensors.iter_mut() {
            sensor.apply(cache);
        }
        let states = sensors
            .iter()
            .map(|s| (s.unique_id().to_string(), s.state_json()))
            .collect();

        if self
            .to_engine
            .send(FromIntegrationMessage::EntityStatesChanged { states })
            .await
            .is_err()
        {
            warn!("[{}] Engine channel closed, dropping update", self.entry_id);
        }

        outcome
    }
}

/// Publishes one configured station as a set of sensor entities.
///
/// Created through [`WeatherXmIntegration::activate`], which performs the
/// initial fetch; registering it with the engine then announces the entities
/// and starts the polling timer.
pub struct WeatherXmIntegration {
    entry_id: String,
    device: DeviceReference,
    client: Arc<dyn WeatherClient>,
    resolved_name: Option<String>,
    interval: Duration,
    /// Sensors built at activation, handed to the poller during setup
    prepared: Option<PollerState>,
    poller: Option<Arc<Poller>>,
    timer: Option<JoinHandle<()>>,
}

impl WeatherXmIntegration {
    /// Fetch the station once and build one sensor per catalog metric.
    ///
    /// A failed fetch aborts activation; no entities exist for the record
    /// until it is activated again.
    pub async fn activate(
        record: &ConfigRecord,
        client: Arc<dyn WeatherClient>,
        language: Language,
    ) -> Result<Self, FetchError> {
        info!(
            "[{}] Activating WeatherXM station {}",
            record.entry_id, record.device
        );

        let report = client.fetch(&record.device).await.map_err(|e| {
            error!(
                "[{}] Initial fetch failed, no entities created: {}",
                record.entry_id, e
            );
            e
        })?;

        let device_name = report
            .name
            .clone()
            .unwrap_or_else(|| record.display_name.clone());

        let mut cache = SnapshotCache::default();
        cache.record_success(report.snapshot);

        let sensors: Vec<WeatherSensor> = Metric::iter()
            .map(|metric| {
                let mut sensor =
                    WeatherSensor::new(&record.device, metric, &device_name, language);
                sensor.apply(&cache);
                if sensor.value().is_none() {
                    debug!(
                        "[{}] No value for {} in initial snapshot",
                        record.entry_id, metric
                    );
                }
                sensor
            })
            .collect();

        Ok(Self {
            entry_id: record.entry_id.clone(),
            device: record.device.clone(),
            client,
            resolved_name: report.name,
            interval: clamp_interval(record.options.polling_interval.as_duration()),
            prepared: Some(PollerState { cache, sensors }),
            poller: None,
            timer: None,
        })
    }

    /// Station name reported by the provider at activation, if any
    pub fn resolved_name(&self) -> Option<&str> {
        self.resolved_name.as_deref()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn unique_ids(&self) -> Vec<String> {
        Metric::iter()
            .map(|metric| WeatherSensor::unique_id_for(&self.device, metric))
            .collect()
    }

    /// (Re)start the polling timer at the current interval.
    fn schedule(&mut self) {
        self.cancel_timer();

        let Some(poller) = self.poller.clone() else {
            return;
        };
        let period = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // A tick that falls behind a slow fetch is dropped, not queued
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // Skip the first immediate tick; activation already fetched
            ticker.tick().await;

            loop {
                ticker.tick().await;
                // Failures are logged by poll() and never stop the timer
                let _ = poller.poll().await;
            }
        });

        debug!("[{}] Polling every {:?}", self.entry_id, period);
        self.timer = Some(handle);
    }

    fn cancel_timer(&mut self) {
        if let Some(handle) = self.timer.take() {
            handle.abort();
            debug!("[{}] Timer cancelled", self.entry_id);
        }
    }
}

fn clamp_interval(interval: Duration) -> Duration {
    if interval < MIN_POLL_INTERVAL {
        warn!(
            "Polling interval {:?} is too short, using {:?}",
            interval, MIN_POLL_INTERVAL
        );
        MIN_POLL_INTERVAL
    } else {
        interval
    }
}

#[async_trait]
impl Integration for WeatherXmIntegration {
    fn name(&self) -> &str {
        &self.entry_id
    }

    async fn setup(&mut self, tx: FromIntegrationSender) -> Result<(), BoxError> {
        let state = self
            .prepared
            .take()
            .ok_or("integration has already been set up")?;

        let entities: Vec<EntityState> = state
            .sensors
            .iter()
            .map(|sensor| EntityState::from_entity(sensor, &self.entry_id))
            .collect();
        info!(
            "[{}] Registering {} sensors",
            self.entry_id,
            entities.len()
        );

        tx.send(FromIntegrationMessage::EntitiesDiscovered {
            integration_name: self.entry_id.clone(),
            entities,
        })
        .await
        .map_err(|_| "engine channel closed")?;

        self.poller = Some(Arc::new(Poller {
            entry_id: self.entry_id.clone(),
            device: self.device.clone(),
            client: self.client.clone(),
            state: Mutex::new(state),
            to_engine: tx,
        }));
        self.schedule();

        Ok(())
    }

    async fn handle_message(&mut self, msg: ToIntegrationMessage) -> Result<(), BoxError> {
        match msg {
            ToIntegrationMessage::Refresh => {
                let poller = self.poller.clone().ok_or("integration is not set up")?;
                info!("[{}] Refresh requested", self.entry_id);
                poller.poll().await?;
            }
            ToIntegrationMessage::SetPollingInterval(interval) => {
                self.interval = clamp_interval(interval);
                info!(
                    "[{}] Polling interval changed to {:?}",
                    self.entry_id, self.interval
                );
                self.schedule();
            }
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), BoxError> {
        info!("[{}] Unloading", self.entry_id);
        self.cancel_timer();

        if let Some(poller) = self.poller.take() {
            poller
                .to_engine
                .send(FromIntegrationMessage::EntitiesRemoved {
                    unique_ids: self.unique_ids(),
                })
                .await
                .map_err(|_| "engine channel closed")?;
        }
        Ok(())
    }
}

impl Drop for WeatherXmIntegration {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}
