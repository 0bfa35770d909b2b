//! Lifecycle of configured stations inside the engine.
//!
//! The runtime turns store records into running integrations and back:
//! activate, unload, reload, plus the commands a running station accepts.

use std::sync::Arc;

use tracing::error;
use tracing::info;
use tracing::warn;

use crate::engine::Engine;
use crate::engine::IntegrationError;
use crate::engine::ToIntegrationMessage;
use crate::entry::ConfigRecord;
use crate::integrations::weatherxm::Language;
use crate::integrations::weatherxm::WeatherXmIntegration;
use crate::provider::FetchError;
use crate::provider::WeatherClient;
use crate::store::ConfigStore;

#[derive(Debug, thiserror::Error)]
pub enum ActivationError {
    #[error("initial fetch for {entry_id} failed: {source}")]
    Fetch {
        entry_id: String,
        #[source]
        source: FetchError,
    },

    #[error(transparent)]
    Integration(#[from] IntegrationError),
}

pub struct Runtime {
    engine: Arc<Engine>,
    client: Arc<dyn WeatherClient>,
    language: Language,
}

impl Runtime {
    pub fn new(engine: Arc<Engine>, client: Arc<dyn WeatherClient>, language: Language) -> Self {
        Self {
            engine,
            client,
            language,
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn client(&self) -> &dyn WeatherClient {
        self.client.as_ref()
    }

    pub fn is_active(&self, entry_id: &str) -> bool {
        self.engine.is_registered(entry_id)
    }

    /// Start publishing `record`.
    ///
    /// Returns the station name the provider reported, if any, so the caller
    /// can keep the stored display name current.
    pub async fn activate(&self, record: &ConfigRecord) -> Result<Option<String>, ActivationError> {
        let integration =
            WeatherXmIntegration::activate(record, self.client.clone(), self.language)
                .await
                .map_err(|source| ActivationError::Fetch {
                    entry_id: record.entry_id.clone(),
                    source,
                })?;
        let resolved = integration.resolved_name().map(String::from);

        self.engine
            .register_integration(Box::new(integration))
            .await?;
        Ok(resolved)
    }

    /// Activate every stored record, renaming records whose station name
    /// changed upstream. A record that fails stays inactive until reloaded.
    ///
    /// Returns the number of records now active.
    pub async fn activate_all(&self, store: &mut ConfigStore) -> usize {
        let records: Vec<ConfigRecord> = store.entries().cloned().collect();
        let mut active = 0;

        for record in records {
            match self.activate(&record).await {
                Ok(resolved) => {
                    active += 1;
                    if let Some(name) = resolved {
                        if let Err(e) = store.rename(&record.entry_id, &name) {
                            warn!("[{}] Failed to store new name: {}", record.entry_id, e);
                        }
                    }
                }
                Err(e) => {
                    error!("[{}] Setup failed, reload to retry: {}", record.entry_id, e);
                }
            }
        }

        info!("{} of {} stations active", active, store.len());
        active
    }

    /// Stop publishing and remove the station's entities
    pub async fn unload(&self, entry_id: &str) -> Result<(), IntegrationError> {
        self.engine.unregister_integration(entry_id).await
    }

    /// Unload (if active) and activate again
    pub async fn reload(&self, record: &ConfigRecord) -> Result<Option<String>, ActivationError> {
        if self.is_active(&record.entry_id) {
            self.unload(&record.entry_id).await?;
        }
        self.activate(record).await
    }

    pub async fn unload_all(&self) {
        for entry_id in self.engine.integration_names() {
            if let Err(e) = self.unload(&entry_id).await {
                warn!("[{}] Unload failed: {}", entry_id, e);
            }
        }
    }

    /// Unload stations whose record is no longer in `store`.
    ///
    /// Returns the entry ids that were unloaded.
    pub async fn unload_removed(&self, store: &ConfigStore) -> Vec<String> {
        let mut unloaded = Vec::new();
        for entry_id in self.engine.integration_names() {
            if store.get(&entry_id).is_some() {
                continue;
            }
            info!("[{}] Record was removed, unloading", entry_id);
            match self.unload(&entry_id).await {
                Ok(()) => unloaded.push(entry_id),
                Err(e) => warn!("[{}] Unload failed: {}", entry_id, e),
            }
        }
        unloaded
    }

    pub fn refresh(&self, entry_id: &str) -> Result<(), IntegrationError> {
        self.engine
            .send_command(entry_id, ToIntegrationMessage::Refresh)
    }

    /// Apply a record's (possibly changed) polling interval to its running station
    pub fn apply_options(&self, record: &ConfigRecord) -> Result<(), IntegrationError> {
        self.engine.send_command(
            &record.entry_id,
            ToIntegrationMessage::SetPollingInterval(
                record.options.polling_interval.as_duration(),
            ),
        )
    }
}
