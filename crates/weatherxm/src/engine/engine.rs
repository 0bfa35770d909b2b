use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::PoisonError;

use arc_swap::ArcSwap;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::integration::FromIntegrationReceiver;
use super::integration::FromIntegrationSender;
use super::integration::Integration;
use super::integration::IntegrationError;
use super::integration::ToIntegrationSender;
use super::message::FromIntegrationMessage;
use super::message::ToIntegrationMessage;
use super::state::State;

/// Capacity for the integration→engine message channel
/// Provides backpressure when integrations send faster than the engine can process
const FROM_INTEGRATION_CHANNEL_SIZE: usize = 1024;

struct IntegrationHandle {
    tx: ToIntegrationSender,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Registry {
    running: HashMap<String, IntegrationHandle>,
    /// Names whose setup is in progress
    starting: HashSet<String>,
}

/// Holds a name in `Registry::starting` until dropped
struct Claim<'a> {
    engine: &'a Engine,
    name: String,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.engine.registry().starting.remove(&self.name);
    }
}

/// Entity registry and state holder
///
/// This structure owns the running integrations, applies the events they send
/// and maintains a view of the world with State.
pub struct Engine {
    /// Centralized state snapshot (readers load the Arc, writer stores a new one)
    state: ArcSwap<State>,

    /// Running integrations keyed by name
    registry: std::sync::Mutex<Registry>,

    /// Receive messages from integrations (events)
    message_rx: Mutex<FromIntegrationReceiver>,

    /// Sender for integrations to report events back to the engine
    message_tx: FromIntegrationSender,
}

impl Engine {
    /// Create a new Engine instance
    pub fn new() -> Self {
        let (message_tx, message_rx) = mpsc::channel(FROM_INTEGRATION_CHANNEL_SIZE);
        Self {
            state: ArcSwap::new(Arc::default()),
            registry: std::sync::Mutex::new(Registry::default()),
            message_rx: Mutex::new(message_rx),
            message_tx,
        }
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve `name` for a registration in progress
    fn claim(&self, name: &str) -> Result<Claim<'_>, IntegrationError> {
        let mut registry = self.registry();
        if registry.running.contains_key(name) || !registry.starting.insert(name.to_string()) {
            return Err(IntegrationError::AlreadyRegistered(name.to_string()));
        }
        Ok(Claim {
            engine: self,
            name: name.to_string(),
        })
    }

    /// Register an integration with the engine
    ///
    /// The name is claimed before setup runs, so a second registration under
    /// the same name fails fast instead of publishing entities of its own.
    /// A failed setup is returned to the caller and nothing is spawned. On
    /// success the integration is moved into a background task that serves
    /// commands until it is unregistered.
    pub async fn register_integration(
        &self,
        mut integration: Box<dyn Integration>,
    ) -> Result<(), IntegrationError> {
        let name = integration.name().to_string();
        let _claim = self.claim(&name)?;

        integration
            .setup(self.message_tx.clone())
            .await
            .map_err(|source| IntegrationError::Setup {
                name: name.clone(),
                source,
            })?;

        let (to_integration_tx, mut to_integration_rx) = mpsc::unbounded_channel();
        let task_name = name.clone();
        let task = tokio::spawn(async move {
            // Process commands until the engine drops our sender
            while let Some(msg) = to_integration_rx.recv().await {
                if let Err(e) = integration.handle_message(msg).await {
                    warn!(
                        "Integration '{}' failed to handle message: {}",
                        task_name, e
                    );
                }
            }

            if let Err(e) = integration.shutdown().await {
                warn!("Integration '{}' shutdown failed: {}", task_name, e);
            }
        });

        self.registry().running.insert(
            name.clone(),
            IntegrationHandle {
                tx: to_integration_tx,
                task,
            },
        );
        info!("Integration '{}' registered", name);

        Ok(())
    }

    /// Stop an integration and wait for its shutdown to finish
    pub async fn unregister_integration(&self, name: &str) -> Result<(), IntegrationError> {
        let IntegrationHandle { tx, task } = self
            .registry()
            .running
            .remove(name)
            .ok_or_else(|| IntegrationError::NotRegistered(name.to_string()))?;

        // Closing the command channel ends the integration task's loop
        drop(tx);
        task.await
            .map_err(|_| IntegrationError::TaskFailed(name.to_string()))?;

        info!("Integration '{}' unregistered", name);
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.registry().running.contains_key(name)
    }

    pub fn integration_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry().running.keys().cloned().collect();
        names.sort();
        names
    }

    /// Send a command to an integration
    pub fn send_command(
        &self,
        name: &str,
        msg: ToIntegrationMessage,
    ) -> Result<(), IntegrationError> {
        let registry = self.registry();
        let handle = registry
            .running
            .get(name)
            .ok_or_else(|| IntegrationError::NotRegistered(name.to_string()))?;

        handle
            .tx
            .send(msg)
            .map_err(|_| IntegrationError::TaskFailed(name.to_string()))
    }

    /// Run the engine's main event loop
    ///
    /// Processes incoming events from integrations and updates state.
    pub async fn run(&self) {
        info!("Engine starting");

        let mut rx = self.message_rx.lock().await;
        while let Some(msg) = rx.recv().await {
            self.handle_event(msg);
        }

        info!("Engine shutting down");
    }

    /// Apply every event already queued, without waiting for more
    #[cfg(test)]
    pub(crate) async fn process_pending(&self) -> usize {
        let mut rx = self.message_rx.lock().await;
        let mut handled = 0;
        while let Ok(msg) = rx.try_recv() {
            self.handle_event(msg);
            handled += 1;
        }
        handled
    }

    /// Get a snapshot of the current engine state.
    ///
    /// Clones the `Arc` (atomic refcount bump), essentially free.
    pub fn state_snapshot(&self) -> Arc<State> {
        self.state.load_full()
    }

    /// Handle an event from an integration
    fn handle_event(&self, msg: FromIntegrationMessage) {
        match msg {
            FromIntegrationMessage::EntitiesDiscovered {
                integration_name,
                entities,
            } => {
                let mut state = State::clone(&self.state.load());
                for entity in entities {
                    if state.entities.contains_key(&entity.unique_id) {
                        debug!(
                            "Entity {} already registered, not adding again",
                            entity.unique_id
                        );
                        continue;
                    }
                    info!(
                        "Entity discovered: {} ({}) from {}",
                        entity.unique_id, entity.name, integration_name
                    );
                    state.entities.insert(entity.unique_id.clone(), entity);
                }
                self.state.store(Arc::new(state));
            }
            FromIntegrationMessage::EntitiesRemoved { unique_ids } => {
                let mut state = State::clone(&self.state.load());
                for unique_id in unique_ids {
                    if state.entities.remove(&unique_id).is_some() {
                        info!("Entity removed: {}", unique_id);
                    }
                }
                self.state.store(Arc::new(state));
            }
            FromIntegrationMessage::EntityStatesChanged { states } => {
                let mut state = State::clone(&self.state.load());
                for (unique_id, value) in states {
                    match state.entities.get_mut(&unique_id) {
                        Some(entity) => {
                            debug!("State changed: {} -> {}", unique_id, value);
                            entity.state = value;
                        }
                        None => warn!("State update for unknown entity: {}", unique_id),
                    }
                }
                // One store per batch so readers never see a half-applied update
                self.state.store(Arc::new(state));
            }
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
