//! Type-safe message system
//!
//! Messages are split by direction to enforce correct usage at compile time:
//! - `FromIntegrationMessage`: Events from integrations to the engine
//! - `ToIntegrationMessage`: Commands from the engine to integrations

use std::time::Duration;

use super::state::EntityState;

/// Messages FROM integrations TO the engine (events/state updates)
#[derive(Debug, Clone)]
pub enum FromIntegrationMessage {
    /// A batch of entities was created. Unique ids the engine already knows are skipped.
    EntitiesDiscovered {
        integration_name: String,
        entities: Vec<EntityState>,
    },

    /// Entities were removed (integration unloaded, etc.)
    EntitiesRemoved { unique_ids: Vec<String> },

    /// New state for a batch of entities, applied as one update
    EntityStatesChanged {
        states: Vec<(String, serde_json::Value)>,
    },
}

/// Messages FROM the engine TO integrations (commands)
#[derive(Debug, Clone, PartialEq)]
pub enum ToIntegrationMessage {
    /// Poll the provider now instead of waiting for the next tick
    Refresh,

    /// Reschedule periodic polling
    SetPollingInterval(Duration),
}
