//! Entity abstraction
//!
//! All entities exposed to the engine implement the Entity trait.

use super::device::Device;
use super::state::EntityState;

/// Base trait that all entities must implement
pub trait Entity: Send + Sync {
    /// Identity that must stay stable across restarts
    fn unique_id(&self) -> &str;

    /// Entity name as shown to the operator
    fn name(&self) -> &str;

    /// Return the platform type of this entity (e.g. "sensor")
    fn platform(&self) -> &'static str;

    /// Device this entity belongs to, if any
    fn device(&self) -> Option<&Device> {
        None
    }

    /// Serialize current state to JSON for Engine storage
    fn state_json(&self) -> serde_json::Value;
}

impl EntityState {
    /// Capture the full registration record of an entity owned by `integration`.
    pub fn from_entity(entity: &dyn Entity, integration: &str) -> Self {
        Self {
            unique_id: entity.unique_id().to_string(),
            name: entity.name().to_string(),
            platform: entity.platform(),
            integration: integration.to_string(),
            device: entity.device().cloned(),
            state: entity.state_json(),
        }
    }
}
