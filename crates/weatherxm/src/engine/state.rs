use std::collections::BTreeMap;

use serde::Serialize;

use super::device::Device;

/// Registry record and current state of one entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityState {
    pub unique_id: String,
    pub name: String,
    pub platform: &'static str,

    /// Name of the integration that owns the entity
    pub integration: String,

    pub device: Option<Device>,

    /// Platform-specific state as produced by `Entity::state_json`
    pub state: serde_json::Value,
}

/// Centralized snapshot of the entire engine state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct State {
    /// Entities keyed by unique id
    pub entities: BTreeMap<String, EntityState>,
}

impl State {
    pub fn entity(&self, unique_id: &str) -> Option<&EntityState> {
        self.entities.get(unique_id)
    }

    /// Entities owned by one integration
    pub fn entities_of<'a>(
        &'a self,
        integration: &'a str,
    ) -> impl Iterator<Item = &'a EntityState> + 'a {
        self.entities
            .values()
            .filter(move |e| e.integration == integration)
    }
}
