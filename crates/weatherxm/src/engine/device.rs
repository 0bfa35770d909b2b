use serde::Serialize;

/// A device in the engine.
///
/// A device represents a physical or logical device that groups one or more entities.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    /// (domain, id) pairs identifying the device
    pub identifiers: Vec<(String, String)>,
    pub name: String,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub sw_version: Option<String>,
}

impl Device {
    pub fn new(name: String) -> Self {
        Self {
            identifiers: Vec::new(),
            name,
            manufacturer: None,
            model: None,
            sw_version: None,
        }
    }

    pub fn with_identifier(mut self, domain: &str, id: String) -> Self {
        let identifier = (domain.to_string(), id);
        if !self.identifiers.contains(&identifier) {
            self.identifiers.push(identifier);
        }
        self
    }
}
