mod device;
#[allow(clippy::module_inception)]
mod engine;
mod entity;
mod integration;
mod message;
mod state;

pub use device::Device;
pub use engine::Engine;
pub use entity::Entity;
pub use integration::BoxError;
pub use integration::FromIntegrationSender;
pub use integration::Integration;
pub use integration::IntegrationError;
pub use message::FromIntegrationMessage;
pub use message::ToIntegrationMessage;
pub use state::EntityState;
pub use state::State;
