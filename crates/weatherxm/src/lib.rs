pub mod api;
pub mod config;
pub mod engine;
pub mod entry;
pub mod flow;
pub mod integrations;
pub mod provider;
pub mod runtime;
pub mod store;

pub use config::Config;
pub use config::LogLevel;
pub use engine::Engine;
pub use engine::State;
pub use entry::ConfigRecord;
pub use runtime::Runtime;
pub use store::ConfigStore;
