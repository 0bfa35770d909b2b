use std::error::Error;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::message::FromIntegrationMessage;
use super::message::ToIntegrationMessage;

/// Boxed error type returned across the integration boundary
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Channel types for messages FROM integrations TO the engine
/// These are bounded channels to provide backpressure
pub type FromIntegrationSender = mpsc::Sender<FromIntegrationMessage>;
pub type FromIntegrationReceiver = mpsc::Receiver<FromIntegrationMessage>;

/// Channel types for messages FROM the engine TO integrations (unbounded - engine must not block)
pub type ToIntegrationSender = mpsc::UnboundedSender<ToIntegrationMessage>;

#[derive(Debug, thiserror::Error)]
pub enum IntegrationError {
    #[error("Integration '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("Integration '{0}' is not registered")]
    NotRegistered(String),

    #[error("Integration '{name}' setup failed: {source}")]
    Setup {
        name: String,
        #[source]
        source: BoxError,
    },

    #[error("Integration '{0}' task stopped unexpectedly")]
    TaskFailed(String),
}

/// Integration trait that all integrations must implement
#[async_trait]
pub trait Integration: Send + Sync {
    /// Get the name/identifier of this integration
    fn name(&self) -> &str;

    /// Set up the integration - register entities, start timers, etc.
    ///
    /// The integration receives a sender to report events back to the engine
    /// (discovery, state changes, etc.)
    async fn setup(&mut self, tx: FromIntegrationSender) -> Result<(), BoxError>;

    /// Handle a command from the engine
    async fn handle_message(&mut self, msg: ToIntegrationMessage) -> Result<(), BoxError>;

    /// Shut down the integration gracefully
    ///
    /// Timers must be stopped and owned entities removed from the engine.
    async fn shutdown(&mut self) -> Result<(), BoxError>;
}
