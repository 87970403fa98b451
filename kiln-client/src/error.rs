//! Error types for the Kiln clients

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when talking to the broker or the object store
#[derive(Debug, Error)]
pub enum ClientError {
    /// AMQP protocol or connection failure
    #[error("broker error: {0}")]
    Broker(#[from] lapin::Error),

    /// The broker negatively acknowledged a published message
    #[error("broker rejected publish to '{exchange}' with routing key '{routing_key}'")]
    PublishRejected {
        /// Target exchange (empty for the default exchange)
        exchange: String,
        /// Routing key used for the publish
        routing_key: String,
    },

    /// Object store request failed
    #[error("object store error: {0}")]
    Storage(String),

    /// Failed to encode a message body
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Client settings are unusable
    #[error("invalid client configuration: {0}")]
    InvalidConfig(String),
}

impl ClientError {
    /// Create a storage error from any displayable cause
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }
}
