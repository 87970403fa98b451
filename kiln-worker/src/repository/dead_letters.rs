//! Dead-letter repository
//!
//! Parks command bodies that cannot be decoded so they leave the commands
//! queue for good.

use anyhow::{Context, Result};
use async_trait::async_trait;
use kiln_client::Publisher;

/// Repository trait for dead-lettering undecodable messages
#[async_trait]
pub trait DeadLetterRepository: Send + Sync {
    /// Publishes `body` unchanged, keyed by the original routing key
    async fn dead_letter(&self, routing_key: &str, body: &[u8]) -> Result<()>;
}

/// AMQP implementation of DeadLetterRepository
pub struct AmqpDeadLetterRepository {
    publisher: Publisher,
    exchange: String,
    default_routing_key: String,
}

impl AmqpDeadLetterRepository {
    /// # Arguments
    /// * `exchange` - Dead-letter exchange name
    /// * `default_routing_key` - Used when a delivery carries no routing key
    pub fn new(publisher: Publisher, exchange: String, default_routing_key: String) -> Self {
        Self {
            publisher,
            exchange,
            default_routing_key,
        }
    }
}

#[async_trait]
impl DeadLetterRepository for AmqpDeadLetterRepository {
    async fn dead_letter(&self, routing_key: &str, body: &[u8]) -> Result<()> {
        let routing_key = dead_letter_routing_key(routing_key, &self.default_routing_key);

        self.publisher
            .publish(
                &self.exchange,
                routing_key,
                body,
                "application/octet-stream",
            )
            .await
            .with_context(|| {
                format!(
                    "Failed to dead-letter message to '{}' with routing key '{}'",
                    self.exchange, routing_key
                )
            })
    }
}

/// Routing key for a dead letter: the delivery's own key, or the fallback when it has none
fn dead_letter_routing_key<'a>(routing_key: &'a str, fallback: &'a str) -> &'a str {
    if routing_key.is_empty() {
        fallback
    } else {
        routing_key
    }
}
