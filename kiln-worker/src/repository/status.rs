//! Status repository
//!
//! Publishes build status events to the results queue.

use anyhow::{Context, Result};
use async_trait::async_trait;
use kiln_client::Publisher;
use kiln_core::dto::status::BuildStatusUpdate;

/// Repository trait for publishing status events
#[async_trait]
pub trait StatusRepository: Send + Sync {
    /// Publishes one status event
    ///
    /// Returns only after the broker has confirmed the event.
    async fn publish(&self, update: &BuildStatusUpdate) -> Result<()>;
}

/// AMQP implementation of StatusRepository
///
/// Publishes through the default exchange straight to the results queue.
pub struct AmqpStatusRepository {
    publisher: Publisher,
    results_queue: String,
}

impl AmqpStatusRepository {
    pub fn new(publisher: Publisher, results_queue: String) -> Self {
        Self {
            publisher,
            results_queue,
        }
    }
}

#[async_trait]
impl StatusRepository for AmqpStatusRepository {
    async fn publish(&self, update: &BuildStatusUpdate) -> Result<()> {
        self.publisher
            .publish_json("", &self.results_queue, update)
            .await
            .with_context(|| {
                format!(
                    "Failed to publish {} status for build {}",
                    update.status, update.build_id
                )
            })
    }
}
