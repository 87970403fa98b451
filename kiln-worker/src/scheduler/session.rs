//! AMQP consumer session
//!
//! One session is one broker connection: declare the topology, consume the
//! commands queue until the stream ends, then close.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use kiln_client::BrokerClient;
use tracing::{debug, info};

use crate::config::Config;
use crate::repository::{AmqpDeadLetterRepository, AmqpStatusRepository};
use crate::scheduler::consumer::QueueConsumer;
use crate::scheduler::supervisor::Session;
use crate::service::{BuildService, StatusReporter};

/// Session backed by a fresh broker connection per cycle
pub struct AmqpSession {
    config: Config,
    builds: Arc<dyn BuildService>,
}

impl AmqpSession {
    pub fn new(config: Config, builds: Arc<dyn BuildService>) -> Self {
        Self { config, builds }
    }

    fn consumer(&self, client: &BrokerClient) -> QueueConsumer {
        let topology = self.config.topology();
        let publisher = client.publisher();

        let statuses = Arc::new(AmqpStatusRepository::new(
            publisher.clone(),
            topology.results_queue.clone(),
        ));
        let dead_letters = Arc::new(AmqpDeadLetterRepository::new(
            publisher,
            topology.dead_letter_exchange(),
            topology.commands_queue.clone(),
        ));

        QueueConsumer::new(
            Arc::clone(&self.builds),
            StatusReporter::new(statuses),
            dead_letters,
        )
    }

    async fn consume(&self, client: &BrokerClient) -> Result<()> {
        let topology = self.config.topology();
        client
            .declare_topology(&topology)
            .await
            .context("Failed to declare queues")?;

        let deliveries = client
            .consume(
                &topology.commands_queue,
                &self.config.worker_id,
                self.config.prefetch_count,
            )
            .await
            .context("Failed to start consuming")?;

        info!(
            "Worker {} waiting for build commands on '{}'",
            self.config.worker_id, topology.commands_queue
        );

        let consumer = Arc::new(self.consumer(client));
        consumer.run(deliveries).await
    }
}

#[async_trait]
impl Session for AmqpSession {
    async fn run(&self) -> Result<()> {
        let client = BrokerClient::connect(&self.config.broker)
            .await
            .context("Failed to connect to broker")?;

        let outcome = self.consume(&client).await;

        if let Err(e) = client.close().await {
            // Usually the connection is already gone
            debug!("Closing broker connection failed: {}", e);
        }

        outcome
    }
}
