//! Queue consumer
//!
//! Receives build commands and settles every message exactly once:
//!
//! - empty body: acked, nothing else happens
//! - undecodable body: forwarded verbatim to the dead-letter exchange, then acked
//! - decoded command: RUNNING, pipeline, terminal status, then ack
//! - anything failing outside the build result: nack with requeue
//!
//! The ack for a decoded command is only sent after its terminal status is
//! confirmed by the broker. A crash before that point means redelivery and a
//! duplicate RUNNING event, never a lost terminal event.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use futures::{FutureExt, Stream, StreamExt};
use kiln_client::InboundDelivery;
use kiln_core::domain::build::BuildCommand;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::repository::DeadLetterRepository;
use crate::service::{BuildService, StatusReporter};

/// How a message left the consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acked,
    DeadLettered,
    Requeued,
}

/// A received message that can be settled with the broker
#[async_trait]
pub trait InboundMessage: Send + Sync {
    fn body(&self) -> &[u8];

    fn routing_key(&self) -> &str;

    /// True when this message was delivered before and never acked
    fn redelivered(&self) -> bool;

    async fn ack(&self) -> Result<()>;

    async fn requeue(&self) -> Result<()>;
}

#[async_trait]
impl InboundMessage for InboundDelivery {
    fn body(&self) -> &[u8] {
        InboundDelivery::body(self)
    }

    fn routing_key(&self) -> &str {
        InboundDelivery::routing_key(self)
    }

    fn redelivered(&self) -> bool {
        InboundDelivery::redelivered(self)
    }

    async fn ack(&self) -> Result<()> {
        Ok(InboundDelivery::ack(self).await?)
    }

    async fn requeue(&self) -> Result<()> {
        Ok(InboundDelivery::requeue(self).await?)
    }
}

/// Drives the build pipeline for each received command
pub struct QueueConsumer {
    builds: Arc<dyn BuildService>,
    reporter: StatusReporter,
    dead_letters: Arc<dyn DeadLetterRepository>,
}

impl QueueConsumer {
    pub fn new(
        builds: Arc<dyn BuildService>,
        reporter: StatusReporter,
        dead_letters: Arc<dyn DeadLetterRepository>,
    ) -> Self {
        Self {
            builds,
            reporter,
            dead_letters,
        }
    }

    /// Processes one message and settles it with the broker
    ///
    /// Returns `Err` only when the message could not be settled at all,
    /// which means the channel is gone.
    pub async fn handle<M: InboundMessage>(&self, message: &M) -> Result<Settlement> {
        match self.process(message).await {
            Ok(settlement) => Ok(settlement),
            Err(e) => {
                warn!("Message processing failed, requeueing: {:#}", e);
                message
                    .requeue()
                    .await
                    .context("Failed to requeue message")?;
                Ok(Settlement::Requeued)
            }
        }
    }

    async fn process<M: InboundMessage>(&self, message: &M) -> Result<Settlement> {
        let body = message.body();

        if body.is_empty() {
            info!("Received empty message, acknowledging");
            message.ack().await?;
            return Ok(Settlement::Acked);
        }

        let command: BuildCommand = match serde_json::from_slice(body) {
            Ok(command) => command,
            Err(e) => {
                warn!(
                    "Undecodable build command ({} bytes): {}; dead-lettering",
                    body.len(),
                    e
                );
                self.dead_letters
                    .dead_letter(message.routing_key(), body)
                    .await
                    .context("Failed to dead-letter undecodable message")?;
                message.ack().await?;
                return Ok(Settlement::DeadLettered);
            }
        };

        info!(
            "Processing build {} for site {} ({}@{}, redelivered={})",
            command.id,
            command.site_id,
            command.repository_url,
            command.branch,
            message.redelivered()
        );

        self.reporter
            .running(&command)
            .await
            .context("Failed to publish RUNNING status")?;

        let result = AssertUnwindSafe(self.builds.execute(&command))
            .catch_unwind()
            .await
            .map_err(|_| anyhow!("build pipeline panicked for build {}", command.id))?
            .with_context(|| format!("Build {} aborted", command.id))?;

        self.reporter
            .finished(&command, &result)
            .await
            .context("Failed to publish terminal status")?;

        message
            .ack()
            .await
            .context("Failed to acknowledge message")?;

        debug!("Acknowledged build {} ({})", command.id, result.status());

        Ok(Settlement::Acked)
    }

    /// Consumes `deliveries` until the stream ends or yields an error
    ///
    /// Each message runs in its own task; the broker's prefetch limit bounds
    /// how many are in flight. In-flight messages are always allowed to
    /// finish before this returns, so their working directories are never
    /// shared with a redelivered copy.
    pub async fn run<S, M, E>(self: Arc<Self>, mut deliveries: S) -> Result<()>
    where
        S: Stream<Item = std::result::Result<M, E>> + Unpin,
        M: InboundMessage + 'static,
        E: Into<anyhow::Error>,
    {
        let mut in_flight = JoinSet::new();

        let outcome = loop {
            tokio::select! {
                delivery = deliveries.next() => match delivery {
                    Some(Ok(message)) => {
                        let consumer = Arc::clone(&self);
                        in_flight.spawn(async move { consumer.handle(&message).await });
                    }
                    Some(Err(e)) => {
                        let e: anyhow::Error = e.into();
                        break Err(e.context("Delivery stream failed"));
                    }
                    None => {
                        info!("Delivery stream ended");
                        break Ok(());
                    }
                },
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = settled(joined) {
                        break Err(e);
                    }
                }
            }
        };

        if !in_flight.is_empty() {
            info!("Waiting for {} in-flight build(s)", in_flight.len());
        }
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = settled(joined) {
                error!("In-flight message left unsettled: {:#}", e);
            }
        }

        outcome
    }
}

fn settled(joined: std::result::Result<Result<Settlement>, JoinError>) -> Result<Settlement> {
    let settlement = joined.context("Message task failed")??;
    debug!("Message settled: {:?}", settlement);
    Ok(settlement)
}
