//! AMQP broker client
//!
//! Wraps a single `lapin` connection and channel. The channel is cheap to
//! clone and safe to use from concurrent tasks, so one `BrokerClient` serves
//! every in-flight build of a worker.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::uri::{AMQPAuthority, AMQPUri, AMQPUserInfo};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{ClientError, Result};

/// Persistent delivery mode for published messages
const PERSISTENT: u8 = 2;

/// Connection settings for the broker
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub vhost: String,
}

impl BrokerSettings {
    /// Connection URI for these settings
    pub fn amqp_uri(&self) -> AMQPUri {
        AMQPUri {
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: self.username.clone(),
                    password: self.password.clone(),
                },
                host: self.host.clone(),
                port: self.port,
            },
            vhost: self.vhost.clone(),
            ..AMQPUri::default()
        }
    }
}

/// Queue and exchange names the worker relies on
#[derive(Debug, Clone)]
pub struct Topology {
    pub commands_queue: String,
    pub results_queue: String,
}

impl Topology {
    pub fn new(commands_queue: impl Into<String>, results_queue: impl Into<String>) -> Self {
        Self {
            commands_queue: commands_queue.into(),
            results_queue: results_queue.into(),
        }
    }

    /// Exchange that receives undecodable command bodies
    pub fn dead_letter_exchange(&self) -> String {
        format!("{}.dlx", self.commands_queue)
    }

    /// Queue bound to the dead-letter exchange by the commands queue name
    pub fn dead_letter_queue(&self) -> String {
        format!("{}.dlq", self.commands_queue)
    }
}

/// Broker connection with a confirm-mode channel
pub struct BrokerClient {
    connection: Connection,
    channel: Channel,
}

impl BrokerClient {
    /// Opens a connection and a channel with publisher confirms enabled
    pub async fn connect(settings: &BrokerSettings) -> Result<Self> {
        info!(
            "Connecting to broker at {}:{} (vhost '{}')",
            settings.host, settings.port, settings.vhost
        );

        let connection =
            Connection::connect_uri(settings.amqp_uri(), ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;

        debug!("Broker channel {} opened", channel.id());

        Ok(Self {
            connection,
            channel,
        })
    }

    /// Declares the durable queues and the dead-letter exchange/queue pair
    pub async fn declare_topology(&self, topology: &Topology) -> Result<()> {
        let durable_queue = QueueDeclareOptions {
            durable: true,
            ..QueueDeclareOptions::default()
        };

        self.channel
            .queue_declare(&topology.commands_queue, durable_queue, FieldTable::default())
            .await?;
        self.channel
            .queue_declare(&topology.results_queue, durable_queue, FieldTable::default())
            .await?;

        let dead_letter_exchange = topology.dead_letter_exchange();
        let dead_letter_queue = topology.dead_letter_queue();

        self.channel
            .exchange_declare(
                &dead_letter_exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        self.channel
            .queue_declare(&dead_letter_queue, durable_queue, FieldTable::default())
            .await?;
        self.channel
            .queue_bind(
                &dead_letter_queue,
                &dead_letter_exchange,
                &topology.commands_queue,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        debug!(
            "Declared queues '{}', '{}' and dead-letter pair '{}' -> '{}'",
            topology.commands_queue,
            topology.results_queue,
            dead_letter_exchange,
            dead_letter_queue
        );

        Ok(())
    }

    /// Starts consuming a queue with at most `prefetch` unacknowledged messages
    pub async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        prefetch: u16,
    ) -> Result<DeliveryStream> {
        self.channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await?;

        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(
            "Consuming '{}' as '{}' (prefetch {})",
            queue, consumer_tag, prefetch
        );

        Ok(DeliveryStream { consumer })
    }

    /// Returns a publisher sharing this client's channel
    pub fn publisher(&self) -> Publisher {
        Publisher {
            channel: self.channel.clone(),
        }
    }

    /// Closes the connection
    pub async fn close(&self) -> Result<()> {
        self.connection.close(200, "worker shutdown").await?;
        Ok(())
    }
}

/// Publishes persistent messages and waits for the broker's confirm
#[derive(Clone)]
pub struct Publisher {
    channel: Channel,
}

impl Publisher {
    /// Publishes raw bytes; succeeds only once the broker acks the message
    pub async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        content_type: &str,
    ) -> Result<()> {
        let properties = BasicProperties::default()
            .with_delivery_mode(PERSISTENT)
            .with_content_type(content_type.into());

        let confirmation = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                properties,
            )
            .await?
            .await?;

        if confirmation.is_nack() {
            return Err(ClientError::PublishRejected {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
            });
        }

        Ok(())
    }

    /// Encodes a value as JSON and publishes it
    pub async fn publish_json<T: Serialize>(
        &self,
        exchange: &str,
        routing_key: &str,
        value: &T,
    ) -> Result<()> {
        let body = serde_json::to_vec(value)?;
        self.publish(exchange, routing_key, &body, "application/json")
            .await
    }
}

/// Stream of deliveries from a consumer
///
/// Ends once the broker cancels the consumer or the channel closes.
pub struct DeliveryStream {
    consumer: Consumer,
}

impl Stream for DeliveryStream {
    type Item = Result<InboundDelivery>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.consumer.poll_next_unpin(cx).map(|item| {
            item.map(|delivery| {
                delivery
                    .map(|delivery| InboundDelivery { delivery })
                    .map_err(ClientError::from)
            })
        })
    }
}

/// One message received from the broker
pub struct InboundDelivery {
    delivery: Delivery,
}

impl InboundDelivery {
    pub fn body(&self) -> &[u8] {
        &self.delivery.data
    }

    pub fn routing_key(&self) -> &str {
        self.delivery.routing_key.as_str()
    }

    /// True when the broker delivered this message before
    pub fn redelivered(&self) -> bool {
        self.delivery.redelivered
    }

    /// Acknowledges the message; the broker forgets it
    pub async fn ack(&self) -> Result<()> {
        self.delivery
            .acker
            .ack(BasicAckOptions::default())
            .await?;
        Ok(())
    }

    /// Negatively acknowledges the message so the broker redelivers it
    pub async fn requeue(&self) -> Result<()> {
        self.delivery
            .acker
            .nack(BasicNackOptions {
                multiple: false,
                requeue: true,
            })
            .await?;
        Ok(())
    }
}
