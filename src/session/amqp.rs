//! RabbitMQ session
//!
//! One `lapin` connection and one channel. Topology calls, consumer setup and
//! publishes all go through the channel mutex, so concurrent `send`s on the
//! same session serialize on it. Settling deliveries does not take the lock:
//! each delivery carries its own acker.
//!
//! A failed passive declare makes the broker close the channel, so after a
//! `Topology` error the session can only be closed.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::acker::Acker;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    BasicRejectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::uri::AMQPUri;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::BrokerSettings;
use crate::session::{Acknowledger, Broker, Delivery, DeliveryStream, RetryPolicy};
use crate::utils::{FleetError, Result};

pub struct AmqpSession {
    connection: Connection,
    channel: Mutex<Channel>,
    endpoint: String,
    closed: AtomicBool,
}

impl AmqpSession {
    /// Open the connection and its channel. Any transport or authentication
    /// failure is a `Connection` error naming the endpoint.
    pub async fn connect(settings: &BrokerSettings) -> Result<Self> {
        let endpoint = settings.endpoint();
        let connection_error = |e: lapin::Error| {
            error!("Broker connection to {} failed: {e}", endpoint);
            FleetError::Connection {
                endpoint: endpoint.clone(),
                reason: e.to_string(),
            }
        };

        let connection =
            Connection::connect_uri(amqp_uri(settings), ConnectionProperties::default())
                .await
                .map_err(connection_error)?;
        let channel = connection
            .create_channel()
            .await
            .map_err(connection_error)?;
        channel
            .basic_qos(settings.prefetch, BasicQosOptions::default())
            .await
            .map_err(connection_error)?;

        info!(
            "Connected to broker at {} (vhost '{}', heartbeat {}s)",
            endpoint, settings.vhost, settings.heartbeat_secs
        );

        Ok(Self {
            connection,
            channel: Mutex::new(channel),
            endpoint,
            closed: AtomicBool::new(false),
        })
    }

    /// `connect`, retried on `Connection` errors according to `policy`.
    pub async fn connect_with_retry(
        settings: &BrokerSettings,
        policy: &RetryPolicy,
    ) -> Result<Self> {
        policy.run(|| Self::connect(settings)).await
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(FleetError::SessionClosed);
        }
        Ok(())
    }
}

fn amqp_uri(settings: &BrokerSettings) -> AMQPUri {
    let mut uri = AMQPUri::default();
    uri.authority.host = settings.host.clone();
    uri.authority.port = settings.port;
    uri.authority.userinfo.username = settings.username.clone();
    uri.authority.userinfo.password = settings.password.clone();
    uri.vhost = settings.vhost.clone();
    uri.query.heartbeat = Some(settings.heartbeat_secs);
    uri
}

#[async_trait]
impl Broker for AmqpSession {
    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        self.ensure_open()?;
        let topology_error = |e: lapin::Error| {
            error!("Topology check failed for queue '{queue}' on exchange '{exchange}': {e}");
            FleetError::Topology {
                queue: queue.to_string(),
                exchange: exchange.to_string(),
                reason: e.to_string(),
            }
        };

        let channel = self.channel.lock().await;
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    passive: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(topology_error)?;
        channel
            .exchange_declare(
                exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    passive: true,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(topology_error)?;
        channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(topology_error)?;

        debug!("Bound '{queue}' to '{exchange}' with key '{routing_key}'");
        Ok(())
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream> {
        self.ensure_open()?;

        let consumer = {
            let channel = self.channel.lock().await;
            channel
                .basic_consume(
                    queue,
                    consumer_tag,
                    BasicConsumeOptions {
                        no_ack: false,
                        ..BasicConsumeOptions::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| FleetError::Consume {
                    queue: queue.to_string(),
                    reason: e.to_string(),
                })?
        };

        debug!("Consumer {consumer_tag} registered on '{queue}'");

        let queue = queue.to_string();
        let stream = consumer.map(move |item| match item {
            Ok(delivery) => Ok(Delivery::new(
                delivery.routing_key.as_str().to_string(),
                delivery.data,
                delivery.redelivered,
                Box::new(AmqpAcker(delivery.acker)),
            )),
            Err(e) => Err(FleetError::Consume {
                queue: queue.clone(),
                reason: e.to_string(),
            }),
        });

        Ok(stream.boxed())
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<()> {
        self.ensure_open()?;
        let channel = self.channel.lock().await;
        channel
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await
            .map_err(|e| FleetError::Cancel {
                consumer_tag: consumer_tag.to_string(),
                reason: e.to_string(),
            })?;

        debug!("Consumer {consumer_tag} cancelled");
        Ok(())
    }

    async fn publish(&self, exchange: &str, routing_key: &str, body: &[u8]) -> Result<()> {
        self.ensure_open()?;
        let channel = self.channel.lock().await;

        // The returned confirm is dropped: commands are fire-and-forget.
        channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                BasicProperties::default().with_content_type("application/json".into()),
            )
            .await
            .map_err(|e| FleetError::Publish {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                reason: e.to_string(),
            })?;

        debug!("Published {} bytes to '{exchange}' with key '{routing_key}'", body.len());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let channel = self.channel.lock().await;
        if let Err(e) = channel.close(200, "session closed").await {
            warn!("Channel close on {} failed: {e}", self.endpoint);
        }
        if let Err(e) = self.connection.close(200, "session closed").await {
            warn!("Connection close on {} failed: {e}", self.endpoint);
        }

        info!("Closed broker session to {}", self.endpoint);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct AmqpAcker(Acker);

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(&self) -> Result<()> {
        self.0
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(|e| FleetError::Acknowledge {
                reason: e.to_string(),
            })
    }

    async fn reject(&self, requeue: bool) -> Result<()> {
        self.0
            .reject(BasicRejectOptions { requeue })
            .await
            .map(|_| ())
            .map_err(|e| FleetError::Acknowledge {
                reason: e.to_string(),
            })
    }
}
