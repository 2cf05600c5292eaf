//! Request-serving side: services, handlers and one consuming session.
//!
//! A [`Service`] describes what to consume ([`ServiceTopology`]) and how to
//! obtain a [`Handler`] for a session; usually that means connecting to the
//! service's database. A [`ServerSession`] is one broker connection serving
//! one handler:
//!
//! ```text
//! connect ─▶ declare topology, prefetch=1 ─▶ consume ─▶ serve (one message at a time)
//! ```
//!
//! For every delivery the session runs the handler, publishes the response
//! envelope to `reply_to` when both `reply_to` and `correlation_id` are
//! present, and only then acknowledges. Handler failures become `ERROR`
//! envelopes and never end the session; transport failures do.

use crate::metrics::ServerMetrics;
use broker_rpc_core::broker::{AckMode, BoxFuture, Broker, BrokerChannel, Consumer, Delivery};
use broker_rpc_core::envelope::ResponseEnvelope;
use broker_rpc_core::error::RpcError;
use broker_rpc_core::topology::{RoutingKey, ServiceTopology};
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

/// Unacknowledged deliveries a service may hold at once.
pub const PREFETCH_COUNT: u16 = 1;

/// Business logic answering requests.
pub trait Handler: Send + Sync {
    /// Handle one request and return the `data` of an `OK` reply.
    ///
    /// # Errors
    ///
    /// Any error is sent back as an `ERROR` envelope. A
    /// [`RpcError::Connection`] additionally ends the session, so the
    /// supervisor reconnects the backing store.
    fn handle<'a>(&'a self, key: RoutingKey, payload: &'a [u8]) -> BoxFuture<'a, Result<Value, RpcError>>;
}

/// A service that can be run by the supervisor.
pub trait Service: Send + Sync {
    /// Short name used in logs and metrics.
    fn name(&self) -> &str;

    /// Queue and bindings to consume.
    fn topology(&self) -> &ServiceTopology;

    /// Prepare a handler for a new session, connecting to backing stores.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Connection`] if a backing store is unreachable.
    fn open(&self) -> BoxFuture<'_, Result<Arc<dyn Handler>, RpcError>>;
}

/// One broker connection serving one handler.
pub struct ServerSession {
    service: String,
    topology: ServiceTopology,
    handler: Arc<dyn Handler>,
    channel: Box<dyn BrokerChannel>,
}

impl ServerSession {
    /// Open the service's backing stores, then the broker connection.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Connection`] if either is unreachable.
    pub async fn connect(service: &dyn Service, broker: &dyn Broker) -> Result<Self, RpcError> {
        let handler = service.open().await?;
        let channel = broker.connect().await?;
        tracing::info!(service = service.name(), "Connected to broker");
        Ok(Self {
            service: service.name().to_string(),
            topology: service.topology().clone(),
            handler,
            channel,
        })
    }

    /// Declare exchange, queue and bindings, then limit prefetch to one.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Connection`] if a declaration fails.
    pub async fn declare(&self) -> Result<(), RpcError> {
        self.channel.declare_topology(&self.topology).await?;
        self.channel.set_prefetch(PREFETCH_COUNT).await?;
        tracing::info!(
            service = %self.service,
            exchange = %self.topology.exchange,
            queue = %self.topology.queue,
            routing_keys = ?self.topology.routing_keys.iter().map(|k| k.as_str()).collect::<Vec<_>>(),
            "Topology declared"
        );
        Ok(())
    }

    /// Start a manual-ack consumer on the service queue.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Connection`] if the consumer cannot be registered.
    pub async fn consume(&self) -> Result<Consumer, RpcError> {
        let consumer = self.channel.consume(&self.topology.queue, AckMode::Manual).await?;
        tracing::info!(
            service = %self.service,
            queue = %self.topology.queue,
            consumer_tag = %consumer.tag,
            "Consuming requests"
        );
        Ok(consumer)
    }

    /// Process deliveries one at a time until the session fails.
    ///
    /// Returns the failure that ended the session.
    pub async fn serve(&self, mut consumer: Consumer) -> RpcError {
        while let Some(delivery) = consumer.deliveries.next().await {
            let outcome = match delivery {
                Ok(delivery) => self.process(delivery).await,
                Err(error) => Err(error),
            };
            if let Err(error) = outcome {
                return error;
            }
        }
        RpcError::Connection("Consumer cancelled by broker".to_string())
    }

    /// Close the broker connection. Unacknowledged deliveries are requeued.
    pub async fn close(self) {
        if let Err(error) = self.channel.close().await {
            tracing::debug!(service = %self.service, %error, "Closing session failed");
        }
    }

    async fn process(&self, delivery: Delivery) -> Result<(), RpcError> {
        let started = Instant::now();
        tracing::debug!(
            service = %self.service,
            routing_key = %delivery.routing_key,
            correlation_id = ?delivery.properties.correlation_id,
            redelivered = delivery.redelivered,
            "Request received"
        );

        let outcome = match RoutingKey::parse(&delivery.routing_key) {
            Ok(key) => self.handler.handle(key, &delivery.body).await,
            Err(error) => Err(error),
        };
        // An OK reply always carries data.
        let outcome = outcome.and_then(|data| ResponseEnvelope::from_data(&data));

        let store_lost = matches!(outcome, Err(RpcError::Connection(_)));
        let envelope = match outcome {
            Ok(envelope) => envelope,
            Err(error) => {
                tracing::warn!(
                    service = %self.service,
                    routing_key = %delivery.routing_key,
                    kind = error.kind(),
                    %error,
                    "Request failed"
                );
                ResponseEnvelope::error(error.to_string())
            }
        };
        let ok = envelope.is_ok();

        let properties = &delivery.properties;
        match (properties.reply_to.as_deref(), properties.correlation_id.as_deref()) {
            (Some(reply_to), Some(correlation_id)) => {
                self.channel
                    .reply(reply_to, correlation_id, &envelope.to_vec()?)
                    .await?;
            }
            _ => tracing::debug!(
                service = %self.service,
                routing_key = %delivery.routing_key,
                "No reply_to or correlation_id; response discarded"
            ),
        }

        self.channel.ack(delivery.delivery_tag).await?;
        ServerMetrics::record_request(&delivery.routing_key, ok, started.elapsed());

        if store_lost {
            return Err(RpcError::Connection(format!(
                "{} lost its backing store",
                self.service
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ServerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSession")
            .field("service", &self.service)
            .field("topology", &self.topology)
            .finish_non_exhaustive()
    }
}
