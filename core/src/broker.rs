//! Broker abstraction: connections, channels, consumers and deliveries.
//!
//! The [`Broker`] trait opens connections; each connection is exposed as a
//! single [`BrokerChannel`] carrying every AMQP-style primitive the RPC
//! layer needs: declaring topology, declaring an exclusive reply queue,
//! setting prefetch, consuming, publishing, acknowledging and closing.
//!
//! # Implementations
//!
//! - `AmqpBroker` (crate `broker-rpc-amqp`) - `RabbitMQ` over AMQP 0-9-1
//! - `InMemoryBroker` (crate `broker-rpc-testing`) - in-process, for tests
//!
//! # Dyn Compatibility
//!
//! Methods return `Pin<Box<dyn Future>>` rather than using `async fn` so the
//! traits can be used as `Arc<dyn Broker>` and `Box<dyn BrokerChannel>`.
//! Arguments are copied into the returned future, which only borrows `self`.

use crate::error::RpcError;
use crate::topology::{DEFAULT_EXCHANGE, ServiceTopology};
use futures::Stream;
use std::future::Future;
use std::pin::Pin;

/// Boxed, sendable future borrowing from `'a`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Stream of deliveries from one consumer.
///
/// The stream ends when the consumer is cancelled or its channel is closed
/// by its owner. It yields an error and then ends if the broker drops the
/// channel.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, RpcError>> + Send>>;

/// Message properties relevant to request/reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageProperties {
    /// Identifier pairing a request with its reply.
    pub correlation_id: Option<String>,
    /// Queue the reply must be sent to.
    pub reply_to: Option<String>,
}

impl MessageProperties {
    /// Set the correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Set the reply queue.
    #[must_use]
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }
}

/// A message handed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Channel-scoped tag used to acknowledge the message.
    pub delivery_tag: u64,
    /// Routing key the message was published with.
    pub routing_key: String,
    /// Correlation and reply properties.
    pub properties: MessageProperties,
    /// Raw body.
    pub body: Vec<u8>,
    /// Whether the broker delivered this message before without an ack.
    pub redelivered: bool,
}

/// Acknowledgement mode of a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// The broker considers messages acknowledged on delivery.
    Auto,
    /// Every delivery must be acknowledged with [`BrokerChannel::ack`].
    Manual,
}

/// A registered consumer and the stream of its deliveries.
pub struct Consumer {
    /// Tag identifying the consumer on its channel.
    pub tag: String,
    /// Deliveries, in queue order.
    pub deliveries: DeliveryStream,
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer").field("tag", &self.tag).finish_non_exhaustive()
    }
}

/// Factory for broker connections.
///
/// Every call to [`Broker::connect`] opens a fresh connection. Callers own
/// the returned channel and must close it, or drop it, when done.
pub trait Broker: Send + Sync {
    /// Open a connection and a channel on it.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Connection`] if the broker is unreachable or
    /// refuses the connection.
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn BrokerChannel>, RpcError>>;
}

/// One connection and its channel.
///
/// All methods return [`RpcError::Connection`] once the connection has been
/// lost.
pub trait BrokerChannel: Send + Sync {
    /// Declare the durable direct exchange, the durable queue and its
    /// bindings. Declarations are idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Connection`] if a declaration fails.
    fn declare_topology(&self, topology: &ServiceTopology) -> BoxFuture<'_, Result<(), RpcError>>;

    /// Declare an exclusive, auto-delete queue with a broker-assigned name.
    ///
    /// The queue disappears when this connection closes.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Connection`] if the declaration fails.
    fn declare_reply_queue(&self) -> BoxFuture<'_, Result<String, RpcError>>;

    /// Limit unacknowledged deliveries on this channel.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Connection`] if the broker rejects the setting.
    fn set_prefetch(&self, count: u16) -> BoxFuture<'_, Result<(), RpcError>>;

    /// Start consuming from `queue`.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Connection`] if the queue does not exist or the
    /// channel is closed.
    fn consume(&self, queue: &str, mode: AckMode) -> BoxFuture<'_, Result<Consumer, RpcError>>;

    /// Stop a consumer started on this channel.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Connection`] if the channel is closed.
    fn cancel(&self, consumer_tag: &str) -> BoxFuture<'_, Result<(), RpcError>>;

    /// Publish `body` to `exchange` with `routing_key`.
    ///
    /// Messages that match no binding are dropped by the broker.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Connection`] if the publish is not accepted.
    fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: &MessageProperties,
        body: &[u8],
    ) -> BoxFuture<'_, Result<(), RpcError>>;

    /// Acknowledge a delivery received on this channel.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Connection`] if the channel is closed; the message
    /// then returns to its queue.
    fn ack(&self, delivery_tag: u64) -> BoxFuture<'_, Result<(), RpcError>>;

    /// Close the channel and its connection.
    ///
    /// Exclusive queues are deleted and unacknowledged deliveries return to
    /// their queues.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Connection`] if the close handshake fails.
    fn close(&self) -> BoxFuture<'_, Result<(), RpcError>>;

    /// Send `body` straight to `reply_to` through the default exchange.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Connection`] if the publish is not accepted.
    fn reply(&self, reply_to: &str, correlation_id: &str, body: &[u8]) -> BoxFuture<'_, Result<(), RpcError>> {
        let properties = MessageProperties::default().with_correlation_id(correlation_id);
        self.publish(DEFAULT_EXCHANGE, reply_to, &properties, body)
    }
}
