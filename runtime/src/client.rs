//! Request/reply client.
//!
//! Every call runs on its own connection:
//!
//! 1. connect to the broker
//! 2. declare an exclusive, auto-delete reply queue
//! 3. generate a correlation id
//! 4. consume the reply queue with auto-ack
//! 5. publish the request to the shared exchange with `correlation_id` and
//!    `reply_to` set
//! 6. wait, up to the timeout, for a reply carrying the same correlation id,
//!    ignoring any other message
//! 7. cancel the consumer and close the connection, whatever the outcome
//!
//! Closing the connection deletes the reply queue, so a reply that arrives
//! after a timeout is dropped by the broker and never observed.
//!
//! # Example
//!
//! ```rust,ignore
//! use broker_rpc_core::payload::{IdentityQuery, Person};
//! use broker_rpc_core::topology::RoutingKey;
//! use broker_rpc_runtime::RpcClient;
//!
//! let client = RpcClient::new(broker);
//! let person: Person = client
//!     .call_for(RoutingKey::IdentityValidation, &IdentityQuery { dni: "12345678".into() })
//!     .await?;
//! ```

use crate::metrics::ClientMetrics;
use broker_rpc_core::broker::{AckMode, Broker, BrokerChannel, DeliveryStream};
use broker_rpc_core::envelope::{RequestEnvelope, ResponseEnvelope, encode_payload};
use broker_rpc_core::error::RpcError;
use broker_rpc_core::topology::{EXCHANGE_NAME, RoutingKey};
use futures::StreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Reply timeout used unless configured otherwise.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Client performing remote calls through a [`Broker`].
///
/// Cloning is cheap; clones share the broker handle.
#[derive(Clone)]
pub struct RpcClient {
    broker: Arc<dyn Broker>,
    timeout: Duration,
}

impl RpcClient {
    /// Create a client with the default ten-second timeout.
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Use `timeout` for calls that do not specify their own.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Timeout applied by [`call`](Self::call).
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Perform a call and return the raw response envelope.
    ///
    /// An `ERROR` envelope is a successful call: it is returned as
    /// `Ok(ResponseEnvelope::Error { .. })`.
    ///
    /// # Errors
    ///
    /// - [`RpcError::Connection`] if the broker cannot be reached or drops
    /// - [`RpcError::Timeout`] if no matching reply arrives in time
    /// - [`RpcError::Protocol`] if the payload cannot be encoded or the reply
    ///   is not a valid envelope
    pub async fn call<P>(&self, key: RoutingKey, payload: &P) -> Result<ResponseEnvelope, RpcError>
    where
        P: Serialize + ?Sized,
    {
        self.call_with_timeout(key, payload, self.timeout).await
    }

    /// Like [`call`](Self::call) with an explicit timeout.
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call).
    pub async fn call_with_timeout<P>(
        &self,
        key: RoutingKey,
        payload: &P,
        timeout: Duration,
    ) -> Result<ResponseEnvelope, RpcError>
    where
        P: Serialize + ?Sized,
    {
        let body = encode_payload(payload)?;
        let started = Instant::now();

        let outcome = match self.broker.connect().await {
            Ok(channel) => {
                let outcome = exchange(channel.as_ref(), key, body, timeout).await;
                if let Err(error) = channel.close().await {
                    tracing::debug!(%error, "Closing reply connection failed");
                }
                outcome
            }
            Err(error) => Err(error),
        };

        ClientMetrics::record_call(key, &outcome, started.elapsed());
        match &outcome {
            Ok(envelope) => tracing::debug!(
                routing_key = %key,
                status = %envelope.status(),
                elapsed_ms = started.elapsed().as_millis(),
                "Call completed"
            ),
            Err(error) => tracing::warn!(routing_key = %key, %error, "Call failed"),
        }
        outcome
    }

    /// Perform a call and decode the `data` of an `OK` reply.
    ///
    /// # Errors
    ///
    /// Everything [`call`](Self::call) returns, plus [`RpcError::Operation`]
    /// carrying the message of an `ERROR` reply.
    pub async fn call_for<T, P>(&self, key: RoutingKey, payload: &P) -> Result<T, RpcError>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        self.call(key, payload).await?.into_result()
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

async fn exchange(
    channel: &dyn BrokerChannel,
    key: RoutingKey,
    body: Vec<u8>,
    timeout: Duration,
) -> Result<ResponseEnvelope, RpcError> {
    let reply_queue = channel.declare_reply_queue().await?;
    let request = RequestEnvelope::new(key, reply_queue, body);
    let mut consumer = channel.consume(&request.reply_to, AckMode::Auto).await?;

    let outcome = publish_and_wait(channel, &request, &mut consumer.deliveries, timeout).await;

    if let Err(error) = channel.cancel(&consumer.tag).await {
        tracing::debug!(%error, consumer_tag = %consumer.tag, "Cancelling reply consumer failed");
    }
    outcome
}

async fn publish_and_wait(
    channel: &dyn BrokerChannel,
    request: &RequestEnvelope,
    deliveries: &mut DeliveryStream,
    timeout: Duration,
) -> Result<ResponseEnvelope, RpcError> {
    channel
        .publish(
            EXCHANGE_NAME,
            request.routing_key.as_str(),
            &request.properties(),
            &request.payload,
        )
        .await?;
    tracing::debug!(
        routing_key = %request.routing_key,
        correlation_id = %request.correlation_id,
        reply_to = %request.reply_to,
        "Request published"
    );

    let wait = async {
        while let Some(delivery) = deliveries.next().await {
            let delivery = delivery?;
            let correlation_id = delivery.properties.correlation_id.as_deref();
            if request.correlation_id.matches(correlation_id) {
                return ResponseEnvelope::from_slice(&delivery.body);
            }
            tracing::debug!(
                expected = %request.correlation_id,
                received = ?correlation_id,
                "Ignoring reply for another call"
            );
        }
        Err(RpcError::Connection(
            "Reply consumer ended before a reply arrived".to_string(),
        ))
    };

    tokio::time::timeout(timeout, wait)
        .await
        .unwrap_or(Err(RpcError::Timeout(timeout)))
}
