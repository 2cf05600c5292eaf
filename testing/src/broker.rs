//! In-memory broker with `RabbitMQ`-like semantics.
//!
//! [`InMemoryBroker`] models the parts of AMQP 0-9-1 the RPC layer relies on:
//!
//! - direct exchanges routing by exact routing key, plus the default
//!   exchange routing by queue name
//! - unroutable messages are dropped silently
//! - exclusive queues are deleted when the owning connection closes
//! - unacknowledged deliveries go back to the front of their queue, flagged
//!   as redelivered, when their channel closes
//! - manual-ack consumers never hold more than `prefetch` unacknowledged
//!   deliveries
//!
//! It also lets tests inject faults: refusing connections and dropping every
//! open connection.

use broker_rpc_core::broker::{
    AckMode, BoxFuture, Broker, BrokerChannel, Consumer, Delivery, DeliveryStream,
    MessageProperties,
};
use broker_rpc_core::error::RpcError;
use broker_rpc_core::topology::{DEFAULT_EXCHANGE, ServiceTopology};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

/// A message as it was published, kept for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Exchange it was published to.
    pub exchange: String,
    /// Routing key it was published with.
    pub routing_key: String,
    /// Correlation and reply properties.
    pub properties: MessageProperties,
    /// Raw body.
    pub body: Vec<u8>,
    /// Whether at least one queue received it.
    pub routed: bool,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    routing_key: String,
    properties: MessageProperties,
    body: Vec<u8>,
    redelivered: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    exclusive_owner: Option<u64>,
    ready: VecDeque<StoredMessage>,
}

#[derive(Debug)]
struct ConsumerState {
    queue: String,
    mode: AckMode,
}

#[derive(Debug)]
struct ChannelState {
    open: bool,
    dropped_by_broker: bool,
    prefetch: u16,
    consumers: HashMap<String, ConsumerState>,
    unacked: HashMap<u64, (String, StoredMessage)>,
}

impl ChannelState {
    fn new() -> Self {
        Self {
            open: true,
            dropped_by_broker: false,
            prefetch: 0,
            consumers: HashMap::new(),
            unacked: HashMap::new(),
        }
    }
}

enum Step {
    Deliver(Delivery),
    Wait,
    End(Option<RpcError>),
}

#[derive(Debug)]
struct BrokerState {
    available: bool,
    exchanges: HashSet<String>,
    // exchange -> (routing key, queue)
    bindings: HashMap<String, Vec<(String, String)>>,
    queues: HashMap<String, QueueState>,
    channels: HashMap<u64, ChannelState>,
    next_id: u64,
    connection_attempts: usize,
    published: Vec<PublishedMessage>,
}

impl BrokerState {
    fn new() -> Self {
        Self {
            available: true,
            exchanges: HashSet::new(),
            bindings: HashMap::new(),
            queues: HashMap::new(),
            channels: HashMap::new(),
            next_id: 0,
            connection_attempts: 0,
            published: Vec::new(),
        }
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn ensure_open(&self, channel_id: u64) -> Result<(), RpcError> {
        match self.channels.get(&channel_id) {
            Some(channel) if channel.open => Ok(()),
            _ => Err(RpcError::Connection("Channel is closed".to_string())),
        }
    }

    fn channel_mut(&mut self, channel_id: u64) -> Result<&mut ChannelState, RpcError> {
        self.channels
            .get_mut(&channel_id)
            .filter(|channel| channel.open)
            .ok_or_else(|| RpcError::Connection("Channel is closed".to_string()))
    }

    fn route(
        &mut self,
        exchange: &str,
        routing_key: &str,
        properties: &MessageProperties,
        body: &[u8],
    ) -> Result<(), RpcError> {
        let targets: Vec<String> = if exchange == DEFAULT_EXCHANGE {
            self.queues
                .contains_key(routing_key)
                .then(|| routing_key.to_string())
                .into_iter()
                .collect()
        } else {
            if !self.exchanges.contains(exchange) {
                return Err(RpcError::Connection(format!(
                    "NOT_FOUND - no exchange '{exchange}'"
                )));
            }
            let mut targets = Vec::new();
            for (key, queue) in self.bindings.get(exchange).into_iter().flatten() {
                if key == routing_key && !targets.contains(queue) {
                    targets.push(queue.clone());
                }
            }
            targets
        };

        let message = StoredMessage {
            routing_key: routing_key.to_string(),
            properties: properties.clone(),
            body: body.to_vec(),
            redelivered: false,
        };
        for queue in &targets {
            if let Some(queue) = self.queues.get_mut(queue) {
                queue.ready.push_back(message.clone());
            }
        }
        self.published.push(PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            properties: properties.clone(),
            body: body.to_vec(),
            routed: !targets.is_empty(),
        });
        Ok(())
    }

    fn close_channel(&mut self, channel_id: u64, by_broker: bool) {
        let Some(channel) = self.channels.get_mut(&channel_id) else {
            return;
        };
        if channel.open {
            channel.open = false;
            channel.dropped_by_broker = by_broker;
            channel.consumers.clear();

            let mut unacked: Vec<_> = channel.unacked.drain().collect();
            unacked.sort_by_key(|(tag, _)| *tag);
            for (_, (queue, mut message)) in unacked.into_iter().rev() {
                if let Some(queue) = self.queues.get_mut(&queue) {
                    message.redelivered = true;
                    queue.ready.push_front(message);
                }
            }

            self.queues
                .retain(|_, queue| queue.exclusive_owner != Some(channel_id));
            let queues = &self.queues;
            for bound in self.bindings.values_mut() {
                bound.retain(|(_, queue)| queues.contains_key(queue));
            }
        }

        // A channel dropped by the broker stays until its owner lets go, so
        // its consumers can still report the failure.
        if !by_broker {
            self.channels.remove(&channel_id);
        }
    }

    fn next_delivery(&mut self, channel_id: u64, consumer_tag: &str) -> Step {
        let Some(channel) = self.channels.get(&channel_id) else {
            return Step::End(None);
        };
        if !channel.open {
            return Step::End(
                channel
                    .dropped_by_broker
                    .then(|| RpcError::Connection("Connection closed by broker".to_string())),
            );
        }
        let Some(consumer) = channel.consumers.get(consumer_tag) else {
            return Step::End(None);
        };
        let (queue_name, mode) = (consumer.queue.clone(), consumer.mode);
        if mode == AckMode::Manual
            && channel.prefetch > 0
            && channel.unacked.len() >= usize::from(channel.prefetch)
        {
            return Step::Wait;
        }

        let Some(queue) = self.queues.get_mut(&queue_name) else {
            return Step::End(None);
        };
        let Some(message) = queue.ready.pop_front() else {
            return Step::Wait;
        };

        let delivery_tag = self.next_id();
        let delivery = Delivery {
            delivery_tag,
            routing_key: message.routing_key.clone(),
            properties: message.properties.clone(),
            body: message.body.clone(),
            redelivered: message.redelivered,
        };
        if mode == AckMode::Manual {
            if let Some(channel) = self.channels.get_mut(&channel_id) {
                channel.unacked.insert(delivery_tag, (queue_name, message));
            }
        }
        Step::Deliver(delivery)
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<BrokerState>,
    changes: watch::Sender<u64>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.changes.send_modify(|version| *version = version.wrapping_add(1));
    }
}

/// In-process broker for tests.
///
/// Clones share the same state, so a test can keep a handle for fault
/// injection and assertions while the code under test holds another.
///
/// # Example
///
/// ```
/// use broker_rpc_testing::InMemoryBroker;
///
/// let broker = InMemoryBroker::new();
/// broker.set_available(false);
/// assert_eq!(broker.open_channels(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    /// Create an empty, reachable broker.
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState::new()),
                changes,
            }),
        }
    }

    /// Make the broker refuse or accept new connections.
    ///
    /// Becoming unavailable also drops every open connection.
    pub fn set_available(&self, available: bool) {
        self.shared.lock().available = available;
        if !available {
            self.disconnect_all();
        }
        self.shared.notify();
    }

    /// Drop every open connection, as a broker restart would.
    pub fn disconnect_all(&self) {
        {
            let mut state = self.shared.lock();
            let open: Vec<u64> = state
                .channels
                .iter()
                .filter(|(_, channel)| channel.open)
                .map(|(id, _)| *id)
                .collect();
            for id in open {
                state.close_channel(id, true);
            }
        }
        self.shared.notify();
    }

    /// Publish without a connection, for injecting messages.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Connection`] if the exchange does not exist.
    pub fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: &MessageProperties,
        body: &[u8],
    ) -> Result<(), RpcError> {
        let result = self
            .shared
            .lock()
            .route(exchange, routing_key, properties, body);
        self.shared.notify();
        result
    }

    /// Number of [`Broker::connect`] calls, successful or not.
    #[must_use]
    pub fn connection_attempts(&self) -> usize {
        self.shared.lock().connection_attempts
    }

    /// Number of connections currently open.
    #[must_use]
    pub fn open_channels(&self) -> usize {
        self.shared
            .lock()
            .channels
            .values()
            .filter(|channel| channel.open)
            .count()
    }

    /// Whether a queue with this name exists.
    #[must_use]
    pub fn queue_exists(&self, queue: &str) -> bool {
        self.shared.lock().queues.contains_key(queue)
    }

    /// Messages waiting in a queue, not counting unacknowledged ones.
    #[must_use]
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.shared
            .lock()
            .queues
            .get(queue)
            .map_or(0, |queue| queue.ready.len())
    }

    /// Deliveries from a queue awaiting acknowledgement.
    #[must_use]
    pub fn unacked(&self, queue: &str) -> usize {
        self.shared
            .lock()
            .channels
            .values()
            .flat_map(|channel| channel.unacked.values())
            .filter(|(name, _)| name == queue)
            .count()
    }

    /// Number of exclusive queues still alive.
    #[must_use]
    pub fn exclusive_queues(&self) -> usize {
        self.shared
            .lock()
            .queues
            .values()
            .filter(|queue| queue.exclusive_owner.is_some())
            .count()
    }

    /// Routing keys bound to a queue, across all exchanges.
    #[must_use]
    pub fn bound_routing_keys(&self, queue: &str) -> Vec<String> {
        let state = self.shared.lock();
        let mut keys: Vec<String> = state
            .bindings
            .values()
            .flatten()
            .filter(|(_, bound)| bound == queue)
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Every message published so far, in order.
    #[must_use]
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.shared.lock().published.clone()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker for InMemoryBroker {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn BrokerChannel>, RpcError>> {
        let result = {
            let mut state = self.shared.lock();
            state.connection_attempts += 1;
            if state.available {
                let id = state.next_id();
                state.channels.insert(id, ChannelState::new());
                Ok(Box::new(InMemoryChannel {
                    id,
                    shared: Arc::clone(&self.shared),
                }) as Box<dyn BrokerChannel>)
            } else {
                Err(RpcError::Connection(
                    "Connection refused: broker unavailable".to_string(),
                ))
            }
        };
        Box::pin(std::future::ready(result))
    }
}

/// A connection to an [`InMemoryBroker`]. Dropping it closes it.
#[derive(Debug)]
pub struct InMemoryChannel {
    id: u64,
    shared: Arc<Shared>,
}

impl InMemoryChannel {
    fn with_state<T>(
        &self,
        operation: impl FnOnce(&mut BrokerState) -> Result<T, RpcError>,
    ) -> Result<T, RpcError> {
        let result = {
            let mut state = self.shared.lock();
            state.ensure_open(self.id)?;
            operation(&mut state)
        };
        self.shared.notify();
        result
    }

    fn deliveries(&self, consumer_tag: String) -> DeliveryStream {
        let shared = Arc::clone(&self.shared);
        let channel_id = self.id;
        Box::pin(async_stream::stream! {
            let mut changes = shared.changes.subscribe();
            loop {
                drop(changes.borrow_and_update());
                let step = shared.lock().next_delivery(channel_id, &consumer_tag);
                match step {
                    Step::Deliver(delivery) => yield Ok(delivery),
                    Step::Wait => {
                        if changes.changed().await.is_err() {
                            break;
                        }
                    }
                    Step::End(error) => {
                        if let Some(error) = error {
                            yield Err(error);
                        }
                        break;
                    }
                }
            }
        })
    }
}

fn ready<'a, T: Send + 'a>(result: Result<T, RpcError>) -> BoxFuture<'a, Result<T, RpcError>> {
    Box::pin(std::future::ready(result))
}

impl BrokerChannel for InMemoryChannel {
    fn declare_topology(&self, topology: &ServiceTopology) -> BoxFuture<'_, Result<(), RpcError>> {
        ready(self.with_state(|state| {
            state.exchanges.insert(topology.exchange.clone());
            state.queues.entry(topology.queue.clone()).or_default();
            let bound = state.bindings.entry(topology.exchange.clone()).or_default();
            for key in &topology.routing_keys {
                let binding = (key.as_str().to_string(), topology.queue.clone());
                if !bound.contains(&binding) {
                    bound.push(binding);
                }
            }
            Ok(())
        }))
    }

    fn declare_reply_queue(&self) -> BoxFuture<'_, Result<String, RpcError>> {
        let owner = self.id;
        ready(self.with_state(|state| {
            let name = format!("amq.gen-{}", state.next_id());
            state.queues.insert(
                name.clone(),
                QueueState {
                    exclusive_owner: Some(owner),
                    ready: VecDeque::new(),
                },
            );
            Ok(name)
        }))
    }

    fn set_prefetch(&self, count: u16) -> BoxFuture<'_, Result<(), RpcError>> {
        let id = self.id;
        ready(self.with_state(|state| {
            state.channel_mut(id)?.prefetch = count;
            Ok(())
        }))
    }

    fn consume(&self, queue: &str, mode: AckMode) -> BoxFuture<'_, Result<Consumer, RpcError>> {
        let id = self.id;
        let tag = self.with_state(|state| {
            if !state.queues.contains_key(queue) {
                return Err(RpcError::Connection(format!("NOT_FOUND - no queue '{queue}'")));
            }
            let tag = format!("ctag-{}", state.next_id());
            state.channel_mut(id)?.consumers.insert(
                tag.clone(),
                ConsumerState {
                    queue: queue.to_string(),
                    mode,
                },
            );
            Ok(tag)
        });
        ready(tag.map(|tag| Consumer {
            deliveries: self.deliveries(tag.clone()),
            tag,
        }))
    }

    fn cancel(&self, consumer_tag: &str) -> BoxFuture<'_, Result<(), RpcError>> {
        let id = self.id;
        ready(self.with_state(|state| {
            state.channel_mut(id)?.consumers.remove(consumer_tag);
            Ok(())
        }))
    }

    fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: &MessageProperties,
        body: &[u8],
    ) -> BoxFuture<'_, Result<(), RpcError>> {
        ready(self.with_state(|state| state.route(exchange, routing_key, properties, body)))
    }

    fn ack(&self, delivery_tag: u64) -> BoxFuture<'_, Result<(), RpcError>> {
        let id = self.id;
        ready(self.with_state(|state| {
            state
                .channel_mut(id)?
                .unacked
                .remove(&delivery_tag)
                .map(|_| ())
                .ok_or_else(|| {
                    RpcError::Connection(format!(
                        "PRECONDITION_FAILED - unknown delivery tag {delivery_tag}"
                    ))
                })
        }))
    }

    fn close(&self) -> BoxFuture<'_, Result<(), RpcError>> {
        self.shared.lock().close_channel(self.id, false);
        self.shared.notify();
        ready(Ok(()))
    }
}

impl Drop for InMemoryChannel {
    fn drop(&mut self) {
        self.shared.lock().close_channel(self.id, false);
        self.shared.notify();
    }
}
