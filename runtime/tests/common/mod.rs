//! Shared fixtures for the runtime integration tests.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic
#![allow(dead_code)] // Not every test binary uses every fixture

use broker_rpc_core::broker::{AckMode, BoxFuture, Broker, BrokerChannel};
use broker_rpc_core::error::RpcError;
use broker_rpc_core::store::{AccountStore, StoreConnector};
use broker_rpc_core::topology::{RoutingKey, ServiceTopology};
use broker_rpc_runtime::{ConnectionState, Handler, RetryPolicy, Service, Supervisor};
use broker_rpc_testing::{InMemoryAccountStore, InMemoryBroker, SwitchableConnector};
use futures::StreamExt;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

pub const TEST_QUEUE: &str = "q_test";
pub const TEST_KEY: RoutingKey = RoutingKey::BalanceQuery;
pub const FOREIGN_CORRELATION_ID: &str = "00000000-0000-4000-8000-000000000000";

pub fn test_topology() -> ServiceTopology {
    ServiceTopology::new(TEST_QUEUE, vec![TEST_KEY])
}

/// Handler echoing its payload, driven by fields of the payload:
///
/// - `"delay_ms"`: sleep before answering
/// - `"fail"`: answer with that business error
/// - `"lose_store"`: answer with a connection error
/// - `"empty"`: succeed without data
#[derive(Default)]
pub struct EchoHandler {
    pub spans: Mutex<Vec<(Instant, Instant)>>,
    pub unacked_seen: Mutex<Vec<usize>>,
    pub broker: Option<InMemoryBroker>,
}

impl EchoHandler {
    pub fn watching(broker: InMemoryBroker) -> Self {
        Self {
            broker: Some(broker),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.spans.lock().unwrap().len()
    }
}

impl Handler for EchoHandler {
    fn handle<'a>(&'a self, _key: RoutingKey, payload: &'a [u8]) -> BoxFuture<'a, Result<Value, RpcError>> {
        Box::pin(async move {
            let started = Instant::now();
            if let Some(broker) = &self.broker {
                self.unacked_seen.lock().unwrap().push(broker.unacked(TEST_QUEUE));
            }
            let request: Value = serde_json::from_slice(payload)
                .map_err(|e| RpcError::Protocol(e.to_string()))?;
            if let Some(delay) = request.get("delay_ms").and_then(Value::as_u64) {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            self.spans.lock().unwrap().push((started, Instant::now()));

            if let Some(message) = request.get("fail").and_then(Value::as_str) {
                return Err(RpcError::Operation(message.to_string()));
            }
            if request.get("lose_store").is_some() {
                return Err(RpcError::Connection("database went away".to_string()));
            }
            if request.get("empty").is_some() {
                return Ok(Value::Null);
            }
            Ok(json!({ "echo": request }))
        })
    }
}

/// Service whose store availability is controlled by a [`SwitchableConnector`].
pub struct TestService {
    pub connector: SwitchableConnector<dyn AccountStore>,
    pub handler: Arc<EchoHandler>,
    topology: ServiceTopology,
}

impl TestService {
    pub fn new(handler: Arc<EchoHandler>) -> Self {
        let store: Arc<dyn AccountStore> = Arc::new(InMemoryAccountStore::seeded());
        Self {
            connector: SwitchableConnector::new(store),
            handler,
            topology: test_topology(),
        }
    }
}

impl Service for TestService {
    fn name(&self) -> &str {
        "test"
    }

    fn topology(&self) -> &ServiceTopology {
        &self.topology
    }

    fn open(&self) -> BoxFuture<'_, Result<Arc<dyn Handler>, RpcError>> {
        Box::pin(async move {
            let store = self.connector.connect().await?;
            store.probe().await?;
            Ok(Arc::clone(&self.handler) as Arc<dyn Handler>)
        })
    }
}

/// A running supervisor and the means to stop it.
pub struct Running {
    pub supervisor: Arc<Supervisor>,
    pub states: watch::Receiver<ConnectionState>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl Running {
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        tokio::time::timeout(Duration::from_secs(2), self.task)
            .await
            .expect("supervisor did not stop")
            .expect("supervisor task panicked");
    }

    pub async fn wait_for(&mut self, state: ConnectionState) {
        wait_for_state(&mut self.states, state).await;
    }
}

pub fn spawn_supervisor(service: Arc<dyn Service>, broker: InMemoryBroker, backoff: Duration) -> Running {
    broker_rpc_testing::init_tracing();
    let supervisor = Arc::new(
        Supervisor::new(service, Arc::new(broker)).with_retry_policy(RetryPolicy::fixed(backoff)),
    );
    let states = supervisor.subscribe();
    let (shutdown, signal) = oneshot::channel::<()>();
    let task = {
        let supervisor = Arc::clone(&supervisor);
        tokio::spawn(async move {
            supervisor
                .run(async {
                    let _ = signal.await;
                })
                .await;
        })
    };
    Running {
        supervisor,
        states,
        shutdown: Some(shutdown),
        task,
    }
}

pub async fn wait_for_state(states: &mut watch::Receiver<ConnectionState>, state: ConnectionState) {
    tokio::time::timeout(Duration::from_secs(5), states.wait_for(|current| *current == state))
        .await
        .unwrap_or_else(|_| panic!("state {state} not reached"))
        .expect("supervisor dropped");
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Minimal responder used by client tests in place of a real service.
///
/// Each request is answered on its own task after `delay_ms` (from the
/// payload), preceded by a stray reply carrying another correlation id.
/// Requests with `"silent"` get no reply; requests with `"garbage"` get a
/// body that is not an envelope.
pub async fn spawn_responder(broker: &InMemoryBroker) -> JoinHandle<()> {
    let channel: Arc<dyn BrokerChannel> = Arc::from(broker.connect().await.unwrap());
    channel.declare_topology(&test_topology()).await.unwrap();
    let mut consumer = channel.consume(TEST_QUEUE, AckMode::Auto).await.unwrap();

    tokio::spawn(async move {
        while let Some(Ok(delivery)) = consumer.deliveries.next().await {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move {
                let request: Value = serde_json::from_slice(&delivery.body).unwrap();
                let reply_to = delivery.properties.reply_to.clone().unwrap();
                let correlation_id = delivery.properties.correlation_id.clone().unwrap();
                if request.get("silent").is_some() {
                    return;
                }
                let delay = request.get("delay_ms").and_then(Value::as_u64).unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(delay)).await;

                let stray = json!({"status": "OK", "data": {"stray": true}});
                let _ = channel
                    .reply(&reply_to, FOREIGN_CORRELATION_ID, stray.to_string().as_bytes())
                    .await;

                let body = if request.get("garbage").is_some() {
                    b"<html>not an envelope</html>".to_vec()
                } else {
                    json!({"status": "OK", "data": {"echo": request}})
                        .to_string()
                        .into_bytes()
                };
                let _ = channel.reply(&reply_to, &correlation_id, &body).await;
            });
        }
    })
}
