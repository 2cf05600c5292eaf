//! Integration tests for server sessions run under the supervisor.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

mod common;

use broker_rpc_core::broker::{AckMode, Broker, MessageProperties};
use broker_rpc_core::envelope::{MISSING_DATA, ResponseEnvelope};
use broker_rpc_core::topology::EXCHANGE_NAME;
use broker_rpc_runtime::{ConnectionState, RpcClient};
use broker_rpc_testing::InMemoryBroker;
use common::{EchoHandler, TEST_KEY, TEST_QUEUE, TestService, eventually, spawn_supervisor};
use futures::StreamExt;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

const BACKOFF: Duration = Duration::from_millis(50);

async fn serve(broker: &InMemoryBroker, handler: Arc<EchoHandler>) -> common::Running {
    let service = Arc::new(TestService::new(handler));
    let mut running = spawn_supervisor(service, broker.clone(), BACKOFF);
    running.wait_for(ConnectionState::Consuming).await;
    running
}

fn client(broker: &InMemoryBroker) -> RpcClient {
    RpcClient::new(Arc::new(broker.clone())).with_timeout(Duration::from_secs(3))
}

#[tokio::test]
async fn test_business_failure_is_error_envelope_without_data() {
    let broker = InMemoryBroker::new();
    let running = serve(&broker, Arc::new(EchoHandler::default())).await;

    let envelope = client(&broker)
        .call(TEST_KEY, &json!({"fail": "Cliente no encontrado"}))
        .await
        .unwrap();

    assert_eq!(envelope, ResponseEnvelope::error("Cliente no encontrado"));
    let wire: Value = serde_json::from_slice(&envelope.to_vec().unwrap()).unwrap();
    assert!(wire.get("data").is_none());
    assert_eq!(running.supervisor.state(), ConnectionState::Consuming);
    running.stop().await;
}

#[tokio::test]
async fn test_result_without_data_is_answered_as_error() {
    let broker = InMemoryBroker::new();
    let running = serve(&broker, Arc::new(EchoHandler::default())).await;

    let envelope = client(&broker).call(TEST_KEY, &json!({"empty": true})).await;

    assert_eq!(
        envelope,
        Ok(ResponseEnvelope::error(format!("Protocol error: {MISSING_DATA}")))
    );
    assert_eq!(broker.queue_depth(TEST_QUEUE), 0);
    assert_eq!(running.supervisor.state(), ConnectionState::Consuming);
    running.stop().await;
}

/// Publish `body` with reply properties and return the reply envelope.
async fn raw_call(broker: &InMemoryBroker, exchange: &str, routing_key: &str, body: &[u8]) -> ResponseEnvelope {
    let channel = broker.connect().await.unwrap();
    let reply_queue = channel.declare_reply_queue().await.unwrap();
    let mut consumer = channel.consume(&reply_queue, AckMode::Auto).await.unwrap();
    channel
        .publish(
            exchange,
            routing_key,
            &MessageProperties::default()
                .with_correlation_id("raw-1")
                .with_reply_to(reply_queue),
            body,
        )
        .await
        .unwrap();

    let delivery = consumer.deliveries.next().await.unwrap().unwrap();
    assert_eq!(delivery.properties.correlation_id.as_deref(), Some("raw-1"));
    ResponseEnvelope::from_slice(&delivery.body).unwrap()
}

#[tokio::test]
async fn test_malformed_payload_is_answered_not_fatal() {
    let broker = InMemoryBroker::new();
    let running = serve(&broker, Arc::new(EchoHandler::default())).await;

    let envelope = raw_call(&broker, EXCHANGE_NAME, TEST_KEY.as_str(), b"{{{").await;
    assert!(!envelope.is_ok());
    assert!(envelope.message().is_some_and(|m| !m.is_empty()));

    let envelope = client(&broker).call(TEST_KEY, &json!({"n": 1})).await.unwrap();
    assert!(envelope.is_ok(), "session must keep consuming");
    running.stop().await;
}

#[tokio::test]
async fn test_unknown_routing_key_is_reported_by_name() {
    let broker = InMemoryBroker::new();
    let running = serve(&broker, Arc::new(EchoHandler::default())).await;

    // Published straight to the queue, so the routing key is the queue name.
    let envelope = raw_call(&broker, "", TEST_QUEUE, b"{}").await;

    assert_eq!(
        envelope,
        ResponseEnvelope::error(format!("Operación no reconocida: {TEST_QUEUE}"))
    );
    running.stop().await;
}

#[tokio::test]
async fn test_request_without_reply_to_is_processed_and_acked() {
    let broker = InMemoryBroker::new();
    let handler = Arc::new(EchoHandler::default());
    let running = serve(&broker, Arc::clone(&handler)).await;

    broker
        .publish(EXCHANGE_NAME, TEST_KEY.as_str(), &MessageProperties::default(), b"{}")
        .unwrap();

    eventually(|| handler.calls() == 1).await;
    eventually(|| broker.unacked(TEST_QUEUE) == 0 && broker.queue_depth(TEST_QUEUE) == 0).await;
    let replies = broker
        .published()
        .into_iter()
        .filter(|message| message.exchange.is_empty())
        .count();
    assert_eq!(replies, 0);
    running.stop().await;
}

#[tokio::test]
async fn test_requests_are_processed_one_at_a_time() {
    let broker = InMemoryBroker::new();
    let handler = Arc::new(EchoHandler::watching(broker.clone()));
    let running = serve(&broker, Arc::clone(&handler)).await;
    let client = client(&broker);

    let calls: Vec<_> = (0..5)
        .map(|n| {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .call(TEST_KEY, &json!({"n": n, "delay_ms": 30}))
                    .await
                    .unwrap()
            })
        })
        .collect();
    for call in calls {
        assert!(call.await.unwrap().is_ok());
    }

    let mut spans = handler.spans.lock().unwrap().clone();
    spans.sort_by_key(|(start, _)| *start);
    assert_eq!(spans.len(), 5);
    for pair in spans.windows(2) {
        assert!(pair[1].0 >= pair[0].1, "handlers overlapped");
    }
    assert!(handler.unacked_seen.lock().unwrap().iter().all(|&n| n == 1));
    running.stop().await;
}

#[tokio::test]
async fn test_store_loss_during_request_replies_then_reconnects() {
    let broker = InMemoryBroker::new();
    let handler = Arc::new(EchoHandler::default());
    let mut running = serve(&broker, Arc::clone(&handler)).await;
    let attempts_before = broker.connection_attempts();

    let envelope = client(&broker)
        .call(TEST_KEY, &json!({"lose_store": true}))
        .await
        .unwrap();
    assert!(!envelope.is_ok());

    // One connection for the call, one for the new session.
    eventually(|| broker.connection_attempts() >= attempts_before + 2).await;
    running.wait_for(ConnectionState::Consuming).await;
    assert_eq!(broker.queue_depth(TEST_QUEUE), 0, "the failed request was acked");
    running.stop().await;
}

#[tokio::test]
async fn test_unacked_request_is_redelivered_after_broker_drop() {
    let broker = InMemoryBroker::new();
    let handler = Arc::new(EchoHandler::default());
    let running = serve(&broker, Arc::clone(&handler)).await;

    broker
        .publish(
            EXCHANGE_NAME,
            TEST_KEY.as_str(),
            &MessageProperties::default(),
            br#"{"delay_ms": 200}"#,
        )
        .unwrap();
    eventually(|| broker.unacked(TEST_QUEUE) == 1).await;
    broker.disconnect_all();

    eventually(|| handler.calls() == 2).await;
    eventually(|| broker.unacked(TEST_QUEUE) == 0 && broker.queue_depth(TEST_QUEUE) == 0).await;
    running.stop().await;
}
