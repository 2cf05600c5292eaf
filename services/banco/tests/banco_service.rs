//! End-to-end tests: client → in-memory broker → supervised bank service.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::float_cmp)] // Test code can use unwrap/expect/panic

use banco_service::BancoService;
use broker_rpc_core::envelope::ResponseEnvelope;
use broker_rpc_core::error::RpcError;
use broker_rpc_core::payload::{Balance, LoanReceipt, TRANSFER_SENT, Transaction, TransferReceipt};
use broker_rpc_core::store::AccountStore;
use broker_rpc_core::topology::{BANCO_QUEUE, RoutingKey};
use broker_rpc_runtime::{ConnectionState, RetryPolicy, RpcClient, Supervisor};
use broker_rpc_testing::{InMemoryAccountStore, InMemoryBroker, SwitchableConnector};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

struct Harness {
    broker: InMemoryBroker,
    store: InMemoryAccountStore,
    connector: SwitchableConnector<dyn AccountStore>,
    supervisor: Arc<Supervisor>,
    shutdown: oneshot::Sender<()>,
}

impl Harness {
    async fn start() -> Self {
        let broker = InMemoryBroker::new();
        let store = InMemoryAccountStore::seeded();
        let connector = SwitchableConnector::new(Arc::new(store.clone()) as Arc<dyn AccountStore>);
        let service = BancoService::new(Arc::new(connector.clone()));
        let supervisor = Arc::new(
            Supervisor::new(Arc::new(service), Arc::new(broker.clone()))
                .with_retry_policy(RetryPolicy::fixed(Duration::from_millis(50))),
        );

        let (shutdown, signal) = oneshot::channel::<()>();
        {
            let supervisor = Arc::clone(&supervisor);
            tokio::spawn(async move {
                supervisor
                    .run(async {
                        let _ = signal.await;
                    })
                    .await;
            });
        }

        let harness = Self {
            broker,
            store,
            connector,
            supervisor,
            shutdown,
        };
        harness.consuming().await;
        harness
    }

    async fn consuming(&self) {
        let mut states = self.supervisor.subscribe();
        tokio::time::timeout(
            Duration::from_secs(5),
            states.wait_for(|state| *state == ConnectionState::Consuming),
        )
        .await
        .expect("service did not reach CONSUMING")
        .expect("supervisor dropped");
    }

    fn client(&self) -> RpcClient {
        RpcClient::new(Arc::new(self.broker.clone())).with_timeout(Duration::from_secs(2))
    }

    fn stop(self) {
        let _ = self.shutdown.send(());
    }
}

#[tokio::test]
async fn test_balance_query_for_cl001() {
    let harness = Harness::start().await;

    let envelope = harness
        .client()
        .call(RoutingKey::BalanceQuery, &json!({"idCliente": "CL001"}))
        .await
        .unwrap();

    assert_eq!(envelope, ResponseEnvelope::ok(json!({"idCliente": "CL001", "saldo": 1500.0})));
    harness.stop();
}

#[tokio::test]
async fn test_queue_is_bound_to_every_bank_key() {
    let harness = Harness::start().await;

    let keys = harness.broker.bound_routing_keys(BANCO_QUEUE);

    assert_eq!(
        keys,
        vec![
            "banco.consulta.saldo",
            "banco.historial",
            "banco.prestamo.solicitar",
            "banco.transferir",
        ]
    );
    harness.stop();
}

#[tokio::test]
async fn test_transfer_then_history() {
    let harness = Harness::start().await;
    let client = harness.client();

    let receipt: TransferReceipt = client
        .call_for(
            RoutingKey::Transfer,
            &json!({"idClienteOrigen": "CL001", "idClienteDestino": "CL002", "monto": 300.0}),
        )
        .await
        .unwrap();
    assert_eq!(receipt.new_balance, 1200.0);

    let balance: Balance = client
        .call_for(RoutingKey::BalanceQuery, &json!({"idCliente": "CL002"}))
        .await
        .unwrap();
    assert_eq!(balance.balance, 800.0);

    let history: Vec<Transaction> = client
        .call_for(RoutingKey::History, &json!({"idCliente": "CL001"}))
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].kind, TRANSFER_SENT);
    assert_eq!(history[0].amount, 300.0);
    harness.stop();
}

#[tokio::test]
async fn test_insufficient_funds_is_error_envelope() {
    let harness = Harness::start().await;

    let envelope = harness
        .client()
        .call(
            RoutingKey::Transfer,
            &json!({"idClienteOrigen": "CL002", "idClienteDestino": "CL001", "monto": 9999.0}),
        )
        .await
        .unwrap();

    assert_eq!(envelope, ResponseEnvelope::error("Saldo insuficiente"));
    assert_eq!(harness.store.balance_of("CL002"), Some(500.0));
    harness.stop();
}

#[tokio::test]
async fn test_loan_request_is_approved() {
    let harness = Harness::start().await;

    let receipt: LoanReceipt = harness
        .client()
        .call_for(RoutingKey::LoanRequest, &json!({"idCliente": "CL001", "monto": 5000.0}))
        .await
        .unwrap();

    assert_eq!(receipt.status, "aprobado");
    assert!(receipt.loan_id.starts_with("PR"));
    assert_eq!(harness.store.loans().len(), 1);
    harness.stop();
}

#[tokio::test]
async fn test_unknown_client_through_call_for() {
    let harness = Harness::start().await;

    let result: Result<Balance, _> = harness
        .client()
        .call_for(RoutingKey::BalanceQuery, &json!({"idCliente": "CL404"}))
        .await;

    assert_eq!(result, Err(RpcError::Operation("Cliente no encontrado".to_string())));
    harness.stop();
}

#[tokio::test]
async fn test_database_loss_answers_then_reconnects() {
    let harness = Harness::start().await;
    harness
        .store
        .fail_with(Some(RpcError::Connection("server closed the connection".to_string())));

    let envelope = harness
        .client()
        .call(RoutingKey::BalanceQuery, &json!({"idCliente": "CL001"}))
        .await
        .unwrap();
    assert!(!envelope.is_ok());

    // The probe fails while the database is down, so the service stays away
    // from the queue until it is back.
    let attempts = harness.connector.attempts();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(harness.connector.attempts() > attempts);
    assert_ne!(harness.supervisor.state(), ConnectionState::Consuming);

    harness.store.fail_with(None);
    harness.consuming().await;
    let balance: Balance = harness
        .client()
        .call_for(RoutingKey::BalanceQuery, &json!({"idCliente": "CL001"}))
        .await
        .unwrap();
    assert_eq!(balance.balance, 1500.0);
    harness.stop();
}
