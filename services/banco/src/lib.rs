//! # Banco Service
//!
//! Answers the bank's requests on queue `q_banco`:
//!
//! | Routing key                | Request                                      | Reply data                       |
//! |----------------------------|----------------------------------------------|----------------------------------|
//! | `banco.consulta.saldo`     | `{idCliente}`                                | `{idCliente, saldo}`             |
//! | `banco.transferir`         | `{idClienteOrigen, idClienteDestino, monto}` | request fields plus `nuevo_saldo` |
//! | `banco.historial`          | `{idCliente}`                                | `[{fecha, tipo, monto}, ...]`    |
//! | `banco.prestamo.solicitar` | `{idCliente, monto}`                         | `{idPrestamo, estado}`           |
//!
//! The handler only validates input and maps store results onto payloads;
//! persistence lives behind [`AccountStore`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use broker_rpc_core::broker::BoxFuture;
use broker_rpc_core::envelope::decode_payload;
use broker_rpc_core::error::RpcError;
use broker_rpc_core::payload::{
    AccountQuery, Balance, LoanRequest, TransferReceipt, TransferRequest,
};
use broker_rpc_core::store::{AccountRejection, AccountStore, StoreConnector};
use broker_rpc_core::topology::{RoutingKey, ServiceTopology};
use broker_rpc_runtime::{Handler, Service};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Service name used in logs and metrics.
pub const SERVICE_NAME: &str = "banco";

fn to_data<T: Serialize>(value: &T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::Protocol(format!("Failed to encode reply: {e}")))
}

fn require_id(value: &str, field: &str) -> Result<(), RpcError> {
    if value.trim().is_empty() {
        return Err(RpcError::Operation(format!("El campo {field} es obligatorio")));
    }
    Ok(())
}

fn require_positive(amount: f64) -> Result<(), RpcError> {
    if !(amount.is_finite() && amount > 0.0) {
        return Err(RpcError::Operation("El monto debe ser mayor a cero".to_string()));
    }
    Ok(())
}

/// Request handler of the bank.
pub struct BancoHandler {
    store: Arc<dyn AccountStore>,
}

impl BancoHandler {
    /// Handler over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self { store }
    }

    async fn balance(&self, payload: &[u8]) -> Result<Value, RpcError> {
        let query: AccountQuery = decode_payload(RoutingKey::BalanceQuery, payload)?;
        require_id(&query.client_id, "idCliente")?;

        let balance = self
            .store
            .balance(&query.client_id)
            .await?
            .ok_or(AccountRejection::ClientNotFound)?;
        tracing::info!(client_id = %query.client_id, "Balance queried");
        to_data(&Balance {
            client_id: query.client_id,
            balance,
        })
    }

    async fn transfer(&self, payload: &[u8]) -> Result<Value, RpcError> {
        let request: TransferRequest = decode_payload(RoutingKey::Transfer, payload)?;
        require_id(&request.origin_id, "idClienteOrigen")?;
        require_id(&request.destination_id, "idClienteDestino")?;
        require_positive(request.amount)?;
        if request.origin_id == request.destination_id {
            return Err(RpcError::Operation(
                "La cuenta de origen y destino deben ser distintas".to_string(),
            ));
        }

        let new_balance = self
            .store
            .transfer(&request.origin_id, &request.destination_id, request.amount)
            .await?;
        tracing::info!(
            origin = %request.origin_id,
            destination = %request.destination_id,
            amount = request.amount,
            "Transfer completed"
        );
        to_data(&TransferReceipt {
            origin_id: request.origin_id,
            destination_id: request.destination_id,
            amount: request.amount,
            new_balance,
        })
    }

    async fn history(&self, payload: &[u8]) -> Result<Value, RpcError> {
        let query: AccountQuery = decode_payload(RoutingKey::History, payload)?;
        require_id(&query.client_id, "idCliente")?;

        let movements = self.store.history(&query.client_id).await?;
        tracing::info!(client_id = %query.client_id, movements = movements.len(), "History read");
        to_data(&movements)
    }

    async fn loan(&self, payload: &[u8]) -> Result<Value, RpcError> {
        let request: LoanRequest = decode_payload(RoutingKey::LoanRequest, payload)?;
        require_id(&request.client_id, "idCliente")?;
        require_positive(request.amount)?;

        let receipt = self.store.open_loan(&request.client_id, request.amount).await?;
        tracing::info!(client_id = %request.client_id, loan_id = %receipt.loan_id, "Loan approved");
        to_data(&receipt)
    }
}

impl Handler for BancoHandler {
    fn handle<'a>(&'a self, key: RoutingKey, payload: &'a [u8]) -> BoxFuture<'a, Result<Value, RpcError>> {
        Box::pin(async move {
            match key {
                RoutingKey::BalanceQuery => self.balance(payload).await,
                RoutingKey::Transfer => self.transfer(payload).await,
                RoutingKey::History => self.history(payload).await,
                RoutingKey::LoanRequest => self.loan(payload).await,
                RoutingKey::IdentityValidation => {
                    Err(RpcError::Operation(format!("Operación no reconocida: {key}")))
                }
            }
        })
    }
}

/// The bank service: queue `q_banco` bound to every `banco.*` key.
pub struct BancoService {
    topology: ServiceTopology,
    connector: Arc<dyn StoreConnector<dyn AccountStore>>,
}

impl BancoService {
    /// Service opening its account store through `connector`.
    #[must_use]
    pub fn new(connector: Arc<dyn StoreConnector<dyn AccountStore>>) -> Self {
        Self {
            topology: ServiceTopology::banco(),
            connector,
        }
    }
}

impl Service for BancoService {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    fn topology(&self) -> &ServiceTopology {
        &self.topology
    }

    fn open(&self) -> BoxFuture<'_, Result<Arc<dyn Handler>, RpcError>> {
        Box::pin(async move {
            let store = self.connector.connect().await?;
            store.probe().await?;
            tracing::info!(service = SERVICE_NAME, "Account store connected");
            Ok(Arc::new(BancoHandler::new(store)) as Arc<dyn Handler>)
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::float_cmp)] // Test code unwraps for clear failure messages

    use super::*;
    use broker_rpc_testing::InMemoryAccountStore;
    use serde_json::json;

    fn handler() -> (BancoHandler, InMemoryAccountStore) {
        let store = InMemoryAccountStore::seeded();
        (BancoHandler::new(Arc::new(store.clone())), store)
    }

    async fn handle(handler: &BancoHandler, key: RoutingKey, payload: &Value) -> Result<Value, RpcError> {
        handler.handle(key, payload.to_string().as_bytes()).await
    }

    #[tokio::test]
    async fn balance_of_known_client() {
        let (handler, _) = handler();
        let data = handle(&handler, RoutingKey::BalanceQuery, &json!({"idCliente": "CL001"})).await;
        assert_eq!(data, Ok(json!({"idCliente": "CL001", "saldo": 1500.0})));
    }

    #[tokio::test]
    async fn balance_of_unknown_client() {
        let (handler, _) = handler();
        let data = handle(&handler, RoutingKey::BalanceQuery, &json!({"idCliente": "CL404"})).await;
        assert_eq!(data, Err(RpcError::Operation("Cliente no encontrado".to_string())));
    }

    #[tokio::test]
    async fn transfer_validations_run_before_the_store() {
        let (handler, store) = handler();
        for (payload, message) in [
            (
                json!({"idClienteOrigen": "CL001", "idClienteDestino": "CL002", "monto": 0}),
                "El monto debe ser mayor a cero",
            ),
            (
                json!({"idClienteOrigen": "CL001", "idClienteDestino": "CL002", "monto": -5.0}),
                "El monto debe ser mayor a cero",
            ),
            (
                json!({"idClienteOrigen": "CL001", "idClienteDestino": "CL001", "monto": 5.0}),
                "La cuenta de origen y destino deben ser distintas",
            ),
            (
                json!({"idClienteOrigen": "", "idClienteDestino": "CL001", "monto": 5.0}),
                "El campo idClienteOrigen es obligatorio",
            ),
        ] {
            let result = handle(&handler, RoutingKey::Transfer, &payload).await;
            assert_eq!(result, Err(RpcError::Operation(message.to_string())), "{payload}");
        }
        assert_eq!(store.balance_of("CL001"), Some(1500.0));
        assert!(store.movements_of("CL001").is_empty());
    }

    #[tokio::test]
    async fn transfer_reports_new_origin_balance() {
        let (handler, store) = handler();
        let data = handle(
            &handler,
            RoutingKey::Transfer,
            &json!({"idClienteOrigen": "CL001", "idClienteDestino": "CL002", "monto": 250.5}),
        )
        .await
        .unwrap();

        assert_eq!(data["nuevo_saldo"], json!(1249.5));
        assert_eq!(data["monto"], json!(250.5));
        assert_eq!(store.balance_of("CL002"), Some(750.5));
    }

    #[tokio::test]
    async fn missing_fields_are_protocol_errors() {
        let (handler, _) = handler();
        let result = handle(&handler, RoutingKey::Transfer, &json!({"idClienteOrigen": "CL001"})).await;
        assert!(matches!(result, Err(RpcError::Protocol(ref m)) if m.contains("banco.transferir")));
    }

    #[tokio::test]
    async fn identity_key_is_not_handled_here() {
        let (handler, _) = handler();
        let result = handle(&handler, RoutingKey::IdentityValidation, &json!({"dni": "1"})).await;
        assert_eq!(
            result,
            Err(RpcError::Operation("Operación no reconocida: reniec.validar".to_string()))
        );
    }

    #[tokio::test]
    async fn loan_requires_positive_amount() {
        let (handler, store) = handler();
        let result = handle(&handler, RoutingKey::LoanRequest, &json!({"idCliente": "CL001", "monto": 0})).await;
        assert!(result.is_err());
        assert!(store.loans().is_empty());
    }
}
