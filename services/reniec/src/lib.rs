//! # RENIEC Service
//!
//! Validates national identity numbers on queue `q_reniec`:
//! `reniec.validar` with `{dni}` answers `{DNI, nombres, apell_pat, apell_mat}`,
//! or `ERROR` "DNI no encontrado" when nobody holds that DNI.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use broker_rpc_core::broker::BoxFuture;
use broker_rpc_core::envelope::decode_payload;
use broker_rpc_core::error::RpcError;
use broker_rpc_core::payload::IdentityQuery;
use broker_rpc_core::store::{PersonRegistry, StoreConnector};
use broker_rpc_core::topology::{RoutingKey, ServiceTopology};
use broker_rpc_runtime::{Handler, Service};
use serde_json::Value;
use std::sync::Arc;

/// Service name used in logs and metrics.
pub const SERVICE_NAME: &str = "reniec";

/// Reply message for an unknown DNI.
pub const DNI_NOT_FOUND: &str = "DNI no encontrado";

/// Request handler of the identity registry.
pub struct ReniecHandler {
    registry: Arc<dyn PersonRegistry>,
}

impl ReniecHandler {
    /// Handler over `registry`.
    #[must_use]
    pub fn new(registry: Arc<dyn PersonRegistry>) -> Self {
        Self { registry }
    }

    async fn validate(&self, payload: &[u8]) -> Result<Value, RpcError> {
        let query: IdentityQuery = decode_payload(RoutingKey::IdentityValidation, payload)?;
        let dni = query.dni.trim();
        if dni.is_empty() {
            return Err(RpcError::Operation("El campo dni es obligatorio".to_string()));
        }

        let Some(person) = self.registry.find_person(dni).await? else {
            tracing::info!(dni, "DNI not found");
            return Err(RpcError::Operation(DNI_NOT_FOUND.to_string()));
        };
        tracing::info!(dni, "DNI validated");
        serde_json::to_value(&person)
            .map_err(|e| RpcError::Protocol(format!("Failed to encode reply: {e}")))
    }
}

impl Handler for ReniecHandler {
    fn handle<'a>(&'a self, key: RoutingKey, payload: &'a [u8]) -> BoxFuture<'a, Result<Value, RpcError>> {
        Box::pin(async move {
            match key {
                RoutingKey::IdentityValidation => self.validate(payload).await,
                other => Err(RpcError::Operation(format!("Operación no reconocida: {other}"))),
            }
        })
    }
}

/// The identity registry service: queue `q_reniec` bound to `reniec.validar`.
pub struct ReniecService {
    topology: ServiceTopology,
    connector: Arc<dyn StoreConnector<dyn PersonRegistry>>,
}

impl ReniecService {
    /// Service opening its registry through `connector`.
    #[must_use]
    pub fn new(connector: Arc<dyn StoreConnector<dyn PersonRegistry>>) -> Self {
        Self {
            topology: ServiceTopology::reniec(),
            connector,
        }
    }
}

impl Service for ReniecService {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    fn topology(&self) -> &ServiceTopology {
        &self.topology
    }

    fn open(&self) -> BoxFuture<'_, Result<Arc<dyn Handler>, RpcError>> {
        Box::pin(async move {
            let registry = self.connector.connect().await?;
            registry.probe().await?;
            tracing::info!(service = SERVICE_NAME, "Person registry connected");
            Ok(Arc::new(ReniecHandler::new(registry)) as Arc<dyn Handler>)
        })
    }
}
