//! Request payloads and result data of every operation.
//!
//! Field names on the wire are fixed by the services' existing clients, so
//! each struct renames its fields explicitly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Payload of `banco.consulta.saldo` and `banco.historial`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountQuery {
    /// Account holder id, e.g. `CL001`.
    #[serde(rename = "idCliente")]
    pub client_id: String,
}

/// Result of `banco.consulta.saldo`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    /// Account holder id.
    #[serde(rename = "idCliente")]
    pub client_id: String,
    /// Current balance.
    #[serde(rename = "saldo")]
    pub balance: f64,
}

/// Payload of `banco.transferir`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Account debited.
    #[serde(rename = "idClienteOrigen")]
    pub origin_id: String,
    /// Account credited.
    #[serde(rename = "idClienteDestino")]
    pub destination_id: String,
    /// Amount moved; must be positive.
    #[serde(rename = "monto")]
    pub amount: f64,
}

/// Result of `banco.transferir`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferReceipt {
    /// Account debited.
    #[serde(rename = "idClienteOrigen")]
    pub origin_id: String,
    /// Account credited.
    #[serde(rename = "idClienteDestino")]
    pub destination_id: String,
    /// Amount moved.
    #[serde(rename = "monto")]
    pub amount: f64,
    /// Balance of the origin account after the transfer.
    #[serde(rename = "nuevo_saldo")]
    pub new_balance: f64,
}

/// One entry of `banco.historial`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// When the movement was recorded.
    #[serde(rename = "fecha")]
    pub recorded_at: DateTime<Utc>,
    /// Movement kind, e.g. `TRANSFERENCIA_ENVIADA`.
    #[serde(rename = "tipo")]
    pub kind: String,
    /// Amount of the movement.
    #[serde(rename = "monto")]
    pub amount: f64,
}

/// Movement kind recorded on the debited account of a transfer.
pub const TRANSFER_SENT: &str = "TRANSFERENCIA_ENVIADA";

/// Movement kind recorded on the credited account of a transfer.
pub const TRANSFER_RECEIVED: &str = "TRANSFERENCIA_RECIBIDA";

/// Payload of `banco.prestamo.solicitar`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanRequest {
    /// Borrowing account.
    #[serde(rename = "idCliente")]
    pub client_id: String,
    /// Principal requested; must be positive.
    #[serde(rename = "monto")]
    pub amount: f64,
}

/// Result of `banco.prestamo.solicitar`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanReceipt {
    /// Identifier of the new loan.
    #[serde(rename = "idPrestamo")]
    pub loan_id: String,
    /// Decision, `aprobado` for every accepted request.
    #[serde(rename = "estado")]
    pub status: String,
}

/// Status reported for an accepted loan.
pub const LOAN_APPROVED: &str = "aprobado";

/// Payload of `reniec.validar`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityQuery {
    /// National identity document number.
    pub dni: String,
}

/// Result of `reniec.validar`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    /// National identity document number.
    #[serde(rename = "DNI")]
    pub dni: String,
    /// Given names.
    #[serde(rename = "nombres")]
    pub given_names: String,
    /// Paternal surname.
    #[serde(rename = "apell_pat")]
    pub paternal_surname: String,
    /// Maternal surname.
    #[serde(rename = "apell_mat")]
    pub maternal_surname: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code unwraps for clear failure messages
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn transfer_request_uses_wire_field_names() {
        let request: TransferRequest = serde_json::from_value(json!({
            "idClienteOrigen": "CL001",
            "idClienteDestino": "CL002",
            "monto": 100.0
        }))
        .unwrap();
        assert_eq!(request.origin_id, "CL001");
        assert_eq!(request.destination_id, "CL002");
        assert!((request.amount - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn person_serializes_with_uppercase_dni() {
        let person = Person {
            dni: "12345678".into(),
            given_names: "Juan Carlos".into(),
            paternal_surname: "Pérez".into(),
            maternal_surname: "Gómez".into(),
        };
        assert_eq!(
            serde_json::to_value(&person).unwrap(),
            json!({
                "DNI": "12345678",
                "nombres": "Juan Carlos",
                "apell_pat": "Pérez",
                "apell_mat": "Gómez"
            })
        );
    }

    #[test]
    fn missing_amount_is_rejected() {
        let result = serde_json::from_value::<LoanRequest>(json!({"idCliente": "CL001"}));
        assert!(result.is_err());
    }
}
