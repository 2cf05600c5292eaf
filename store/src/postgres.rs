//! PostgreSQL account store of the bank service.
//!
//! Schema:
//!
//! ```sql
//! Cuentas(id_cliente, saldo)
//! Transacciones(id_transaccion, id_cliente, tipo, monto, fecha)
//! Prestamos(id_prestamo, id_cliente, monto_total, monto_pendiente, estado, fecha_solicitud)
//! ```
//!
//! Amounts are `NUMERIC` in the database and `f64` on the wire; queries cast
//! at the boundary.

use crate::config::{ACQUIRE_TIMEOUT, PostgresConfig};
use crate::error::database_error;
use broker_rpc_core::broker::BoxFuture;
use broker_rpc_core::error::RpcError;
use broker_rpc_core::payload::{
    LOAN_APPROVED, LoanReceipt, TRANSFER_RECEIVED, TRANSFER_SENT, Transaction,
};
use broker_rpc_core::store::{AccountRejection, AccountStore, StoreConnector};
use chrono::{DateTime, Utc};
use rand::Rng;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::sync::Arc;

/// Status stored for a newly opened loan.
pub const LOAN_ACTIVE: &str = "activo";

/// [`AccountStore`] backed by a PostgreSQL pool.
#[derive(Clone)]
pub struct PostgresAccountStore {
    pool: PgPool,
}

impl PostgresAccountStore {
    /// Build a pool from `config` and open its first connection.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Connection`] if the database is unreachable.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, RpcError> {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.user)
            .password(&config.password);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|e| RpcError::Connection(format!("Failed to connect to PostgreSQL: {e}")))?;

        tracing::info!(
            host = %config.host,
            database = %config.database,
            max_connections = config.max_connections,
            "PostgreSQL pool created"
        );
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn account_exists(&self, client_id: &str) -> Result<bool, RpcError> {
        let exists: (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM Cuentas WHERE id_cliente = $1)")
                .bind(client_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| database_error("Failed to look up account", &e))?;
        Ok(exists.0)
    }

    async fn transfer_funds(
        &self,
        origin_id: &str,
        destination_id: &str,
        amount: f64,
    ) -> Result<f64, RpcError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| database_error("Failed to begin transaction", &e))?;

        // Both rows are locked in id order so opposite transfers cannot deadlock.
        let accounts: Vec<(String, f64)> = sqlx::query_as(
            r"
            SELECT id_cliente, saldo::float8
            FROM Cuentas
            WHERE id_cliente IN ($1, $2)
            ORDER BY id_cliente
            FOR UPDATE
            ",
        )
        .bind(origin_id)
        .bind(destination_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| database_error("Failed to lock accounts", &e))?;

        let balance_of = |id: &str| accounts.iter().find(|(owner, _)| owner == id).map(|(_, saldo)| *saldo);
        let origin_balance = balance_of(origin_id).ok_or(AccountRejection::OriginNotFound)?;
        if balance_of(destination_id).is_none() {
            return Err(AccountRejection::DestinationNotFound.into());
        }
        if origin_balance < amount {
            return Err(AccountRejection::InsufficientFunds.into());
        }

        let new_balance: (f64,) = sqlx::query_as(
            "UPDATE Cuentas SET saldo = saldo - $1::numeric WHERE id_cliente = $2 RETURNING saldo::float8",
        )
        .bind(amount)
        .bind(origin_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| database_error("Failed to debit origin", &e))?;

        sqlx::query("UPDATE Cuentas SET saldo = saldo + $1::numeric WHERE id_cliente = $2")
            .bind(amount)
            .bind(destination_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| database_error("Failed to credit destination", &e))?;

        for (client_id, kind) in [(origin_id, TRANSFER_SENT), (destination_id, TRANSFER_RECEIVED)] {
            sqlx::query(
                "INSERT INTO Transacciones (id_cliente, tipo, monto, fecha) VALUES ($1, $2, $3::numeric, NOW())",
            )
            .bind(client_id)
            .bind(kind)
            .bind(amount)
            .execute(&mut *tx)
            .await
            .map_err(|e| database_error("Failed to record movement", &e))?;
        }

        tx.commit()
            .await
            .map_err(|e| database_error("Failed to commit transfer", &e))?;

        tracing::info!(
            origin = origin_id,
            destination = destination_id,
            amount,
            "Transfer committed"
        );
        metrics::counter!("store_transfers_total").increment(1);
        Ok(new_balance.0)
    }

    async fn movements(&self, client_id: &str) -> Result<Vec<Transaction>, RpcError> {
        if !self.account_exists(client_id).await? {
            return Err(AccountRejection::ClientNotFound.into());
        }

        let rows: Vec<(DateTime<Utc>, String, f64)> = sqlx::query_as(
            r"
            SELECT fecha::timestamptz, tipo, monto::float8
            FROM Transacciones
            WHERE id_cliente = $1
            ORDER BY fecha DESC, id_transaccion DESC
            ",
        )
        .bind(client_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| database_error("Failed to read movements", &e))?;

        Ok(rows
            .into_iter()
            .map(|(recorded_at, kind, amount)| Transaction {
                recorded_at,
                kind,
                amount,
            })
            .collect())
    }

    async fn insert_loan(&self, client_id: &str, amount: f64) -> Result<LoanReceipt, RpcError> {
        if !self.account_exists(client_id).await? {
            return Err(AccountRejection::ClientNotFound.into());
        }

        let loan_id = format!("PR{:06}", rand::thread_rng().gen_range(0..1_000_000));
        sqlx::query(
            r"
            INSERT INTO Prestamos
                (id_prestamo, id_cliente, monto_total, monto_pendiente, estado, fecha_solicitud)
            VALUES ($1, $2, $3::numeric, $3::numeric, $4, NOW())
            ",
        )
        .bind(&loan_id)
        .bind(client_id)
        .bind(amount)
        .bind(LOAN_ACTIVE)
        .execute(&self.pool)
        .await
        .map_err(|e| database_error("Failed to register loan", &e))?;

        tracing::info!(loan_id = %loan_id, client_id, amount, "Loan opened");
        metrics::counter!("store_loans_total").increment(1);
        Ok(LoanReceipt {
            loan_id,
            status: LOAN_APPROVED.to_string(),
        })
    }
}

impl AccountStore for PostgresAccountStore {
    fn probe(&self) -> BoxFuture<'_, Result<(), RpcError>> {
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map(|_| ())
                .map_err(|e| RpcError::Connection(format!("PostgreSQL probe failed: {e}")))
        })
    }

    fn balance(&self, client_id: &str) -> BoxFuture<'_, Result<Option<f64>, RpcError>> {
        let client_id = client_id.to_string();
        Box::pin(async move {
            let row: Option<(f64,)> =
                sqlx::query_as("SELECT saldo::float8 FROM Cuentas WHERE id_cliente = $1")
                    .bind(&client_id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| database_error("Failed to read balance", &e))?;
            Ok(row.map(|(saldo,)| saldo))
        })
    }

    fn transfer(
        &self,
        origin_id: &str,
        destination_id: &str,
        amount: f64,
    ) -> BoxFuture<'_, Result<f64, RpcError>> {
        let origin_id = origin_id.to_string();
        let destination_id = destination_id.to_string();
        Box::pin(async move { self.transfer_funds(&origin_id, &destination_id, amount).await })
    }

    fn history(&self, client_id: &str) -> BoxFuture<'_, Result<Vec<Transaction>, RpcError>> {
        let client_id = client_id.to_string();
        Box::pin(async move { self.movements(&client_id).await })
    }

    fn open_loan(&self, client_id: &str, amount: f64) -> BoxFuture<'_, Result<LoanReceipt, RpcError>> {
        let client_id = client_id.to_string();
        Box::pin(async move { self.insert_loan(&client_id, amount).await })
    }
}

impl StoreConnector<dyn AccountStore> for PostgresConfig {
    fn connect(&self) -> BoxFuture<'_, Result<Arc<dyn AccountStore>, RpcError>> {
        Box::pin(async move {
            let store = PostgresAccountStore::connect(self).await?;
            Ok(Arc::new(store) as Arc<dyn AccountStore>)
        })
    }
}
