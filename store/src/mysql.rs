//! MySQL identity registry (`Personas(DNI, nombres, apell_pat, apell_mat)`).

use crate::config::{ACQUIRE_TIMEOUT, MySqlConfig};
use crate::error::database_error;
use broker_rpc_core::broker::BoxFuture;
use broker_rpc_core::error::RpcError;
use broker_rpc_core::payload::Person;
use broker_rpc_core::store::{PersonRegistry, StoreConnector};
use sqlx::MySqlPool;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use std::sync::Arc;

const POOL_SIZE: u32 = 5;

/// [`PersonRegistry`] backed by a MySQL pool.
#[derive(Clone)]
pub struct MySqlPersonRegistry {
    pool: MySqlPool,
}

impl MySqlPersonRegistry {
    /// Build a pool from `config` and open its first connection.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Connection`] if the database is unreachable.
    pub async fn connect(config: &MySqlConfig) -> Result<Self, RpcError> {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database);

        let pool = MySqlPoolOptions::new()
            .max_connections(POOL_SIZE)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|e| RpcError::Connection(format!("Failed to connect to MySQL: {e}")))?;

        tracing::info!(host = %config.host, database = %config.database, "MySQL pool created");
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

impl PersonRegistry for MySqlPersonRegistry {
    fn probe(&self) -> BoxFuture<'_, Result<(), RpcError>> {
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map(|_| ())
                .map_err(|e| RpcError::Connection(format!("MySQL probe failed: {e}")))
        })
    }

    fn find_person(&self, dni: &str) -> BoxFuture<'_, Result<Option<Person>, RpcError>> {
        let dni = dni.to_string();
        Box::pin(async move {
            let row: Option<(String, String, String, String)> = sqlx::query_as(
                "SELECT DNI, nombres, apell_pat, apell_mat FROM Personas WHERE DNI = ?",
            )
            .bind(&dni)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| database_error("Failed to look up person", &e))?;

            Ok(row.map(|(dni, given_names, paternal_surname, maternal_surname)| Person {
                dni,
                given_names,
                paternal_surname,
                maternal_surname,
            }))
        })
    }
}

impl StoreConnector<dyn PersonRegistry> for MySqlConfig {
    fn connect(&self) -> BoxFuture<'_, Result<Arc<dyn PersonRegistry>, RpcError>> {
        Box::pin(async move {
            let registry = MySqlPersonRegistry::connect(self).await?;
            Ok(Arc::new(registry) as Arc<dyn PersonRegistry>)
        })
    }
}
