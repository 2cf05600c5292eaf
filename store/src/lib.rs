//! `sqlx` implementations of the broker RPC store seams.
//!
//! - [`PostgresAccountStore`]: accounts, movements and loans of the bank
//!   (`Cuentas`, `Transacciones`, `Prestamos`)
//! - [`MySqlPersonRegistry`]: the identity registry (`Personas`)
//!
//! Both configs implement [`StoreConnector`](broker_rpc_core::store::StoreConnector),
//! so a service builds a fresh pool, and probes it, every time its session
//! is (re)established.
//!
//! # Example
//!
//! ```no_run
//! use broker_rpc_core::store::{AccountStore, StoreConnector};
//! use broker_rpc_store::PostgresConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PostgresConfig::from_env()?;
//! let store = config.connect().await?;
//! let balance = store.balance("CL001").await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
mod error;
pub mod mysql;
pub mod postgres;

pub use config::{MySqlConfig, PostgresConfig};
pub use mysql::MySqlPersonRegistry;
pub use postgres::PostgresAccountStore;
