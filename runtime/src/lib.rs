//! # Broker RPC Runtime
//!
//! Clients, servers and the reconnection supervisor for request/reply over a
//! message broker.
//!
//! - [`RpcClient`]: one call per connection, exclusive reply queue,
//!   correlation-id matching and a reply timeout
//! - [`ServerSession`]: declares a service's topology and serves one
//!   request at a time with manual acknowledgement
//! - [`Supervisor`]: keeps a [`Service`] consuming across broker and
//!   database outages
//!
//! ## Example
//!
//! ```ignore
//! use broker_rpc_runtime::{RetryPolicy, Supervisor};
//!
//! let supervisor = Supervisor::new(service, broker)
//!     .with_retry_policy(RetryPolicy::fixed(Duration::from_secs(5)));
//! supervisor.run(async { tokio::signal::ctrl_c().await.ok(); }).await;
//! ```

pub mod client;
pub mod config;
pub mod metrics;
pub mod retry;
pub mod server;
pub mod supervisor;

pub use client::RpcClient;
pub use config::RpcConfig;
pub use retry::RetryPolicy;
pub use server::{Handler, ServerSession, Service};
pub use supervisor::{ConnectionState, Supervisor};
