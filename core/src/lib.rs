//! # Broker RPC Core
//!
//! Request/reply over a publish/subscribe message broker.
//!
//! A caller publishes a request to a shared direct exchange with a routing
//! key naming the operation, a fresh correlation id and the name of its own
//! exclusive reply queue. A service consuming the bound queue runs the
//! handler and publishes a [`ResponseEnvelope`](envelope::ResponseEnvelope)
//! back to that reply queue.
//!
//! This crate holds everything both sides agree on:
//!
//! - [`envelope`]: correlation ids and the `OK`/`ERROR` response envelope
//! - [`payload`]: request payloads and result data of each operation
//! - [`topology`]: exchange, queues and routing keys
//! - [`broker`]: the [`Broker`](broker::Broker) and
//!   [`BrokerChannel`](broker::BrokerChannel) seams
//! - [`store`]: persistence seams used by the service handlers
//! - [`error`]: the [`RpcError`](error::RpcError) taxonomy
//! - [`config`]: environment-variable loading
//!
//! ## Example
//!
//! ```ignore
//! use broker_rpc_core::payload::{AccountQuery, Balance};
//! use broker_rpc_core::topology::RoutingKey;
//!
//! let balance: Balance = client
//!     .call_for(RoutingKey::BalanceQuery, &AccountQuery { client_id: "CL001".into() })
//!     .await?;
//! ```

pub mod broker;
pub mod config;
pub mod envelope;
pub mod error;
pub mod payload;
pub mod store;
pub mod topology;

pub use broker::{Broker, BrokerChannel};
pub use envelope::{CorrelationId, ResponseEnvelope};
pub use error::RpcError;
pub use topology::{RoutingKey, ServiceTopology};
