//! Broker topology: the shared exchange, service queues and routing keys.
//!
//! All requests travel through a single durable direct exchange. Each
//! service owns one durable queue bound to the routing keys it answers.
//! Replies bypass the exchange and go through the default exchange straight
//! to the caller's exclusive reply queue.
//!
//! ```text
//!  client ──publish(key)──▶ exchange_principal ──key──▶ q_banco / q_reniec
//!     ▲                                                      │
//!     └──────── default exchange ("" , reply_to) ◀───────────┘
//! ```

use crate::error::RpcError;
use std::fmt;
use std::str::FromStr;

/// Name of the durable direct exchange every request is published to.
pub const EXCHANGE_NAME: &str = "exchange_principal";

/// The broker's default exchange, which routes by queue name.
pub const DEFAULT_EXCHANGE: &str = "";

/// Durable queue consumed by the banking service.
pub const BANCO_QUEUE: &str = "q_banco";

/// Durable queue consumed by the identity registry service.
pub const RENIEC_QUEUE: &str = "q_reniec";

/// Every operation that can be requested over the broker.
///
/// The routing key selects both the destination queue and the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoutingKey {
    /// `banco.consulta.saldo`: balance of one account.
    BalanceQuery,
    /// `banco.transferir`: move funds between two accounts.
    Transfer,
    /// `banco.historial`: transaction history of one account.
    History,
    /// `banco.prestamo.solicitar`: open a loan for one account.
    LoanRequest,
    /// `reniec.validar`: look up a person by national id.
    IdentityValidation,
}

impl RoutingKey {
    /// All routing keys, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::BalanceQuery,
        Self::Transfer,
        Self::History,
        Self::LoanRequest,
        Self::IdentityValidation,
    ];

    /// Wire form of the routing key.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BalanceQuery => "banco.consulta.saldo",
            Self::Transfer => "banco.transferir",
            Self::History => "banco.historial",
            Self::LoanRequest => "banco.prestamo.solicitar",
            Self::IdentityValidation => "reniec.validar",
        }
    }

    /// Parse a routing key received from the broker.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Operation`] naming the key when it is not one
    /// this workspace knows how to answer.
    pub fn parse(key: &str) -> Result<Self, RpcError> {
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.as_str() == key)
            .ok_or_else(|| RpcError::Operation(format!("Operación no reconocida: {key}")))
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoutingKey {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Exchange, queue and bindings a service declares before consuming.
///
/// Declarations are idempotent, so a service re-declares its topology on
/// every (re)connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTopology {
    /// Exchange the queue is bound to.
    pub exchange: String,
    /// Durable queue the service consumes from.
    pub queue: String,
    /// Routing keys bound from the exchange to the queue.
    pub routing_keys: Vec<RoutingKey>,
}

impl ServiceTopology {
    /// Topology for a queue bound to `routing_keys` on the shared exchange.
    #[must_use]
    pub fn new(queue: impl Into<String>, routing_keys: Vec<RoutingKey>) -> Self {
        Self {
            exchange: EXCHANGE_NAME.to_string(),
            queue: queue.into(),
            routing_keys,
        }
    }

    /// Topology of the banking service.
    #[must_use]
    pub fn banco() -> Self {
        Self::new(
            BANCO_QUEUE,
            vec![
                RoutingKey::BalanceQuery,
                RoutingKey::Transfer,
                RoutingKey::History,
                RoutingKey::LoanRequest,
            ],
        )
    }

    /// Topology of the identity registry service.
    #[must_use]
    pub fn reniec() -> Self {
        Self::new(RENIEC_QUEUE, vec![RoutingKey::IdentityValidation])
    }

    /// Whether this topology routes `key` to its queue.
    #[must_use]
    pub fn binds(&self, key: RoutingKey) -> bool {
        self.routing_keys.contains(&key)
    }
}
