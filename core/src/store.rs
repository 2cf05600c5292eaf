//! Persistence seams used by the service handlers.
//!
//! Handlers never talk to a database directly. They receive an
//! [`AccountStore`] or a [`PersonRegistry`], obtained from a
//! [`StoreConnector`] every time a server session starts, so a lost database
//! is recovered the same way as a lost broker.

use crate::broker::BoxFuture;
use crate::error::RpcError;
use crate::payload::{LoanReceipt, Person, Transaction};
use std::sync::Arc;
use thiserror::Error;

/// Business rejections every [`AccountStore`] reports with the same wording.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountRejection {
    /// The account does not exist.
    #[error("Cliente no encontrado")]
    ClientNotFound,

    /// The debited account of a transfer does not exist.
    #[error("Cliente origen no encontrado")]
    OriginNotFound,

    /// The credited account of a transfer does not exist.
    #[error("Cliente destino no encontrado")]
    DestinationNotFound,

    /// The debited account cannot cover the amount.
    #[error("Saldo insuficiente")]
    InsufficientFunds,
}

impl From<AccountRejection> for RpcError {
    fn from(rejection: AccountRejection) -> Self {
        Self::Operation(rejection.to_string())
    }
}

/// Accounts, movements and loans of the banking service.
///
/// Implementations return [`RpcError::Connection`] when the database cannot
/// be reached, and [`RpcError::Operation`] for anything else.
pub trait AccountStore: Send + Sync {
    /// Verify the database answers.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Connection`] if it does not.
    fn probe(&self) -> BoxFuture<'_, Result<(), RpcError>>;

    /// Current balance, or `None` if the account does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn balance(&self, client_id: &str) -> BoxFuture<'_, Result<Option<f64>, RpcError>>;

    /// Atomically move `amount` from `origin_id` to `destination_id`,
    /// recording one movement on each account. Returns the new balance of
    /// the origin account.
    ///
    /// # Errors
    ///
    /// Returns an [`AccountRejection`] if either account is missing or the
    /// origin cannot cover the amount; nothing is changed in that case.
    fn transfer(
        &self,
        origin_id: &str,
        destination_id: &str,
        amount: f64,
    ) -> BoxFuture<'_, Result<f64, RpcError>>;

    /// Movements of an account, most recent first.
    ///
    /// # Errors
    ///
    /// Returns [`AccountRejection::ClientNotFound`] if the account does not
    /// exist.
    fn history(&self, client_id: &str) -> BoxFuture<'_, Result<Vec<Transaction>, RpcError>>;

    /// Open a loan of `amount` for an account.
    ///
    /// # Errors
    ///
    /// Returns [`AccountRejection::ClientNotFound`] if the account does not
    /// exist.
    fn open_loan(&self, client_id: &str, amount: f64) -> BoxFuture<'_, Result<LoanReceipt, RpcError>>;
}

/// People registered in the national identity registry.
pub trait PersonRegistry: Send + Sync {
    /// Verify the database answers.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Connection`] if it does not.
    fn probe(&self) -> BoxFuture<'_, Result<(), RpcError>>;

    /// Look a person up by national id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn find_person(&self, dni: &str) -> BoxFuture<'_, Result<Option<Person>, RpcError>>;
}

/// Opens a store of type `S` for a new server session.
pub trait StoreConnector<S: ?Sized>: Send + Sync {
    /// Connect to the backing database.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Connection`] if the database is unreachable.
    fn connect(&self) -> BoxFuture<'_, Result<Arc<S>, RpcError>>;
}
