//! In-memory stores and a connector whose availability tests control.
//!
//! - [`InMemoryAccountStore`]: `HashMap`-backed accounts, movements and loans
//! - [`InMemoryPersonRegistry`]: `HashMap`-backed identity registry
//! - [`SwitchableConnector`]: hands out a store only while "reachable"

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned lock

use broker_rpc_core::broker::BoxFuture;
use broker_rpc_core::error::RpcError;
use broker_rpc_core::payload::{
    LOAN_APPROVED, LoanReceipt, Person, TRANSFER_RECEIVED, TRANSFER_SENT, Transaction,
};
use broker_rpc_core::store::{AccountRejection, AccountStore, PersonRegistry, StoreConnector};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A loan opened through [`AccountStore::open_loan`].
#[derive(Debug, Clone, PartialEq)]
pub struct Loan {
    /// Loan identifier.
    pub loan_id: String,
    /// Borrowing account.
    pub client_id: String,
    /// Principal.
    pub amount: f64,
}

#[derive(Debug, Default)]
struct Ledger {
    balances: HashMap<String, f64>,
    movements: Vec<(String, Transaction)>,
    loans: Vec<Loan>,
    failure: Option<RpcError>,
}

impl Ledger {
    fn check(&self) -> Result<(), RpcError> {
        self.failure.clone().map_or(Ok(()), Err)
    }

    fn require_account(&self, client_id: &str) -> Result<(), RpcError> {
        self.check()?;
        if self.balances.contains_key(client_id) {
            Ok(())
        } else {
            Err(AccountRejection::ClientNotFound.into())
        }
    }

    fn transfer(&mut self, origin_id: &str, destination_id: &str, amount: f64) -> Result<f64, RpcError> {
        self.check()?;
        let origin = *self
            .balances
            .get(origin_id)
            .ok_or(AccountRejection::OriginNotFound)?;
        let destination = self
            .balances
            .get_mut(destination_id)
            .ok_or(AccountRejection::DestinationNotFound)?;
        if origin < amount {
            return Err(AccountRejection::InsufficientFunds.into());
        }
        *destination += amount;
        let new_balance = origin - amount;
        self.balances.insert(origin_id.to_string(), new_balance);
        self.record(origin_id, TRANSFER_SENT, amount);
        self.record(destination_id, TRANSFER_RECEIVED, amount);
        Ok(new_balance)
    }

    fn history(&self, client_id: &str) -> Result<Vec<Transaction>, RpcError> {
        self.require_account(client_id)?;
        Ok(self
            .movements
            .iter()
            .rev()
            .filter(|(owner, _)| owner == client_id)
            .map(|(_, movement)| movement.clone())
            .collect())
    }

    fn open_loan(&mut self, client_id: &str, amount: f64) -> Result<LoanReceipt, RpcError> {
        self.require_account(client_id)?;
        let loan_id = format!("PR{:06}", self.loans.len() + 1);
        self.loans.push(Loan {
            loan_id: loan_id.clone(),
            client_id: client_id.to_string(),
            amount,
        });
        Ok(LoanReceipt {
            loan_id,
            status: LOAN_APPROVED.to_string(),
        })
    }

    fn record(&mut self, client_id: &str, kind: &str, amount: f64) {
        self.movements.push((
            client_id.to_string(),
            Transaction {
                recorded_at: Utc::now(),
                kind: kind.to_string(),
                amount,
            },
        ));
    }
}

/// In-memory [`AccountStore`].
///
/// # Example
///
/// ```
/// use broker_rpc_testing::InMemoryAccountStore;
///
/// let store = InMemoryAccountStore::new().with_account("CL001", 1500.0);
/// assert_eq!(store.balance_of("CL001"), Some(1500.0));
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryAccountStore {
    ledger: Arc<Mutex<Ledger>>,
}

impl InMemoryAccountStore {
    /// Create a store without accounts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store holding `CL001` with 1500.0 and `CL002` with 500.0.
    #[must_use]
    pub fn seeded() -> Self {
        Self::new()
            .with_account("CL001", 1500.0)
            .with_account("CL002", 500.0)
    }

    /// Add an account with an opening balance.
    #[must_use]
    pub fn with_account(self, client_id: &str, balance: f64) -> Self {
        self.ledger
            .lock()
            .unwrap()
            .balances
            .insert(client_id.to_string(), balance);
        self
    }

    /// Make every operation fail with `error` until cleared with `None`.
    pub fn fail_with(&self, error: Option<RpcError>) {
        self.ledger.lock().unwrap().failure = error;
    }

    /// Current balance of an account.
    #[must_use]
    pub fn balance_of(&self, client_id: &str) -> Option<f64> {
        self.ledger.lock().unwrap().balances.get(client_id).copied()
    }

    /// Movements recorded for an account, oldest first.
    #[must_use]
    pub fn movements_of(&self, client_id: &str) -> Vec<Transaction> {
        self.ledger
            .lock()
            .unwrap()
            .movements
            .iter()
            .filter(|(owner, _)| owner == client_id)
            .map(|(_, movement)| movement.clone())
            .collect()
    }

    /// Every loan opened so far.
    #[must_use]
    pub fn loans(&self) -> Vec<Loan> {
        self.ledger.lock().unwrap().loans.clone()
    }
}

impl AccountStore for InMemoryAccountStore {
    fn probe(&self) -> BoxFuture<'_, Result<(), RpcError>> {
        let result = self.ledger.lock().unwrap().check();
        Box::pin(std::future::ready(result))
    }

    fn balance(&self, client_id: &str) -> BoxFuture<'_, Result<Option<f64>, RpcError>> {
        let result = {
            let ledger = self.ledger.lock().unwrap();
            ledger
                .check()
                .map(|()| ledger.balances.get(client_id).copied())
        };
        Box::pin(std::future::ready(result))
    }

    fn transfer(
        &self,
        origin_id: &str,
        destination_id: &str,
        amount: f64,
    ) -> BoxFuture<'_, Result<f64, RpcError>> {
        let result = self
            .ledger
            .lock()
            .unwrap()
            .transfer(origin_id, destination_id, amount);
        Box::pin(std::future::ready(result))
    }

    fn history(&self, client_id: &str) -> BoxFuture<'_, Result<Vec<Transaction>, RpcError>> {
        let result = self.ledger.lock().unwrap().history(client_id);
        Box::pin(std::future::ready(result))
    }

    fn open_loan(&self, client_id: &str, amount: f64) -> BoxFuture<'_, Result<LoanReceipt, RpcError>> {
        let result = self.ledger.lock().unwrap().open_loan(client_id, amount);
        Box::pin(std::future::ready(result))
    }
}

#[derive(Debug, Default)]
struct Directory {
    people: HashMap<String, Person>,
    failure: Option<RpcError>,
}

/// In-memory [`PersonRegistry`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryPersonRegistry {
    directory: Arc<Mutex<Directory>>,
}

impl InMemoryPersonRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding DNI `12345678`.
    #[must_use]
    pub fn seeded() -> Self {
        Self::new().with_person(Person {
            dni: "12345678".to_string(),
            given_names: "Juan Carlos".to_string(),
            paternal_surname: "Pérez".to_string(),
            maternal_surname: "Gómez".to_string(),
        })
    }

    /// Register a person.
    #[must_use]
    pub fn with_person(self, person: Person) -> Self {
        self.directory
            .lock()
            .unwrap()
            .people
            .insert(person.dni.clone(), person);
        self
    }

    /// Make every lookup and probe fail with `error` until cleared with `None`.
    pub fn fail_with(&self, error: Option<RpcError>) {
        self.directory.lock().unwrap().failure = error;
    }
}

impl PersonRegistry for InMemoryPersonRegistry {
    fn probe(&self) -> BoxFuture<'_, Result<(), RpcError>> {
        let result = self.directory.lock().unwrap().failure.clone().map_or(Ok(()), Err);
        Box::pin(std::future::ready(result))
    }

    fn find_person(&self, dni: &str) -> BoxFuture<'_, Result<Option<Person>, RpcError>> {
        let result = {
            let directory = self.directory.lock().unwrap();
            match &directory.failure {
                Some(error) => Err(error.clone()),
                None => Ok(directory.people.get(dni).cloned()),
            }
        };
        Box::pin(std::future::ready(result))
    }
}

/// [`StoreConnector`] whose database can be switched off.
///
/// # Example
///
/// ```
/// use broker_rpc_core::store::AccountStore;
/// use broker_rpc_testing::{InMemoryAccountStore, SwitchableConnector};
/// use std::sync::Arc;
///
/// let store: Arc<dyn AccountStore> = Arc::new(InMemoryAccountStore::seeded());
/// let connector = SwitchableConnector::new(store);
/// connector.set_available(false);
/// assert_eq!(connector.attempts(), 0);
/// ```
pub struct SwitchableConnector<S: ?Sized> {
    store: Arc<S>,
    available: Arc<AtomicBool>,
    attempts: Arc<AtomicUsize>,
}

impl<S: ?Sized> SwitchableConnector<S> {
    /// Connector handing out `store`, initially reachable.
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            available: Arc::new(AtomicBool::new(true)),
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make the database reachable or not.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of connection attempts so far.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl<S: ?Sized> Clone for SwitchableConnector<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            available: Arc::clone(&self.available),
            attempts: Arc::clone(&self.attempts),
        }
    }
}

impl<S: ?Sized + Send + Sync> StoreConnector<S> for SwitchableConnector<S> {
    fn connect(&self) -> BoxFuture<'_, Result<Arc<S>, RpcError>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let result = if self.available.load(Ordering::SeqCst) {
            Ok(Arc::clone(&self.store))
        } else {
            Err(RpcError::Connection("Database unreachable".to_string()))
        };
        Box::pin(std::future::ready(result))
    }
}
