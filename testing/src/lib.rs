//! # Broker RPC Testing
//!
//! Testing utilities for broker RPC clients and services.
//!
//! This crate provides:
//! - [`InMemoryBroker`]: an in-process broker with exclusive queues,
//!   prefetch, redelivery and fault injection
//! - [`InMemoryAccountStore`] and [`InMemoryPersonRegistry`]: store fakes
//! - [`SwitchableConnector`]: a store connector tests can take offline
//!
//! ## Example
//!
//! ```ignore
//! use broker_rpc_testing::{InMemoryBroker, InMemoryAccountStore, SwitchableConnector};
//!
//! #[tokio::test]
//! async fn balance_round_trip() {
//!     let broker = InMemoryBroker::new();
//!     let store = SwitchableConnector::new(Arc::new(InMemoryAccountStore::seeded()) as Arc<dyn AccountStore>);
//!     let supervisor = Supervisor::new(Arc::new(BancoService::new(Arc::new(store))), Arc::new(broker.clone()));
//!     tokio::spawn(async move { supervisor.run(std::future::pending()).await });
//!     // ...
//! }
//! ```

pub mod broker;
pub mod stores;

pub use broker::{InMemoryBroker, InMemoryChannel, PublishedMessage};
pub use stores::{InMemoryAccountStore, InMemoryPersonRegistry, Loan, SwitchableConnector};

/// Install a test-friendly `tracing` subscriber.
///
/// Honors `RUST_LOG` and writes through the test harness so output is only
/// shown for failing tests. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
