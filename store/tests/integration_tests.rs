//! Integration tests for the SQL stores using testcontainers.
//!
//! Docker must be running. The tests are ignored by default:
//!
//! ```bash
//! cargo test -p broker-rpc-store --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::float_cmp)] // Test code uses expect for clear failure messages

use broker_rpc_core::error::RpcError;
use broker_rpc_core::payload::{TRANSFER_RECEIVED, TRANSFER_SENT};
use broker_rpc_core::store::{AccountStore, PersonRegistry, StoreConnector};
use broker_rpc_store::{MySqlConfig, MySqlPersonRegistry, PostgresAccountStore, PostgresConfig};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::mysql::Mysql;
use testcontainers_modules::postgres::Postgres;

/// Create the bank schema and seed two accounts.
async fn run_migrations(pool: &sqlx::PgPool) {
    for statement in [
        r"
        CREATE TABLE IF NOT EXISTS Cuentas (
            id_cliente VARCHAR(10) PRIMARY KEY,
            saldo NUMERIC(12, 2) NOT NULL
        )
        ",
        r"
        CREATE TABLE IF NOT EXISTS Transacciones (
            id_transaccion SERIAL PRIMARY KEY,
            id_cliente VARCHAR(10) NOT NULL REFERENCES Cuentas(id_cliente),
            tipo VARCHAR(40) NOT NULL,
            monto NUMERIC(12, 2) NOT NULL,
            fecha TIMESTAMP NOT NULL DEFAULT NOW()
        )
        ",
        r"
        CREATE TABLE IF NOT EXISTS Prestamos (
            id_prestamo VARCHAR(10) PRIMARY KEY,
            id_cliente VARCHAR(10) NOT NULL REFERENCES Cuentas(id_cliente),
            monto_total NUMERIC(12, 2) NOT NULL,
            monto_pendiente NUMERIC(12, 2) NOT NULL,
            estado VARCHAR(20) NOT NULL,
            fecha_solicitud TIMESTAMP NOT NULL
        )
        ",
        "INSERT INTO Cuentas (id_cliente, saldo) VALUES ('CL001', 1500.00), ('CL002', 500.00)",
    ] {
        sqlx::query(statement)
            .execute(pool)
            .await
            .expect("Failed to run migration");
    }
}

/// Start a Postgres container and return a migrated account store.
///
/// # Panics
/// Panics if container setup fails (test environment issue).
async fn setup_postgres() -> (ContainerAsync<Postgres>, PostgresAccountStore) {
    let container = Postgres::default()
        .start()
        .await
        .expect("Failed to start postgres container");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get postgres port");

    let config = PostgresConfig::default()
        .with_address("127.0.0.1", port)
        .with_credentials("postgres", "postgres")
        .with_database("postgres");

    for _ in 0..60 {
        if let Ok(store) = PostgresAccountStore::connect(&config).await {
            run_migrations(store.pool()).await;
            return (container, store);
        }
        tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
    }
    panic!("Failed to connect to postgres");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_balance_of_existing_and_missing_accounts() {
    let (_container, store) = setup_postgres().await;

    store.probe().await.expect("probe failed");
    assert_eq!(store.balance("CL001").await, Ok(Some(1500.0)));
    assert_eq!(store.balance("CL999").await, Ok(None));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_transfer_moves_funds_and_records_both_sides() {
    let (_container, store) = setup_postgres().await;

    let new_balance = store.transfer("CL001", "CL002", 200.0).await.expect("transfer failed");

    assert_eq!(new_balance, 1300.0);
    assert_eq!(store.balance("CL002").await, Ok(Some(700.0)));
    let sent = store.history("CL001").await.expect("history failed");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, TRANSFER_SENT);
    assert_eq!(sent[0].amount, 200.0);
    let received = store.history("CL002").await.expect("history failed");
    assert_eq!(received[0].kind, TRANSFER_RECEIVED);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_rejected_transfer_changes_nothing() {
    let (_container, store) = setup_postgres().await;

    assert_eq!(
        store.transfer("CL002", "CL001", 10_000.0).await,
        Err(RpcError::Operation("Saldo insuficiente".to_string()))
    );
    assert_eq!(
        store.transfer("CL404", "CL001", 1.0).await,
        Err(RpcError::Operation("Cliente origen no encontrado".to_string()))
    );
    assert_eq!(
        store.transfer("CL001", "CL404", 1.0).await,
        Err(RpcError::Operation("Cliente destino no encontrado".to_string()))
    );

    assert_eq!(store.balance("CL001").await, Ok(Some(1500.0)));
    assert_eq!(store.balance("CL002").await, Ok(Some(500.0)));
    assert!(store.history("CL001").await.expect("history failed").is_empty());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_history_is_most_recent_first() {
    let (_container, store) = setup_postgres().await;

    store.transfer("CL001", "CL002", 10.0).await.expect("transfer failed");
    store.transfer("CL002", "CL001", 25.0).await.expect("transfer failed");

    let history = store.history("CL001").await.expect("history failed");
    assert_eq!(history.len(), 2);
    assert!(history[0].recorded_at >= history[1].recorded_at);
    assert_eq!(history[0].kind, TRANSFER_RECEIVED);
    assert_eq!(history[0].amount, 25.0);
    assert_eq!(
        store.history("CL404").await,
        Err(RpcError::Operation("Cliente no encontrado".to_string()))
    );
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_loan_is_registered_as_active() {
    let (_container, store) = setup_postgres().await;

    let receipt = store.open_loan("CL001", 3000.0).await.expect("loan failed");

    assert_eq!(receipt.status, "aprobado");
    assert!(receipt.loan_id.starts_with("PR") && receipt.loan_id.len() == 8);
    let (estado, pendiente): (String, f64) = sqlx::query_as(
        "SELECT estado, monto_pendiente::float8 FROM Prestamos WHERE id_prestamo = $1",
    )
    .bind(&receipt.loan_id)
    .fetch_one(store.pool())
    .await
    .expect("loan row missing");
    assert_eq!(estado, "activo");
    assert_eq!(pendiente, 3000.0);
}

#[tokio::test]
async fn test_unreachable_postgres_is_connection_error() {
    let config = PostgresConfig::default().with_address("127.0.0.1", 1);

    let result = config.connect().await;

    assert!(matches!(result, Err(RpcError::Connection(_))));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_person_lookup_in_mysql() {
    let container = Mysql::default()
        .start()
        .await
        .expect("Failed to start mysql container");
    let port = container
        .get_host_port_ipv4(3306)
        .await
        .expect("Failed to get mysql port");
    let config = MySqlConfig {
        host: "127.0.0.1".to_string(),
        port,
        user: "root".to_string(),
        password: String::new(),
        database: "test".to_string(),
    };

    let mut registry = None;
    for _ in 0..60 {
        if let Ok(connected) = MySqlPersonRegistry::connect(&config).await {
            registry = Some(connected);
            break;
        }
        tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
    }
    let registry = registry.expect("Failed to connect to mysql");

    let pool = sqlx::MySqlPool::connect(&format!("mysql://root@127.0.0.1:{port}/test"))
        .await
        .expect("Failed to open setup pool");
    sqlx::query(
        "CREATE TABLE Personas (DNI VARCHAR(8) PRIMARY KEY, nombres VARCHAR(60), apell_pat VARCHAR(40), apell_mat VARCHAR(40))",
    )
    .execute(&pool)
    .await
    .expect("Failed to create Personas");
    sqlx::query("INSERT INTO Personas VALUES ('12345678', 'Juan Carlos', 'Pérez', 'Gómez')")
        .execute(&pool)
        .await
        .expect("Failed to seed Personas");

    let person = registry.find_person("12345678").await.unwrap().expect("person missing");
    assert_eq!(person.given_names, "Juan Carlos");
    assert_eq!(person.paternal_surname, "Pérez");
    assert_eq!(registry.find_person("00000000").await, Ok(None));
}
