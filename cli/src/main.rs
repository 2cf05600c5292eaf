//! Command-line RPC client.
//!
//! # Usage
//!
//! ```bash
//! # Validate DNI 12345678 and query the balance of CL001
//! rpc-cli smoke
//!
//! # Individual operations
//! rpc-cli validar 12345678
//! rpc-cli saldo CL001
//! rpc-cli transferir CL001 CL002 300
//! rpc-cli historial CL001
//! rpc-cli prestamo CL001 5000
//!
//! # Any routing key with a raw JSON payload
//! rpc-cli call banco.consulta.saldo '{"idCliente": "CL001"}'
//! ```
//!
//! Every reply envelope is printed as JSON on stdout. The exit status is
//! non-zero when a call fails to complete (broker unreachable, timeout,
//! malformed reply) or, with `--strict`, when a reply is `ERROR`.

use anyhow::Context;
use broker_rpc_amqp::AmqpBroker;
use broker_rpc_core::envelope::ResponseEnvelope;
use broker_rpc_core::topology::RoutingKey;
use broker_rpc_runtime::RpcClient;
use broker_rpc_runtime::config::DEFAULT_BROKER_URL;
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Client for the broker RPC services
#[derive(Parser, Debug)]
#[command(name = "rpc-cli")]
#[command(about = "Send RPC requests to the banco and reniec services")]
#[command(version)]
struct Cli {
    /// AMQP URI of the broker
    #[arg(long, env = "RABBITMQ_URL", default_value = DEFAULT_BROKER_URL)]
    broker_url: String,

    /// How long to wait for each reply, in milliseconds
    #[arg(long, env = "RPC_TIMEOUT_MS", default_value_t = 10_000)]
    timeout_ms: u64,

    /// Exit with an error when a service replies ERROR
    #[arg(long)]
    strict: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Validate a DNI, then query a balance
    Smoke {
        /// DNI to validate
        #[arg(long, default_value = "12345678")]
        dni: String,
        /// Client whose balance is queried
        #[arg(long, default_value = "CL001")]
        client: String,
    },

    /// Send a raw JSON payload to any routing key
    Call {
        /// Routing key, e.g. `banco.consulta.saldo`
        routing_key: RoutingKey,
        /// JSON payload
        #[arg(value_parser = parse_json)]
        payload: Value,
    },

    /// Validate a DNI against the identity registry
    Validar {
        /// National identity document number
        dni: String,
    },

    /// Query an account balance
    Saldo {
        /// Client id
        client: String,
    },

    /// Transfer funds between two accounts
    Transferir {
        /// Paying client id
        from: String,
        /// Receiving client id
        to: String,
        /// Amount to move
        amount: f64,
    },

    /// List an account's transactions, newest first
    Historial {
        /// Client id
        client: String,
    },

    /// Request a loan
    Prestamo {
        /// Client id
        client: String,
        /// Loan amount
        amount: f64,
    },
}

fn parse_json(raw: &str) -> Result<Value, String> {
    serde_json::from_str(raw).map_err(|e| format!("invalid JSON payload: {e}"))
}

impl Command {
    /// Requests to send, in order.
    fn requests(&self) -> Vec<(RoutingKey, Value)> {
        match self {
            Self::Smoke { dni, client } => vec![
                (RoutingKey::IdentityValidation, json!({ "dni": dni })),
                (RoutingKey::BalanceQuery, json!({ "idCliente": client })),
            ],
            Self::Call {
                routing_key,
                payload,
            } => vec![(*routing_key, payload.clone())],
            Self::Validar { dni } => vec![(RoutingKey::IdentityValidation, json!({ "dni": dni }))],
            Self::Saldo { client } => vec![(RoutingKey::BalanceQuery, json!({ "idCliente": client }))],
            Self::Transferir { from, to, amount } => vec![(
                RoutingKey::Transfer,
                json!({ "idClienteOrigen": from, "idClienteDestino": to, "monto": amount }),
            )],
            Self::Historial { client } => vec![(RoutingKey::History, json!({ "idCliente": client }))],
            Self::Prestamo { client, amount } => vec![(
                RoutingKey::LoanRequest,
                json!({ "idCliente": client, "monto": amount }),
            )],
        }
    }
}

fn render(key: RoutingKey, envelope: &ResponseEnvelope) -> anyhow::Result<String> {
    let body: Value = serde_json::from_slice(&envelope.to_vec()?)?;
    Ok(format!("{key} -> {}", serde_json::to_string_pretty(&body)?))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let broker = AmqpBroker::builder()
        .uri(cli.broker_url.as_str())
        .connection_name("rpc-cli")
        .build()?;
    let client = RpcClient::new(Arc::new(broker)).with_timeout(Duration::from_millis(cli.timeout_ms));

    let mut rejected = 0_usize;
    for (key, payload) in cli.command.requests() {
        tracing::debug!(routing_key = %key, %payload, "Sending request");
        let envelope = client
            .call(key, &payload)
            .await
            .with_context(|| format!("{key} call failed"))?;
        if !envelope.is_ok() {
            rejected += 1;
        }
        println!("{}", render(key, &envelope)?);
    }

    if cli.strict && rejected > 0 {
        anyhow::bail!("{rejected} request(s) answered with ERROR");
    }
    Ok(())
}
