//! Mapping of `sqlx` errors onto the RPC error taxonomy.

use broker_rpc_core::error::RpcError;

/// Classify a database error.
///
/// Errors meaning the database cannot be reached become
/// [`RpcError::Connection`], which makes the supervisor rebuild the pool.
/// Everything else is an operation failure reported to the caller.
pub(crate) fn database_error(context: &str, error: &sqlx::Error) -> RpcError {
    match error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => RpcError::Connection(format!("{context}: {error}")),
        _ => RpcError::Operation(format!("Error de base de datos: {error}")),
    }
}
