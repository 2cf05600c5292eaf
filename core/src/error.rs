//! Error taxonomy shared by clients, servers and stores.
//!
//! Every failure surfaced by this workspace is one of four kinds:
//!
//! | Kind          | Raised when                                                      |
//! |---------------|------------------------------------------------------------------|
//! | `Connection`  | the broker or a backing store cannot be reached or drops          |
//! | `Timeout`     | no reply with the matching correlation id arrived in time         |
//! | `Protocol`    | a message cannot be decoded as a valid envelope or payload        |
//! | `Operation`   | the remote handler reported a business failure (`ERROR` envelope) |
//!
//! Only `Connection` errors end a server session. Everything else is turned
//! into an `ERROR` envelope and the session keeps consuming.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while performing or serving a remote call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// The broker or a backing store could not be reached, or dropped.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// No reply with the expected correlation id arrived within the window.
    #[error("No reply received within {}ms", .0.as_millis())]
    Timeout(Duration),

    /// A message body was not a valid envelope or payload.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The handler reported a business failure.
    ///
    /// The display form is the message itself, so it can be placed
    /// verbatim into an `ERROR` envelope.
    #[error("{0}")]
    Operation(String),
}

impl RpcError {
    /// Returns `true` for failures of the transport or a backing store.
    ///
    /// A server session that observes one of these must be torn down and
    /// rebuilt from scratch.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    /// Returns `true` when the call ran out of time waiting for a reply.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Short label used for metric dimensions and structured logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Timeout(_) => "timeout",
            Self::Protocol(_) => "protocol",
            Self::Operation(_) => "operation",
        }
    }
}

/// Result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, RpcError>;
