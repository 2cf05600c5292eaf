//! Request and response envelopes.
//!
//! A request is a JSON payload published with two message properties:
//! `correlation_id`, unique per call, and `reply_to`, the name of the
//! caller's exclusive reply queue. A response is always a JSON object with a
//! `status` discriminator:
//!
//! ```json
//! {"status": "OK", "data": {"idCliente": "CL001", "saldo": 1500.0}}
//! {"status": "ERROR", "message": "Cliente no encontrado"}
//! ```
//!
//! `data` is present exactly when the status is `OK`, and `message` exactly
//! when it is `ERROR`. [`ResponseEnvelope`] is an enum so the other
//! combinations cannot be constructed.

use crate::broker::MessageProperties;
use crate::error::RpcError;
use crate::topology::RoutingKey;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Message used when a handler fails without saying why.
const UNSPECIFIED_ERROR: &str = "Error interno del servidor";

/// Reason given when a successful result carries no data.
pub const MISSING_DATA: &str = "OK envelope without data";

/// Unique identifier pairing a request with its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate a fresh, random correlation id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Whether a wire-level correlation id refers to this one.
    #[must_use]
    pub fn matches(&self, candidate: Option<&str>) -> bool {
        candidate.is_some_and(|value| Uuid::parse_str(value).is_ok_and(|id| id == self.0))
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An outgoing request, ready to be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestEnvelope {
    /// Operation being requested.
    pub routing_key: RoutingKey,
    /// Identifier the reply must carry.
    pub correlation_id: CorrelationId,
    /// Queue the reply must be sent to.
    pub reply_to: String,
    /// JSON-encoded payload.
    pub payload: Vec<u8>,
}

impl RequestEnvelope {
    /// Build a request with a freshly generated correlation id.
    #[must_use]
    pub fn new(routing_key: RoutingKey, reply_to: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            routing_key,
            correlation_id: CorrelationId::new(),
            reply_to: reply_to.into(),
            payload,
        }
    }

    /// Message properties carrying the correlation id and reply queue.
    #[must_use]
    pub fn properties(&self) -> MessageProperties {
        MessageProperties::default()
            .with_correlation_id(self.correlation_id.to_string())
            .with_reply_to(self.reply_to.clone())
    }
}

/// Encode a request payload as JSON.
///
/// # Errors
///
/// Returns [`RpcError::Protocol`] if the value cannot be represented as JSON.
pub fn encode_payload<P: Serialize + ?Sized>(payload: &P) -> Result<Vec<u8>, RpcError> {
    serde_json::to_vec(payload).map_err(|e| RpcError::Protocol(format!("Payload encoding failed: {e}")))
}

/// Decode a request payload received by a handler.
///
/// # Errors
///
/// Returns [`RpcError::Protocol`] naming the operation when the body is not
/// valid JSON or lacks required fields.
pub fn decode_payload<T: DeserializeOwned>(key: RoutingKey, body: &[u8]) -> Result<T, RpcError> {
    serde_json::from_slice(body).map_err(|e| RpcError::Protocol(format!("Payload inválido para {key}: {e}")))
}

/// Discriminator of a [`ResponseEnvelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The operation succeeded.
    Ok,
    /// The operation failed.
    Error,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "OK",
            Self::Error => "ERROR",
        })
    }
}

/// The body of every reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum ResponseEnvelope {
    /// Successful result carrying the operation's data.
    #[serde(rename = "OK")]
    Ok {
        /// Operation-specific result.
        data: Value,
    },
    /// Failed result carrying a human-readable reason.
    #[serde(rename = "ERROR")]
    Error {
        /// Why the operation failed.
        message: String,
    },
}

impl ResponseEnvelope {
    /// Successful envelope around `data`.
    ///
    /// `data` must not be `null`: such an envelope is rejected by
    /// [`from_slice`](Self::from_slice). Use [`from_data`](Self::from_data)
    /// when the value is not known to be present.
    #[must_use]
    pub const fn ok(data: Value) -> Self {
        Self::Ok { data }
    }

    /// Successful envelope around any serializable value.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Protocol`] if the value cannot be represented as
    /// JSON or is `null`.
    pub fn from_data<T: Serialize>(data: &T) -> Result<Self, RpcError> {
        match serde_json::to_value(data) {
            Ok(Value::Null) => Err(RpcError::Protocol(MISSING_DATA.to_string())),
            Ok(data) => Ok(Self::ok(data)),
            Err(e) => Err(RpcError::Protocol(format!("Result encoding failed: {e}"))),
        }
    }

    /// Failed envelope. An empty message is replaced by a generic one.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.is_empty() {
            UNSPECIFIED_ERROR.to_string()
        } else {
            message
        };
        Self::Error { message }
    }

    /// Status discriminator.
    #[must_use]
    pub const fn status(&self) -> Status {
        match self {
            Self::Ok { .. } => Status::Ok,
            Self::Error { .. } => Status::Error,
        }
    }

    /// Whether this envelope reports success.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    /// Result data, present only on success.
    #[must_use]
    pub const fn data(&self) -> Option<&Value> {
        match self {
            Self::Ok { data } => Some(data),
            Self::Error { .. } => None,
        }
    }

    /// Failure reason, present only on error.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Ok { .. } => None,
            Self::Error { message } => Some(message),
        }
    }

    /// Serialize to the JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Protocol`] if serialization fails.
    pub fn to_vec(&self) -> Result<Vec<u8>, RpcError> {
        serde_json::to_vec(self).map_err(|e| RpcError::Protocol(format!("Envelope encoding failed: {e}")))
    }

    /// Parse a reply body.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Protocol`] if the body is not JSON, lacks a known
    /// `status`, or is missing the field that status requires.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, RpcError> {
        let envelope: Self = serde_json::from_slice(bytes)
            .map_err(|e| RpcError::Protocol(format!("Invalid response envelope: {e}")))?;
        match &envelope {
            Self::Ok { data } if data.is_null() => Err(RpcError::Protocol(MISSING_DATA.to_string())),
            Self::Error { message } if message.is_empty() => {
                Err(RpcError::Protocol("ERROR envelope without message".to_string()))
            }
            _ => Ok(envelope),
        }
    }

    /// Convert into the typed result of the operation.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Operation`] carrying the message of an `ERROR`
    /// envelope, or [`RpcError::Protocol`] if `data` does not have the
    /// expected shape.
    pub fn into_result<T: DeserializeOwned>(self) -> Result<T, RpcError> {
        match self {
            Self::Ok { data } => serde_json::from_value(data)
                .map_err(|e| RpcError::Protocol(format!("Unexpected result shape: {e}"))),
            Self::Error { message } => Err(RpcError::Operation(message)),
        }
    }
}
