use std::time::Duration;

use thiserror::Error;

use crate::bridge::protocol::RpcErrorBody;

/// Failures of the protocol engine itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("transport error: {0}")]
    Transport(String),

    /// The resolver was dropped without ever being fulfilled.
    #[error("pending entry abandoned before a response arrived")]
    Abandoned,

    #[error("wire has ended")]
    Ended,
}

/// Failure reported by a local call executor.
///
/// Converted into an `ok: false` response at the dispatcher boundary.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct ExecutorError {
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ExecutorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn into_error_body(self) -> RpcErrorBody {
        let body = RpcErrorBody::new(self.message);
        match self.details {
            Some(details) => body.with_details(details),
            None => body,
        }
    }
}

/// A remote `ok: false` response, re-raised at the call site.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}{}", .status.map(|s| format!(" (status {s})")).unwrap_or_default())]
pub struct RpcError {
    pub message: String,
    pub status: Option<u16>,
    pub details: Option<serde_json::Value>,
}

impl From<RpcErrorBody> for RpcError {
    fn from(body: RpcErrorBody) -> Self {
        Self {
            message: body.message,
            status: body.status,
            details: body.details,
        }
    }
}

/// Errors surfaced by [`crate::caller::RpcCaller`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CallError {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("no response within {0:?}")]
    Timeout(Duration),
}

impl CallError {
    /// The remote failure, if the call was answered with `ok: false`.
    pub fn as_rpc(&self) -> Option<&RpcError> {
        match self {
            Self::Rpc(e) => Some(e),
            _ => None,
        }
    }
}
