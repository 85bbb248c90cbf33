//! Wire envelopes.
//!
//! ```text
//! request:          {id, method, params, callbacks?}
//! notification:     {method, params}
//! callback-invoke:  {id, callback, params}
//! response-success: {id, result}
//! response-error:   {id, error, message}
//! ```
//!
//! Serialisation is untagged: the shape of the object is the tag.  Inbound
//! classification lives in [`codec::decode`](super::codec::decode).

use serde::Serialize;
use serde_json::Value;

/// Transaction id. Strictly increasing per process, never zero.
pub type TxnId = u64;

/// One structured unit exchanged over the transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Envelope {
    Request {
        id: TxnId,
        method: String,
        params: Value,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        callbacks: Vec<String>,
    },
    Notification {
        method: String,
        params: Value,
    },
    CallbackInvoke {
        id: TxnId,
        callback: String,
        params: Value,
    },
    ResponseError {
        id: TxnId,
        error: String,
        message: String,
    },
    ResponseSuccess {
        id: TxnId,
        result: Value,
    },
}

impl Envelope {
    /// Transaction id, for every shape except notifications.
    pub fn id(&self) -> Option<TxnId> {
        match self {
            Self::Request { id, .. }
            | Self::CallbackInvoke { id, .. }
            | Self::ResponseError { id, .. }
            | Self::ResponseSuccess { id, .. } => Some(*id),
            Self::Notification { .. } => None,
        }
    }

    /// Scoped method name, for requests and notifications.
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request { method, .. } | Self::Notification { method, .. } => Some(method),
            _ => None,
        }
    }

    /// Short label for logs.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Request { .. } => "request",
            Self::Notification { .. } => "notification",
            Self::CallbackInvoke { .. } => "callback",
            Self::ResponseError { .. } => "error",
            Self::ResponseSuccess { .. } => "result",
        }
    }
}
