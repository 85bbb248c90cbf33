//! Text envelope codec.
//!
//! Outbound envelopes are serialised as compact JSON.  Inbound text is
//! parsed into a generic JSON value first and then classified by shape,
//! because the transport is untrusted and the peer may send anything:
//!
//! ```text
//! method:string + id  → Request
//! method:string       → Notification
//! id + callback       → CallbackInvoke
//! id + truthy error   → ResponseError
//! id                  → ResponseSuccess
//! anything else       → Malformed
//! ```
//!
//! An id must be a positive integer; `0` counts as absent.

use serde_json::{Map, Value};

use super::envelope::{Envelope, TxnId};
use crate::config::SCOPE_SEPARATOR;
use crate::error::{ChannelError, Result};

/// Serialise an envelope to wire text.
pub fn encode(envelope: &Envelope) -> Result<String> {
    Ok(serde_json::to_string(envelope)?)
}

/// Parse and classify wire text.
pub fn decode(text: &str) -> Result<Envelope> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(obj) = value else {
        return Err(ChannelError::malformed("payload is not an object"));
    };
    classify(obj)
}

fn classify(mut obj: Map<String, Value>) -> Result<Envelope> {
    let id: Option<TxnId> = obj.get("id").and_then(Value::as_u64).filter(|id| *id != 0);
    let params = obj.remove("params").unwrap_or(Value::Null);

    if let Some(Value::String(method)) = obj.remove("method") {
        return Ok(match id {
            Some(id) => Envelope::Request {
                id,
                method,
                params,
                callbacks: callback_names(obj.remove("callbacks"))?,
            },
            None => Envelope::Notification { method, params },
        });
    }

    let Some(id) = id else {
        return Err(ChannelError::malformed("envelope carries neither method nor id"));
    };

    if let Some(Value::String(callback)) = obj.remove("callback") {
        return Ok(Envelope::CallbackInvoke {
            id,
            callback,
            params,
        });
    }

    match obj.remove("error") {
        Some(error) if is_truthy(&error) => {
            let message = match obj.remove("message") {
                Some(Value::String(s)) => s,
                Some(other) if is_truthy(&other) => to_text(&other),
                _ => String::new(),
            };
            Ok(Envelope::ResponseError {
                id,
                error: to_text(&error),
                message,
            })
        }
        _ => Ok(Envelope::ResponseSuccess {
            id,
            result: obj.remove("result").unwrap_or(Value::Null),
        }),
    }
}

fn callback_names(raw: Option<Value>) -> Result<Vec<String>> {
    match raw {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::String(name) => Ok(name),
                _ => Err(ChannelError::malformed("callback names must be strings")),
            })
            .collect(),
        Some(_) => Err(ChannelError::malformed("callbacks must be an array")),
    }
}

// ── Scoped method names ───────────────────────────────────────

/// Split `scope::method` into `(scope, method)`.
///
/// Anything that does not split into exactly two parts is an unscoped
/// method and lands in scope `""`.
pub fn split_scoped(method: &str) -> (&str, &str) {
    let mut parts = method.split(SCOPE_SEPARATOR);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scope), Some(bare), None) => (scope, bare),
        _ => ("", method),
    }
}

/// Prefix `method` with `scope::` when a scope is configured.
pub fn scope_method(scope: &str, method: &str) -> String {
    if scope.is_empty() {
        method.to_string()
    } else {
        format!("{scope}{SCOPE_SEPARATOR}{method}")
    }
}

// ── Value helpers ─────────────────────────────────────────────

/// JavaScript-style truthiness of a JSON value.
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Best-effort textual form: strings verbatim, everything else as JSON.
pub(crate) fn to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
