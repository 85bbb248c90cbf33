//! Inbound transactions.
//!
//! A [`Transaction`] is handed to a method handler for every inbound
//! request.  It is the handler's only way to answer:
//!
//! - return normally → auto-complete with the returned value
//! - return `Err` → auto-error, classified by [`HandlerError::classify`]
//! - [`Transaction::complete`] / [`Transaction::error`] → answer explicitly
//! - [`Transaction::invoke`] → fire a callback the caller declared, any
//!   number of times before the final answer
//! - [`Transaction::delay_return`] → suppress auto-completion and answer
//!   later from a timer or another message
//!
//! A transaction is retired exactly once.  Answering a retired (or never
//! opened) transaction is a [`ChannelError::ProtocolViolation`] and sends
//! nothing.

use core::cell::Cell;
use core::fmt;
use std::rc::{Rc, Weak};

use serde_json::Value;

use super::channel::ChannelCore;
use super::codec::{is_truthy, to_text};
use super::envelope::{Envelope, TxnId};
use crate::error::{ChannelError, KIND_RUNTIME, Result};

/// Method handler signature.
pub type Handler = Rc<dyn Fn(&Transaction, Value) -> HandlerResult>;

/// What a handler returns: the result value, or a failure to classify.
pub type HandlerResult = core::result::Result<Value, HandlerError>;

// ───────────────────────────────────────────────────────────────
// Transaction
// ───────────────────────────────────────────────────────────────

/// Server-side lifecycle object for one inbound request.
///
/// Cheap to clone; clones share completion state, so a handler can stash
/// one and finish the request later.
#[derive(Clone)]
pub struct Transaction {
    inner: Rc<TxnInner>,
}

struct TxnInner {
    /// `None` for notifications, which cannot be answered.
    id: Option<TxnId>,
    origin: String,
    callbacks: Vec<String>,
    completed: Cell<bool>,
    delay_return: Cell<bool>,
    channel: Weak<ChannelCore>,
}

impl Transaction {
    pub(crate) fn open(
        id: TxnId,
        origin: &str,
        callbacks: Vec<String>,
        channel: Weak<ChannelCore>,
    ) -> Self {
        Self::with(Some(id), origin, callbacks, channel)
    }

    /// Context for a notification handler: exposes the origin only.
    pub(crate) fn detached(origin: &str) -> Self {
        Self::with(None, origin, Vec::new(), Weak::new())
    }

    fn with(
        id: Option<TxnId>,
        origin: &str,
        callbacks: Vec<String>,
        channel: Weak<ChannelCore>,
    ) -> Self {
        Self {
            inner: Rc::new(TxnInner {
                id,
                origin: origin.to_string(),
                callbacks,
                completed: Cell::new(false),
                delay_return: Cell::new(false),
                channel,
            }),
        }
    }

    pub fn id(&self) -> Option<TxnId> {
        self.inner.id
    }

    /// Origin the request arrived from.
    pub fn origin(&self) -> &str {
        &self.inner.origin
    }

    /// Callback names the caller declared, fixed at request time.
    pub fn callbacks(&self) -> &[String] {
        &self.inner.callbacks
    }

    /// `true` once `complete` or `error` has been attempted.
    pub fn completed(&self) -> bool {
        self.inner.completed.get()
    }

    /// Suppress (or re-enable) auto-completion when the handler returns.
    pub fn delay_return(&self, delay: bool) {
        self.inner.delay_return.set(delay);
    }

    pub fn is_delayed(&self) -> bool {
        self.inner.delay_return.get()
    }

    /// `true` while the transaction can still be answered.
    pub fn is_open(&self) -> bool {
        match (self.inner.id, self.inner.channel.upgrade()) {
            (Some(id), Some(core)) => core.inbound_allows(id, "").is_some(),
            _ => false,
        }
    }

    /// Answer with a result and retire the transaction.
    pub fn complete(&self, value: Value) -> Result<()> {
        self.inner.completed.set(true);
        let (id, core) = self.live("complete")?;
        if !core.retire_inbound(id) {
            return Err(ChannelError::protocol(format!(
                "complete called for nonexistent message: {id}"
            )));
        }
        core.post(Envelope::ResponseSuccess { id, result: value }, false);
        Ok(())
    }

    /// Answer with an error and retire the transaction.
    pub fn error(&self, kind: &str, message: &str) -> Result<()> {
        self.inner.completed.set(true);
        let (id, core) = self.live("error")?;
        if !core.retire_inbound(id) {
            return Err(ChannelError::protocol(format!(
                "error called for nonexistent message: {id}"
            )));
        }
        core.post(
            Envelope::ResponseError {
                id,
                error: kind.to_string(),
                message: message.to_string(),
            },
            false,
        );
        Ok(())
    }

    /// Fire the caller's callback `name` with `params`.
    ///
    /// May be called any number of times while the transaction is open.
    pub fn invoke(&self, name: &str, params: Value) -> Result<()> {
        let (id, core) = self.live("invoke")?;
        match core.inbound_allows(id, name) {
            None => Err(ChannelError::protocol(format!(
                "attempting to invoke a callback of a nonexistent transaction: {id}"
            ))),
            Some(false) => Err(ChannelError::protocol(format!(
                "request supports no such callback '{name}'"
            ))),
            Some(true) => {
                core.post(
                    Envelope::CallbackInvoke {
                        id,
                        callback: name.to_string(),
                        params,
                    },
                    false,
                );
                Ok(())
            }
        }
    }

    /// Stub for a declared callback, or `None` if the caller did not
    /// declare `name`.
    pub fn callback(&self, name: &str) -> Option<RemoteCallback> {
        self.inner
            .callbacks
            .iter()
            .any(|n| n == name)
            .then(|| RemoteCallback {
                txn: self.clone(),
                name: name.to_string(),
            })
    }

    fn live(&self, op: &str) -> Result<(TxnId, Rc<ChannelCore>)> {
        let id = self.inner.id.ok_or_else(|| {
            ChannelError::protocol(format!("{op} called on a notification, which has no transaction"))
        })?;
        let core = self.inner.channel.upgrade().ok_or_else(|| {
            ChannelError::protocol(format!("{op} called after the channel was dropped: {id}"))
        })?;
        Ok((id, core))
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("origin", &self.inner.origin)
            .field("callbacks", &self.inner.callbacks)
            .field("completed", &self.inner.completed.get())
            .field("delay_return", &self.inner.delay_return.get())
            .finish()
    }
}

/// Invocable stand-in for a function the caller embedded in its params.
#[derive(Debug, Clone)]
pub struct RemoteCallback {
    txn: Transaction,
    name: String,
}

impl RemoteCallback {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, params: Value) -> Result<()> {
        self.txn.invoke(&self.name, params)
    }
}

// ───────────────────────────────────────────────────────────────
// Handler errors
// ───────────────────────────────────────────────────────────────

/// Failure returned by a method handler.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerError {
    /// Explicit `(kind, message)`.
    Pair(String, String),
    /// Any other failure value, classified on the way out.
    Thrown(Value),
}

impl HandlerError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Pair(kind.into(), message.into())
    }

    /// Map to the wire `(error, message)` pair.
    ///
    /// Precedence for thrown values: a two-element array is
    /// `(first, second)`; an object with a string `error` field uses that
    /// field and its `message` (textualised when not a string, empty when
    /// absent); a string is a `runtime_error` with that text; anything else
    /// is a `runtime_error` carrying the value's JSON text.
    pub fn classify(&self) -> (String, String) {
        match self {
            Self::Pair(kind, message) => (kind.clone(), message.clone()),
            Self::Thrown(Value::Array(items)) if items.len() == 2 => {
                (to_text(&items[0]), to_text(&items[1]))
            }
            Self::Thrown(Value::Object(obj)) if obj.get("error").is_some_and(Value::is_string) => {
                let kind = obj.get("error").map(to_text).unwrap_or_default();
                let message = match obj.get("message") {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) if is_truthy(other) => to_text(other),
                    _ => String::new(),
                };
                (kind, message)
            }
            Self::Thrown(Value::String(s)) => (KIND_RUNTIME.to_string(), s.clone()),
            Self::Thrown(other) => (KIND_RUNTIME.to_string(), other.to_string()),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (kind, message) = self.classify();
        write!(f, "{kind}: {message}")
    }
}

impl std::error::Error for HandlerError {}

impl From<&str> for HandlerError {
    fn from(s: &str) -> Self {
        Self::Thrown(Value::from(s))
    }
}

impl From<String> for HandlerError {
    fn from(s: String) -> Self {
        Self::Thrown(Value::from(s))
    }
}

impl From<Value> for HandlerError {
    fn from(v: Value) -> Self {
        Self::Thrown(v)
    }
}

impl<K: Into<String>, M: Into<String>> From<(K, M)> for HandlerError {
    fn from((kind, message): (K, M)) -> Self {
        Self::new(kind, message)
    }
}

impl From<ChannelError> for HandlerError {
    fn from(e: ChannelError) -> Self {
        Self::Pair(e.kind().to_string(), e.message())
    }
}
