//! Channel engine.
//!
//! A [`Channel`] is one endpoint of a bidirectional RPC conversation with a
//! single peer context.  It owns:
//!
//! - a readiness state machine driven by the `__ready` ping/pong handshake
//! - a pending queue of envelopes posted before the peer is ready
//! - the bound method table for inbound requests
//! - the outbound table of calls awaiting a response
//! - the inbound table of transactions this side still has to answer
//!
//! ```text
//!               build()
//!                  │  register in Registry, defer ping
//!                  ▼
//!   ┌──────────────────────────┐  ping  (suffix -R, reply pong, flush)
//!   │        NOT_READY         │───────────────────────────────┐
//!   │  posts are queued        │  pong  (suffix -L, flush)     │
//!   └──────────────────────────┘───────────────────────────────┤
//!                                                              ▼
//!                                             ┌──────────────────────────┐
//!                                             │          READY           │
//!                                             │  posts go straight out   │
//!                                             └──────────────────────────┘
//!                                                              │ destroy()
//!                                                              ▼
//!                                                          DESTROYED
//! ```
//!
//! Everything runs on one cooperative thread.  No `RefCell` borrow is held
//! across a call into user code or the transport, so handlers may freely
//! call back into the channel.

use core::cell::RefCell;
use core::fmt;
use core::time::Duration;
use std::collections::HashMap;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::rc::{Rc, Weak};

use log::{debug, info, warn};
use serde_json::Value;

use super::codec::{encode, scope_method};
use super::envelope::{Envelope, TxnId};
use super::marshal::{Callback, Marshaled, Param, marshal};
use super::registry::{Endpoint, Registry};
use super::transaction::{Handler, HandlerResult, Transaction};
use crate::config::ChannelConfig;
use crate::error::{ChannelError, Result};
use crate::ports::{EnvelopeObserver, Executor, PeerId, TimerId, Transport};

/// Reserved handshake method.  Not callable by users while bound.
pub const READY_METHOD: &str = "__ready";

const PING: &str = "ping";
const PONG: &str = "pong";

const ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const ID_LEN: usize = 5;

/// Success callback of an outbound call.
pub type SuccessFn = Rc<dyn Fn(Value)>;
/// Error callback of an outbound call: `(kind, message)`.
pub type ErrorFn = Rc<dyn Fn(&str, &str)>;

// ───────────────────────────────────────────────────────────────
// Runtime and hooks
// ───────────────────────────────────────────────────────────────

/// The host services a channel is built against.
///
/// One runtime per execution context; every channel in that context shares
/// the same registry.
#[derive(Clone)]
pub struct Runtime {
    pub registry: Registry,
    pub transport: Rc<dyn Transport>,
    pub executor: Rc<dyn Executor>,
}

impl Runtime {
    pub fn new(
        registry: Registry,
        transport: Rc<dyn Transport>,
        executor: Rc<dyn Executor>,
    ) -> Self {
        Self {
            registry,
            transport,
            executor,
        }
    }
}

/// Optional closures observing a channel's life.
#[derive(Clone, Default)]
pub struct ChannelHooks {
    /// Fired once, after the handshake completes and the queue is flushed.
    pub on_ready: Option<Rc<dyn Fn(&Channel)>>,
    /// Every envelope routed to this channel, before it is handled.
    pub got_message: Option<EnvelopeObserver>,
    /// Every envelope actually handed to the transport.
    pub post_message: Option<EnvelopeObserver>,
}

impl ChannelHooks {
    pub fn on_ready(mut self, f: impl Fn(&Channel) + 'static) -> Self {
        self.on_ready = Some(Rc::new(f));
        self
    }

    pub fn on_received(mut self, f: impl Fn(&str, &Envelope) + 'static) -> Self {
        self.got_message = Some(Rc::new(f));
        self
    }

    pub fn on_posted(mut self, f: impl Fn(&str, &Envelope) + 'static) -> Self {
        self.post_message = Some(Rc::new(f));
        self
    }
}

// ───────────────────────────────────────────────────────────────
// Outbound call description
// ───────────────────────────────────────────────────────────────

/// Arguments of [`Channel::call`].
///
/// ```ignore
/// chan.call(
///     Call::new("sum", json!([1, 2]))
///         .on_success(|v| println!("= {v}"))
///         .on_error(|kind, msg| eprintln!("{kind}: {msg}"))
///         .timeout(Duration::from_millis(500)),
/// )?;
/// ```
pub struct Call {
    method: String,
    params: Param,
    on_success: Option<SuccessFn>,
    on_error: Option<ErrorFn>,
    timeout: Option<Duration>,
}

impl Call {
    pub fn new(method: impl Into<String>, params: impl Into<Param>) -> Self {
        Self {
            method: method.into(),
            params: params.into(),
            on_success: None,
            on_error: None,
            timeout: None,
        }
    }

    pub fn on_success(mut self, f: impl Fn(Value) + 'static) -> Self {
        self.on_success = Some(Rc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&str, &str) + 'static) -> Self {
        self.on_error = Some(Rc::new(f));
        self
    }

    /// Fail the call with `timeout_error` if no response arrives in time.
    /// A zero duration means no timeout.
    pub fn timeout(mut self, after: Duration) -> Self {
        self.timeout = Some(after);
        self
    }
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("method", &self.method)
            .field("params", &self.params)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

// ───────────────────────────────────────────────────────────────
// State
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    NotReady,
    Ready,
    Destroyed,
}

struct Outbound {
    on_success: SuccessFn,
    on_error: ErrorFn,
    callbacks: HashMap<String, Callback>,
    timer: Option<TimerId>,
}

struct ChannelState {
    id: String,
    readiness: Readiness,
    pending: Vec<Envelope>,
    methods: HashMap<String, Handler>,
    outbound: HashMap<TxnId, Outbound>,
    /// Open inbound transactions → callback names the caller declared.
    inbound: HashMap<TxnId, Vec<String>>,
}

pub(crate) struct ChannelCore {
    runtime: Runtime,
    peer: PeerId,
    origin: String,
    scope: String,
    debug_output: bool,
    hooks: ChannelHooks,
    state: RefCell<ChannelState>,
    this: Weak<ChannelCore>,
}

// ───────────────────────────────────────────────────────────────
// Public handle
// ───────────────────────────────────────────────────────────────

/// Handle to a channel.  Clones refer to the same channel.
#[derive(Clone)]
pub struct Channel {
    core: Rc<ChannelCore>,
}

impl Channel {
    /// Build a channel to `peer` and start the handshake.
    ///
    /// The first ping goes out on the next executor turn, bypassing the
    /// pending queue.
    pub fn build(
        runtime: &Runtime,
        peer: PeerId,
        config: &ChannelConfig,
        hooks: ChannelHooks,
    ) -> Result<Self> {
        if peer == runtime.registry.own_identity() {
            return Err(ChannelError::config(
                "target peer is the same as the present context, which is not allowed",
            ));
        }
        let (origin, scope) = config.validate()?;

        let core = Rc::new_cyclic(|this| ChannelCore {
            runtime: runtime.clone(),
            peer,
            origin,
            scope,
            debug_output: config.debug_output,
            hooks,
            state: RefCell::new(ChannelState {
                id: random_id(),
                readiness: Readiness::NotReady,
                pending: Vec::new(),
                methods: HashMap::new(),
                outbound: HashMap::new(),
                inbound: HashMap::new(),
            }),
            this: this.clone(),
        });

        runtime
            .registry
            .register(peer, &core.origin, &core.scope, core.endpoint())?;

        let weak = core.this.clone();
        let on_ready: Handler = Rc::new(move |_txn: &Transaction, params: Value| -> HandlerResult {
            if let Some(core) = weak.upgrade() {
                core.on_handshake(&params);
            }
            Ok(Value::Null)
        });
        core.state
            .borrow_mut()
            .methods
            .insert(READY_METHOD.to_string(), on_ready);

        let weak = core.this.clone();
        runtime.executor.defer(Box::new(move || {
            if let Some(core) = weak.upgrade() {
                core.send_ping();
            }
        }));

        info!(
            "channel {}: built for {} origin='{}' scope='{}'",
            core.id(),
            peer,
            core.origin,
            core.scope
        );
        Ok(Self { core })
    }

    // ── Accessors ─────────────────────────────────────────────

    /// Random channel id.  Gains a `-R` or `-L` suffix on handshake and is
    /// empty after [`destroy`](Self::destroy).
    pub fn id(&self) -> String {
        self.core.id()
    }

    pub fn peer(&self) -> PeerId {
        self.core.peer
    }

    /// Normalized origin this channel is bound to.
    pub fn origin(&self) -> &str {
        &self.core.origin
    }

    pub fn scope(&self) -> &str {
        &self.core.scope
    }

    pub fn readiness(&self) -> Readiness {
        self.core.state.borrow().readiness
    }

    pub fn is_ready(&self) -> bool {
        self.readiness() == Readiness::Ready
    }

    /// Envelopes waiting for the handshake.
    pub fn pending_len(&self) -> usize {
        self.core.state.borrow().pending.len()
    }

    /// Outbound calls awaiting a response.
    pub fn outstanding_calls(&self) -> usize {
        self.core.state.borrow().outbound.len()
    }

    /// Inbound transactions not yet answered.
    pub fn open_transactions(&self) -> usize {
        self.core.state.borrow().inbound.len()
    }

    pub fn is_bound(&self, method: &str) -> bool {
        self.core.state.borrow().methods.contains_key(method)
    }

    // ── Method table ──────────────────────────────────────────

    /// Bind `handler` to the bare method name `method`.
    pub fn bind<F>(&self, method: &str, handler: F) -> Result<&Self>
    where
        F: Fn(&Transaction, Value) -> HandlerResult + 'static,
    {
        self.core.ensure_live("bind")?;
        if method.is_empty() {
            return Err(ChannelError::config(
                "'method' argument to bind must be a non-empty string",
            ));
        }
        let mut st = self.core.state.borrow_mut();
        if st.methods.contains_key(method) {
            return Err(ChannelError::protocol(format!(
                "method '{method}' is already bound!"
            )));
        }
        st.methods.insert(method.to_string(), Rc::new(handler));
        Ok(self)
    }

    /// Remove a handler.  Returns `false` if nothing was bound.
    pub fn unbind(&self, method: &str) -> bool {
        self.core.state.borrow_mut().methods.remove(method).is_some()
    }

    // ── Outbound ──────────────────────────────────────────────

    /// Issue a request.  Returns the transaction id.
    ///
    /// Params are marshaled before anything else happens: a circular
    /// structure fails here and nothing is sent.
    pub fn call(&self, call: Call) -> Result<TxnId> {
        self.core.ensure_live("call")?;
        let Call {
            method,
            params,
            on_success,
            on_error,
            timeout,
        } = call;
        if method.is_empty() {
            return Err(ChannelError::config(
                "'method' argument to call must be a non-empty string",
            ));
        }
        let on_success =
            on_success.ok_or_else(|| ChannelError::config("'success' callback missing from call"))?;
        let on_error =
            on_error.ok_or_else(|| ChannelError::config("'error' callback missing from call"))?;
        let Marshaled {
            params,
            names,
            callbacks,
        } = marshal(&params)?;

        let core = &self.core;
        let id = core.runtime.registry.next_txn_id();
        let method = scope_method(&core.scope, &method);

        let timer = timeout.filter(|t| !t.is_zero()).map(|after| {
            let weak = core.this.clone();
            let expired = ChannelError::Timeout {
                method: method.clone(),
                timeout_ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
            };
            core.runtime.executor.set_timeout(
                after,
                Box::new(move || {
                    if let Some(core) = weak.upgrade() {
                        core.expire(id, &expired);
                    }
                }),
            )
        });

        core.state.borrow_mut().outbound.insert(
            id,
            Outbound {
                on_success,
                on_error,
                callbacks,
                timer,
            },
        );
        core.runtime.registry.add_route(id, core.peer, core.endpoint());
        core.post(
            Envelope::Request {
                id,
                method,
                params,
                callbacks: names,
            },
            false,
        );
        Ok(id)
    }

    /// Fire-and-forget message.  No id, no response.
    pub fn notify(&self, method: &str, params: Value) -> Result<()> {
        self.core.ensure_live("notify")?;
        if method.is_empty() {
            return Err(ChannelError::config(
                "'method' argument to notify must be a non-empty string",
            ));
        }
        self.core.post(
            Envelope::Notification {
                method: scope_method(&self.core.scope, method),
                params,
            },
            false,
        );
        Ok(())
    }

    // ── Teardown ──────────────────────────────────────────────

    /// Unregister and clear all state.  Idempotent.
    ///
    /// Outstanding calls are abandoned without invoking their callbacks.
    /// Armed timers stay armed and find nothing when they fire.
    pub fn destroy(&self) {
        if let Some(abandoned) = self.core.release() {
            info!(
                "channel to {}: destroyed, {} call(s) abandoned",
                self.core.peer, abandoned
            );
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.core.state.borrow();
        f.debug_struct("Channel")
            .field("id", &st.id)
            .field("peer", &self.core.peer)
            .field("origin", &self.core.origin)
            .field("scope", &self.core.scope)
            .field("readiness", &st.readiness)
            .field("pending", &st.pending.len())
            .finish_non_exhaustive()
    }
}

// ───────────────────────────────────────────────────────────────
// Engine internals
// ───────────────────────────────────────────────────────────────

impl ChannelCore {
    fn id(&self) -> String {
        self.state.borrow().id.clone()
    }

    fn endpoint(&self) -> Weak<dyn Endpoint> {
        self.this.clone()
    }

    fn ensure_live(&self, op: &str) -> Result<()> {
        if self.state.borrow().readiness == Readiness::Destroyed {
            return Err(ChannelError::protocol(format!(
                "{op} called on a destroyed channel"
            )));
        }
        Ok(())
    }

    /// Mark destroyed, clear state, unregister and drop outbound routes.
    /// `None` if already destroyed, else the number of abandoned calls.
    fn release(&self) -> Option<usize> {
        let abandoned: Vec<(TxnId, Outbound)> = {
            let mut st = self.state.borrow_mut();
            if st.readiness == Readiness::Destroyed {
                return None;
            }
            st.readiness = Readiness::Destroyed;
            st.id.clear();
            st.pending.clear();
            st.methods.clear();
            st.inbound.clear();
            st.outbound.drain().collect()
        };

        self.runtime
            .registry
            .unregister(self.peer, &self.origin, &self.scope);
        for (id, _) in &abandoned {
            self.runtime.registry.remove_route(*id);
        }
        Some(abandoned.len())
    }

    fn trace(&self, id: &str, msg: fmt::Arguments<'_>) {
        if self.debug_output {
            debug!("[{id}] {msg}");
        }
    }

    /// Queue or transmit.  `force` bypasses the queue (handshake only).
    pub(crate) fn post(&self, envelope: Envelope, force: bool) {
        {
            let mut st = self.state.borrow_mut();
            match st.readiness {
                Readiness::Destroyed => {
                    debug!("channel to {}: dropping {} after destroy", self.peer, envelope.kind_name());
                    return;
                }
                Readiness::NotReady if !force => {
                    self.trace(&st.id, format_args!("queue {}", envelope.kind_name()));
                    st.pending.push(envelope);
                    return;
                }
                _ => self.trace(&st.id, format_args!("post {}", envelope.kind_name())),
            }
        }

        if let Some(observe) = &self.hooks.post_message {
            observe(&self.origin, &envelope);
        }
        match encode(&envelope) {
            Ok(text) => self.runtime.transport.send_raw(self.peer, &self.origin, &text),
            Err(e) => warn!("channel to {}: cannot encode {}: {}", self.peer, envelope.kind_name(), e),
        }
    }

    fn send_ping(&self) {
        if self.state.borrow().readiness != Readiness::NotReady {
            return;
        }
        self.post(
            Envelope::Notification {
                method: scope_method(&self.scope, READY_METHOD),
                params: Value::from(PING),
            },
            true,
        );
    }

    fn on_handshake(&self, params: &Value) {
        let is_ping = match params.as_str() {
            Some(PING) => true,
            Some(PONG) => false,
            _ => {
                warn!("channel to {}: unexpected handshake params {}", self.peer, params);
                return;
            }
        };

        let (mut pending, id) = {
            let mut st = self.state.borrow_mut();
            if st.readiness != Readiness::NotReady {
                drop(st);
                self.report_duplicate_ready();
                return;
            }
            st.id.push_str(if is_ping { "-R" } else { "-L" });
            st.methods.remove(READY_METHOD);
            st.readiness = Readiness::Ready;
            (core::mem::take(&mut st.pending), st.id.clone())
        };
        self.trace(&id, format_args!("ready msg accepted"));

        if is_ping {
            self.post(
                Envelope::Notification {
                    method: scope_method(&self.scope, READY_METHOD),
                    params: Value::from(PONG),
                },
                false,
            );
        }

        // Flushed last-in first-out.
        while let Some(envelope) = pending.pop() {
            self.post(envelope, false);
        }

        info!("channel {id}: ready");
        if let (Some(on_ready), Some(core)) = (&self.hooks.on_ready, self.this.upgrade()) {
            on_ready(&Channel { core });
        }
    }

    fn report_duplicate_ready(&self) {
        let e = ChannelError::protocol("received ready message while in ready state");
        warn!("channel {}: {}", self.id(), e);
    }

    fn expire(&self, id: TxnId, error: &ChannelError) {
        let Some(entry) = self.state.borrow_mut().outbound.remove(&id) else {
            return;
        };
        self.runtime.registry.remove_route(id);
        debug!("channel to {}: txn {} timed out", self.peer, id);
        (entry.on_error)(error.kind(), &error.message());
    }

    // ── Transaction support ───────────────────────────────────

    /// Close an inbound transaction.  `false` if it was not open.
    pub(crate) fn retire_inbound(&self, id: TxnId) -> bool {
        self.state.borrow_mut().inbound.remove(&id).is_some()
    }

    /// `None` if `id` is not open, else whether `name` was declared.
    pub(crate) fn inbound_allows(&self, id: TxnId, name: &str) -> Option<bool> {
        self.state
            .borrow()
            .inbound
            .get(&id)
            .map(|names| names.iter().any(|n| n == name))
    }

    // ── Inbound ───────────────────────────────────────────────

    fn on_request(&self, origin: &str, method: &str, id: TxnId, params: Value, callbacks: Vec<String>) {
        let handler = {
            let st = self.state.borrow();
            if method == READY_METHOD && st.readiness == Readiness::Ready {
                drop(st);
                self.report_duplicate_ready();
                return;
            }
            st.methods.get(method).cloned()
        };
        let Some(handler) = handler else {
            debug!("channel to {}: no handler for '{}', txn {} dropped", self.peer, method, id);
            return;
        };

        let txn = Transaction::open(id, origin, callbacks.clone(), self.this.clone());
        self.state.borrow_mut().inbound.insert(id, callbacks);

        match handler(&txn, params) {
            Ok(value) => {
                if !txn.is_delayed() && !txn.completed() {
                    if let Err(e) = txn.complete(value) {
                        warn!("channel to {}: auto-complete of txn {} failed: {}", self.peer, id, e);
                    }
                }
            }
            Err(failure) => {
                let (kind, message) = failure.classify();
                if txn.is_delayed() || txn.completed() {
                    warn!(
                        "channel to {}: handler '{}' failed after answering: {}: {}",
                        self.peer, method, kind, message
                    );
                } else if let Err(e) = txn.error(&kind, &message) {
                    warn!("channel to {}: auto-error of txn {} failed: {}", self.peer, id, e);
                }
            }
        }
    }

    fn on_notification(&self, origin: &str, method: &str, params: Value) {
        let handler = {
            let st = self.state.borrow();
            if method == READY_METHOD && st.readiness == Readiness::Ready {
                drop(st);
                self.report_duplicate_ready();
                return;
            }
            st.methods.get(method).cloned()
        };
        let Some(handler) = handler else {
            debug!("channel to {}: no handler for notification '{}'", self.peer, method);
            return;
        };

        if let Err(failure) = handler(&Transaction::detached(origin), params) {
            let (kind, message) = failure.classify();
            warn!(
                "channel to {}: notification handler '{}' failed: {}: {}",
                self.peer, method, kind, message
            );
        }
    }

    fn on_callback(&self, id: TxnId, name: &str, params: Value) {
        let callback = self
            .state
            .borrow()
            .outbound
            .get(&id)
            .and_then(|entry| entry.callbacks.get(name).cloned());
        match callback {
            Some(callback) => callback(params),
            None => debug!("channel to {}: ignoring callback '{}' for txn {}", self.peer, name, id),
        }
    }

    fn on_response(&self, id: TxnId, outcome: core::result::Result<Value, (String, String)>) {
        let Some(entry) = self.state.borrow_mut().outbound.remove(&id) else {
            debug!("channel to {}: ignoring response for unknown txn {}", self.peer, id);
            return;
        };
        self.runtime.registry.remove_route(id);
        if let Some(timer) = entry.timer {
            self.runtime.executor.clear_timeout(timer);
        }
        match outcome {
            Ok(result) => (entry.on_success)(result),
            Err((kind, message)) => (entry.on_error)(&kind, &message),
        }
    }
}

impl Drop for ChannelCore {
    fn drop(&mut self) {
        if let Some(abandoned) = self.release() {
            debug!(
                "channel to {}: dropped without destroy, {} call(s) abandoned",
                self.peer, abandoned
            );
        }
    }
}

impl Endpoint for ChannelCore {
    fn deliver(&self, origin: &str, method: Option<&str>, envelope: Envelope) {
        if self.state.borrow().readiness == Readiness::Destroyed {
            return;
        }
        if self.debug_output {
            self.trace(&self.id(), format_args!("received {} from {}", envelope.kind_name(), origin));
        }
        if let Some(observe) = &self.hooks.got_message {
            observe(origin, &envelope);
        }

        let method = method.unwrap_or_default();
        match envelope {
            Envelope::Request {
                id,
                params,
                callbacks,
                ..
            } => self.on_request(origin, method, id, params, callbacks),
            Envelope::Notification { params, .. } => self.on_notification(origin, method, params),
            Envelope::CallbackInvoke {
                id,
                callback,
                params,
            } => self.on_callback(id, &callback, params),
            Envelope::ResponseSuccess { id, result } => self.on_response(id, Ok(result)),
            Envelope::ResponseError { id, error, message } => {
                self.on_response(id, Err((error, message)));
            }
        }
    }
}

/// Five alphanumeric characters of non-cryptographic entropy.
fn random_id() -> String {
    let mut seed = RandomState::new().build_hasher().finish();
    let base = ID_ALPHABET.len() as u64;
    (0..ID_LEN)
        .map(|_| {
            let c = ID_ALPHABET[usize::try_from(seed % base).unwrap_or(0)];
            seed /= base;
            char::from(c)
        })
        .collect()
}
