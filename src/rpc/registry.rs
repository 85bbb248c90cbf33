//! Process-wide channel registry.
//!
//! One registry exists per execution context.  It is the single inbound
//! entry point: the transport adapter hands every arriving payload to
//! [`Registry::dispatch`], which routes it to at most one channel.
//!
//! ```text
//!                      ┌──────────────────────────────┐
//!  (origin, sender,    │ buckets: origin → scope →    │
//!   text) ──dispatch──▶│   [(peer, endpoint)]         │──▶ Endpoint::deliver
//!                      │ routes:  txn id → endpoint   │
//!                      └──────────────────────────────┘
//! ```
//!
//! Requests and notifications are routed by `(origin, scope, sender)`,
//! exact origin first, then the `"*"` bucket.  Responses and callback
//! invocations carry no method, so they are routed by transaction id
//! through a table that outbound calls populate.
//!
//! The registry is an explicitly owned value: create it at context start,
//! inject it into every [`Channel`](super::channel::Channel), and call
//! [`Registry::teardown`] when the context goes away.

use core::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use log::{debug, info, warn};

use super::codec::{decode, split_scoped};
use super::envelope::{Envelope, TxnId};
use crate::config::ANY_ORIGIN;
use crate::error::{ChannelError, Result};
use crate::ports::PeerId;

/// Receiver of routed envelopes.
pub trait Endpoint {
    /// Deliver an envelope from `origin`.  `method` is the bare method name
    /// (scope stripped) for requests and notifications, `None` otherwise.
    fn deliver(&self, origin: &str, method: Option<&str>, envelope: Envelope);
}

struct Binding {
    peer: PeerId,
    endpoint: Weak<dyn Endpoint>,
}

impl Binding {
    fn is_live(&self) -> bool {
        self.endpoint.strong_count() > 0
    }
}

struct Route {
    peer: PeerId,
    endpoint: Weak<dyn Endpoint>,
}

type Buckets = HashMap<String, HashMap<String, Vec<Binding>>>;

struct RegistryInner {
    own: PeerId,
    buckets: RefCell<Buckets>,
    routes: RefCell<HashMap<TxnId, Route>>,
    next_txn: Cell<TxnId>,
}

/// Shared handle to a context's channel registry.
#[derive(Clone)]
pub struct Registry {
    inner: Rc<RegistryInner>,
}

impl Registry {
    /// Create the registry for the context identified by `own`.
    pub fn new(own: PeerId) -> Self {
        Self {
            inner: Rc::new(RegistryInner {
                own,
                buckets: RefCell::new(HashMap::new()),
                routes: RefCell::new(HashMap::new()),
                next_txn: Cell::new(1),
            }),
        }
    }

    /// Identity of the context that owns this registry.
    pub fn own_identity(&self) -> PeerId {
        self.inner.own
    }

    // ── Registration ──────────────────────────────────────────

    /// Bind `endpoint` to `(peer, origin, scope)`.
    ///
    /// Fails with [`ChannelError::ProtocolViolation`] when a live binding
    /// for the same peer and scope already exists in an overlapping origin
    /// bucket: a wildcard registration overlaps every origin, a concrete
    /// one overlaps itself and the wildcard.
    pub fn register(
        &self,
        peer: PeerId,
        origin: &str,
        scope: &str,
        endpoint: Weak<dyn Endpoint>,
    ) -> Result<()> {
        let mut buckets = self.inner.buckets.borrow_mut();

        let holds_peer = |scopes: Option<&HashMap<String, Vec<Binding>>>| {
            scopes
                .and_then(|s| s.get(scope))
                .is_some_and(|list| list.iter().any(|b| b.peer == peer && b.is_live()))
        };
        let exists = if origin == ANY_ORIGIN {
            buckets.values().any(|scopes| holds_peer(Some(scopes)))
        } else {
            holds_peer(buckets.get(ANY_ORIGIN)) || holds_peer(buckets.get(origin))
        };
        if exists {
            return Err(ChannelError::protocol(format!(
                "a channel is already bound to {peer} which overlaps with origin '{origin}' and has scope '{scope}'"
            )));
        }

        let list = buckets
            .entry(origin.to_string())
            .or_default()
            .entry(scope.to_string())
            .or_default();
        list.retain(Binding::is_live);
        list.push(Binding { peer, endpoint });
        info!("registry: bound {} origin='{}' scope='{}'", peer, origin, scope);
        Ok(())
    }

    /// Remove the binding for `(peer, origin, scope)`.  Empty buckets are
    /// deleted.  Returns `true` if a binding was removed.
    pub fn unregister(&self, peer: PeerId, origin: &str, scope: &str) -> bool {
        let mut buckets = self.inner.buckets.borrow_mut();
        let Some(scopes) = buckets.get_mut(origin) else {
            return false;
        };
        let Some(list) = scopes.get_mut(scope) else {
            return false;
        };

        let before = list.len();
        list.retain(|b| b.peer != peer);
        let removed = list.len() != before;

        if list.is_empty() {
            scopes.remove(scope);
        }
        if scopes.is_empty() {
            buckets.remove(origin);
        }
        if removed {
            info!("registry: unbound {} origin='{}' scope='{}'", peer, origin, scope);
        }
        removed
    }

    // ── Inbound ───────────────────────────────────────────────

    /// Route one raw payload.  Returns `true` if an endpoint accepted it.
    ///
    /// Unparsable or non-object payloads are dropped silently: the
    /// transport is untrusted.
    pub fn dispatch(&self, origin: &str, sender: PeerId, raw: &str) -> bool {
        let envelope = match decode(raw) {
            Ok(env) => env,
            Err(e) => {
                debug!("registry: dropping payload from {} ({}): {}", sender, origin, e);
                return false;
            }
        };

        if let Some(scoped) = envelope.method() {
            let (scope, bare) = split_scoped(scoped);
            let (scope, bare) = (scope.to_string(), bare.to_string());
            let Some(endpoint) = self.lookup(origin, &scope, sender) else {
                debug!(
                    "registry: no channel for {} origin='{}' scope='{}'",
                    sender, origin, scope
                );
                return false;
            };
            endpoint.deliver(origin, Some(&bare), envelope);
            return true;
        }

        let Some(id) = envelope.id() else {
            return false;
        };
        let endpoint = {
            let routes = self.inner.routes.borrow();
            match routes.get(&id) {
                Some(route) if route.peer == sender => route.endpoint.upgrade(),
                Some(route) => {
                    warn!(
                        "registry: txn {} answered by {} but was sent to {}",
                        id, sender, route.peer
                    );
                    None
                }
                None => None,
            }
        };
        match endpoint {
            Some(endpoint) => {
                endpoint.deliver(origin, None, envelope);
                true
            }
            None => {
                debug!("registry: ignoring {} for unknown txn {}", envelope.kind_name(), id);
                false
            }
        }
    }

    fn lookup(&self, origin: &str, scope: &str, sender: PeerId) -> Option<Rc<dyn Endpoint>> {
        let buckets = self.inner.buckets.borrow();
        let find = |bucket: &str| {
            buckets
                .get(bucket)
                .and_then(|scopes| scopes.get(scope))
                .and_then(|list| {
                    list.iter()
                        .filter(|b| b.peer == sender)
                        .find_map(|b| b.endpoint.upgrade())
                })
        };
        find(origin).or_else(|| find(ANY_ORIGIN))
    }

    // ── Transaction ids and routes ────────────────────────────

    /// Allocate the next transaction id.  Strictly increasing for the life
    /// of the registry.
    pub fn next_txn_id(&self) -> TxnId {
        let id = self.inner.next_txn.get();
        self.inner.next_txn.set(id + 1);
        id
    }

    pub(crate) fn add_route(&self, id: TxnId, peer: PeerId, endpoint: Weak<dyn Endpoint>) {
        self.inner
            .routes
            .borrow_mut()
            .insert(id, Route { peer, endpoint });
    }

    pub(crate) fn remove_route(&self, id: TxnId) -> bool {
        self.inner.routes.borrow_mut().remove(&id).is_some()
    }

    // ── Introspection / teardown ──────────────────────────────

    /// Number of live channel bindings.
    pub fn binding_count(&self) -> usize {
        self.inner
            .buckets
            .borrow()
            .values()
            .flat_map(HashMap::values)
            .map(|list| list.iter().filter(|b| b.is_live()).count())
            .sum()
    }

    /// Number of outbound transactions awaiting a response.
    pub fn route_count(&self) -> usize {
        self.inner.routes.borrow().len()
    }

    /// Drop every binding and route.  Channels still holding this registry
    /// stop receiving anything.
    pub fn teardown(&self) {
        self.inner.buckets.borrow_mut().clear();
        self.inner.routes.borrow_mut().clear();
        info!("registry: torn down for {}", self.inner.own);
    }
}
