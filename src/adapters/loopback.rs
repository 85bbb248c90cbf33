//! In-process loopback transport.
//!
//! Simulates a set of isolated contexts that can only exchange text.
//! Each context gets its own [`Registry`] and a [`LoopbackTransport`];
//! a send is delivered on the next executor turn by calling the receiving
//! registry's `dispatch` with the *sender's* origin, which is what a real
//! cross-window messaging primitive reports.
//!
//! ```text
//!   ctx A ── send_raw(B, target_origin, text) ──▶ frame log
//!                                                   │ target_origin matches B?
//!                                                   ▼ (next turn)
//!                                  B.registry.dispatch(A.origin, A, text)
//! ```
//!
//! Every frame is recorded, delivered or not, so tests can assert on the
//! exact wire traffic.

use core::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use log::debug;

use crate::config::ANY_ORIGIN;
use crate::ports::{Executor, PeerId, Transport};
use crate::rpc::channel::Runtime;
use crate::rpc::registry::Registry;

/// One send attempt, as seen on the simulated wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub from: PeerId,
    pub to: PeerId,
    pub target_origin: String,
    pub text: String,
    /// `false` when the target origin did not match the receiver, or the
    /// receiver was unknown.
    pub delivered: bool,
}

struct Context {
    origin: String,
    registry: Registry,
}

struct NetInner {
    executor: Rc<dyn Executor>,
    contexts: RefCell<HashMap<PeerId, Context>>,
    frames: RefCell<Vec<Frame>>,
    next_peer: Cell<u64>,
}

/// A simulated set of contexts sharing one executor.
#[derive(Clone)]
pub struct LoopbackNetwork {
    inner: Rc<NetInner>,
}

impl LoopbackNetwork {
    pub fn new(executor: Rc<dyn Executor>) -> Self {
        Self {
            inner: Rc::new(NetInner {
                executor,
                contexts: RefCell::new(HashMap::new()),
                frames: RefCell::new(Vec::new()),
                next_peer: Cell::new(1),
            }),
        }
    }

    /// Create a context whose documents live at `origin`.
    ///
    /// Returns the context's identity and the runtime its channels are
    /// built against.
    pub fn attach(&self, origin: &str) -> (PeerId, Runtime) {
        let me = PeerId::new(self.inner.next_peer.get());
        self.inner.next_peer.set(me.raw() + 1);

        let registry = Registry::new(me);
        self.inner.contexts.borrow_mut().insert(
            me,
            Context {
                origin: origin.to_string(),
                registry: registry.clone(),
            },
        );
        let transport = Rc::new(LoopbackTransport {
            me,
            net: Rc::downgrade(&self.inner),
        });
        (
            me,
            Runtime::new(registry, transport, self.inner.executor.clone()),
        )
    }

    /// Remove a context.  Frames addressed to it are no longer delivered.
    pub fn detach(&self, peer: PeerId) {
        let removed = self.inner.contexts.borrow_mut().remove(&peer);
        if let Some(ctx) = removed {
            ctx.registry.teardown();
        }
    }

    /// Hand raw text to `to` as if `from` had sent it, bypassing any
    /// channel.  For feeding untrusted input.
    pub fn inject(&self, from: PeerId, to: PeerId, text: &str) {
        LoopbackTransport {
            me: from,
            net: Rc::downgrade(&self.inner),
        }
        .send_raw(to, ANY_ORIGIN, text);
    }

    /// Snapshot of every frame sent so far.
    pub fn frames(&self) -> Vec<Frame> {
        self.inner.frames.borrow().clone()
    }

    /// Texts of delivered frames from `from` to `to`, in send order.
    pub fn delivered(&self, from: PeerId, to: PeerId) -> Vec<String> {
        self.inner
            .frames
            .borrow()
            .iter()
            .filter(|f| f.delivered && f.from == from && f.to == to)
            .map(|f| f.text.clone())
            .collect()
    }

    pub fn clear_frames(&self) {
        self.inner.frames.borrow_mut().clear();
    }
}

/// Send side of one loopback context.
pub struct LoopbackTransport {
    me: PeerId,
    net: Weak<NetInner>,
}

impl Transport for LoopbackTransport {
    fn send_raw(&self, peer: PeerId, target_origin: &str, text: &str) {
        let Some(net) = self.net.upgrade() else {
            return;
        };

        let route = {
            let contexts = net.contexts.borrow();
            let sender_origin = contexts
                .get(&self.me)
                .map_or_else(|| ANY_ORIGIN.to_string(), |c| c.origin.clone());
            contexts.get(&peer).and_then(|receiver| {
                (target_origin == ANY_ORIGIN || target_origin == receiver.origin)
                    .then(|| (receiver.registry.clone(), sender_origin))
            })
        };

        net.frames.borrow_mut().push(Frame {
            from: self.me,
            to: peer,
            target_origin: target_origin.to_string(),
            text: text.to_string(),
            delivered: route.is_some(),
        });

        let Some((registry, sender_origin)) = route else {
            debug!(
                "loopback: {} -> {} dropped (target origin '{}')",
                self.me, peer, target_origin
            );
            return;
        };
        let me = self.me;
        let text = text.to_string();
        net.executor.defer(Box::new(move || {
            registry.dispatch(&sender_origin, me, &text);
        }));
    }
}
