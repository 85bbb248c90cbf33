//! Port traits: the boundary between the channel engine and its host.
//!
//! ```text
//!   Transport adapter ──▶ Registry::dispatch ──▶ Channel (engine)
//!   Channel ──▶ Transport::send_raw
//!   Channel ──▶ Executor (next-turn tasks, timers)
//! ```
//!
//! The engine never touches a real window, socket or clock. Adapters
//! implement these traits and are injected at construction through a
//! [`Runtime`](crate::rpc::channel::Runtime).

use core::fmt;
use core::time::Duration;
use std::rc::Rc;

use crate::rpc::envelope::Envelope;

// ───────────────────────────────────────────────────────────────
// Peer identity
// ───────────────────────────────────────────────────────────────

/// Opaque handle naming an execution context.
///
/// Only ever compared for identity; it never grants access to the peer's
/// memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(u64);

impl PeerId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Peer({})", self.0)
    }
}

// ───────────────────────────────────────────────────────────────
// Transport port (engine → outside world)
// ───────────────────────────────────────────────────────────────

/// Send side of a text transport.
///
/// The receive side is the adapter calling
/// [`Registry::dispatch`](crate::rpc::registry::Registry::dispatch) with
/// `(origin, sender, text)` for every arriving payload.
pub trait Transport {
    /// Fire-and-forget delivery of `text` to `peer`, restricted to
    /// `target_origin` (`"*"` for any). No acknowledgement is given.
    fn send_raw(&self, peer: PeerId, target_origin: &str, text: &str);
}

/// A transport that discards everything.
/// Useful for channels whose peer has gone away.
pub struct NullTransport;

impl Transport for NullTransport {
    fn send_raw(&self, _peer: PeerId, _target_origin: &str, _text: &str) {}
}

// ───────────────────────────────────────────────────────────────
// Executor port (cooperative scheduling)
// ───────────────────────────────────────────────────────────────

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce()>;

/// Handle returned by [`Executor::set_timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

/// Single-threaded cooperative scheduler.
///
/// Tasks never run re-entrantly with the code that scheduled them.
pub trait Executor {
    /// Run `task` on the next scheduler turn.
    fn defer(&self, task: Task);

    /// Run `task` once `delay` has elapsed.
    fn set_timeout(&self, delay: Duration, task: Task) -> TimerId;

    /// Cancel a pending timer. Unknown or already-fired ids are ignored.
    fn clear_timeout(&self, id: TimerId);
}

// ───────────────────────────────────────────────────────────────
// Observers
// ───────────────────────────────────────────────────────────────

/// Called with `(origin, envelope)` for every envelope received or posted.
pub type EnvelopeObserver = Rc<dyn Fn(&str, &Envelope)>;
