//! Two-context fixture for integration tests.
//!
//! Records every outcome a caller observes so tests can assert on the
//! full history without poking at channel internals.

use std::cell::RefCell;
use std::rc::Rc;

use postbridge::ChannelConfig;
use postbridge::PeerId;
use postbridge::adapters::loopback::LoopbackNetwork;
use postbridge::rpc::{Call, Channel, ChannelHooks, Param, Runtime};
use postbridge::scheduler::Scheduler;
use serde_json::Value;

pub const LEFT_ORIGIN: &str = "https://left.test";
pub const RIGHT_ORIGIN: &str = "https://right.test";

// ── Captured log records ──────────────────────────────────────

/// Start capturing log records on this thread, discarding earlier ones.
pub fn capture_logs() {
    testing_logger::setup();
}

/// Warnings captured since [`capture_logs`] whose text contains `needle`.
pub fn warnings_with(needle: &str) -> usize {
    let count = std::cell::Cell::new(0);
    testing_logger::validate(|logs| {
        count.set(
            logs.iter()
                .filter(|l| l.level == log::Level::Warn && l.body.contains(needle))
                .count(),
        );
    });
    count.get()
}

// ── Outcome record ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Value),
    Error(String, String),
    Callback(String, Value),
}

/// Shared log of what callers saw, in order.
#[derive(Clone, Default)]
pub struct Outcomes(Rc<RefCell<Vec<Outcome>>>);

#[allow(dead_code)]
impl Outcomes {
    /// A call whose success and error callbacks both record here.
    pub fn call(&self, method: &str, params: impl Into<Param>) -> Call {
        let ok = self.0.clone();
        let err = self.0.clone();
        Call::new(method, params)
            .on_success(move |v| ok.borrow_mut().push(Outcome::Success(v)))
            .on_error(move |k, m| err.borrow_mut().push(Outcome::Error(k.into(), m.into())))
    }

    /// A callback param that records its invocations under `name`.
    pub fn callback(&self, name: &str) -> Param {
        let log = self.0.clone();
        let name = name.to_string();
        Param::callback(move |v| log.borrow_mut().push(Outcome::Callback(name.clone(), v)))
    }

    pub fn take(&self) -> Vec<Outcome> {
        self.0.borrow_mut().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }
}

// ── Pair fixture ──────────────────────────────────────────────

pub struct Pair {
    pub sched: Scheduler,
    pub net: LoopbackNetwork,
    pub left_id: PeerId,
    pub right_id: PeerId,
    pub left_rt: Runtime,
    pub right_rt: Runtime,
}

#[allow(dead_code)]
impl Pair {
    pub fn new() -> Self {
        let sched = Scheduler::new();
        let net = LoopbackNetwork::new(Rc::new(sched.clone()));
        let (left_id, left_rt) = net.attach(LEFT_ORIGIN);
        let (right_id, right_rt) = net.attach(RIGHT_ORIGIN);
        Self {
            sched,
            net,
            left_id,
            right_id,
            left_rt,
            right_rt,
        }
    }

    /// Channel in the left context, talking to the right one.
    pub fn left(&self, scope: &str, hooks: ChannelHooks) -> Channel {
        Channel::build(
            &self.left_rt,
            self.right_id,
            &ChannelConfig::new(RIGHT_ORIGIN).with_scope(scope),
            hooks,
        )
        .unwrap()
    }

    /// Channel in the right context, talking to the left one.
    pub fn right(&self, scope: &str, hooks: ChannelHooks) -> Channel {
        Channel::build(
            &self.right_rt,
            self.left_id,
            &ChannelConfig::new(LEFT_ORIGIN).with_scope(scope),
            hooks,
        )
        .unwrap()
    }

    /// Right loads first (its ping is lost), then left; after settling the
    /// right side is `-R` and the left side `-L`.
    pub fn connected(scope: &str) -> (Self, Channel, Channel) {
        let pair = Self::new();
        let right = pair.right(scope, ChannelHooks::default());
        pair.settle();
        let left = pair.left(scope, ChannelHooks::default());
        pair.settle();
        assert!(left.is_ready() && right.is_ready(), "handshake must complete");
        (pair, left, right)
    }

    pub fn settle(&self) -> usize {
        self.sched.run_until_idle()
    }

    /// Parsed payloads delivered from `from` to `to`, in send order.
    pub fn wire(&self, from: PeerId, to: PeerId) -> Vec<Value> {
        self.net
            .delivered(from, to)
            .iter()
            .map(|t| serde_json::from_str(t).unwrap())
            .collect()
    }

    /// `method` fields of delivered payloads (`null` for responses).
    pub fn wire_methods(&self, from: PeerId, to: PeerId) -> Vec<Value> {
        self.wire(from, to)
            .into_iter()
            .map(|v| v.get("method").cloned().unwrap_or(Value::Null))
            .collect()
    }
}
