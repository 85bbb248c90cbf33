//! Cooperative single-thread scheduler.
//!
//! Everything the engine does runs on one logical thread, driven by two
//! kinds of wake-ups: next-turn tasks (handshake ping, in-process message
//! delivery) and timers (call timeouts).  The scheduler owns a virtual
//! clock, so hosts and tests decide when time moves.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Wake Sources                          │
//! │                                                              │
//! │  ┌───────────┐   ┌─────────────┐   ┌──────────────────────┐  │
//! │  │  defer()  │   │ set_timeout │   │  advance(by) moves   │  │
//! │  │ next turn │   │  (due, seq) │   │  the virtual clock   │  │
//! │  └─────┬─────┘   └──────┬──────┘   └──────────┬───────────┘  │
//! │        ▼                ▼                     │              │
//! │  ┌──────────┐    ┌─────────────┐              │              │
//! │  │ ready Q  │◀───│ timer wheel │◀─────────────┘              │
//! │  │  (FIFO)  │    │ (BTreeMap)  │                             │
//! │  └────┬─────┘    └─────────────┘                             │
//! │       ▼                                                      │
//! │  run_until_idle(): one task at a time, never re-entrant      │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use core::cell::RefCell;
use core::time::Duration;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::Rc;

use log::{debug, trace};

use crate::ports::{Executor, Task, TimerId};

// ═══════════════════════════════════════════════════════════════
//  Scheduler engine
// ═══════════════════════════════════════════════════════════════

/// Shared handle to a cooperative scheduler.
///
/// Cloning yields another handle to the same queues and clock.
#[derive(Clone, Default)]
pub struct Scheduler {
    inner: Rc<RefCell<SchedulerState>>,
}

#[derive(Default)]
struct SchedulerState {
    /// Virtual time in milliseconds.
    now_ms: u64,
    /// Tasks due on the next turn, in submission order.
    ready: VecDeque<Task>,
    /// Pending timers keyed by `(due_ms, seq)` so equal deadlines fire in
    /// creation order.
    timers: BTreeMap<(u64, u64), Task>,
    /// `seq → due_ms` for cancellation.
    due_by_seq: HashMap<u64, u64>,
    next_seq: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time.
    pub fn now(&self) -> Duration {
        Duration::from_millis(self.inner.borrow().now_ms)
    }

    /// Run queued tasks, including those they queue, until none remain.
    /// Does not move the clock.  Returns the number of tasks run.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        loop {
            // Release the borrow before running: tasks schedule more work.
            let next = self.inner.borrow_mut().ready.pop_front();
            match next {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    /// Move the clock forward by `by`, firing every timer that falls due in
    /// deadline order and draining the ready queue after each.
    /// Returns the number of tasks and timers run.
    pub fn advance(&self, by: Duration) -> usize {
        let mut ran = self.run_until_idle();
        let target = {
            let state = self.inner.borrow();
            state.now_ms.saturating_add(duration_ms(by))
        };

        loop {
            let due = {
                let mut state = self.inner.borrow_mut();
                let key = state
                    .timers
                    .first_key_value()
                    .map(|(key, _)| *key)
                    .filter(|(due, _)| *due <= target);
                key.and_then(|key| {
                    state.due_by_seq.remove(&key.1);
                    state.now_ms = state.now_ms.max(key.0);
                    state.timers.remove(&key)
                })
            };

            match due {
                Some(task) => {
                    trace!("scheduler: timer fired at {}ms", self.inner.borrow().now_ms);
                    task();
                    ran += 1 + self.run_until_idle();
                }
                None => break,
            }
        }

        self.inner.borrow_mut().now_ms = target;
        ran
    }

    /// Number of armed timers.
    pub fn pending_timers(&self) -> usize {
        self.inner.borrow().timers.len()
    }

    /// `true` when no task is queued for the next turn.
    pub fn is_idle(&self) -> bool {
        self.inner.borrow().ready.is_empty()
    }
}

impl Executor for Scheduler {
    fn defer(&self, task: Task) {
        self.inner.borrow_mut().ready.push_back(task);
    }

    fn set_timeout(&self, delay: Duration, task: Task) -> TimerId {
        let mut state = self.inner.borrow_mut();
        let seq = state.next_seq;
        state.next_seq += 1;
        let due = state.now_ms.saturating_add(duration_ms(delay));
        state.timers.insert((due, seq), task);
        state.due_by_seq.insert(seq, due);
        debug!("scheduler: timer {} armed for {}ms", seq, due);
        TimerId(seq)
    }

    fn clear_timeout(&self, id: TimerId) {
        let mut state = self.inner.borrow_mut();
        if let Some(due) = state.due_by_seq.remove(&id.0) {
            state.timers.remove(&(due, id.0));
            debug!("scheduler: timer {} cancelled", id.0);
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
