//! Adapters: concrete implementations of the port traits.
//!
//! | Adapter        | Implements          | Connects to                   |
//! |----------------|---------------------|-------------------------------|
//! | `loopback`     | Transport           | In-process simulated contexts |
//! | `log_observer` | EnvelopeObserver    | `log` facade                  |
//!
//! The executor port is implemented by [`crate::scheduler::Scheduler`].
//! Log output goes through `env_logger`, installed by the demo binary.

pub mod log_observer;
pub mod loopback;
