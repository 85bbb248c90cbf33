//! PostBridge library.
//!
//! Cross-context RPC over an untrusted text transport.  The engine is
//! single-threaded and host-agnostic: the transport and the scheduler are
//! port traits ([`ports`]) implemented by [`adapters`].

#![deny(unused_must_use)]

pub mod adapters;
pub mod config;
pub mod error;
pub mod ports;
pub mod rpc;
pub mod scheduler;

pub use config::ChannelConfig;
pub use error::{ChannelError, Result};
pub use ports::PeerId;
