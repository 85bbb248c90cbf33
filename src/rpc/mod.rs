//! Transport-agnostic RPC subsystem.
//!
//! Request/response, notifications and streaming callbacks between
//! isolated execution contexts that can only exchange text.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      RPC Stack                             │
//! │                                                            │
//! │  ┌───────────┐   ┌──────────┐   ┌──────────────────────┐   │
//! │  │ Transport │──▶│ Registry │──▶│ Channel (engine)     │   │
//! │  │ (adapter) │   │ (decode, │   │  → bound handlers    │   │
//! │  └───────────┘   │  route)  │   │  → Transaction       │   │
//! │       ▲          └──────────┘   └──────────────────────┘   │
//! │       │                                   │                │
//! │       │          ┌──────────┐             │                │
//! │       └──────────│  Codec   │◀────────────┘                │
//! │                  │ (encode) │   marshal: params/callbacks  │
//! │                  └──────────┘                              │
//! └────────────────────────────────────────────────────────────┘
//! ```

pub mod channel;
pub mod codec;
pub mod envelope;
pub mod marshal;
pub mod registry;
pub mod transaction;

pub use channel::{Call, Channel, ChannelHooks, READY_METHOD, Readiness, Runtime};
pub use envelope::{Envelope, TxnId};
pub use marshal::Param;
pub use registry::{Endpoint, Registry};
pub use transaction::{HandlerError, HandlerResult, RemoteCallback, Transaction};
