//! Unified error type for the channel engine.
//!
//! Every fallible operation funnels into [`ChannelError`]. Each variant maps
//! onto a wire error kind via [`ChannelError::kind`], so an error raised inside
//! a live transaction can be sent back to the peer unchanged.

use core::fmt;

// ---------------------------------------------------------------------------
// Wire error kinds
// ---------------------------------------------------------------------------

pub const KIND_CONFIG: &str = "config_error";
pub const KIND_PROTOCOL: &str = "protocol_error";
pub const KIND_CIRCULAR: &str = "circular_params";
pub const KIND_TIMEOUT: &str = "timeout_error";
/// Handler failures are carried by `HandlerError`, not `ChannelError`.
pub const KIND_RUNTIME: &str = "runtime_error";
pub const KIND_MALFORMED: &str = "malformed_message";

// ---------------------------------------------------------------------------
// Top-level channel error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Invalid construction or call arguments (origin, scope, peer, method,
    /// missing callbacks). Raised synchronously to the caller.
    Config(String),
    /// The protocol state machine was driven out of order: duplicate
    /// handshake, use after destroy, re-binding, undeclared callback names,
    /// completing a closed or unknown transaction.
    ProtocolViolation(String),
    /// Outbound params revisit a container already being marshaled.
    CircularParams,
    /// No response arrived within the configured window.
    Timeout { method: String, timeout_ms: u64 },
    /// Inbound payload could not be parsed into an envelope.
    Malformed(String),
}

impl ChannelError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    /// Wire-level error kind, as carried in a `response-error` envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => KIND_CONFIG,
            Self::ProtocolViolation(_) => KIND_PROTOCOL,
            Self::CircularParams => KIND_CIRCULAR,
            Self::Timeout { .. } => KIND_TIMEOUT,
            Self::Malformed(_) => KIND_MALFORMED,
        }
    }

    /// Human-readable message, as carried in a `response-error` envelope.
    pub fn message(&self) -> String {
        match self {
            Self::Config(msg)
            | Self::ProtocolViolation(msg)
            | Self::Malformed(msg) => msg.clone(),
            Self::CircularParams => "params cannot be a recursive data structure".to_string(),
            Self::Timeout { method, timeout_ms } => {
                format!("timeout ({timeout_ms}ms) exceeded on method '{method}'")
            }
        }
    }
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind(), self.message())
    }
}

impl std::error::Error for ChannelError {}

impl From<serde_json::Error> for ChannelError {
    fn from(e: serde_json::Error) -> Self {
        Self::Malformed(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, ChannelError>;
