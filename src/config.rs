//! Channel configuration parameters
//!
//! The serialisable part of a channel's construction arguments. Hooks that
//! carry closures live in [`ChannelHooks`](crate::rpc::channel::ChannelHooks).

use serde::{Deserialize, Serialize};

use crate::error::{ChannelError, Result};

/// Origin wildcard: accept any peer origin.
pub const ANY_ORIGIN: &str = "*";

/// Separator between scope and bare method name on the wire.
pub const SCOPE_SEPARATOR: &str = "::";

/// Per-channel configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// `"*"` or an exact `scheme://host[:port]` origin.
    pub origin: String,
    /// Optional namespace prefix; must not contain `::`.
    pub scope: Option<String>,
    /// Log every queue/post decision, prefixed with the channel id.
    pub debug_output: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            origin: ANY_ORIGIN.to_string(),
            scope: None,
            debug_output: false,
        }
    }
}

impl ChannelConfig {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            ..Self::default()
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_debug_output(mut self, on: bool) -> Self {
        self.debug_output = on;
        self
    }

    /// Validate origin and scope, returning `(normalized_origin, scope)`.
    ///
    /// An absent scope is returned as the empty string.
    pub fn validate(&self) -> Result<(String, String)> {
        let origin = normalize_origin(&self.origin)?;
        let scope = validate_scope(self.scope.as_deref())?;
        Ok((origin, scope.to_string()))
    }
}

/// Normalize an origin string.
///
/// Accepts `"*"` verbatim. Otherwise the string must start with
/// `http://` or `https://` followed by a host made of `[-a-zA-Z0-9_.]` and an
/// optional `:port`. Anything after that prefix (a path, a query) is
/// discarded and the result is lower-cased.
pub fn normalize_origin(origin: &str) -> Result<String> {
    if origin == ANY_ORIGIN {
        return Ok(origin.to_string());
    }

    let rest = origin
        .strip_prefix("http://")
        .or_else(|| origin.strip_prefix("https://"))
        .ok_or_else(|| invalid_origin(origin))?;
    let scheme_len = origin.len() - rest.len();

    let host_len = rest
        .bytes()
        .take_while(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
        .count();
    if host_len == 0 {
        return Err(invalid_origin(origin));
    }

    let mut end = scheme_len + host_len;
    if let Some(port) = rest[host_len..].strip_prefix(':') {
        let digits = port.bytes().take_while(u8::is_ascii_digit).count();
        if digits > 0 {
            end += 1 + digits;
        }
    }

    Ok(origin[..end].to_ascii_lowercase())
}

/// Validate an optional scope, returning `""` when absent.
pub fn validate_scope(scope: Option<&str>) -> Result<&str> {
    match scope {
        None => Ok(""),
        Some(s) if s.contains(SCOPE_SEPARATOR) => Err(ChannelError::config(format!(
            "scope may not contain double colons: '{SCOPE_SEPARATOR}'"
        ))),
        Some(s) => Ok(s),
    }
}

fn invalid_origin(origin: &str) -> ChannelError {
    ChannelError::config(format!("invalid origin '{origin}'"))
}
