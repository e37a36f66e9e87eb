//! Monitor keys - one key per independently tracked entity.

use crate::{DomainError, DomainResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix used for keys derived from an order number.
pub const ORDER_KEY_PREFIX: &str = "order:";

/// Key used when a response carries no order number (one fixed endpoint).
pub const DEFAULT_ENDPOINT_KEY: &str = "order";

/// Identifies one independently tracked entity.
///
/// Snapshots, status records and cooldown timestamps are all scoped by
/// this key. Both the live interception path and the scheduled replay
/// path derive the same key for the same order, so they share state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonitorKey(String);

impl MonitorKey {
    /// Creates a key from a raw string without validation.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Parses a user-supplied key, rejecting blank input.
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DomainError::InvalidFieldValue {
                field: "monitor key".to_string(),
                value: format!("'{raw}'"),
                expected: "non-empty identifier".to_string(),
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Key for a specific order number.
    pub fn for_order(order_number: &str) -> Self {
        Self(format!("{ORDER_KEY_PREFIX}{order_number}"))
    }

    /// Key for the fixed monitored endpoint.
    pub fn default_endpoint() -> Self {
        Self(DEFAULT_ENDPOINT_KEY.to_string())
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MonitorKey {
    fn default() -> Self {
        Self::default_endpoint()
    }
}

impl fmt::Display for MonitorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MonitorKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MonitorKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for MonitorKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
