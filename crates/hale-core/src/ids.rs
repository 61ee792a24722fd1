//! Type-safe identifiers for conversations, request sequences, and services.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// Process-local counter folded into generated ids so two ids generated in
// the same millisecond still differ.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

// ============================================================================
// ConversationId
// ============================================================================

/// Unique identifier for one active conversation view.
///
/// Exactly one `ActivityTracker` exists per `ConversationId`; the id is also
/// sent to the workflow backend as the `sessionId` field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Creates a ConversationId from an existing string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh process-unique id.
    pub fn generate() -> Self {
        let seq = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conv-{}-{seq}", unix_millis()))
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a shortened display form (first 12 characters).
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConversationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConversationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for ConversationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// RequestToken
// ============================================================================

/// Opaque token correlating one logical backend request sequence.
///
/// A retry continuation keeps the token (and its attempt count); an explicit
/// user restart after exhaustion generates a new one, which resets the retry
/// ladder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestToken(String);

impl RequestToken {
    /// Generates a fresh token.
    pub fn generate() -> Self {
        let seq = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("req-{}-{seq}", unix_millis()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// ServiceLabel
// ============================================================================

/// Identifier for a logical backend service as reported to the
/// connection registry (e.g. "analytics", "health-tracker").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceLabel(String);

impl ServiceLabel {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ServiceLabel {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ServiceLabel {
    fn from(s: String) -> Self {
        Self(s)
    }
}
