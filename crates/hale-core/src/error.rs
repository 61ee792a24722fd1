//! Backend error taxonomy.
//!
//! Errors are classified into a closed variant set at the boundary where
//! they originate (the HTTP client); everything downstream - the retry
//! coordinator in particular - switches on variants, never on message text.

use thiserror::Error;

/// Errors surfaced by the workflow backend boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The request or probe exceeded its deadline.
    #[error("request timed out")]
    Timeout,

    /// Transport-level failure (refused, reset, DNS).
    #[error("network error: {0}")]
    Network(String),

    /// Non-success HTTP status outside the specifically-mapped ones.
    #[error("backend returned HTTP {status}")]
    Http { status: u16 },

    /// Authentication or authorization rejected. Never retried.
    #[error("authentication rejected")]
    Auth,

    /// Backend signalled rate limiting (429 or an explicit error message).
    #[error("rate limited")]
    RateLimited,

    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,

    /// Response decoded but the reply payload had no usable shape.
    /// Treated as a soft failure: the conversation continues.
    #[error("backend reply had an unexpected shape")]
    UnexpectedShape,

    /// Backend reported failure with free-text detail that matched no
    /// specific classification rule.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Retry classification for a [`BackendError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retryable through the standard backoff ladder.
    Transient,
    /// Retryable, but with the longer rate-limit cooldown floor.
    RateLimited,
    /// Not retryable; escalate immediately.
    Fatal,
}

impl BackendError {
    /// Maps the variant to its retry class.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Timeout | Self::Network(_) | Self::Backend(_) => ErrorClass::Transient,
            Self::Http { status } => match status {
                401 | 403 => ErrorClass::Fatal,
                429 => ErrorClass::RateLimited,
                _ => ErrorClass::Transient,
            },
            Self::RateLimited => ErrorClass::RateLimited,
            Self::Auth | Self::Cancelled => ErrorClass::Fatal,
            // Soft failure: handled before the retry ladder is consulted,
            // but classified Fatal so a misrouted one cannot loop.
            Self::UnexpectedShape => ErrorClass::Fatal,
        }
    }

    /// True when the error may be retried (either class of retryable).
    pub fn is_retryable(&self) -> bool {
        !matches!(self.class(), ErrorClass::Fatal)
    }
}

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;
