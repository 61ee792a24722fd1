//! Error classification at the HTTP boundary.
//!
//! Two sources feed the `BackendError` variant set:
//! - transport errors from reqwest (timeouts, connect failures, statuses)
//! - free-text error strings the backend itself reports in its envelope
//!
//! Text mapping is rule-driven and replaceable at client construction, so
//! deployments with different backend wording can adjust it without
//! touching the retry coordinator.

use hale_core::BackendError;
use tracing::debug;

/// Maps a reqwest transport error to a `BackendError` variant.
pub fn classify_transport(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        return BackendError::Timeout;
    }
    if let Some(status) = err.status() {
        return classify_status(status.as_u16());
    }
    if err.is_connect() || err.is_request() {
        return BackendError::Network(err.to_string());
    }
    BackendError::Network(err.to_string())
}

/// Maps an HTTP status to a `BackendError` variant.
pub fn classify_status(status: u16) -> BackendError {
    match status {
        401 | 403 => BackendError::Auth,
        429 => BackendError::RateLimited,
        s => BackendError::Http { status: s },
    }
}

// ============================================================================
// Text classification
// ============================================================================

/// Variant produced when a text rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextCategory {
    Auth,
    RateLimited,
    Timeout,
}

impl TextCategory {
    fn into_error(self) -> BackendError {
        match self {
            Self::Auth => BackendError::Auth,
            Self::RateLimited => BackendError::RateLimited,
            Self::Timeout => BackendError::Timeout,
        }
    }
}

/// Ordered substring rules for backend-supplied error text.
///
/// First match wins; unmatched text stays `Backend(text)`, which the retry
/// coordinator treats as transient. The default table covers only wording
/// whose meaning is unambiguous.
#[derive(Debug, Clone)]
pub struct TextClassifier {
    rules: Vec<(String, TextCategory)>,
}

impl Default for TextClassifier {
    fn default() -> Self {
        Self {
            rules: vec![
                ("unauthorized".to_string(), TextCategory::Auth),
                ("forbidden".to_string(), TextCategory::Auth),
                ("invalid token".to_string(), TextCategory::Auth),
                ("rate limit".to_string(), TextCategory::RateLimited),
                ("too many requests".to_string(), TextCategory::RateLimited),
                ("timed out".to_string(), TextCategory::Timeout),
                ("timeout".to_string(), TextCategory::Timeout),
            ],
        }
    }
}

impl TextClassifier {
    /// A classifier with no rules: every error text stays `Backend(text)`.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Appends an auth rule.
    #[must_use]
    pub fn with_auth_rule(mut self, needle: impl Into<String>) -> Self {
        self.rules.push((needle.into(), TextCategory::Auth));
        self
    }

    /// Appends a rate-limit rule.
    #[must_use]
    pub fn with_rate_limit_rule(mut self, needle: impl Into<String>) -> Self {
        self.rules.push((needle.into(), TextCategory::RateLimited));
        self
    }

    /// Appends a timeout rule.
    #[must_use]
    pub fn with_timeout_rule(mut self, needle: impl Into<String>) -> Self {
        self.rules.push((needle.into(), TextCategory::Timeout));
        self
    }

    /// Classifies backend-reported error text.
    pub fn classify(&self, text: &str) -> BackendError {
        let lowered = text.to_lowercase();
        for (needle, category) in &self.rules {
            if lowered.contains(needle.as_str()) {
                debug!(needle = %needle, "Backend error text matched rule");
                return category.into_error();
            }
        }
        BackendError::Backend(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hale_core::ErrorClass;

    #[test]
    fn test_status_classification() {
        assert_eq!(classify_status(401), BackendError::Auth);
        assert_eq!(classify_status(403), BackendError::Auth);
        assert_eq!(classify_status(429), BackendError::RateLimited);
        assert_eq!(classify_status(500), BackendError::Http { status: 500 });
        assert_eq!(classify_status(404), BackendError::Http { status: 404 });
    }

    #[test]
    fn test_default_text_rules() {
        let classifier = TextClassifier::default();
        assert_eq!(classifier.classify("Unauthorized access"), BackendError::Auth);
        assert_eq!(
            classifier.classify("Rate limit exceeded, slow down"),
            BackendError::RateLimited
        );
        assert_eq!(
            classifier.classify("upstream request timed out"),
            BackendError::Timeout
        );
    }

    #[test]
    fn test_unmatched_text_stays_backend_and_transient() {
        let classifier = TextClassifier::default();
        let err = classifier.classify("workflow node failed: missing field");
        assert_eq!(
            err,
            BackendError::Backend("workflow node failed: missing field".to_string())
        );
        assert_eq!(err.class(), ErrorClass::Transient);
    }

    #[test]
    fn test_rules_are_case_insensitive() {
        let classifier = TextClassifier::default();
        assert_eq!(classifier.classify("FORBIDDEN"), BackendError::Auth);
    }

    #[test]
    fn test_custom_rules_and_order() {
        // A deployment that reports quota errors in its own words.
        let classifier = TextClassifier::empty().with_rate_limit_rule("quota exhausted");
        assert_eq!(
            classifier.classify("daily quota exhausted"),
            BackendError::RateLimited
        );
        // Default rules are gone on an empty classifier.
        assert_eq!(
            classifier.classify("unauthorized"),
            BackendError::Backend("unauthorized".to_string())
        );
    }
}
