//! Conversation transcript: the append-only message log and its
//! notice-deduplication invariants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

// ============================================================================
// Roles and notice categories
// ============================================================================

/// Who produced a transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    /// Lifecycle notices injected by the engine (connection, retry, timeout).
    System,
}

/// Category tag carried by system notices.
///
/// Deduplication operates per category: a notice is suppressed only when the
/// immediately preceding transcript entry is a notice of the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    /// Backend became unreachable.
    ConnectionLost,
    /// Backend reachable again after an outage.
    ConnectionRestored,
    /// A retry has been scheduled ("retrying in Ns ...").
    Retrying,
    /// Retry ladder exhausted; the service is unavailable.
    ServiceUnavailable,
    /// Authentication/authorization rejected by the backend.
    AuthRejected,
    /// Backend answered but the reply could not be used.
    ProcessingFailed,
    /// Conversation ended (inactivity, explicit end).
    SessionEnded,
}

// ============================================================================
// ChatMessage
// ============================================================================

/// One entry in a conversation transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Monotonically increasing id, never reused within a transcript.
    pub id: u64,

    pub role: MessageRole,

    pub content: String,

    /// Set for system notices; `None` for user/assistant messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<NoticeKind>,

    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Returns true if this message is a system notice of the given kind.
    pub fn is_notice(&self, kind: NoticeKind) -> bool {
        self.notice == Some(kind)
    }
}

// ============================================================================
// Transcript
// ============================================================================

/// Append-only ordered message log for one conversation.
///
/// The engine never removes user or assistant messages. The only permitted
/// mutations beyond appending are the notice invariants:
///
/// - adjacent same-kind notices are collapsed (the new one is suppressed)
/// - `Retrying` notices are retracted before a replacement is posted, so
///   retry notices never stack
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
    next_id: u64,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a user message. User messages are never suppressed.
    pub fn push_user(&mut self, content: impl Into<String>) -> u64 {
        self.push(MessageRole::User, content.into(), None)
    }

    /// Appends an assistant message. Assistant messages are never suppressed.
    pub fn push_assistant(&mut self, content: impl Into<String>) -> u64 {
        self.push(MessageRole::Assistant, content.into(), None)
    }

    /// Appends a system notice unless the immediately preceding message is a
    /// notice of the same kind.
    ///
    /// Returns `true` when the notice was appended, `false` when it was
    /// suppressed by the deduplication rule.
    pub fn push_notice(&mut self, kind: NoticeKind, content: impl Into<String>) -> bool {
        if let Some(last) = self.messages.last() {
            if last.is_notice(kind) {
                debug!(kind = ?kind, "Suppressing duplicate adjacent notice");
                return false;
            }
        }
        self.push(MessageRole::System, content.into(), Some(kind));
        true
    }

    /// Removes every `Retrying` notice from the log.
    ///
    /// Called before posting a replacement retry notice and before posting a
    /// terminal failure, so stale "retrying in Ns" lines never linger.
    /// Returns the number of notices removed.
    pub fn retract_retry_notices(&mut self) -> usize {
        let before = self.messages.len();
        self.messages.retain(|m| !m.is_notice(NoticeKind::Retrying));
        before - self.messages.len()
    }

    fn push(&mut self, role: MessageRole, content: String, notice: Option<NoticeKind>) -> u64 {
        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);
        self.messages.push(ChatMessage {
            id,
            role,
            content,
            notice,
            timestamp: Utc::now(),
        });
        id
    }

    /// Returns the messages in order.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Returns the most recent message, if any.
    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Counts notices of the given kind currently in the log.
    pub fn notice_count(&self, kind: NoticeKind) -> usize {
        self.messages.iter().filter(|m| m.is_notice(kind)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_and_assistant_never_suppressed() {
        let mut t = Transcript::new();
        t.push_user("hello");
        t.push_user("hello");
        t.push_assistant("hi");
        t.push_assistant("hi");
        assert_eq!(t.len(), 4);
    }

    #[test]
    fn test_adjacent_same_kind_notice_suppressed() {
        let mut t = Transcript::new();
        assert!(t.push_notice(NoticeKind::ConnectionLost, "connection lost"));
        assert!(!t.push_notice(NoticeKind::ConnectionLost, "connection lost"));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_different_kind_notice_not_suppressed() {
        let mut t = Transcript::new();
        assert!(t.push_notice(NoticeKind::ConnectionLost, "connection lost"));
        assert!(t.push_notice(NoticeKind::ConnectionRestored, "connection restored"));
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_notice_allowed_after_intervening_message() {
        let mut t = Transcript::new();
        assert!(t.push_notice(NoticeKind::ConnectionLost, "connection lost"));
        t.push_user("still there?");
        // Same kind, but no longer adjacent to the previous notice.
        assert!(t.push_notice(NoticeKind::ConnectionLost, "connection lost"));
        assert_eq!(t.notice_count(NoticeKind::ConnectionLost), 2);
    }

    #[test]
    fn test_retract_retry_notices() {
        let mut t = Transcript::new();
        t.push_user("run report");
        t.push_notice(NoticeKind::Retrying, "retrying in 2s (attempt 1 of 3)");
        t.push_user("hm");
        t.push_notice(NoticeKind::Retrying, "retrying in 2s (attempt 2 of 3)");

        let removed = t.retract_retry_notices();
        assert_eq!(removed, 2);
        assert_eq!(t.notice_count(NoticeKind::Retrying), 0);
        // Non-retry content untouched
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_retry_notices_never_stack() {
        let mut t = Transcript::new();
        for attempt in 1..=3 {
            t.retract_retry_notices();
            t.push_notice(
                NoticeKind::Retrying,
                format!("retrying in 2s (attempt {attempt} of 3)"),
            );
        }
        assert_eq!(t.notice_count(NoticeKind::Retrying), 1);
    }

    #[test]
    fn test_ids_monotonic_across_retraction() {
        let mut t = Transcript::new();
        let a = t.push_user("one");
        t.push_notice(NoticeKind::Retrying, "retrying");
        t.retract_retry_notices();
        let b = t.push_user("two");
        // The retracted notice's id (1) is not reused.
        assert_eq!(a, 0);
        assert_eq!(b, 2);
        assert_eq!(t.messages().len(), 2);
    }

    #[test]
    fn test_suppressed_notice_returns_false_and_keeps_log() {
        let mut t = Transcript::new();
        t.push_notice(NoticeKind::ServiceUnavailable, "service unavailable");
        let appended = t.push_notice(NoticeKind::ServiceUnavailable, "service unavailable");
        assert!(!appended);
        assert_eq!(t.notice_count(NoticeKind::ServiceUnavailable), 1);
    }
}
