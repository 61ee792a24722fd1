//! Integration tests for the request-retry flow driving a full
//! conversation: stage transitions, transcript invariants, and registry
//! fallout, end to end.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - this is allowed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use hale_client::AnalyticsBackend;
use hale_core::{
    BackendError, BackendResult, Conversation, ConversationId, ConversationStage, MessageRole,
    NoticeKind, RetryPolicy,
};
use hale_session::{ConnectionRegistry, RetryCoordinator, RetryOutcome};
use hale_wire::WorkflowRequest;

// ============================================================================
// Test Helpers
// ============================================================================

struct ScriptedBackend {
    script: Mutex<Vec<BackendResult<String>>>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    fn new(script: Vec<BackendResult<String>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalyticsBackend for ScriptedBackend {
    async fn send(&self, _request: &WorkflowRequest) -> BackendResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            script.remove(0)
        } else {
            script.first().cloned().unwrap_or(Ok("ok".to_string()))
        }
    }
}

fn request_for(conversation: &Conversation) -> WorkflowRequest {
    WorkflowRequest::analytics(
        conversation.id.clone(),
        "HC-42",
        "Harborview Clinic",
        6,
        "monthly utilisation report",
    )
}

fn scripted_conversation() -> Conversation {
    let mut conversation = Conversation::new(ConversationId::new("conv-flow"));
    conversation.transcript.push_assistant("Welcome to Hale. What would you like to see?");
    conversation.show_options();
    conversation.transcript.push_user("1");
    conversation.collect_parameters();
    conversation.transcript.push_user("last 6 months");
    conversation
}

// ============================================================================
// Flows
// ============================================================================

#[tokio::test(start_paused = true)]
async fn outage_mid_conversation_then_recovery() {
    let backend = ScriptedBackend::new(vec![
        Err(BackendError::Network("connection refused".to_string())),
        Err(BackendError::Timeout),
        Ok("Utilisation was 78% across 6 months.".to_string()),
    ]);
    let mut coordinator = RetryCoordinator::new(
        RetryPolicy::default(),
        backend.clone(),
        CancellationToken::new(),
    );
    let mut conversation = scripted_conversation();

    let outcome = coordinator
        .run(&request_for(&conversation), &mut conversation)
        .await;

    assert_eq!(
        outcome,
        RetryOutcome::Success("Utilisation was 78% across 6 months.".to_string())
    );
    assert_eq!(backend.calls(), 3);
    assert_eq!(conversation.stage(), ConversationStage::ShowingResult);

    // No retry residue; the reply landed as the final assistant message.
    assert_eq!(conversation.transcript.notice_count(NoticeKind::Retrying), 0);
    let last = conversation.transcript.last().expect("messages");
    assert_eq!(last.role, MessageRole::Assistant);
    assert!(last.content.contains("78%"));
}

#[tokio::test(start_paused = true)]
async fn exhaustion_ends_conversation_with_single_notice() {
    let backend = ScriptedBackend::new(vec![Err(BackendError::Network(
        "connection refused".to_string(),
    ))]);
    let registry = ConnectionRegistry::new();
    let mut coordinator = RetryCoordinator::new(
        RetryPolicy::default(),
        backend.clone(),
        CancellationToken::new(),
    )
    .with_registry(registry.clone());
    let mut conversation = scripted_conversation();

    let outcome = coordinator
        .run(&request_for(&conversation), &mut conversation)
        .await;

    assert_eq!(outcome, RetryOutcome::Exhausted);
    assert_eq!(backend.calls(), 4, "initial attempt plus three retries");
    assert_eq!(conversation.stage(), ConversationStage::Ended);

    // Exactly one terminal notice, zero lingering retry notices.
    assert_eq!(
        conversation
            .transcript
            .notice_count(NoticeKind::ServiceUnavailable),
        1
    );
    assert_eq!(conversation.transcript.notice_count(NoticeKind::Retrying), 0);

    // The registry learned about the dead service.
    assert!(!registry.is_connected());
    assert_eq!(
        registry
            .snapshot()
            .failed_services
            .first()
            .map(|l| l.as_str()),
        Some("analytics")
    );
}

#[tokio::test(start_paused = true)]
async fn restart_after_exhaustion_gets_fresh_ladder() {
    let backend = ScriptedBackend::new(vec![
        // First sequence: four transient failures -> exhausted.
        Err(BackendError::Timeout),
        Err(BackendError::Timeout),
        Err(BackendError::Timeout),
        Err(BackendError::Timeout),
        // Second sequence succeeds immediately.
        Ok("Back online.".to_string()),
    ]);
    let mut coordinator = RetryCoordinator::new(
        RetryPolicy::default(),
        backend.clone(),
        CancellationToken::new(),
    );
    let mut conversation = scripted_conversation();

    let first = coordinator
        .run(&request_for(&conversation), &mut conversation)
        .await;
    assert_eq!(first, RetryOutcome::Exhausted);

    // User explicitly restarts: new token, attempt counter back to zero.
    conversation.restart();
    conversation.begin_request();
    let second = coordinator
        .run(&request_for(&conversation), &mut conversation)
        .await;

    assert_eq!(second, RetryOutcome::Success("Back online.".to_string()));
    assert_eq!(backend.calls(), 5);
    assert_eq!(conversation.stage(), ConversationStage::ShowingResult);
}

#[tokio::test]
async fn auth_rejection_is_immediate_and_terminal() {
    let backend = ScriptedBackend::new(vec![Err(BackendError::Auth)]);
    let mut coordinator = RetryCoordinator::new(
        RetryPolicy::default(),
        backend.clone(),
        CancellationToken::new(),
    );
    let mut conversation = scripted_conversation();

    let start = std::time::Instant::now();
    let outcome = coordinator
        .run(&request_for(&conversation), &mut conversation)
        .await;

    assert_eq!(outcome, RetryOutcome::AuthRejected);
    assert_eq!(backend.calls(), 1, "no retries for auth failures");
    assert!(start.elapsed() < Duration::from_secs(1), "no backoff wait");
    assert_eq!(conversation.stage(), ConversationStage::Ended);
    assert_eq!(
        conversation.transcript.notice_count(NoticeKind::AuthRejected),
        1
    );
}

#[tokio::test]
async fn soft_failure_keeps_conversation_usable() {
    let backend = ScriptedBackend::new(vec![
        Err(BackendError::UnexpectedShape),
        Ok("Readable this time.".to_string()),
    ]);
    let mut coordinator = RetryCoordinator::new(
        RetryPolicy::default(),
        backend.clone(),
        CancellationToken::new(),
    );
    let mut conversation = scripted_conversation();

    let first = coordinator
        .run(&request_for(&conversation), &mut conversation)
        .await;
    assert_eq!(first, RetryOutcome::SoftFailure);
    assert_ne!(conversation.stage(), ConversationStage::Ended);

    // The user simply tries again within the same conversation.
    conversation.transcript.push_user("try again please");
    let second = coordinator
        .run(&request_for(&conversation), &mut conversation)
        .await;

    assert_eq!(second, RetryOutcome::Success("Readable this time.".to_string()));
    assert_eq!(
        conversation
            .transcript
            .notice_count(NoticeKind::ProcessingFailed),
        1
    );
}
