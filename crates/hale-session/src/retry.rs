//! Request retry with exponential backoff.
//!
//! Wraps one backend call per conversation step. Transient failures climb
//! the backoff ladder, replacing (never stacking) the "retrying" notice in
//! the transcript; fatal failures and exhaustion end the conversation with
//! exactly one terminal notice.

use std::sync::Arc;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hale_client::AnalyticsBackend;
use hale_core::{
    BackendError, Conversation, EndReason, ErrorClass, NoticeKind, RequestToken, RetryPolicy,
    ServiceLabel,
};
use hale_wire::WorkflowRequest;

use crate::registry::ConnectionRegistry;

/// Terminal result of one request sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    /// The backend answered; the reply was appended to the transcript.
    Success(String),

    /// Every scheduled retry failed. The conversation was ended with a
    /// service-unavailable notice.
    Exhausted,

    /// The backend rejected authentication. No retries were scheduled.
    AuthRejected,

    /// The reply decoded but had no usable shape. One processing notice
    /// was posted; the conversation continues.
    SoftFailure,

    /// The caller cancelled while a request or retry was pending.
    Cancelled,
}

/// Backoff state machine for one logical request sequence.
///
/// The attempt counter is keyed to the conversation's request token: a
/// continuation of the same sequence preserves it, a fresh token (new
/// top-level request, or an explicit restart after exhaustion) resets it.
pub struct RetryCoordinator {
    policy: RetryPolicy,
    backend: Arc<dyn AnalyticsBackend>,
    cancel: CancellationToken,
    registry: Option<ConnectionRegistry>,
    attempt: u32,
    token: Option<RequestToken>,
}

impl RetryCoordinator {
    pub fn new(
        policy: RetryPolicy,
        backend: Arc<dyn AnalyticsBackend>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            policy,
            backend,
            cancel,
            registry: None,
            attempt: 0,
            token: None,
        }
    }

    /// Reports exhaustion to the connection registry under the request's
    /// service label.
    #[must_use]
    pub fn with_registry(mut self, registry: ConnectionRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Retries consumed in the current sequence.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Runs one request to completion: success, soft failure, exhaustion,
    /// auth rejection, or cancellation.
    pub async fn run(
        &mut self,
        request: &WorkflowRequest,
        conversation: &mut Conversation,
    ) -> RetryOutcome {
        self.sync_token(conversation.token());
        conversation.begin_request();

        loop {
            if self.cancel.is_cancelled() {
                conversation.transcript.retract_retry_notices();
                return RetryOutcome::Cancelled;
            }

            match self.backend.send(request).await {
                Ok(reply) => {
                    conversation.transcript.retract_retry_notices();
                    conversation.transcript.push_assistant(reply.clone());
                    conversation.complete_request();
                    info!(
                        session_id = %request.session_id,
                        attempts = self.attempt,
                        "Request succeeded"
                    );
                    return RetryOutcome::Success(reply);
                }

                Err(BackendError::UnexpectedShape) => {
                    conversation.transcript.retract_retry_notices();
                    conversation.transcript.push_notice(
                        NoticeKind::ProcessingFailed,
                        "Sorry, I couldn't process that reply. Please try again.",
                    );
                    conversation.complete_request();
                    warn!(session_id = %request.session_id, "Unusable reply shape");
                    return RetryOutcome::SoftFailure;
                }

                Err(BackendError::Cancelled) => {
                    conversation.transcript.retract_retry_notices();
                    return RetryOutcome::Cancelled;
                }

                Err(err) if err.class() == ErrorClass::Fatal => {
                    conversation.transcript.retract_retry_notices();
                    conversation.end(
                        EndReason::AuthRejected,
                        "Your session is no longer authorized. Please sign in again.",
                    );
                    warn!(
                        session_id = %request.session_id,
                        error = %err,
                        "Fatal backend error, no retry"
                    );
                    return RetryOutcome::AuthRejected;
                }

                Err(err) => {
                    self.attempt = self.attempt.saturating_add(1);
                    if self.attempt > self.policy.max_attempts {
                        return self.give_up(request, conversation, &err);
                    }
                    if !self.schedule_retry(conversation, &err).await {
                        conversation.transcript.retract_retry_notices();
                        return RetryOutcome::Cancelled;
                    }
                }
            }
        }
    }

    /// Posts the retry notice and waits out the backoff delay.
    ///
    /// Returns `false` when cancelled mid-wait. The single pending timer
    /// lives entirely inside this await, so cancelling the token clears it.
    async fn schedule_retry(&self, conversation: &mut Conversation, err: &BackendError) -> bool {
        let delay = match err.class() {
            ErrorClass::RateLimited => self.policy.rate_limited_delay_for(self.attempt),
            _ => self.policy.delay_for(self.attempt),
        };

        warn!(
            attempt = self.attempt,
            max_attempts = self.policy.max_attempts,
            delay_secs = delay.as_secs(),
            class = ?err.class(),
            error = %err,
            "Transient failure, scheduling retry"
        );

        conversation.transcript.retract_retry_notices();
        conversation.transcript.push_notice(
            NoticeKind::Retrying,
            format!(
                "Retrying in {}s (attempt {} of {})",
                delay.as_secs(),
                self.attempt,
                self.policy.max_attempts
            ),
        );

        tokio::select! {
            _ = self.cancel.cancelled() => {
                debug!("Retry cancelled while scheduled");
                false
            }
            _ = sleep(delay) => true,
        }
    }

    /// Exhaustion: one terminal notice, conversation ended, service marked
    /// unavailable.
    fn give_up(
        &self,
        request: &WorkflowRequest,
        conversation: &mut Conversation,
        err: &BackendError,
    ) -> RetryOutcome {
        warn!(
            session_id = %request.session_id,
            attempts = self.policy.max_attempts,
            error = %err,
            "Retries exhausted, giving up"
        );

        if let Some(registry) = &self.registry {
            let label = ServiceLabel::new(request.application_type.service_label());
            registry.set_status(&label, false);
        }

        conversation.transcript.retract_retry_notices();
        conversation.end(
            EndReason::ServiceUnavailable,
            "The service is unavailable right now. Please try again later.",
        );
        RetryOutcome::Exhausted
    }

    fn sync_token(&mut self, token: &RequestToken) {
        if self.token.as_ref() != Some(token) {
            debug!("New request sequence, resetting attempt counter");
            self.attempt = 0;
            self.token = Some(token.clone());
        }
    }
}
