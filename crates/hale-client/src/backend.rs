//! Typed client for the workflow-automation backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use hale_core::{BackendError, BackendResult};
use hale_wire::{WorkflowRequest, WorkflowResponse};

use crate::classify::{classify_status, classify_transport, TextClassifier};

/// The remote analytics backend, as the lifecycle engine sees it.
///
/// The retry coordinator is generic over this trait; tests substitute
/// scripted fakes.
#[async_trait]
pub trait AnalyticsBackend: Send + Sync {
    /// Sends one conversation step and returns the reply text.
    async fn send(&self, request: &WorkflowRequest) -> BackendResult<String>;
}

/// reqwest-backed implementation of [`AnalyticsBackend`].
pub struct WorkflowClient {
    endpoint: String,
    timeout: Duration,
    client: Client,
    classifier: TextClassifier,
}

impl WorkflowClient {
    /// Creates a client for `endpoint` with the default text classifier.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self::with_classifier(endpoint, timeout, TextClassifier::default())
    }

    /// Creates a client with a deployment-specific text classifier.
    pub fn with_classifier(
        endpoint: impl Into<String>,
        timeout: Duration,
        classifier: TextClassifier,
    ) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Workflow client builder failed, using default client");
                Client::new()
            });

        Self {
            endpoint: endpoint.into(),
            timeout,
            client,
            classifier,
        }
    }

    /// The backend endpoint this client POSTs to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl AnalyticsBackend for WorkflowClient {
    async fn send(&self, request: &WorkflowRequest) -> BackendResult<String> {
        debug!(
            session_id = %request.session_id,
            application_type = ?request.application_type,
            "Sending workflow request"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            warn!(
                session_id = %request.session_id,
                status = status.as_u16(),
                "Workflow request rejected"
            );
            return Err(classify_status(status.as_u16()));
        }

        let envelope: WorkflowResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        if !envelope.success {
            let text = envelope.error_text().unwrap_or("backend reported failure");
            return Err(self.classifier.classify(text));
        }

        match envelope.reply() {
            Some(reply) => Ok(reply.to_string()),
            None => {
                warn!(
                    session_id = %request.session_id,
                    "Workflow reply had no usable shape"
                );
                Err(BackendError::UnexpectedShape)
            }
        }
    }
}
