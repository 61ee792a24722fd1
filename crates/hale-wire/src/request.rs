//! Request payload for the workflow backend.

use hale_core::ConversationId;
use serde::{Deserialize, Serialize};

/// Which assistant flow a request belongs to.
///
/// The backend routes the message to a different workflow per type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ApplicationType {
    Analytics,
    HealthTracker,
}

impl ApplicationType {
    /// Label used when reporting connectivity for this flow.
    pub fn service_label(&self) -> &'static str {
        match self {
            Self::Analytics => "analytics",
            Self::HealthTracker => "health-tracker",
        }
    }
}

/// JSON body POSTed to the workflow backend.
///
/// Field names are camelCase on the wire; the backend contract predates this
/// client and is not negotiable here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRequest {
    /// Conversation this request belongs to.
    pub session_id: ConversationId,

    /// Identifier of the requesting health centre.
    pub centre_id: String,

    /// Display name of the requesting health centre.
    pub centre_name: String,

    /// Reporting window requested, in months.
    pub duration_months: u32,

    /// The user's message for this conversation step.
    pub message: String,

    pub application_type: ApplicationType,

    /// Set only for NGO-operated centres; omitted otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_ngo: Option<bool>,
}

impl WorkflowRequest {
    /// Creates an analytics-flow request.
    pub fn analytics(
        session_id: ConversationId,
        centre_id: impl Into<String>,
        centre_name: impl Into<String>,
        duration_months: u32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            session_id,
            centre_id: centre_id.into(),
            centre_name: centre_name.into(),
            duration_months,
            message: message.into(),
            application_type: ApplicationType::Analytics,
            is_ngo: None,
        }
    }

    /// Creates a health-tracker-flow request.
    pub fn health_tracker(
        session_id: ConversationId,
        centre_id: impl Into<String>,
        centre_name: impl Into<String>,
        duration_months: u32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            session_id,
            centre_id: centre_id.into(),
            centre_name: centre_name.into(),
            duration_months,
            message: message.into(),
            application_type: ApplicationType::HealthTracker,
            is_ngo: None,
        }
    }

    /// Marks the requesting centre as NGO-operated.
    #[must_use]
    pub fn with_ngo(mut self, is_ngo: bool) -> Self {
        self.is_ngo = Some(is_ngo);
        self
    }
}
