//! Response envelope from the workflow backend.
//!
//! The backend is loose about its reply payload: `data` may be a bare
//! string, an object with an `output` field, or (observed in the wild)
//! something else entirely. Anything unusable normalizes to `None` so the
//! caller can degrade to a soft failure instead of crashing the flow.

use serde::{Deserialize, Serialize};

/// The `data` field of a successful response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReplyData {
    /// Bare reply string.
    Text(String),

    /// Object form: `{"output": "..."}`.
    Structured { output: String },

    /// Anything else the backend decided to send.
    Other(serde_json::Value),
}

impl ReplyData {
    /// The usable reply text, if this shape carries one.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Structured { output } => Some(output),
            Self::Other(_) => None,
        }
    }
}

/// Envelope for every workflow backend response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResponse {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ReplyData>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowResponse {
    /// The reply text of a successful response.
    ///
    /// `None` means the response was unsuccessful or the payload had no
    /// usable shape; the caller decides whether that is a soft failure.
    pub fn reply(&self) -> Option<&str> {
        if !self.success {
            return None;
        }
        self.data.as_ref().and_then(ReplyData::as_text)
    }

    /// The backend's error text, if it reported failure.
    pub fn error_text(&self) -> Option<&str> {
        self.error.as_deref()
    }
}
