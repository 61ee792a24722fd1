//! Conversation state: the scripted-flow stage machine and per-request
//! token bookkeeping.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ids::{ConversationId, RequestToken};
use crate::message::{NoticeKind, Transcript};

// ============================================================================
// Stage
// ============================================================================

/// Step in the scripted conversation flow.
///
/// Stages advance only through explicit calls on [`Conversation`]; the
/// lifecycle engine's timeout/error paths are the usual callers besides the
/// UI itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStage {
    /// Greeting shown, waiting for the user to engage.
    Welcome,
    /// Menu of scripted options displayed.
    OptionSelect,
    /// Collecting parameters for the chosen option.
    ParameterEntry,
    /// A backend request is in flight (possibly retrying).
    InFlight,
    /// Backend reply rendered, waiting for the next action.
    ShowingResult,
    /// Terminal. Reached by explicit end, inactivity, or permanent failure.
    Ended,
}

impl ConversationStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended)
    }
}

impl fmt::Display for ConversationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Welcome => "welcome",
            Self::OptionSelect => "option-select",
            Self::ParameterEntry => "parameter-entry",
            Self::InFlight => "in-flight",
            Self::ShowingResult => "showing-result",
            Self::Ended => "ended",
        };
        write!(f, "{s}")
    }
}

/// Why a conversation reached [`ConversationStage::Ended`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// User explicitly ended or cancelled the conversation.
    Explicit,
    /// Inactivity timeout fired.
    Inactivity,
    /// Retry ladder exhausted; backend unavailable.
    ServiceUnavailable,
    /// Backend rejected authentication.
    AuthRejected,
}

impl EndReason {
    /// The notice category posted when the conversation ends for this reason.
    pub fn notice_kind(&self) -> NoticeKind {
        match self {
            Self::Explicit | Self::Inactivity => NoticeKind::SessionEnded,
            Self::ServiceUnavailable => NoticeKind::ServiceUnavailable,
            Self::AuthRejected => NoticeKind::AuthRejected,
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Explicit => write!(f, "ended by user"),
            Self::Inactivity => write!(f, "ended due to inactivity"),
            Self::ServiceUnavailable => write!(f, "service unavailable"),
            Self::AuthRejected => write!(f, "authentication rejected"),
        }
    }
}

// ============================================================================
// Conversation
// ============================================================================

/// State for one conversation: stage, transcript, and the token correlating
/// the current backend request sequence.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: ConversationId,
    stage: ConversationStage,
    pub transcript: Transcript,
    token: RequestToken,
}

impl Conversation {
    pub fn new(id: ConversationId) -> Self {
        Self {
            id,
            stage: ConversationStage::Welcome,
            transcript: Transcript::new(),
            token: RequestToken::generate(),
        }
    }

    pub fn stage(&self) -> ConversationStage {
        self.stage
    }

    /// Token correlating the current request sequence.
    pub fn token(&self) -> &RequestToken {
        &self.token
    }

    /// Advances to the option menu.
    pub fn show_options(&mut self) {
        self.set_stage(ConversationStage::OptionSelect);
    }

    /// Advances to parameter collection.
    pub fn collect_parameters(&mut self) {
        self.set_stage(ConversationStage::ParameterEntry);
    }

    /// Marks a backend request as in flight.
    pub fn begin_request(&mut self) {
        self.set_stage(ConversationStage::InFlight);
    }

    /// Marks the in-flight request as answered.
    pub fn complete_request(&mut self) {
        self.set_stage(ConversationStage::ShowingResult);
    }

    /// Ends the conversation, posting the matching notice.
    ///
    /// Ending an already-ended conversation is a no-op, so the terminal
    /// notice can never be posted twice.
    pub fn end(&mut self, reason: EndReason, notice_text: impl Into<String>) {
        if self.stage.is_terminal() {
            debug!(id = %self.id, "Conversation already ended, ignoring");
            return;
        }
        self.transcript
            .push_notice(reason.notice_kind(), notice_text.into());
        self.set_stage(ConversationStage::Ended);
    }

    /// Starts a fresh request sequence after exhaustion or an explicit user
    /// restart. Regenerates the request token; the retry ladder downstream
    /// keys its attempt count off the token, so this resets it.
    pub fn restart(&mut self) {
        self.token = RequestToken::generate();
        self.set_stage(ConversationStage::OptionSelect);
    }

    fn set_stage(&mut self, next: ConversationStage) {
        if self.stage != next {
            debug!(id = %self.id, from = %self.stage, to = %next, "Stage transition");
            self.stage = next;
        }
    }
}
