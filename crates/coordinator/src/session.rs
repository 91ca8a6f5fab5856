//! Chat session state
//!
//! Everything that changes while a conversation is being chatted in lives
//! on one `ChatSession`. The transition function owns all writes; the actor
//! publishes `SessionSnapshot`s for renderers.

use tandem_protocol::Variant;
use thiserror::Error;

use crate::config::TimerCancelPolicy;
use crate::generation::GenerationRequest;
use crate::recovery::RecoveryManager;
use crate::settings::SessionParams;
use crate::timeline::{SubmissionId, Timeline, TimelineMessage};

/// Rejections raised before any side effect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("Message content is empty")]
    EmptyContent,

    #[error("No active conversation")]
    NoConversation,

    #[error("A submission is still in flight")]
    SubmissionInFlight,

    #[error("Session has stopped")]
    SessionClosed,
}

/// The single user-facing error object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibleError {
    pub message: String,
    pub provider_used: Option<String>,
}

/// Where the per-submission fallback timer stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerPhase {
    NotArmed,
    Armed,
    Cancelled,
    Fired,
}

/// One user submission and the requests it fanned out to.
#[derive(Debug, Clone)]
pub struct Submission {
    pub id: SubmissionId,
    pub conversation_id: String,
    pub text: String,
    pub params: SessionParams,
    pub requests: Vec<GenerationRequest>,
    pub timer: TimerPhase,
    /// Set once a fallback exchange has confirmed the optimistic user entry.
    pub user_confirmed: bool,
    pub retry: bool,
}

impl Submission {
    pub fn request_mut(&mut self, variant: Variant) -> Option<&mut GenerationRequest> {
        self.requests.iter_mut().find(|r| r.variant == variant)
    }

    pub fn is_resolved(&self) -> bool {
        self.requests.iter().all(GenerationRequest::is_resolved)
    }
}

#[derive(Debug, Clone)]
pub struct ChatSession {
    pub conversation_id: Option<String>,
    pub timeline: Timeline,
    pub submission: Option<Submission>,
    pub recovery: RecoveryManager,
    pub error: Option<VisibleError>,
    /// Text handed back to the input field after a failure.
    pub draft: Option<String>,
    pub next_submission: SubmissionId,
    pub timer_cancel: TimerCancelPolicy,
}

impl Default for ChatSession {
    fn default() -> Self {
        Self {
            conversation_id: None,
            timeline: Timeline::new(),
            submission: None,
            recovery: RecoveryManager::default(),
            error: None,
            draft: None,
            next_submission: 1,
            timer_cancel: TimerCancelPolicy::default(),
        }
    }
}

impl ChatSession {
    pub fn new(conversation_id: Option<String>, timer_cancel: TimerCancelPolicy) -> Self {
        Self {
            conversation_id,
            timer_cancel,
            ..Default::default()
        }
    }

    pub fn in_flight(&self) -> bool {
        self.submission.is_some()
    }

    pub fn validate_submission(&self, text: &str) -> Result<(), SubmitError> {
        if text.trim().is_empty() {
            return Err(SubmitError::EmptyContent);
        }
        if self.conversation_id.is_none() {
            return Err(SubmitError::NoConversation);
        }
        if self.in_flight() {
            return Err(SubmitError::SubmissionInFlight);
        }
        Ok(())
    }

    pub fn can_retry(&self) -> bool {
        !self.in_flight() && self.recovery.has_record()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            conversation_id: self.conversation_id.clone(),
            messages: self.timeline.messages().to_vec(),
            in_flight: self.in_flight(),
            error: self.error.clone(),
            can_retry: self.can_retry(),
            draft: self.draft.clone(),
        }
    }
}

/// Read-only view for renderers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub conversation_id: Option<String>,
    pub messages: Vec<TimelineMessage>,
    pub in_flight: bool,
    pub error: Option<VisibleError>,
    pub can_retry: bool,
    pub draft: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_order() {
        let mut session = ChatSession::default();
        assert_eq!(
            session.validate_submission("   \n"),
            Err(SubmitError::EmptyContent)
        );
        assert_eq!(
            session.validate_submission("hi"),
            Err(SubmitError::NoConversation)
        );

        session.conversation_id = Some("1".to_string());
        assert_eq!(session.validate_submission("hi"), Ok(()));

        session.submission = Some(Submission {
            id: 1,
            conversation_id: "1".to_string(),
            text: "hi".to_string(),
            params: SessionParams::default(),
            requests: Vec::new(),
            timer: TimerPhase::NotArmed,
            user_confirmed: false,
            retry: false,
        });
        assert_eq!(
            session.validate_submission("again"),
            Err(SubmitError::SubmissionInFlight)
        );
        assert!(session.snapshot().in_flight);
    }
}
