//! Generation requests
//!
//! One request per variant per submission, tracking which transport ended
//! up carrying it.

use tandem_protocol::{ClientFrame, GenerateBody, GenerationParams, Variant};

use crate::settings::SessionParams;
use crate::timeline::SubmissionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Pending,
    Dispatched,
    Streaming,
    Complete,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Channel,
    Fallback,
    Unresolved,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub request_id: String,
    pub variant: Variant,
    pub conversation_id: String,
    pub params: GenerationParams,
    pub status: RequestStatus,
    pub transport: Transport,
}

impl GenerationRequest {
    /// `request_id` is a per-submission token such as `A-3`.
    pub fn for_variant(
        variant: Variant,
        submission: SubmissionId,
        conversation_id: &str,
        params: &SessionParams,
    ) -> Self {
        Self {
            request_id: variant.request_token(submission),
            variant,
            conversation_id: conversation_id.to_string(),
            params: params.params_for(variant),
            status: RequestStatus::Pending,
            transport: Transport::Unresolved,
        }
    }

    pub fn frame(&self, content: &str) -> ClientFrame {
        ClientFrame::Generate {
            request_id: self.request_id.clone(),
            content: content.to_string(),
            params: self.params.clone(),
        }
    }

    pub fn body(&self, content: &str) -> GenerateBody {
        GenerateBody {
            content: content.to_string(),
            params: self.params.clone(),
        }
    }

    pub fn dispatch(&mut self, transport: Transport) {
        self.transport = transport;
        self.status = RequestStatus::Dispatched;
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.status, RequestStatus::Complete | RequestStatus::Failed)
    }

    /// Dispatched over the channel and still waiting for stream-start.
    pub fn awaiting_start(&self) -> bool {
        self.transport == Transport::Channel && self.status == RequestStatus::Dispatched
    }

    /// Channel request that has produced stream-start (whether or not it finished).
    pub fn has_started(&self) -> bool {
        self.transport == Transport::Channel
            && matches!(
                self.status,
                RequestStatus::Streaming | RequestStatus::Complete | RequestStatus::Failed
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::CompareSettings;

    #[test]
    fn frame_and_body_carry_variant_params() {
        let params = SessionParams {
            chat: GenerationParams {
                model: Some("base".to_string()),
                ..Default::default()
            },
            compare: CompareSettings {
                enabled: true,
                compare_model: Some("other".to_string()),
            },
        };
        let request = GenerationRequest::for_variant(Variant::B, 4, "5", &params);

        assert_eq!(request.request_id, "B-4");
        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(request.transport, Transport::Unresolved);

        match request.frame("hi") {
            ClientFrame::Generate {
                request_id,
                content,
                params,
            } => {
                assert_eq!(request_id, "B-4");
                assert_eq!(content, "hi");
                assert_eq!(params.model.as_deref(), Some("other"));
            }
        }
        assert_eq!(request.body("hi").params.model.as_deref(), Some("other"));
    }

    #[test]
    fn lifecycle_predicates() {
        let mut request =
            GenerationRequest::for_variant(Variant::A, 1, "5", &SessionParams::default());
        request.dispatch(Transport::Channel);
        assert!(request.awaiting_start());
        assert!(!request.has_started());

        request.status = RequestStatus::Streaming;
        assert!(request.has_started());
        assert!(!request.is_resolved());

        request.status = RequestStatus::Complete;
        assert!(request.is_resolved());

        let mut fallback =
            GenerationRequest::for_variant(Variant::A, 1, "5", &SessionParams::default());
        fallback.dispatch(Transport::Fallback);
        assert!(!fallback.awaiting_start());
        assert!(!fallback.has_started());
    }
}
