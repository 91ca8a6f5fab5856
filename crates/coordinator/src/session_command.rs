//! Commands sent to a session actor by its handle.

use tandem_protocol::MessageRecord;
use tokio::sync::oneshot;

use crate::session::SubmitError;
use crate::settings::SessionParams;
use crate::timeline::SubmissionId;

pub enum SessionCommand {
    Submit {
        text: String,
        params: SessionParams,
        reply: oneshot::Sender<Result<SubmissionId, SubmitError>>,
    },
    /// Replies whether a failure record was replayed.
    Retry {
        reply: oneshot::Sender<bool>,
    },
    DismissError,
    /// Switch conversations; refused (false) while a submission is in flight.
    SetConversation {
        conversation_id: String,
        history: Vec<MessageRecord>,
        reply: oneshot::Sender<bool>,
    },
    Shutdown,
}
