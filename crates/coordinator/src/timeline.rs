//! Timeline store
//!
//! The ordered message sequence of one conversation. Mutations never
//! reorder entries; the coordinator is the only writer and renderers read
//! cloned snapshots.

use tandem_protocol::{new_id, MessageRecord, Role, Variant};

/// Monotonic id of one user submission within a session.
pub type SubmissionId = u64;

/// Client-assigned id before confirmation, server id after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageId {
    Temporary(String),
    Persisted(i64),
}

impl MessageId {
    pub fn temporary() -> Self {
        MessageId::Temporary(format!("tmp-{}", new_id()))
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, MessageId::Temporary(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    Streaming,
    Complete,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimelineMessage {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub variant: Option<Variant>,
    pub status: MessageStatus,
    /// Submission that produced this entry; `None` for history loaded from the server.
    pub submission: Option<SubmissionId>,
}

impl TimelineMessage {
    /// Optimistic user entry, shown before any server confirmation.
    pub fn optimistic_user(text: &str, submission: SubmissionId) -> Self {
        Self {
            id: MessageId::temporary(),
            role: Role::User,
            content: text.to_string(),
            variant: None,
            status: MessageStatus::Complete,
            submission: Some(submission),
        }
    }

    /// Empty assistant entry that receives streamed deltas.
    pub fn placeholder(variant: Variant, submission: SubmissionId) -> Self {
        Self {
            id: MessageId::temporary(),
            role: Role::Assistant,
            content: String::new(),
            variant: Some(variant),
            status: MessageStatus::Streaming,
            submission: Some(submission),
        }
    }

    /// Confirmed entry built from a server record.
    pub fn confirmed(
        record: &MessageRecord,
        variant: Option<Variant>,
        submission: Option<SubmissionId>,
    ) -> Self {
        Self {
            id: MessageId::Persisted(record.id),
            role: record.role,
            content: record.content.clone(),
            variant,
            status: MessageStatus::Complete,
            submission,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == MessageStatus::Streaming
    }

    fn is_open_for(&self, variant: Variant) -> bool {
        self.role == Role::Assistant && self.is_open() && self.variant == Some(variant)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Timeline {
    messages: Vec<TimelineMessage>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[TimelineMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn append(&mut self, message: TimelineMessage) {
        self.messages.push(message);
    }

    /// Swap the first entry matching `predicate`. Returns whether one matched.
    pub fn replace_first<P>(&mut self, predicate: P, message: TimelineMessage) -> bool
    where
        P: Fn(&TimelineMessage) -> bool,
    {
        match self.messages.iter_mut().find(|m| predicate(m)) {
            Some(slot) => {
                *slot = message;
                true
            }
            None => false,
        }
    }

    /// Swap the last entry matching `predicate`. Returns whether one matched.
    pub fn replace_last<P>(&mut self, predicate: P, message: TimelineMessage) -> bool
    where
        P: Fn(&TimelineMessage) -> bool,
    {
        match self.messages.iter_mut().rev().find(|m| predicate(m)) {
            Some(slot) => {
                *slot = message;
                true
            }
            None => false,
        }
    }

    /// Remove every entry matching `predicate`, keeping the order of the rest.
    pub fn remove_where<P>(&mut self, predicate: P) -> usize
    where
        P: Fn(&TimelineMessage) -> bool,
    {
        let before = self.messages.len();
        self.messages.retain(|m| !predicate(m));
        before - self.messages.len()
    }

    /// The most recently appended open placeholder for `variant`.
    pub fn open_placeholder_mut(&mut self, variant: Variant) -> Option<&mut TimelineMessage> {
        self.messages
            .iter_mut()
            .rev()
            .find(|m| m.is_open_for(variant))
    }

    /// Concatenate `text` onto the open placeholder for `variant`.
    ///
    /// Returns false (and changes nothing) when no placeholder is open.
    pub fn append_delta(&mut self, variant: Variant, text: &str) -> bool {
        match self.open_placeholder_mut(variant) {
            Some(message) => {
                message.content.push_str(text);
                true
            }
            None => false,
        }
    }

    /// Close the open placeholder for `variant` with a terminal status.
    pub fn close_open(&mut self, variant: Variant, status: MessageStatus) -> bool {
        match self.open_placeholder_mut(variant) {
            Some(message) => {
                message.status = status;
                true
            }
            None => false,
        }
    }
}
