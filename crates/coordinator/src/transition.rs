//! Pure state transition function
//!
//! All coordinator decisions live here as a pure, synchronous function:
//! `transition(state, input) -> (state, effects)`. No IO, no async, no
//! timers. The session actor feeds inputs in one at a time and executes the
//! returned effects.

use tandem_connectors::{ChannelEvent, ChannelStatus, Exchange, GenerationError};
use tandem_protocol::{
    request_sequence, ClientFrame, GenerateBody, MessageRecord, Role, Variant,
};

use crate::config::TimerCancelPolicy;
use crate::generation::{GenerationRequest, RequestStatus, Transport};
use crate::recovery::FailureRecord;
use crate::session::{ChatSession, Submission, TimerPhase, VisibleError};
use crate::settings::SessionParams;
use crate::timeline::{MessageId, MessageStatus, SubmissionId, Timeline, TimelineMessage};

// ---------------------------------------------------------------------------
// Input: everything that can change a session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Input {
    /// Already validated by the caller. `channel` is the channel status
    /// read at submit time.
    Submit {
        text: String,
        params: SessionParams,
        channel: ChannelStatus,
    },
    Retry,
    DismissError,
    SetConversation {
        conversation_id: String,
        history: Vec<MessageRecord>,
    },
    Channel(ChannelEvent),
    FallbackTimerFired {
        submission: SubmissionId,
    },
    FallbackCompleted {
        submission: SubmissionId,
        variant: Variant,
        result: Result<Exchange, GenerationError>,
    },
}

// ---------------------------------------------------------------------------
// Effect: side effects the actor executes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct FallbackCall {
    pub variant: Variant,
    pub body: GenerateBody,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Send(ClientFrame),
    ArmFallbackTimer {
        submission: SubmissionId,
    },
    CancelFallbackTimer {
        submission: SubmissionId,
    },
    /// Run `calls` one after another, stopping at the first failure.
    InvokeFallback {
        submission: SubmissionId,
        conversation_id: String,
        calls: Vec<FallbackCall>,
    },
    Emit(SessionEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed,
    /// Some placeholder was cut off by a channel close.
    Abandoned,
}

/// Notifications for the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ErrorRaised(VisibleError),
    ErrorCleared,
    /// Put the failed submission's text back into the input field.
    RestoreInput {
        text: String,
    },
    SubmissionResolved {
        submission: SubmissionId,
        outcome: Outcome,
    },
    ChannelLost {
        abandoned: usize,
    },
}

// ---------------------------------------------------------------------------
// transition
// ---------------------------------------------------------------------------

pub fn transition(mut state: ChatSession, input: Input) -> (ChatSession, Vec<Effect>) {
    let mut effects = Vec::new();

    match input {
        Input::Submit {
            text,
            params,
            channel,
        } => {
            if state.validate_submission(&text).is_err() {
                return (state, effects);
            }
            let Some(conversation_id) = state.conversation_id.clone() else {
                return (state, effects);
            };

            state.recovery.clear();
            clear_error(&mut state, &mut effects);

            let mut submission = open_submission(&mut state, conversation_id, text, params);
            if channel.accepts_sends() {
                for request in submission.requests.iter_mut() {
                    request.dispatch(Transport::Channel);
                    effects.push(Effect::Send(request.frame(&submission.text)));
                }
                submission.timer = TimerPhase::Armed;
                effects.push(Effect::ArmFallbackTimer {
                    submission: submission.id,
                });
            } else {
                effects.push(fallback_all(&mut submission));
            }
            state.submission = Some(submission);
        }

        Input::Retry => {
            if state.in_flight() {
                return (state, effects);
            }
            let Some(record) = state.recovery.consume() else {
                return (state, effects);
            };
            clear_error(&mut state, &mut effects);

            let FailureRecord {
                conversation_id,
                text,
                params,
            } = record;
            let mut submission = open_submission(&mut state, conversation_id, text, params);
            submission.retry = true;
            effects.push(fallback_all(&mut submission));
            state.submission = Some(submission);
        }

        Input::DismissError => {
            clear_error(&mut state, &mut effects);
        }

        Input::SetConversation {
            conversation_id,
            history,
        } => {
            if state.in_flight() {
                return (state, effects);
            }
            state.conversation_id = Some(conversation_id);
            state.timeline = Timeline::new();
            for record in &history {
                state
                    .timeline
                    .append(TimelineMessage::confirmed(record, None, None));
            }
            state.recovery.clear();
            clear_error(&mut state, &mut effects);
        }

        Input::Channel(event) => on_channel_event(&mut state, event, &mut effects),

        Input::FallbackTimerFired { submission } => {
            let Some(current) = state.submission.as_mut() else {
                return (state, effects);
            };
            if current.id != submission || current.timer != TimerPhase::Armed {
                return (state, effects);
            }
            current.timer = TimerPhase::Fired;
            if let Some(effect) = fallback_unstarted(current) {
                effects.push(effect);
            }
        }

        Input::FallbackCompleted {
            submission,
            variant,
            result,
        } => {
            let Some(current) = state.submission.as_mut() else {
                return (state, effects);
            };
            if current.id != submission {
                return (state, effects);
            }
            let pending = current
                .request_mut(variant)
                .is_some_and(|r| r.transport == Transport::Fallback && !r.is_resolved());
            if !pending {
                return (state, effects);
            }

            match result {
                Ok(exchange) => {
                    if !current.user_confirmed {
                        let id = current.id;
                        state.timeline.replace_first(
                            |m| m.submission == Some(id) && m.role == Role::User,
                            TimelineMessage::confirmed(&exchange.user, None, Some(id)),
                        );
                        current.user_confirmed = true;
                    }
                    state.timeline.append(TimelineMessage::confirmed(
                        &exchange.assistant,
                        Some(variant),
                        Some(current.id),
                    ));
                    if let Some(request) = current.request_mut(variant) {
                        request.status = RequestStatus::Complete;
                    }
                    resolve_if_done(&mut state, &mut effects);
                }
                Err(err) => fail_submission(
                    &mut state,
                    VisibleError {
                        message: err.message,
                        provider_used: err.provider_used,
                    },
                    &mut effects,
                ),
            }
        }
    }

    (state, effects)
}

// ---------------------------------------------------------------------------
// Channel events
// ---------------------------------------------------------------------------

fn on_channel_event(state: &mut ChatSession, event: ChannelEvent, effects: &mut Vec<Effect>) {
    match event {
        ChannelEvent::Opened => {}

        ChannelEvent::StreamStart { request_id } => {
            let policy = state.timer_cancel;
            let Some(current) = state.submission.as_mut() else {
                return;
            };
            let id = current.id;
            let Some(request) = channel_request(current, request_id.as_deref()) else {
                return;
            };
            if request.is_resolved() {
                return;
            }
            request.status = RequestStatus::Streaming;
            let variant = request.variant;

            state.timeline.close_open(variant, MessageStatus::Complete);
            state
                .timeline
                .append(TimelineMessage::placeholder(variant, id));

            if current.timer == TimerPhase::Armed && timer_satisfied(current, policy) {
                current.timer = TimerPhase::Cancelled;
                effects.push(Effect::CancelFallbackTimer { submission: id });
            }
        }

        ChannelEvent::StreamDelta { request_id, text } => {
            let Some(current) = state.submission.as_mut() else {
                return;
            };
            let Some(request) = channel_request(current, request_id.as_deref()) else {
                return;
            };
            if request.status == RequestStatus::Streaming {
                state.timeline.append_delta(request.variant, &text);
            }
        }

        ChannelEvent::StreamEnd {
            request_id,
            message,
        } => {
            let Some(current) = state.submission.as_mut() else {
                return;
            };
            let Some(request) = channel_request(current, request_id.as_deref()) else {
                return;
            };
            if request.status != RequestStatus::Streaming {
                return;
            }
            request.status = RequestStatus::Complete;
            let variant = request.variant;

            if let Some(placeholder) = state.timeline.open_placeholder_mut(variant) {
                if let Some(record) = message {
                    placeholder.id = MessageId::Persisted(record.id);
                    placeholder.content = record.content;
                }
                placeholder.status = MessageStatus::Complete;
            }
            resolve_if_done(state, effects);
        }

        ChannelEvent::StreamError {
            request_id,
            detail,
            provider_used,
        } => {
            let failing = state
                .submission
                .as_mut()
                .and_then(|s| channel_request(s, request_id.as_deref()))
                .is_some_and(|r| !r.is_resolved());
            if failing {
                fail_submission(
                    state,
                    VisibleError {
                        message: detail,
                        provider_used,
                    },
                    effects,
                );
            }
        }

        ChannelEvent::Closed => {
            let mut abandoned = 0;
            if let Some(current) = state.submission.as_mut() {
                for request in current.requests.iter_mut() {
                    if request.transport == Transport::Channel
                        && request.status == RequestStatus::Streaming
                    {
                        request.status = RequestStatus::Failed;
                        if state
                            .timeline
                            .close_open(request.variant, MessageStatus::Failed)
                        {
                            abandoned += 1;
                        }
                    }
                }
                if current.timer == TimerPhase::Armed {
                    current.timer = TimerPhase::Cancelled;
                    effects.push(Effect::CancelFallbackTimer {
                        submission: current.id,
                    });
                }
                if let Some(effect) = fallback_unstarted(current) {
                    effects.push(effect);
                }
            }
            effects.push(Effect::Emit(SessionEvent::ChannelLost { abandoned }));
            resolve_if_done(state, effects);
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// The channel request of `submission` an event is addressed to.
///
/// A tokenized id naming another submission is stale and matches nothing;
/// bare, absent or malformed ids resolve by variant.
fn channel_request<'a>(
    submission: &'a mut Submission,
    request_id: Option<&str>,
) -> Option<&'a mut GenerationRequest> {
    let sequence = request_id.and_then(request_sequence);
    if sequence.is_some_and(|seq| seq != submission.id) {
        return None;
    }
    submission
        .request_mut(Variant::from_request_id(request_id))
        .filter(|r| r.transport == Transport::Channel)
}

fn open_submission(
    state: &mut ChatSession,
    conversation_id: String,
    text: String,
    params: SessionParams,
) -> Submission {
    let id = state.next_submission;
    state.next_submission += 1;
    state.draft = None;
    state
        .timeline
        .append(TimelineMessage::optimistic_user(&text, id));

    let requests = params
        .active_variants()
        .into_iter()
        .map(|variant| GenerationRequest::for_variant(variant, id, &conversation_id, &params))
        .collect();

    Submission {
        id,
        conversation_id,
        text,
        params,
        requests,
        timer: TimerPhase::NotArmed,
        user_confirmed: false,
        retry: false,
    }
}

fn clear_error(state: &mut ChatSession, effects: &mut Vec<Effect>) {
    if state.error.take().is_some() {
        effects.push(Effect::Emit(SessionEvent::ErrorCleared));
    }
}

fn timer_satisfied(submission: &Submission, policy: TimerCancelPolicy) -> bool {
    let mut channel = submission
        .requests
        .iter()
        .filter(|r| r.transport == Transport::Channel);
    match policy {
        TimerCancelPolicy::AnyVariantStarted => channel.any(|r| r.has_started()),
        TimerCancelPolicy::AllVariantsStarted => channel.all(|r| r.has_started()),
    }
}

/// Route every request of a fresh submission through the fallback client.
fn fallback_all(submission: &mut Submission) -> Effect {
    let calls = submission
        .requests
        .iter_mut()
        .map(|request| {
            request.dispatch(Transport::Fallback);
            FallbackCall {
                variant: request.variant,
                body: request.body(&submission.text),
            }
        })
        .collect();
    Effect::InvokeFallback {
        submission: submission.id,
        conversation_id: submission.conversation_id.clone(),
        calls,
    }
}

/// Move channel requests still waiting for stream-start onto the fallback path.
fn fallback_unstarted(submission: &mut Submission) -> Option<Effect> {
    let calls: Vec<FallbackCall> = submission
        .requests
        .iter_mut()
        .filter(|r| r.awaiting_start())
        .map(|request| {
            request.transport = Transport::Fallback;
            FallbackCall {
                variant: request.variant,
                body: request.body(&submission.text),
            }
        })
        .collect();
    if calls.is_empty() {
        return None;
    }
    Some(Effect::InvokeFallback {
        submission: submission.id,
        conversation_id: submission.conversation_id.clone(),
        calls,
    })
}

fn resolve_if_done(state: &mut ChatSession, effects: &mut Vec<Effect>) {
    if !state.submission.as_ref().is_some_and(Submission::is_resolved) {
        return;
    }
    let Some(submission) = state.submission.take() else {
        return;
    };
    if submission.timer == TimerPhase::Armed {
        effects.push(Effect::CancelFallbackTimer {
            submission: submission.id,
        });
    }
    let outcome = if submission
        .requests
        .iter()
        .any(|r| r.status == RequestStatus::Failed)
    {
        Outcome::Abandoned
    } else {
        Outcome::Completed
    };
    effects.push(Effect::Emit(SessionEvent::SubmissionResolved {
        submission: submission.id,
        outcome,
    }));
}

/// Roll back the whole submission and leave one retryable failure behind.
fn fail_submission(state: &mut ChatSession, error: VisibleError, effects: &mut Vec<Effect>) {
    let Some(submission) = state.submission.take() else {
        return;
    };
    if submission.timer == TimerPhase::Armed {
        effects.push(Effect::CancelFallbackTimer {
            submission: submission.id,
        });
    }

    let id = submission.id;
    state.timeline.remove_where(|m| m.submission == Some(id));
    state.recovery.record(FailureRecord {
        conversation_id: submission.conversation_id,
        text: submission.text.clone(),
        params: submission.params,
    });
    state.error = Some(error.clone());
    state.draft = Some(submission.text.clone());

    effects.push(Effect::Emit(SessionEvent::ErrorRaised(error)));
    effects.push(Effect::Emit(SessionEvent::RestoreInput {
        text: submission.text,
    }));
    effects.push(Effect::Emit(SessionEvent::SubmissionResolved {
        submission: id,
        outcome: Outcome::Failed,
    }));
}
