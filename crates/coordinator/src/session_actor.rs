//! Session actor - owns a ChatSession and processes inputs sequentially.
//!
//! Commands from the handle, channel events, timer firings and fallback
//! completions all funnel through one `tokio::select!` loop, so no two of
//! them ever touch the session at the same time. Lock-free reads go through
//! `ArcSwap`; UI notifications go out on a broadcast channel.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tandem_connectors::{
    ChannelEvent, ChannelStatus, ConnectorError, FallbackClient, HttpFallbackClient, TransportChannel,
    WebSocketChannel,
};
use tandem_protocol::MessageRecord;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CoordinatorConfig;
use crate::session::{ChatSession, SessionSnapshot, SubmitError};
use crate::session_command::SessionCommand;
use crate::settings::SessionParams;
use crate::timeline::SubmissionId;
use crate::transition::{transition, Effect, FallbackCall, Input, SessionEvent};

const COMMAND_CHANNEL_CAPACITY: usize = 64;
const EVENT_BROADCAST_CAPACITY: usize = 64;

/// Handle to a running session actor (cheap to Clone).
#[derive(Clone)]
pub struct SessionActorHandle {
    command_tx: mpsc::Sender<SessionCommand>,
    snapshot: Arc<ArcSwap<SessionSnapshot>>,
    events_tx: broadcast::Sender<SessionEvent>,
}

impl SessionActorHandle {
    /// Spawn the actor. If the session already has a conversation the channel
    /// is connected to it right away.
    pub fn spawn(
        session: ChatSession,
        channel: Arc<dyn TransportChannel>,
        channel_events: mpsc::Receiver<ChannelEvent>,
        fallback: Arc<dyn FallbackClient>,
        fallback_delay: Duration,
        credentials: Option<String>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (events_tx, _) = broadcast::channel(EVENT_BROADCAST_CAPACITY);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let snapshot = Arc::new(ArcSwap::from_pointee(session.snapshot()));

        if let Some(conversation_id) = &session.conversation_id {
            channel.connect(conversation_id, credentials.as_deref());
        }

        let actor = SessionActor {
            session,
            channel,
            fallback,
            fallback_delay,
            credentials,
            snapshot: snapshot.clone(),
            events_tx: events_tx.clone(),
            internal_tx,
            timer: None,
        };
        tokio::spawn(actor.run(command_rx, channel_events, internal_rx));

        SessionActorHandle {
            command_tx,
            snapshot,
            events_tx,
        }
    }

    /// Submit user text. Validation failures come back before any side effect.
    pub async fn submit(
        &self,
        text: impl Into<String>,
        params: SessionParams,
    ) -> Result<SubmissionId, SubmitError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Submit {
            text: text.into(),
            params,
            reply,
        })
        .await;
        rx.await.unwrap_or(Err(SubmitError::SessionClosed))
    }

    /// Replay the last failure. Returns false when there was nothing to retry.
    pub async fn retry(&self) -> bool {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Retry { reply }).await;
        rx.await.unwrap_or(false)
    }

    pub async fn dismiss_error(&self) {
        self.send(SessionCommand::DismissError).await;
    }

    /// Attach to a conversation and reconnect the channel to it.
    pub async fn set_conversation(
        &self,
        conversation_id: impl Into<String>,
        history: Vec<MessageRecord>,
    ) -> bool {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::SetConversation {
            conversation_id: conversation_id.into(),
            history,
            reply,
        })
        .await;
        rx.await.unwrap_or(false)
    }

    pub async fn shutdown(&self) {
        self.send(SessionCommand::Shutdown).await;
    }

    /// Lock-free snapshot read.
    pub fn snapshot(&self) -> Arc<SessionSnapshot> {
        self.snapshot.load_full()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    async fn send(&self, cmd: SessionCommand) {
        if self.command_tx.send(cmd).await.is_err() {
            warn!(
                component = "session_actor",
                event = "session.command.dropped",
                "Actor channel closed, command dropped"
            );
        }
    }
}

/// Build a session against a live server: resume `resume_conversation_id`
/// when the server still knows it, otherwise create a fresh conversation.
pub async fn connect_session(
    config: &CoordinatorConfig,
    resume_conversation_id: Option<&str>,
    credentials: Option<String>,
) -> Result<SessionActorHandle, ConnectorError> {
    let fallback = HttpFallbackClient::new(&config.server_url, credentials.clone())?;

    let resumed = match resume_conversation_id {
        Some(id) => match fallback.list_messages(id).await {
            Ok(history) => Some((id.to_string(), history)),
            Err(ConnectorError::Status { status: 404, .. }) => {
                info!(
                    component = "session_actor",
                    event = "session.resume.missing",
                    conversation_id = %id,
                    "Stored conversation is gone, starting a new one"
                );
                None
            }
            Err(e) => return Err(e),
        },
        None => None,
    };
    let (conversation_id, history) = match resumed {
        Some(found) => found,
        None => (
            fallback.create_conversation().await?.id.to_string(),
            Vec::new(),
        ),
    };

    let (channel, channel_events) = WebSocketChannel::new(&config.server_url)?;
    let handle = SessionActorHandle::spawn(
        ChatSession::new(None, config.timer_cancel),
        Arc::new(channel),
        channel_events,
        Arc::new(fallback),
        config.fallback_delay(),
        credentials,
    );
    handle.set_conversation(conversation_id, history).await;
    Ok(handle)
}

struct SessionActor {
    session: ChatSession,
    channel: Arc<dyn TransportChannel>,
    fallback: Arc<dyn FallbackClient>,
    fallback_delay: Duration,
    credentials: Option<String>,
    snapshot: Arc<ArcSwap<SessionSnapshot>>,
    events_tx: broadcast::Sender<SessionEvent>,
    internal_tx: mpsc::UnboundedSender<Input>,
    timer: Option<(SubmissionId, CancellationToken)>,
}

impl SessionActor {
    async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<SessionCommand>,
        mut channel_events: mpsc::Receiver<ChannelEvent>,
        mut internal_rx: mpsc::UnboundedReceiver<Input>,
    ) {
        let mut channel_live = true;
        loop {
            tokio::select! {
                cmd = command_rx.recv() => match cmd {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(cmd) => self.handle_command(cmd),
                },
                event = channel_events.recv(), if channel_live => match event {
                    Some(event) => self.apply(Input::Channel(event)),
                    None => {
                        debug!(
                            component = "session_actor",
                            event = "session.channel_events.ended",
                            "Channel event stream ended"
                        );
                        channel_live = false;
                    }
                },
                Some(input) = internal_rx.recv() => self.apply(input),
            }
        }

        self.cancel_timer();
        self.channel.close();
        info!(
            component = "session_actor",
            event = "session.stopped",
            conversation_id = ?self.session.conversation_id,
            "Session actor stopped"
        );
    }

    /// Reopen a channel that dropped since the last submission.
    fn reconnect_if_closed(&self) {
        if self.channel.status() != ChannelStatus::Closed {
            return;
        }
        let Some(conversation_id) = &self.session.conversation_id else {
            return;
        };
        info!(
            component = "session_actor",
            event = "session.channel.reconnect",
            conversation_id = %conversation_id,
            "Reconnecting closed push channel"
        );
        self.channel
            .connect(conversation_id, self.credentials.as_deref());
    }

    fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Submit {
                text,
                params,
                reply,
            } => {
                if let Err(e) = self.session.validate_submission(&text) {
                    debug!(
                        component = "session_actor",
                        event = "session.submit.rejected",
                        reason = %e,
                        "Submission rejected"
                    );
                    let _ = reply.send(Err(e));
                    return;
                }
                let id = self.session.next_submission;
                self.reconnect_if_closed();
                let channel = self.channel.status();
                info!(
                    component = "session_actor",
                    event = "session.submit",
                    submission = id,
                    channel = ?channel,
                    compare = params.compare.enabled,
                    "Submitting"
                );
                self.apply(Input::Submit {
                    text,
                    params,
                    channel,
                });
                let _ = reply.send(Ok(id));
            }
            SessionCommand::Retry { reply } => {
                let retried = self.session.can_retry();
                self.apply(Input::Retry);
                let _ = reply.send(retried);
            }
            SessionCommand::DismissError => self.apply(Input::DismissError),
            SessionCommand::SetConversation {
                conversation_id,
                history,
                reply,
            } => {
                if self.session.in_flight() {
                    let _ = reply.send(false);
                    return;
                }
                self.channel.close();
                self.channel
                    .connect(&conversation_id, self.credentials.as_deref());
                self.apply(Input::SetConversation {
                    conversation_id,
                    history,
                });
                let _ = reply.send(true);
            }
            SessionCommand::Shutdown => {}
        }
    }

    fn apply(&mut self, input: Input) {
        let session = std::mem::take(&mut self.session);
        let (session, effects) = transition(session, input);
        self.session = session;
        self.snapshot.store(Arc::new(self.session.snapshot()));

        for effect in effects {
            self.execute(effect);
        }
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::Send(frame) => self.channel.send(&frame),
            Effect::ArmFallbackTimer { submission } => self.arm_timer(submission),
            Effect::CancelFallbackTimer { submission } => {
                if self.timer.as_ref().is_some_and(|(id, _)| *id == submission) {
                    self.cancel_timer();
                }
            }
            Effect::InvokeFallback {
                submission,
                conversation_id,
                calls,
            } => self.invoke_fallback(submission, conversation_id, calls),
            Effect::Emit(event) => {
                debug!(
                    component = "session_actor",
                    event = "session.event",
                    session_event = ?event,
                    "Emitting session event"
                );
                // No subscribers is fine.
                let _ = self.events_tx.send(event);
            }
        }
    }

    fn arm_timer(&mut self, submission: SubmissionId) {
        self.cancel_timer();
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let tx = self.internal_tx.clone();
        let delay = self.fallback_delay;

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(Input::FallbackTimerFired { submission });
                }
                _ = cancelled.cancelled() => {}
            }
        });
        self.timer = Some((submission, token));
    }

    fn cancel_timer(&mut self) {
        if let Some((_, token)) = self.timer.take() {
            token.cancel();
        }
    }

    fn invoke_fallback(
        &self,
        submission: SubmissionId,
        conversation_id: String,
        calls: Vec<FallbackCall>,
    ) {
        let fallback = self.fallback.clone();
        let tx = self.internal_tx.clone();

        tokio::spawn(async move {
            for call in calls {
                info!(
                    component = "session_actor",
                    event = "session.fallback.invoke",
                    submission,
                    variant = %call.variant,
                    "Invoking fallback"
                );
                let result = fallback.generate(&conversation_id, call.body).await;
                let failed = result.is_err();
                let _ = tx.send(Input::FallbackCompleted {
                    submission,
                    variant: call.variant,
                    result,
                });
                if failed {
                    break;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimerCancelPolicy;
    use crate::settings::CompareSettings;
    use crate::timeline::MessageStatus;
    use crate::transition::Outcome;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tandem_connectors::{Exchange, GenerationError};
    use tandem_protocol::{ClientFrame, GenerateBody, Role, Variant};

    struct MockChannel {
        status: Mutex<ChannelStatus>,
        sent: Mutex<Vec<ClientFrame>>,
        connects: Mutex<Vec<String>>,
        status_after_connect: Mutex<Option<ChannelStatus>>,
    }

    impl MockChannel {
        fn new(status: ChannelStatus) -> Arc<Self> {
            Arc::new(Self {
                status: Mutex::new(status),
                sent: Mutex::new(Vec::new()),
                connects: Mutex::new(Vec::new()),
                status_after_connect: Mutex::new(None),
            })
        }
    }

    impl TransportChannel for MockChannel {
        fn connect(&self, conversation_id: &str, _credentials: Option<&str>) {
            self.connects.lock().push(conversation_id.to_string());
            if let Some(status) = *self.status_after_connect.lock() {
                *self.status.lock() = status;
            }
        }

        fn status(&self) -> ChannelStatus {
            *self.status.lock()
        }

        fn send(&self, frame: &ClientFrame) {
            self.sent.lock().push(frame.clone());
        }

        fn close(&self) {}
    }

    struct MockFallback {
        calls: Mutex<Vec<GenerateBody>>,
        failure: Option<GenerationError>,
    }

    impl MockFallback {
        fn ok() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                failure: None,
            })
        }

        fn failing(err: GenerationError) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                failure: Some(err),
            })
        }

        fn models(&self) -> Vec<Option<String>> {
            self.calls.lock().iter().map(|b| b.params.model.clone()).collect()
        }
    }

    #[async_trait]
    impl FallbackClient for MockFallback {
        async fn generate(
            &self,
            _conversation_id: &str,
            body: GenerateBody,
        ) -> Result<Exchange, GenerationError> {
            let n = {
                let mut calls = self.calls.lock();
                calls.push(body.clone());
                calls.len() as i64
            };
            if let Some(err) = &self.failure {
                return Err(err.clone());
            }
            let reply = format!(
                "reply from {}",
                body.params.model.as_deref().unwrap_or("default")
            );
            Ok(Exchange {
                user: record(n * 10, Role::User, &body.content),
                assistant: record(n * 10 + 1, Role::Assistant, &reply),
                provider_used: Some("echo".to_string()),
            })
        }
    }

    fn record(id: i64, role: Role, content: &str) -> MessageRecord {
        MessageRecord {
            id,
            role,
            content: content.to_string(),
            model: String::new(),
            prompt_tokens: None,
            completion_tokens: None,
            created_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    struct Harness {
        handle: SessionActorHandle,
        channel: Arc<MockChannel>,
        fallback: Arc<MockFallback>,
        events: mpsc::Sender<ChannelEvent>,
    }

    fn harness(
        status: ChannelStatus,
        fallback: Arc<MockFallback>,
        policy: TimerCancelPolicy,
    ) -> Harness {
        let channel = MockChannel::new(status);
        let (events, channel_events) = mpsc::channel(64);
        let handle = SessionActorHandle::spawn(
            ChatSession::new(Some("1".to_string()), policy),
            channel.clone(),
            channel_events,
            fallback.clone(),
            Duration::from_millis(800),
            Some("secret".to_string()),
        );
        Harness {
            handle,
            channel,
            fallback,
            events,
        }
    }

    fn compare_params() -> SessionParams {
        SessionParams {
            compare: CompareSettings {
                enabled: true,
                compare_model: Some("gpt-4o".to_string()),
            },
            ..Default::default()
        }
    }

    async fn resolved(events: &mut broadcast::Receiver<SessionEvent>) -> Outcome {
        loop {
            match events.recv().await {
                Ok(SessionEvent::SubmissionResolved { outcome, .. }) => return outcome,
                Ok(_) => continue,
                Err(e) => panic!("session events ended: {e}"),
            }
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn start(id: &str) -> ChannelEvent {
        ChannelEvent::StreamStart {
            request_id: Some(id.to_string()),
        }
    }

    fn delta(id: &str, text: &str) -> ChannelEvent {
        ChannelEvent::StreamDelta {
            request_id: Some(id.to_string()),
            text: text.to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn spawn_connects_known_conversation() {
        let h = harness(ChannelStatus::Open, MockFallback::ok(), TimerCancelPolicy::default());
        assert_eq!(*h.channel.connects.lock(), vec!["1".to_string()]);
        assert_eq!(h.handle.snapshot().conversation_id.as_deref(), Some("1"));
    }

    #[tokio::test(start_paused = true)]
    async fn streamed_hello_ends_with_two_messages() {
        let h = harness(ChannelStatus::Open, MockFallback::ok(), TimerCancelPolicy::default());
        let mut events = h.handle.subscribe();

        h.handle
            .submit("Hello", SessionParams::default())
            .await
            .unwrap();
        let snapshot = h.handle.snapshot();
        assert_eq!(snapshot.messages.len(), 1);
        assert_eq!(h.channel.sent.lock().len(), 1);

        h.events.send(start("A")).await.unwrap();
        for chunk in ["H", "i", "!"] {
            h.events.send(delta("A", chunk)).await.unwrap();
        }
        h.events
            .send(ChannelEvent::StreamEnd {
                request_id: Some("A".to_string()),
                message: None,
            })
            .await
            .unwrap();

        assert_eq!(resolved(&mut events).await, Outcome::Completed);
        let snapshot = h.handle.snapshot();
        assert_eq!(snapshot.messages.len(), 2);
        assert_eq!(snapshot.messages[0].content, "Hello");
        assert_eq!(snapshot.messages[0].status, MessageStatus::Complete);
        assert_eq!(snapshot.messages[1].content, "Hi!");
        assert_eq!(snapshot.messages[1].variant, Some(Variant::A));
        assert_eq!(snapshot.messages[1].status, MessageStatus::Complete);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(h.fallback.calls.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn closed_channel_compare_falls_back_a_then_b() {
        let h = harness(ChannelStatus::Closed, MockFallback::ok(), TimerCancelPolicy::default());
        let mut events = h.handle.subscribe();

        h.handle
            .submit("Explain recursion", compare_params())
            .await
            .unwrap();
        assert_eq!(resolved(&mut events).await, Outcome::Completed);

        assert!(h.channel.sent.lock().is_empty());
        assert_eq!(h.fallback.models(), vec![None, Some("gpt-4o".to_string())]);

        let snapshot = h.handle.snapshot();
        assert_eq!(snapshot.messages.len(), 3);
        assert_eq!(snapshot.messages[0].role, Role::User);
        assert_eq!(snapshot.messages[1].variant, Some(Variant::A));
        assert_eq!(snapshot.messages[2].variant, Some(Variant::B));
        assert_eq!(snapshot.messages[2].content, "reply from gpt-4o");
    }

    #[tokio::test(start_paused = true)]
    async fn submit_reopens_a_dropped_channel() {
        let h = harness(ChannelStatus::Closed, MockFallback::ok(), TimerCancelPolicy::default());
        let mut events = h.handle.subscribe();
        *h.channel.status_after_connect.lock() = Some(ChannelStatus::Connecting);

        let id = h
            .handle
            .submit("Hello", SessionParams::default())
            .await
            .unwrap();
        assert_eq!(
            *h.channel.connects.lock(),
            vec!["1".to_string(), "1".to_string()]
        );
        assert_eq!(h.channel.sent.lock().len(), 1);
        assert_eq!(h.channel.sent.lock()[0].request_id(), format!("A-{id}"));

        h.events.send(start(&format!("A-{id}"))).await.unwrap();
        h.events.send(delta(&format!("A-{id}"), "Hi")).await.unwrap();
        h.events
            .send(ChannelEvent::StreamEnd {
                request_id: Some(format!("A-{id}")),
                message: None,
            })
            .await
            .unwrap();

        assert_eq!(resolved(&mut events).await, Outcome::Completed);
        assert_eq!(h.handle.snapshot().messages[1].content, "Hi");
        assert!(h.fallback.calls.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_channel_then_failed_fallback_rolls_back() {
        let h = harness(
            ChannelStatus::Open,
            MockFallback::failing(
                GenerationError::new("OpenAI provider not available").with_provider("openai"),
            ),
            TimerCancelPolicy::default(),
        );
        let mut events = h.handle.subscribe();

        h.handle
            .submit("test", SessionParams::default())
            .await
            .unwrap();
        assert_eq!(resolved(&mut events).await, Outcome::Failed);

        assert_eq!(h.fallback.calls.lock().len(), 1);
        let snapshot = h.handle.snapshot();
        assert!(snapshot.messages.is_empty());
        let error = snapshot.error.clone().unwrap();
        assert_eq!(error.message, "OpenAI provider not available");
        assert_eq!(error.provider_used.as_deref(), Some("openai"));
        assert!(snapshot.can_retry);
        assert_eq!(snapshot.draft.as_deref(), Some("test"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fallback_stops_remaining_variants() {
        let h = harness(
            ChannelStatus::Closed,
            MockFallback::failing(GenerationError::new("boom")),
            TimerCancelPolicy::default(),
        );
        let mut events = h.handle.subscribe();

        h.handle.submit("Explain", compare_params()).await.unwrap();
        assert_eq!(resolved(&mut events).await, Outcome::Failed);
        settle().await;
        assert_eq!(h.fallback.calls.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_without_failure_is_noop() {
        let h = harness(ChannelStatus::Open, MockFallback::ok(), TimerCancelPolicy::default());
        assert!(!h.handle.retry().await);
        assert!(h.handle.snapshot().messages.is_empty());
        assert!(h.fallback.calls.lock().is_empty());
        assert!(h.channel.sent.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn retry_replays_failed_text_over_fallback() {
        let h = harness(ChannelStatus::Open, MockFallback::ok(), TimerCancelPolicy::default());
        let mut events = h.handle.subscribe();

        h.handle
            .submit("test", SessionParams::default())
            .await
            .unwrap();
        h.events
            .send(ChannelEvent::StreamError {
                request_id: Some("A".to_string()),
                detail: "model overloaded".to_string(),
                provider_used: None,
            })
            .await
            .unwrap();
        assert_eq!(resolved(&mut events).await, Outcome::Failed);
        assert!(h.handle.snapshot().messages.is_empty());

        assert!(h.handle.retry().await);
        assert_eq!(resolved(&mut events).await, Outcome::Completed);

        assert_eq!(h.channel.sent.lock().len(), 1);
        let calls = h.fallback.calls.lock().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].content, "test");

        let snapshot = h.handle.snapshot();
        assert_eq!(snapshot.messages.len(), 2);
        assert!(snapshot.error.is_none());
        assert!(!snapshot.can_retry);
    }

    #[tokio::test(start_paused = true)]
    async fn late_stream_start_after_fallback_adds_nothing() {
        let h = harness(ChannelStatus::Open, MockFallback::ok(), TimerCancelPolicy::default());
        let mut events = h.handle.subscribe();

        h.handle
            .submit("Hello", SessionParams::default())
            .await
            .unwrap();
        assert_eq!(resolved(&mut events).await, Outcome::Completed);

        h.events.send(start("A")).await.unwrap();
        h.events.send(delta("A", "late")).await.unwrap();
        settle().await;

        let snapshot = h.handle.snapshot();
        assert_eq!(snapshot.messages.len(), 2);
        assert_eq!(snapshot.messages[1].content, "reply from default");
        assert_eq!(h.fallback.calls.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn default_policy_falls_back_for_silent_variant() {
        let h = harness(ChannelStatus::Open, MockFallback::ok(), TimerCancelPolicy::AllVariantsStarted);
        let mut events = h.handle.subscribe();

        h.handle.submit("Explain", compare_params()).await.unwrap();
        h.events.send(start("A")).await.unwrap();
        for chunk in ["A", " streams"] {
            h.events.send(delta("A", chunk)).await.unwrap();
        }
        h.events
            .send(ChannelEvent::StreamEnd {
                request_id: Some("A".to_string()),
                message: None,
            })
            .await
            .unwrap();

        assert_eq!(resolved(&mut events).await, Outcome::Completed);
        assert_eq!(h.fallback.models(), vec![Some("gpt-4o".to_string())]);

        let snapshot = h.handle.snapshot();
        assert_eq!(snapshot.messages.len(), 3);
        assert_eq!(snapshot.messages[1].content, "A streams");
        assert_eq!(snapshot.messages[2].variant, Some(Variant::B));
    }

    #[tokio::test(start_paused = true)]
    async fn any_variant_policy_leaves_silent_variant_waiting() {
        let h = harness(ChannelStatus::Open, MockFallback::ok(), TimerCancelPolicy::AnyVariantStarted);

        h.handle.submit("Explain", compare_params()).await.unwrap();
        h.events.send(start("A")).await.unwrap();
        settle().await;

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(h.fallback.calls.lock().is_empty());
        assert!(h.handle.snapshot().in_flight);
    }

    #[tokio::test(start_paused = true)]
    async fn submit_rejections_are_reported() {
        let h = harness(ChannelStatus::Open, MockFallback::ok(), TimerCancelPolicy::default());

        assert_eq!(
            h.handle.submit("  ", SessionParams::default()).await,
            Err(SubmitError::EmptyContent)
        );
        assert_eq!(h.handle.submit("one", SessionParams::default()).await, Ok(1));
        assert_eq!(
            h.handle.submit("two", SessionParams::default()).await,
            Err(SubmitError::SubmissionInFlight)
        );
        assert_eq!(h.handle.snapshot().messages.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn set_conversation_reconnects_and_loads_history() {
        let h = harness(ChannelStatus::Open, MockFallback::ok(), TimerCancelPolicy::default());

        assert!(
            h.handle
                .set_conversation(
                    "2",
                    vec![record(5, Role::User, "hi"), record(6, Role::Assistant, "hi")]
                )
                .await
        );
        assert_eq!(
            *h.channel.connects.lock(),
            vec!["1".to_string(), "2".to_string()]
        );
        let snapshot = h.handle.snapshot();
        assert_eq!(snapshot.conversation_id.as_deref(), Some("2"));
        assert_eq!(snapshot.messages.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_rejects_later_submissions() {
        let h = harness(ChannelStatus::Open, MockFallback::ok(), TimerCancelPolicy::default());
        h.handle.shutdown().await;
        settle().await;
        assert_eq!(
            h.handle.submit("hello", SessionParams::default()).await,
            Err(SubmitError::SessionClosed)
        );
    }
}
