//! WebSocket push channel
//!
//! One socket per conversation. Frames sent while the socket is still
//! connecting are queued and flushed in order when it opens; frames sent on
//! an idle or closed channel are dropped. Inbound frames are decoded into
//! [`ChannelEvent`]s and forwarded on an mpsc receiver handed out at
//! construction.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tandem_protocol::{ClientFrame, ServerEvent};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{ChannelEvent, ChannelStatus, ConnectorError, TransportChannel};

const EVENT_CHANNEL_CAPACITY: usize = 256;

struct ChannelInner {
    status: ChannelStatus,
    queue: VecDeque<String>,
    writer: Option<mpsc::UnboundedSender<String>>,
    cancel: Option<CancellationToken>,
    /// Incremented per connect; socket tasks from older attempts are ignored.
    attempt: u64,
}

/// Handle to the push channel (cheap to Clone).
#[derive(Clone)]
pub struct WebSocketChannel {
    ws_base: String,
    inner: Arc<Mutex<ChannelInner>>,
    events_tx: mpsc::Sender<ChannelEvent>,
}

impl WebSocketChannel {
    /// Create an idle channel for a server base url (`http(s)://` or `ws(s)://`).
    pub fn new(
        base_url: &str,
    ) -> Result<(Self, mpsc::Receiver<ChannelEvent>), ConnectorError> {
        let ws_base = websocket_base(base_url)?;
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let channel = Self {
            ws_base,
            inner: Arc::new(Mutex::new(ChannelInner {
                status: ChannelStatus::Idle,
                queue: VecDeque::new(),
                writer: None,
                cancel: None,
                attempt: 0,
            })),
            events_tx,
        };
        Ok((channel, events_rx))
    }
}

impl TransportChannel for WebSocketChannel {
    /// Open the socket for a conversation. No-op while connecting or open.
    fn connect(&self, conversation_id: &str, credentials: Option<&str>) {
        let mut inner = self.inner.lock();
        if matches!(
            inner.status,
            ChannelStatus::Connecting | ChannelStatus::Open
        ) {
            debug!(
                component = "channel",
                event = "channel.connect.skipped",
                conversation_id = %conversation_id,
                status = ?inner.status,
                "Channel already connecting or open"
            );
            return;
        }

        inner.attempt += 1;
        inner.status = ChannelStatus::Connecting;
        let cancel = CancellationToken::new();
        inner.cancel = Some(cancel.clone());
        let attempt = inner.attempt;
        drop(inner);

        let url = socket_url(&self.ws_base, conversation_id, credentials);
        info!(
            component = "channel",
            event = "channel.connect.started",
            conversation_id = %conversation_id,
            attempt,
            "Connecting push channel"
        );

        tokio::spawn(run_socket(
            url,
            attempt,
            self.inner.clone(),
            self.events_tx.clone(),
            cancel,
        ));
    }

    fn status(&self) -> ChannelStatus {
        self.inner.lock().status
    }

    fn send(&self, frame: &ClientFrame) {
        let payload = match serde_json::to_string(frame) {
            Ok(json) => json,
            Err(e) => {
                warn!(
                    component = "channel",
                    event = "channel.send.serialize_failed",
                    error = %e,
                    "Failed to serialize client frame"
                );
                return;
            }
        };

        let mut inner = self.inner.lock();
        match inner.status {
            ChannelStatus::Open => {
                let delivered = inner
                    .writer
                    .as_ref()
                    .is_some_and(|writer| writer.send(payload).is_ok());
                if !delivered {
                    debug!(
                        component = "channel",
                        event = "channel.send.lost",
                        request_id = %frame.request_id(),
                        "Socket writer gone, frame lost"
                    );
                }
            }
            ChannelStatus::Connecting => {
                inner.queue.push_back(payload);
            }
            ChannelStatus::Idle | ChannelStatus::Closed => {
                debug!(
                    component = "channel",
                    event = "channel.send.dropped",
                    request_id = %frame.request_id(),
                    status = ?inner.status,
                    "Channel not connected, frame dropped"
                );
            }
        }
    }

    fn close(&self) {
        let mut inner = self.inner.lock();
        if let Some(cancel) = inner.cancel.take() {
            cancel.cancel();
        }
        inner.queue.clear();
        inner.writer = None;
        inner.status = ChannelStatus::Closed;
    }
}

/// Flush queued frames into the writer and flip to Open, atomically.
/// Returns false if this attempt was superseded or closed meanwhile.
fn promote_to_open(
    inner: &Mutex<ChannelInner>,
    attempt: u64,
    writer: mpsc::UnboundedSender<String>,
) -> bool {
    let mut guard = inner.lock();
    if guard.attempt != attempt || guard.status != ChannelStatus::Connecting {
        return false;
    }
    for payload in guard.queue.drain(..) {
        let _ = writer.send(payload);
    }
    guard.writer = Some(writer);
    guard.status = ChannelStatus::Open;
    true
}

/// Returns false if a newer attempt owns the channel.
fn mark_closed(inner: &Mutex<ChannelInner>, attempt: u64) -> bool {
    let mut guard = inner.lock();
    if guard.attempt != attempt {
        return false;
    }
    guard.status = ChannelStatus::Closed;
    guard.writer = None;
    guard.cancel = None;
    guard.queue.clear();
    true
}

async fn run_socket(
    url: String,
    attempt: u64,
    inner: Arc<Mutex<ChannelInner>>,
    events_tx: mpsc::Sender<ChannelEvent>,
    cancel: CancellationToken,
) {
    let connected = tokio::select! {
        _ = cancel.cancelled() => None,
        result = connect_async(url.as_str()) => Some(result),
    };

    let socket = match connected {
        Some(Ok((socket, _response))) => socket,
        Some(Err(e)) => {
            warn!(
                component = "channel",
                event = "channel.connect.failed",
                attempt,
                error = %e,
                "Push channel connect failed"
            );
            if mark_closed(&inner, attempt) {
                let _ = events_tx.send(ChannelEvent::Closed).await;
            }
            return;
        }
        None => {
            if mark_closed(&inner, attempt) {
                let _ = events_tx.send(ChannelEvent::Closed).await;
            }
            return;
        }
    };

    let (mut sink, mut stream) = socket.split();
    let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<String>();

    if !promote_to_open(&inner, attempt, writer_tx) {
        let _ = sink.send(Message::Close(None)).await;
        return;
    }

    info!(
        component = "channel",
        event = "channel.opened",
        attempt,
        "Push channel open"
    );
    let _ = events_tx.send(ChannelEvent::Opened).await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }

            Some(payload) = writer_rx.recv() => {
                if let Err(e) = sink.send(Message::Text(payload.into())).await {
                    debug!(
                        component = "channel",
                        event = "channel.write.failed",
                        error = %e,
                        "Socket write failed"
                    );
                    break;
                }
            }

            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ServerEvent>(text.as_str()) {
                        Ok(event) => {
                            if events_tx.send(event.into()).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(
                                component = "channel",
                                event = "channel.frame.parse_failed",
                                error = %e,
                                payload_bytes = text.len(),
                                "Failed to parse server event"
                            );
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!(
                        component = "channel",
                        event = "channel.read.failed",
                        error = %e,
                        "Socket read failed"
                    );
                    break;
                }
            },
        }
    }

    info!(
        component = "channel",
        event = "channel.closed",
        attempt,
        "Push channel closed"
    );
    if mark_closed(&inner, attempt) {
        let _ = events_tx.send(ChannelEvent::Closed).await;
    }
}

fn websocket_base(base_url: &str) -> Result<String, ConnectorError> {
    let trimmed = base_url.trim().trim_end_matches('/');
    let base = if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if trimmed.starts_with("ws://") || trimmed.starts_with("wss://") {
        trimmed.to_string()
    } else {
        return Err(ConnectorError::InvalidUrl(base_url.to_string()));
    };
    Ok(base)
}

fn socket_url(ws_base: &str, conversation_id: &str, credentials: Option<&str>) -> String {
    let mut url = format!(
        "{ws_base}/ws/chat/{}/",
        urlencoding::encode(conversation_id)
    );
    if let Some(token) = credentials.filter(|t| !t.is_empty()) {
        url.push_str("?token=");
        url.push_str(&urlencoding::encode(token));
    }
    url
}
