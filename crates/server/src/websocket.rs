//! WebSocket push channel
//!
//! One socket per conversation at `/ws/chat/{id}/`. Each `generate` frame
//! runs as its own task so variants A and B stream side by side; the
//! events carry the frame's `request_id` back.

use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tandem_protocol::{ClientFrame, ServerEvent};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::chat;
use crate::http::ProviderQuery;
use crate::state::SharedState;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Messages that can be sent through the WebSocket
enum OutboundMessage {
    Json(ServerEvent),
    Pong(Bytes),
}

/// WebSocket upgrade handler. Unknown conversations are refused before upgrading.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(id): Path<String>,
    Query(query): Query<ProviderQuery>,
    State(state): State<SharedState>,
) -> Response {
    let conversation_id = match chat::parse_conversation_id(&id) {
        Ok(id) => id,
        Err(e) => return e.into_response(),
    };
    if let Err(e) = chat::ensure_conversation(&state.store, conversation_id).await {
        return e.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state, conversation_id, query.provider))
}

async fn handle_socket(
    socket: WebSocket,
    state: SharedState,
    conversation_id: i64,
    provider: Option<String>,
) {
    let conn_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    info!(
        component = "websocket",
        event = "ws.connection.opened",
        connection_id = conn_id,
        conversation_id,
        "WebSocket connection opened"
    );

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundMessage>(100);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let result = match msg {
                OutboundMessage::Json(event) => match serde_json::to_string(&event) {
                    Ok(json) => ws_tx.send(Message::Text(json.into())).await,
                    Err(e) => {
                        error!(
                            component = "websocket",
                            event = "ws.send.serialize_failed",
                            connection_id = conn_id,
                            error = %e,
                            "Failed to serialize server event"
                        );
                        continue;
                    }
                },
                OutboundMessage::Pong(data) => ws_tx.send(Message::Pong(data)).await,
            };

            if result.is_err() {
                debug!(
                    component = "websocket",
                    event = "ws.send.disconnected",
                    connection_id = conn_id,
                    "WebSocket send failed, client disconnected"
                );
                break;
            }
        }
    });

    let mut generations = JoinSet::new();

    loop {
        let result = tokio::select! {
            incoming = ws_rx.next() => match incoming {
                Some(result) => result,
                None => break,
            },
            Some(_) = generations.join_next(), if !generations.is_empty() => continue,
        };

        let text = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Ping(data)) => {
                let _ = outbound_tx.send(OutboundMessage::Pong(data)).await;
                continue;
            }
            Ok(Message::Close(_)) => {
                info!(
                    component = "websocket",
                    event = "ws.connection.close_frame",
                    connection_id = conn_id,
                    "Client sent close frame"
                );
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(
                    component = "websocket",
                    event = "ws.connection.error",
                    connection_id = conn_id,
                    error = %e,
                    "WebSocket error"
                );
                break;
            }
        };

        // A reply without a request id would be attributed to variant A.
        let frame: ClientFrame = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(
                    component = "websocket",
                    event = "ws.frame.parse_failed",
                    connection_id = conn_id,
                    error = %e,
                    payload_bytes = text.len(),
                    "Failed to parse client frame"
                );
                continue;
            }
        };

        match frame {
            ClientFrame::Generate {
                request_id,
                content,
                params,
            } => {
                debug!(
                    component = "websocket",
                    event = "ws.generate.received",
                    connection_id = conn_id,
                    request_id = %request_id,
                    "Generate frame received"
                );
                generations.spawn(run_generation(
                    state.clone(),
                    conversation_id,
                    provider.clone(),
                    GenerateFrame {
                        request_id,
                        content,
                        params: params.clamped(),
                    },
                    outbound_tx.clone(),
                ));
            }
        }
    }

    info!(
        component = "websocket",
        event = "ws.connection.closed",
        connection_id = conn_id,
        in_flight = generations.len(),
        "WebSocket connection closed"
    );
    generations.abort_all();
    send_task.abort();
}

struct GenerateFrame {
    request_id: String,
    content: String,
    params: tandem_protocol::GenerationParams,
}

async fn run_generation(
    state: SharedState,
    conversation_id: i64,
    provider: Option<String>,
    frame: GenerateFrame,
    tx: mpsc::Sender<OutboundMessage>,
) {
    let request_id = Some(frame.request_id);
    let provider = state.providers.select(provider.as_deref());

    if let Err(e) = chat::accept_user_message(&state.store, conversation_id, &frame.content).await {
        send_error(&tx, request_id, &e).await;
        return;
    }

    if !send(
        &tx,
        ServerEvent::MessageStart {
            request_id: request_id.clone(),
        },
    )
    .await
    {
        return;
    }

    let assistant =
        match chat::produce_reply(&state.store, conversation_id, &frame.params, provider).await {
            Ok(record) => record,
            Err(e) => {
                send_error(&tx, request_id, &e).await;
                return;
            }
        };

    for chunk in chat::word_chunks(&assistant.content) {
        let delta = ServerEvent::Delta {
            request_id: request_id.clone(),
            content: chunk.to_string(),
        };
        if !send(&tx, delta).await {
            return;
        }
        if !state.chunk_delay.is_zero() {
            tokio::time::sleep(state.chunk_delay).await;
        }
    }

    send(
        &tx,
        ServerEvent::MessageEnd {
            request_id,
            message: Some(assistant),
        },
    )
    .await;
}

/// False once the client is gone.
async fn send(tx: &mpsc::Sender<OutboundMessage>, event: ServerEvent) -> bool {
    tx.send(OutboundMessage::Json(event)).await.is_ok()
}

async fn send_error(
    tx: &mpsc::Sender<OutboundMessage>,
    request_id: Option<String>,
    err: &chat::GenerateError,
) {
    let body = err.body();
    let detail = body.message().unwrap_or("generation failed").to_string();
    send(
        tx,
        ServerEvent::Error {
            request_id,
            detail,
            provider_used: body.provider_used,
        },
    )
    .await;
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;

    use super::*;
    use crate::http::{build_router, tests::test_state};
    use crate::provider::EchoProvider;
    use tandem_protocol::GenerationParams;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    async fn serve(state: SharedState) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = build_router(state, None);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn generate(request_id: &str, content: &str) -> WsMessage {
        let frame = ClientFrame::Generate {
            request_id: request_id.to_string(),
            content: content.to_string(),
            params: GenerationParams::default(),
        };
        WsMessage::Text(serde_json::to_string(&frame).unwrap().into())
    }

    async fn next_event<S>(stream: &mut S) -> ServerEvent
    where
        S: futures::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            match stream.next().await.unwrap().unwrap() {
                WsMessage::Text(text) => return serde_json::from_str(&text).unwrap(),
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn streams_reply_for_request() {
        let (_dir, state) = test_state(Arc::new(EchoProvider)).await;
        let convo = state.store.create_conversation("").await.unwrap();
        let addr = serve(state.clone()).await;

        let (mut socket, _) =
            tokio_tungstenite::connect_async(format!("ws://{addr}/ws/chat/{}/", convo.id))
                .await
                .unwrap();

        // Garbage is ignored and the socket stays usable.
        socket.send(WsMessage::Text("not json".into())).await.unwrap();
        socket.send(generate("B", "Hello there")).await.unwrap();

        assert_eq!(
            next_event(&mut socket).await,
            ServerEvent::MessageStart {
                request_id: Some("B".to_string())
            }
        );
        let mut streamed = String::new();
        let record = loop {
            match next_event(&mut socket).await {
                ServerEvent::Delta {
                    request_id,
                    content,
                } => {
                    assert_eq!(request_id.as_deref(), Some("B"));
                    streamed.push_str(&content);
                }
                ServerEvent::MessageEnd {
                    request_id,
                    message,
                } => {
                    assert_eq!(request_id.as_deref(), Some("B"));
                    break message.unwrap();
                }
                other => panic!("unexpected event: {other:?}"),
            }
        };
        assert_eq!(streamed, "Hello there");
        assert_eq!(record.content, "Hello there");

        let history = state.store.list_messages(convo.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].id, record.id);
    }

    #[tokio::test]
    async fn unknown_conversation_refuses_upgrade() {
        let (_dir, state) = test_state(Arc::new(EchoProvider)).await;
        let addr = serve(state).await;

        let result = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/chat/77/")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn provider_failure_is_reported_after_start() {
        let (_dir, state) = test_state(Arc::new(EchoProvider)).await;
        let convo = state.store.create_conversation("").await.unwrap();
        let addr = serve(state).await;

        let (mut socket, _) = tokio_tungstenite::connect_async(format!(
            "ws://{addr}/ws/chat/{}/?provider=openai",
            convo.id
        ))
        .await
        .unwrap();
        socket.send(generate("A", "hi")).await.unwrap();

        assert_eq!(
            next_event(&mut socket).await,
            ServerEvent::MessageStart {
                request_id: Some("A".to_string())
            }
        );
        assert_eq!(
            next_event(&mut socket).await,
            ServerEvent::Error {
                request_id: Some("A".to_string()),
                detail: "OpenAI provider not available".to_string(),
                provider_used: Some("openai".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn blank_frame_errors_without_start() {
        let (_dir, state) = test_state(Arc::new(EchoProvider)).await;
        let convo = state.store.create_conversation("").await.unwrap();
        let addr = serve(state).await;

        let (mut socket, _) =
            tokio_tungstenite::connect_async(format!("ws://{addr}/ws/chat/{}/", convo.id))
                .await
                .unwrap();
        socket.send(generate("A", "  ")).await.unwrap();

        assert_eq!(
            next_event(&mut socket).await,
            ServerEvent::Error {
                request_id: Some("A".to_string()),
                detail: "content is required".to_string(),
                provider_used: None,
            }
        );
    }
}
