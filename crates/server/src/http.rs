//! HTTP API routes
//!
//! The conversation endpoints plus the fallback `generate` call the chat
//! coordinator races against its push channel.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tandem_protocol::{
    CreateConversationBody, CreateMessageBody, ErrorBody, GenerateBody, GenerateResponse,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::auth::auth_middleware;
use crate::chat::{self, GenerateError};
use crate::persistence::NewMessage;
use crate::state::SharedState;
use crate::websocket::ws_handler;

#[derive(Debug, Default, Deserialize)]
pub struct ProviderQuery {
    pub provider: Option<String>,
}

pub fn build_router(state: SharedState, auth_token: Option<String>) -> Router {
    let router = Router::new()
        .route("/health", get(health_handler))
        .route(
            "/api/chat/conversations/",
            get(list_conversations).post(create_conversation),
        )
        .route("/api/chat/conversations/{id}/", get(get_conversation))
        .route(
            "/api/chat/conversations/{id}/messages/",
            get(list_messages).post(append_message),
        )
        .route("/api/chat/conversations/{id}/generate/", post(generate))
        .route("/ws/chat/{id}/", get(ws_handler))
        .with_state(state);

    let router = match auth_token {
        Some(token) => router.layer(middleware::from_fn_with_state(token, auth_middleware)),
        None => router,
    };

    router.layer(TraceLayer::new_for_http()).layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    )
}

async fn health_handler() -> impl IntoResponse {
    "OK"
}

impl IntoResponse for GenerateError {
    fn into_response(self) -> Response {
        let status = match &self {
            GenerateError::EmptyContent => StatusCode::BAD_REQUEST,
            GenerateError::NotFound => StatusCode::NOT_FOUND,
            GenerateError::Provider { .. } => StatusCode::BAD_GATEWAY,
            GenerateError::Store(e) => {
                error!(
                    component = "http",
                    event = "http.store_failed",
                    error = %e,
                    "Store operation failed"
                );
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(self.body())).into_response()
    }
}

async fn list_conversations(State(state): State<SharedState>) -> Result<Response, GenerateError> {
    let conversations = state.store.list_conversations().await?;
    Ok(Json(conversations).into_response())
}

async fn create_conversation(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Response, Response> {
    let body: CreateConversationBody = if body.iter().all(u8::is_ascii_whitespace) {
        CreateConversationBody::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody {
                    detail: Some("invalid body".to_string()),
                    error: Some(e.to_string()),
                    provider_used: None,
                }),
            )
                .into_response()
        })?
    };

    let record = state
        .store
        .create_conversation(&body.title)
        .await
        .map_err(|e| GenerateError::from(e).into_response())?;
    info!(
        component = "http",
        event = "http.conversation.created",
        conversation_id = record.id,
        "Conversation created"
    );
    Ok((StatusCode::CREATED, Json(record)).into_response())
}

async fn get_conversation(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Response, GenerateError> {
    let id = chat::parse_conversation_id(&id)?;
    match state.store.get_conversation(id).await? {
        Some(record) => Ok(Json(record).into_response()),
        None => Err(GenerateError::NotFound),
    }
}

async fn list_messages(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Response, GenerateError> {
    let id = chat::parse_conversation_id(&id)?;
    chat::ensure_conversation(&state.store, id).await?;
    let messages = state.store.list_messages(id).await?;
    Ok(Json(messages).into_response())
}

/// Append a message without generating a reply.
async fn append_message(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(body): Json<CreateMessageBody>,
) -> Result<Response, GenerateError> {
    let id = chat::parse_conversation_id(&id)?;
    if body.content.trim().is_empty() {
        return Err(GenerateError::EmptyContent);
    }
    chat::ensure_conversation(&state.store, id).await?;
    let record = state
        .store
        .append_message(
            id,
            NewMessage {
                role: body.role,
                ..NewMessage::user(&body.content)
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(record)).into_response())
}

async fn generate(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(query): Query<ProviderQuery>,
    Json(body): Json<GenerateBody>,
) -> Result<Response, GenerateError> {
    let id = chat::parse_conversation_id(&id)?;
    let params = body.params.clamped();
    let provider = state.providers.select(query.provider.as_deref());

    let user = chat::accept_user_message(&state.store, id, &body.content).await?;
    let assistant = chat::produce_reply(&state.store, id, &params, provider.clone()).await?;
    Ok((
        StatusCode::CREATED,
        Json(GenerateResponse {
            user,
            assistant,
            provider_used: Some(provider.name().to_string()),
        }),
    )
        .into_response())
}
