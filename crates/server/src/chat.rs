//! Inbound chat API: a single endpoint that accepts the user's utterance and
//! returns the assistant reply. Authentication itself lives in the external
//! web layer; this endpoint trusts the bearer principal it installed.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use majordome_agent::{ChatRequest, Orchestrator, OrchestratorError};

#[derive(Clone)]
pub struct ChatState {
    pub orchestrator: Arc<Orchestrator>,
}

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub conversation_id: String,
    pub reply: String,
}

#[derive(Debug, Serialize)]
pub struct ChatError {
    pub code: &'static str,
    pub message: String,
}

pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new().route("/api/chat", post(chat)).with_state(ChatState { orchestrator })
}

/// The external web layer authenticates the user and forwards the principal
/// as a bearer token.
fn bearer_user(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|principal| !principal.is_empty())
        .map(str::to_string)
}

pub async fn chat(
    State(state): State<ChatState>,
    headers: HeaderMap,
    Json(body): Json<ChatBody>,
) -> impl IntoResponse {
    let Some(user_id) = bearer_user(&headers) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(ChatError {
                code: "UNAUTHENTICATED",
                message: "jeton d'authentification manquant".to_string(),
            }),
        )
            .into_response();
    };

    let request = ChatRequest {
        user_id,
        conversation_id: body.conversation_id,
        message: body.message,
        correlation_id: Uuid::new_v4().to_string(),
    };

    match state.orchestrator.handle(request).await {
        Ok(reply) => (
            StatusCode::OK,
            Json(ChatResponse { conversation_id: reply.conversation_id, reply: reply.reply }),
        )
            .into_response(),
        Err(OrchestratorError::EmptyMessage) => (
            StatusCode::BAD_REQUEST,
            Json(ChatError {
                code: "EMPTY_MESSAGE",
                message: "le message est vide".to_string(),
            }),
        )
            .into_response(),
        Err(OrchestratorError::Repository(repository_error)) => {
            error!(
                event_name = "chat.persistence_failure",
                error = %repository_error,
                "chat request failed on persistence"
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ChatError {
                    code: "INTERNAL",
                    message: "une erreur interne s'est produite".to_string(),
                }),
            )
                .into_response()
        }
    }
}
