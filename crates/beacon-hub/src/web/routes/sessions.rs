//! Session CRUD and message history.

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State, rejection::QueryRejection},
    http::StatusCode,
    routing::{delete, get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::store::now_millis;
use crate::store::types::Session;
use crate::web::AppState;
use crate::web::middleware::auth::AuthContext;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/sessions", get(list))
        .route("/v1/sessions", post(get_or_create))
        .route("/v1/sessions/{id}", delete(remove))
        .route("/v1/sessions/{id}/messages", get(messages))
}

fn session_json(session: &Session) -> Value {
    json!({
        "id": session.id,
        "tag": session.tag,
        "seq": session.seq,
        "createdAt": session.created_at,
        "updatedAt": session.updated_at,
        "metadata": session.metadata,
        "metadataVersion": session.metadata_version,
        "agentState": session.agent_state,
        "agentStateVersion": session.agent_state_version,
        "dataEncryptionKey": session.data_encryption_key,
        "active": session.active,
        "activeAt": session.active_at,
        "lastMessage": null,
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionBody {
    #[serde(default)]
    tag: String,
    #[serde(default)]
    metadata: String,
    #[serde(default)]
    agent_state: Option<String>,
    #[serde(default)]
    data_encryption_key: Option<String>,
}

async fn get_or_create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    body: Option<Json<CreateSessionBody>>,
) -> (StatusCode, Json<Value>) {
    let Some(Json(body)) = body else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid request" })),
        );
    };

    match state.store.get_or_create_session(
        &auth.user_id,
        &body.tag,
        &body.metadata,
        body.agent_state.as_deref(),
        body.data_encryption_key.as_deref(),
        now_millis(),
    ) {
        Ok((session, _)) => (
            StatusCode::OK,
            Json(json!({ "session": session_json(&session) })),
        ),
        Err(err) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": err.to_string() })),
        ),
    }
}

async fn list(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Json<Value> {
    let sessions: Vec<Value> = state
        .store
        .list_sessions(&auth.user_id)
        .iter()
        .map(session_json)
        .collect();
    Json(json!({ "sessions": sessions }))
}

async fn remove(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> (StatusCode, Json<Value>) {
    if !state.store.delete_session(&auth.user_id, &id, now_millis()) {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Session not found" })),
        );
    }
    (StatusCode::OK, Json(json!({ "success": true })))
}

#[derive(Deserialize)]
struct MessagesQuery {
    after: Option<i64>,
    limit: Option<i64>,
}

async fn messages(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    query: Result<Query<MessagesQuery>, QueryRejection>,
) -> (StatusCode, Json<Value>) {
    let Ok(Query(query)) = query else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid cursor format" })),
        );
    };
    let after = query.after.unwrap_or(0);
    let limit = query.limit.unwrap_or(100);

    let messages = match state.store.list_messages(&auth.user_id, &id, after, limit) {
        Ok(messages) => messages,
        Err(_) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "Session not found" })),
            );
        }
    };

    let messages: Vec<Value> = messages
        .iter()
        .map(|m| {
            json!({
                "id": m.id,
                "seq": m.seq,
                "createdAt": m.created_at,
                "updatedAt": m.updated_at,
                "content": { "t": "encrypted", "c": m.content },
            })
        })
        .collect();
    (StatusCode::OK, Json(json!({ "messages": messages })))
}
