//! The legacy `/ws` user-feed stream. Token in the query string, JSON
//! messages, per-user fan-out through the feed hub.

use std::time::Duration;

use axum::{
    Json, Router,
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc::unbounded_channel;
use tracing::debug;

use crate::auth::TokenVerifier;
use crate::store::now_millis;
use crate::web::AppState;

const PONG_WAIT: Duration = Duration::from_secs(60);
const WRITE_WAIT: Duration = Duration::from_secs(10);
const PING_PERIOD: Duration = Duration::from_secs(54);

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(upgrade))
}

#[derive(Deserialize)]
struct StreamQuery {
    #[serde(default)]
    token: String,
}

async fn upgrade(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let claims = match state.tokens.verify(&query.token) {
        Ok(claims) => claims,
        Err(_) => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "Invalid authentication token" })),
            )
                .into_response();
        }
    };

    ws.max_message_size(1024 * 1024)
        .on_upgrade(move |socket| handle_stream(socket, state, claims.user_id))
        .into_response()
}

#[derive(Deserialize)]
struct ClientMessage {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    sid: String,
    #[serde(default)]
    message: String,
}

async fn handle_stream(socket: WebSocket, state: AppState, user_id: String) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = unbounded_channel::<String>();
    let handle = state.feed.register(&user_id, out_tx.clone());

    debug!(user = %user_id, "feed stream connected");

    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(PING_PERIOD);
        ping.tick().await;
        loop {
            tokio::select! {
                out = out_rx.recv() => {
                    let Some(text) = out else { break };
                    let send = ws_tx.send(Message::Text(text.into()));
                    match tokio::time::timeout(WRITE_WAIT, send).await {
                        Ok(Ok(())) => {}
                        _ => break,
                    }
                }
                _ = ping.tick() => {
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    loop {
        let frame = match tokio::time::timeout(PONG_WAIT, ws_rx.next()).await {
            Ok(Some(Ok(frame))) => frame,
            _ => break,
        };
        let text = match frame {
            Message::Text(text) => text.to_string(),
            Message::Close(_) => break,
            _ => continue,
        };

        let Ok(msg) = serde_json::from_str::<ClientMessage>(&text) else {
            continue;
        };
        match msg.kind.as_str() {
            "ping" => {
                let _ = out_tx.send(json!({ "type": "pong" }).to_string());
            }
            "message" => {
                if msg.sid.is_empty() || msg.message.is_empty() {
                    continue;
                }
                let now = now_millis();
                let Ok(stored) = state.store.append_message(&user_id, &msg.sid, &msg.message, now)
                else {
                    continue;
                };
                let update = json!({
                    "type": "update",
                    "event": "new-message",
                    "body": {
                        "t": "new-message",
                        "sessionId": msg.sid,
                        "message": {
                            "id": stored.id,
                            "seq": stored.seq,
                            "createdAt": stored.created_at,
                            "updatedAt": stored.updated_at,
                            "content": { "t": "encrypted", "c": stored.content },
                        },
                    },
                });
                state.feed.broadcast(&user_id, &update.to_string());
            }
            _ => {}
        }
    }

    debug!(user = %user_id, "feed stream disconnected");
    state.feed.unregister(&handle);
    drop(out_tx);
    writer.abort();
}
