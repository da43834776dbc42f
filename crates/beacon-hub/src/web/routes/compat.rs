//! Thin compatibility endpoints: stable response shapes for mobile
//! clients, no behavior behind them.

use axum::{
    Json, Router,
    extract::Path,
    http::StatusCode,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::web::AppState;

pub fn public_router() -> Router<AppState> {
    Router::new().route("/v1/version", post(version_check))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/push-tokens", get(list_push_tokens))
        .route("/v1/push-tokens", post(register_push_token))
        .route("/v1/user/search", get(user_search))
        .route("/v1/user/{id}", get(user_get))
        .route("/v1/friends", get(friends_list))
        .route("/v1/friends/add", post(friends_add))
        .route("/v1/friends/remove", post(friends_remove))
        .route("/v1/feed", get(feed_list))
}

async fn version_check() -> Json<Value> {
    Json(json!({ "update_required": false }))
}

async fn list_push_tokens() -> Json<Value> {
    Json(json!({ "tokens": [] }))
}

#[derive(Deserialize)]
struct PushTokenBody {
    #[serde(default)]
    token: String,
}

async fn register_push_token(body: Option<Json<PushTokenBody>>) -> (StatusCode, Json<Value>) {
    let token = body.map(|Json(b)| b.token).unwrap_or_default();
    if token.is_empty() {
        return (StatusCode::BAD_REQUEST, Json(json!({ "success": false })));
    }
    (StatusCode::OK, Json(json!({ "success": true })))
}

async fn user_search() -> Json<Value> {
    Json(json!({ "users": [] }))
}

async fn user_get(Path(_id): Path<String>) -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "User not found" })),
    )
}

fn stub_user_profile(id: &str, status: &str) -> Value {
    json!({
        "id": id,
        "firstName": "User",
        "lastName": null,
        "avatar": null,
        "username": id,
        "bio": null,
        "status": status,
    })
}

async fn friends_list() -> Json<Value> {
    Json(json!({ "friends": [] }))
}

#[derive(Deserialize)]
struct FriendBody {
    #[serde(default)]
    uid: String,
}

async fn friends_add(body: Option<Json<FriendBody>>) -> (StatusCode, Json<Value>) {
    let uid = body.map(|Json(b)| b.uid).unwrap_or_default();
    if uid.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid request" })),
        );
    }
    (
        StatusCode::OK,
        Json(json!({ "user": stub_user_profile(&uid, "requested") })),
    )
}

async fn friends_remove(body: Option<Json<FriendBody>>) -> (StatusCode, Json<Value>) {
    let uid = body.map(|Json(b)| b.uid).unwrap_or_default();
    if uid.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid request" })),
        );
    }
    (
        StatusCode::OK,
        Json(json!({ "user": stub_user_profile(&uid, "none") })),
    )
}

async fn feed_list() -> Json<Value> {
    Json(json!({ "items": [], "hasMore": false }))
}
