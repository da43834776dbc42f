//! Login and device-pairing endpoints.

use axum::{
    Extension, Json, Router,
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::auth;
use crate::store::now_millis;
use crate::web::middleware::auth::AuthContext;
use crate::web::{AppState, ClientIp};

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/v1/auth", post(login))
        .route("/v1/auth/request", post(request))
        .route("/v1/auth/account/request", post(request))
        .route("/v1/auth/request/status", get(request_status))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/auth/response", post(respond))
        .route("/v1/auth/account/response", post(respond))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginBody {
    #[serde(default)]
    public_key: String,
    #[serde(default)]
    challenge: String,
    #[serde(default)]
    signature: String,
}

/// Signature login: prove possession of the device key, get a token. The
/// account is minted on first sight of the public key.
async fn login(
    State(state): State<AppState>,
    body: Option<Json<LoginBody>>,
) -> (StatusCode, Json<Value>) {
    let Some(Json(body)) = body else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid request" })),
        );
    };

    if let Err(err) = auth::verify_signature(&body.public_key, &body.challenge, &body.signature) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": err.to_string() })),
        );
    }

    let (account, _) = state.store.get_or_create_account(&body.public_key, now_millis());
    match state.tokens.create_token(&account.id) {
        Ok(token) => (StatusCode::OK, Json(json!({ "success": true, "token": token }))),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "Token creation failed" })),
        ),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestBody {
    #[serde(default)]
    public_key: String,
    #[serde(default)]
    supports_v2: bool,
}

/// Poll-or-create a pairing request. Only creation counts against the
/// per-IP rate limit; polling an existing request is free.
async fn request(
    State(state): State<AppState>,
    ClientIp(client_ip): ClientIp,
    body: Option<Json<RequestBody>>,
) -> (StatusCode, Json<Value>) {
    let Some(Json(body)) = body else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid request" })),
        );
    };
    if body.public_key.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid public key" })),
        );
    }

    if state.store.get_auth_request(&body.public_key).is_none() {
        let key = client_ip
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        if !state.auth_request_limiter.allow(&key) {
            return (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({ "error": "Rate limit exceeded" })),
            );
        }
    }

    let request = state
        .store
        .upsert_auth_request(&body.public_key, body.supports_v2, now_millis());

    if !request.token.is_empty() {
        return (
            StatusCode::OK,
            Json(json!({
                "state": "authorized",
                "token": request.token,
                "response": request.response,
                "supportsV2": request.supports_v2,
            })),
        );
    }
    (
        StatusCode::OK,
        Json(json!({ "state": "requested", "supportsV2": request.supports_v2 })),
    )
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusQuery {
    #[serde(default)]
    public_key: String,
}

async fn request_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> (StatusCode, Json<Value>) {
    if query.public_key.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid public key" })),
        );
    }

    match state.store.get_auth_request(&query.public_key) {
        None => (StatusCode::OK, Json(json!({ "status": "not_found" }))),
        Some(request) if request.token.is_empty() => (
            StatusCode::OK,
            Json(json!({ "status": "pending", "supportsV2": request.supports_v2 })),
        ),
        Some(request) => (
            StatusCode::OK,
            Json(json!({ "status": "authorized", "supportsV2": request.supports_v2 })),
        ),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseBody {
    #[serde(default)]
    public_key: String,
    #[serde(default)]
    response: String,
}

/// Approve a pending pairing request from an authenticated device: mint a
/// token for the requesting key's account and attach it to the request.
async fn respond(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    body: Option<Json<ResponseBody>>,
) -> (StatusCode, Json<Value>) {
    let Some(Json(body)) = body else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid request" })),
        );
    };
    if body.public_key.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid public key" })),
        );
    }
    if body.response.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid response" })),
        );
    }

    let now = now_millis();
    let (account, _) = state.store.get_or_create_account(&body.public_key, now);
    let token = match state.tokens.create_token(&account.id) {
        Ok(token) => token,
        Err(_) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Token creation failed" })),
            );
        }
    };

    if state
        .store
        .authorize_auth_request(&body.public_key, &body.response, &auth.user_id, &token, now)
        .is_none()
    {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Request not found" })),
        );
    }
    (StatusCode::OK, Json(json!({ "success": true })))
}
