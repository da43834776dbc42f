//! Account profile and versioned settings.

use axum::{
    Extension, Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::store::now_millis;
use crate::store::types::UpdateOutcome;
use crate::web::AppState;
use crate::web::middleware::auth::AuthContext;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/account/profile", get(profile))
        .route("/v1/account/settings", get(settings))
        .route("/v1/account/settings", post(update_settings))
}

async fn profile(Extension(auth): Extension<AuthContext>) -> Json<Value> {
    Json(json!({
        "id": auth.user_id,
        "timestamp": now_millis(),
        "firstName": null,
        "lastName": null,
        "avatar": null,
        "github": null,
        "connectedServices": [],
    }))
}

async fn settings(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Json<Value> {
    let settings = state.store.account_settings(&auth.user_id);
    Json(json!({
        "settings": settings.settings,
        "settingsVersion": settings.version,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateSettingsBody {
    #[serde(default)]
    settings: String,
    #[serde(default)]
    expected_version: i64,
}

async fn update_settings(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    body: Option<Json<UpdateSettingsBody>>,
) -> (StatusCode, Json<Value>) {
    let Some(Json(body)) = body else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid request" })),
        );
    };
    if body.settings.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Missing settings" })),
        );
    }

    match state
        .store
        .update_account_settings(&auth.user_id, body.expected_version, &body.settings)
    {
        UpdateOutcome::Success { .. } => (StatusCode::OK, Json(json!({ "success": true }))),
        UpdateOutcome::VersionMismatch { version, value } => (
            StatusCode::OK,
            Json(json!({
                "success": false,
                "error": "version-mismatch",
                "currentVersion": version,
                "currentSettings": value,
            })),
        ),
        UpdateOutcome::NotFound => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": "error" })),
        ),
    }
}
