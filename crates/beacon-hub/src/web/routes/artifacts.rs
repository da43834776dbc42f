//! Artifact CRUD with independent header/body CAS.

use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::store::now_millis;
use crate::store::types::Artifact;
use crate::web::AppState;
use crate::web::middleware::auth::AuthContext;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/artifacts", get(list))
        .route("/v1/artifacts", post(create))
        .route("/v1/artifacts/{id}", get(get_one))
        .route("/v1/artifacts/{id}", post(update))
        .route("/v1/artifacts/{id}", delete(remove))
}

fn artifact_json(artifact: &Artifact, with_body: bool) -> Value {
    let mut value = json!({
        "id": artifact.id,
        "header": artifact.header,
        "headerVersion": artifact.header_version,
        "dataEncryptionKey": artifact.data_encryption_key,
        "seq": artifact.seq,
        "createdAt": artifact.created_at,
        "updatedAt": artifact.updated_at,
    });
    if with_body {
        let obj = value.as_object_mut().expect("artifact json is an object");
        obj.insert("body".into(), json!(artifact.body));
        obj.insert("bodyVersion".into(), json!(artifact.body_version));
    }
    value
}

async fn list(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Json<Value> {
    let artifacts: Vec<Value> = state
        .store
        .list_artifacts(&auth.user_id)
        .iter()
        .map(|a| artifact_json(a, false))
        .collect();
    Json(Value::Array(artifacts))
}

async fn get_one(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.store.get_artifact(&auth.user_id, &id) {
        Some(artifact) => (StatusCode::OK, Json(artifact_json(&artifact, true))),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Artifact not found" })),
        ),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateArtifactBody {
    #[serde(default)]
    id: String,
    #[serde(default)]
    header: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    data_encryption_key: String,
}

async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    body: Option<Json<CreateArtifactBody>>,
) -> (StatusCode, Json<Value>) {
    let Some(Json(body)) = body else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid request" })),
        );
    };

    match state.store.create_artifact(
        &auth.user_id,
        &body.id,
        &body.header,
        &body.body,
        &body.data_encryption_key,
        now_millis(),
    ) {
        Ok((artifact, true)) => (StatusCode::OK, Json(artifact_json(&artifact, true))),
        Ok((_, false)) => (
            StatusCode::CONFLICT,
            Json(json!({ "error": "Artifact already exists" })),
        ),
        Err(err) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": err.to_string() })),
        ),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateArtifactBody {
    header: Option<String>,
    expected_header_version: Option<i64>,
    body: Option<String>,
    expected_body_version: Option<i64>,
}

async fn update(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    body: Option<Json<UpdateArtifactBody>>,
) -> (StatusCode, Json<Value>) {
    let Some(Json(body)) = body else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid request" })),
        );
    };

    let result = match state.store.update_artifact(
        &auth.user_id,
        &id,
        body.header.as_deref(),
        body.expected_header_version,
        body.body.as_deref(),
        body.expected_body_version,
        now_millis(),
    ) {
        Ok(result) => result,
        Err(_) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "Artifact not found" })),
            );
        }
    };

    let mut response = Map::new();
    if result.success {
        response.insert("success".into(), json!(true));
        if let Some(v) = result.header_version {
            response.insert("headerVersion".into(), json!(v));
        }
        if let Some(v) = result.body_version {
            response.insert("bodyVersion".into(), json!(v));
        }
    } else {
        response.insert("success".into(), json!(false));
        response.insert("error".into(), json!("version-mismatch"));
        if let Some(v) = result.current_header_version {
            response.insert("currentHeaderVersion".into(), json!(v));
        }
        if let Some(v) = result.current_body_version {
            response.insert("currentBodyVersion".into(), json!(v));
        }
        if let Some(v) = result.current_header {
            response.insert("currentHeader".into(), json!(v));
        }
        if let Some(v) = result.current_body {
            response.insert("currentBody".into(), json!(v));
        }
    }
    (StatusCode::OK, Json(Value::Object(response)))
}

async fn remove(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> (StatusCode, Json<Value>) {
    if !state.store.delete_artifact(&auth.user_id, &id) {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Artifact not found" })),
        );
    }
    (StatusCode::OK, Json(json!({ "success": true })))
}
