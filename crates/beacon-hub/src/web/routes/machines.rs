//! Machine registry endpoints.

use axum::{
    Extension, Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::store::now_millis;
use crate::store::types::Machine;
use crate::web::AppState;
use crate::web::middleware::auth::AuthContext;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/machines", get(list))
        .route("/v1/machines", post(upsert))
}

fn machine_json(machine: &Machine) -> Value {
    json!({
        "id": machine.id,
        "createdAt": machine.created_at,
        "updatedAt": machine.updated_at,
        "metadata": machine.metadata,
        "metadataVersion": machine.metadata_version,
        "daemonState": machine.daemon_state,
        "daemonStateVersion": machine.daemon_state_version,
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertMachineBody {
    #[serde(default)]
    id: String,
    #[serde(default)]
    tag: String,
    #[serde(default)]
    metadata: String,
    #[serde(default)]
    daemon_state: Option<String>,
    #[serde(default)]
    data_encryption_key: Option<String>,
}

async fn upsert(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    body: Option<Json<UpsertMachineBody>>,
) -> (StatusCode, Json<Value>) {
    let Some(Json(body)) = body else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid request" })),
        );
    };

    // Older daemons send the machine id in `tag`.
    let machine_id = if body.id.is_empty() { &body.tag } else { &body.id };

    match state.store.upsert_machine(
        &auth.user_id,
        machine_id,
        &body.metadata,
        body.daemon_state.as_deref(),
        body.data_encryption_key.as_deref(),
        now_millis(),
    ) {
        Ok((machine, _)) => (
            StatusCode::OK,
            Json(json!({ "machine": machine_json(&machine) })),
        ),
        Err(err) => (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": err.to_string() })),
        ),
    }
}

async fn list(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Json<Value> {
    let machines: Vec<Value> = state
        .store
        .list_machines(&auth.user_id)
        .iter()
        .map(machine_json)
        .collect();
    Json(json!({ "machines": machines }))
}
