//! Integration tests for the REST API, driven through `axum_test` without
//! a real TCP listener.

use std::sync::Arc;
use std::time::Duration;

use axum_test::TestServer;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use ed25519_dalek::{Signer, SigningKey};
use serde_json::{Value, json};

use beacon_hub::auth::TokenService;
use beacon_hub::hub::FeedHub;
use beacon_hub::ratelimit::RateLimiter;
use beacon_hub::socketio::{self, RealtimeServer};
use beacon_hub::store::Store;
use beacon_hub::web::{self, AppState};

struct TestHub {
    server: TestServer,
    store: Arc<Store>,
    tokens: Arc<TokenService>,
}

fn test_hub() -> TestHub {
    let store = Arc::new(Store::new());
    let tokens = Arc::new(TokenService::new(
        "test-secret",
        Duration::from_secs(3600),
        "beacon-test",
    ));
    let state = AppState {
        store: store.clone(),
        tokens: tokens.clone(),
        auth_request_limiter: RateLimiter::new(10, Duration::from_secs(60)),
        feed: Arc::new(FeedHub::new()),
    };
    let realtime = Arc::new(RealtimeServer::new(store.clone(), tokens.clone()));
    let app = web::build_router(state).merge(socketio::server::router(realtime));

    TestHub {
        server: TestServer::new(app).expect("failed to create test server"),
        store,
        tokens,
    }
}

fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

#[tokio::test]
async fn health_and_welcome() {
    let hub = test_hub();

    let resp = hub.server.get("/health").await;
    resp.assert_status_ok();
    let body: Value = resp.json();
    assert_eq!(body["ok"], true);

    let resp = hub.server.get("/").await;
    resp.assert_status_ok();
    assert!(resp.text().contains("Beacon"));
}

#[tokio::test]
async fn signature_login_mints_a_usable_token() {
    let hub = test_hub();
    let key = SigningKey::generate(&mut rand::rngs::OsRng);
    let challenge = b"login-challenge";
    let signature = key.sign(challenge);

    let resp = hub
        .server
        .post("/v1/auth")
        .json(&json!({
            "publicKey": BASE64.encode(key.verifying_key().as_bytes()),
            "challenge": BASE64.encode(challenge),
            "signature": BASE64.encode(signature.to_bytes()),
        }))
        .await;
    resp.assert_status_ok();
    let body: Value = resp.json();
    assert_eq!(body["success"], true);
    let token = body["token"].as_str().unwrap().to_string();

    // The minted token opens the protected API.
    let resp = hub
        .server
        .get("/v1/sessions")
        .add_header("authorization", bearer(&token))
        .await;
    resp.assert_status_ok();

    // A bad signature is rejected.
    let resp = hub
        .server
        .post("/v1/auth")
        .json(&json!({
            "publicKey": BASE64.encode(key.verifying_key().as_bytes()),
            "challenge": BASE64.encode(b"other"),
            "signature": BASE64.encode(signature.to_bytes()),
        }))
        .await;
    resp.assert_status_unauthorized();
}

#[tokio::test]
async fn protected_routes_require_bearer_token() {
    let hub = test_hub();
    hub.server.get("/v1/sessions").await.assert_status_unauthorized();
    hub.server
        .get("/v1/machines")
        .add_header("authorization", "Basic nope")
        .await
        .assert_status_unauthorized();
    hub.server
        .get("/v1/account/settings")
        .add_header("authorization", bearer("garbage"))
        .await
        .assert_status_unauthorized();
}

#[tokio::test]
async fn auth_request_pairing_flow() {
    let hub = test_hub();

    let resp = hub
        .server
        .post("/v1/auth/request")
        .json(&json!({ "publicKey": "device-pk", "supportsV2": true }))
        .await;
    resp.assert_status_ok();
    let body: Value = resp.json();
    assert_eq!(body["state"], "requested");
    assert_eq!(body["supportsV2"], true);

    let resp = hub
        .server
        .get("/v1/auth/request/status")
        .add_query_param("publicKey", "device-pk")
        .await;
    let body: Value = resp.json();
    assert_eq!(body["status"], "pending");

    // An authenticated device approves the request.
    let approver = hub.tokens.create_token("approver-user").unwrap();
    let resp = hub
        .server
        .post("/v1/auth/response")
        .add_header("authorization", bearer(&approver))
        .json(&json!({ "publicKey": "device-pk", "response": "enc-response" }))
        .await;
    resp.assert_status_ok();

    // Polling again returns the stored token and response.
    let resp = hub
        .server
        .post("/v1/auth/request")
        .json(&json!({ "publicKey": "device-pk" }))
        .await;
    let body: Value = resp.json();
    assert_eq!(body["state"], "authorized");
    assert_eq!(body["response"], "enc-response");
    assert_eq!(body["supportsV2"], true);
    assert!(body["token"].as_str().is_some_and(|t| !t.is_empty()));

    // Approving an unknown key 404s.
    let resp = hub
        .server
        .post("/v1/auth/response")
        .add_header("authorization", bearer(&approver))
        .json(&json!({ "publicKey": "nobody", "response": "r" }))
        .await;
    resp.assert_status_not_found();
}

#[tokio::test]
async fn auth_request_creation_is_rate_limited() {
    let hub = test_hub();
    for i in 0..10 {
        hub.server
            .post("/v1/auth/request")
            .json(&json!({ "publicKey": format!("pk-{i}") }))
            .await
            .assert_status_ok();
    }
    // The 11th fresh key in the window is denied...
    hub.server
        .post("/v1/auth/request")
        .json(&json!({ "publicKey": "pk-overflow" }))
        .await
        .assert_status(axum::http::StatusCode::TOO_MANY_REQUESTS);
    // ...but polling an existing request is not.
    hub.server
        .post("/v1/auth/request")
        .json(&json!({ "publicKey": "pk-3" }))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn session_lifecycle_over_rest() {
    let hub = test_hub();
    let token = hub.tokens.create_token("user-1").unwrap();

    let resp = hub
        .server
        .post("/v1/sessions")
        .add_header("authorization", bearer(&token))
        .json(&json!({ "tag": "laptop", "metadata": "enc-meta" }))
        .await;
    resp.assert_status_ok();
    let body: Value = resp.json();
    let session = &body["session"];
    assert_eq!(session["metadataVersion"], 1);
    assert_eq!(session["agentStateVersion"], 0);
    let sid = session["id"].as_str().unwrap().to_string();

    // Seed two messages and read them back through the history endpoint.
    hub.store.append_message("user-1", &sid, "c1", 1).unwrap();
    hub.store.append_message("user-1", &sid, "c2", 2).unwrap();

    let resp = hub
        .server
        .get(&format!("/v1/sessions/{sid}/messages"))
        .add_header("authorization", bearer(&token))
        .add_query_param("after", "1")
        .await;
    resp.assert_status_ok();
    let body: Value = resp.json();
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["seq"], 2);
    assert_eq!(messages[0]["content"]["t"], "encrypted");
    assert_eq!(messages[0]["content"]["c"], "c2");

    // A non-numeric cursor is rejected, not treated as zero.
    let resp = hub
        .server
        .get(&format!("/v1/sessions/{sid}/messages"))
        .add_header("authorization", bearer(&token))
        .add_query_param("after", "abc")
        .await;
    resp.assert_status_bad_request();
    let body: Value = resp.json();
    assert_eq!(body["error"], "Invalid cursor format");

    let resp = hub
        .server
        .delete(&format!("/v1/sessions/{sid}"))
        .add_header("authorization", bearer(&token))
        .await;
    resp.assert_status_ok();

    let resp = hub
        .server
        .get("/v1/sessions")
        .add_header("authorization", bearer(&token))
        .await;
    let body: Value = resp.json();
    assert!(body["sessions"].as_array().unwrap().is_empty());

    hub.server
        .delete(&format!("/v1/sessions/{sid}"))
        .add_header("authorization", bearer(&token))
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn machine_upsert_rejects_cross_user_ids() {
    let hub = test_hub();
    let token_a = hub.tokens.create_token("user-a").unwrap();
    let token_b = hub.tokens.create_token("user-b").unwrap();

    let resp = hub
        .server
        .post("/v1/machines")
        .add_header("authorization", bearer(&token_a))
        .json(&json!({ "id": "m-1", "metadata": "enc" }))
        .await;
    resp.assert_status_ok();

    let resp = hub
        .server
        .post("/v1/machines")
        .add_header("authorization", bearer(&token_b))
        .json(&json!({ "id": "m-1", "metadata": "stolen" }))
        .await;
    resp.assert_status_forbidden();
    let body: Value = resp.json();
    assert_eq!(body["error"], "machine belongs to another user");

    // Owner state is untouched and invisible to the other user.
    let resp = hub
        .server
        .get("/v1/machines")
        .add_header("authorization", bearer(&token_a))
        .await;
    let body: Value = resp.json();
    assert_eq!(body["machines"][0]["metadata"], "enc");

    let resp = hub
        .server
        .get("/v1/machines")
        .add_header("authorization", bearer(&token_b))
        .await;
    let body: Value = resp.json();
    assert!(body["machines"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn artifact_update_is_all_or_nothing() {
    let hub = test_hub();
    let token = hub.tokens.create_token("user-1").unwrap();

    let resp = hub
        .server
        .post("/v1/artifacts")
        .add_header("authorization", bearer(&token))
        .json(&json!({ "id": "a1", "header": "h", "body": "b", "dataEncryptionKey": "dek" }))
        .await;
    resp.assert_status_ok();

    // Stale body version aborts the header change too.
    let resp = hub
        .server
        .post("/v1/artifacts/a1")
        .add_header("authorization", bearer(&token))
        .json(&json!({
            "header": "h2", "expectedHeaderVersion": 1,
            "body": "b2", "expectedBodyVersion": 9,
        }))
        .await;
    resp.assert_status_ok();
    let body: Value = resp.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "version-mismatch");
    assert_eq!(body["currentHeaderVersion"], 1);
    assert_eq!(body["currentHeader"], "h");

    let resp = hub
        .server
        .post("/v1/artifacts/a1")
        .add_header("authorization", bearer(&token))
        .json(&json!({ "header": "h2", "expectedHeaderVersion": 1 }))
        .await;
    let body: Value = resp.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["headerVersion"], 2);

    let resp = hub
        .server
        .get("/v1/artifacts/a1")
        .add_header("authorization", bearer(&token))
        .await;
    let body: Value = resp.json();
    assert_eq!(body["header"], "h2");
    assert_eq!(body["bodyVersion"], 1);

    hub.server
        .delete("/v1/artifacts/a1")
        .add_header("authorization", bearer(&token))
        .await
        .assert_status_ok();
    hub.server
        .get("/v1/artifacts/a1")
        .add_header("authorization", bearer(&token))
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn account_settings_cas_over_rest() {
    let hub = test_hub();
    let token = hub.tokens.create_token("user-1").unwrap();

    let resp = hub
        .server
        .get("/v1/account/settings")
        .add_header("authorization", bearer(&token))
        .await;
    let body: Value = resp.json();
    assert_eq!(body["settingsVersion"], 0);
    assert_eq!(body["settings"], Value::Null);

    let resp = hub
        .server
        .post("/v1/account/settings")
        .add_header("authorization", bearer(&token))
        .json(&json!({ "settings": "enc-settings", "expectedVersion": 0 }))
        .await;
    let body: Value = resp.json();
    assert_eq!(body["success"], true);

    let resp = hub
        .server
        .post("/v1/account/settings")
        .add_header("authorization", bearer(&token))
        .json(&json!({ "settings": "other", "expectedVersion": 0 }))
        .await;
    let body: Value = resp.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "version-mismatch");
    assert_eq!(body["currentVersion"], 1);
    assert_eq!(body["currentSettings"], "enc-settings");
}

#[tokio::test]
async fn version_check_is_public() {
    let hub = test_hub();
    let resp = hub.server.post("/v1/version").json(&json!({})).await;
    resp.assert_status_ok();
    let body: Value = resp.json();
    assert_eq!(body["update_required"], false);
}
