pub mod middleware;
pub mod routes;

use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};

use crate::auth::TokenService;
use crate::hub::FeedHub;
use crate::ratelimit::RateLimiter;
use crate::store::Store;

/// Shared application state passed to all REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub tokens: Arc<TokenService>,
    pub auth_request_limiter: Arc<RateLimiter>,
    pub feed: Arc<FeedHub>,
}

/// Best-effort peer address: present when the server was started with
/// connect info, absent under in-process test transports.
pub struct ClientIp(pub Option<std::net::IpAddr>);

impl<S: Send + Sync> axum::extract::FromRequestParts<S> for ClientIp {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        let addr = parts
            .extensions
            .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
            .map(|info| info.0.ip());
        Ok(Self(addr))
    }
}

/// Build the REST router. The realtime Socket.IO router is merged on top
/// of this by the caller.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any)
        .allow_origin(Any);

    let protected = routes::protected_router().route_layer(axum::middleware::from_fn_with_state(
        state.clone(),
        middleware::auth::require_auth,
    ));

    Router::new()
        .route("/", get(welcome))
        .route("/health", get(health))
        .merge(routes::public_router())
        .merge(protected)
        .layer(cors)
        .with_state(state)
}

async fn welcome() -> &'static str {
    "Welcome to Beacon!"
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}
