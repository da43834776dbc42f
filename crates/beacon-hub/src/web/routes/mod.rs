pub mod account;
pub mod artifacts;
pub mod auth;
pub mod compat;
pub mod machines;
pub mod sessions;
pub mod stream;

use axum::Router;

use crate::web::AppState;

/// Endpoints reachable without a bearer token. The legacy `/ws` stream
/// authenticates from its query string instead.
pub fn public_router() -> Router<AppState> {
    Router::new()
        .merge(auth::public_router())
        .merge(compat::public_router())
        .merge(stream::router())
}

/// Endpoints behind the bearer-token middleware.
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .merge(auth::router())
        .merge(account::router())
        .merge(sessions::router())
        .merge(machines::router())
        .merge(artifacts::router())
        .merge(compat::router())
}
