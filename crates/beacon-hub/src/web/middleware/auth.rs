use axum::{
    Json,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::auth::TokenVerifier;
use crate::web::AppState;

/// Verified caller identity, stored in request extensions.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: String,
}

/// Bearer-token middleware for the protected API group.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, Response> {
    let Some(token) = extract_bearer_token(&req) else {
        return Err(unauthorized());
    };

    let claims = match state.tokens.verify(&token) {
        Ok(claims) => claims,
        Err(_) => return Err(unauthorized()),
    };

    req.extensions_mut().insert(AuthContext {
        user_id: claims.user_id,
    });
    Ok(next.run(req).await)
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "Invalid authentication token" })),
    )
        .into_response()
}

fn extract_bearer_token(req: &Request) -> Option<String> {
    let header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?;
    let (scheme, token) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return None;
    }
    Some(token.to_string())
}
