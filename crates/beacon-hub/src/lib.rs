pub mod auth;
pub mod config;
pub mod hub;
pub mod ratelimit;
pub mod socketio;
pub mod store;
pub mod web;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use auth::TokenService;
use config::Config;
use hub::FeedHub;
use ratelimit::RateLimiter;
use socketio::RealtimeServer;
use store::{Store, StoreOptions};
use web::AppState;

const AUTH_REQUEST_LIMIT: u32 = 10;
const AUTH_REQUEST_WINDOW: Duration = Duration::from_secs(60);
const TOKEN_ISSUER: &str = "beacon";

/// Wire everything together and build the full application router. Shared
/// with the integration tests, which bind their own listener.
pub fn build_app(config: &Config) -> (Router, Arc<RealtimeServer>) {
    let store = Arc::new(Store::with_options(StoreOptions {
        machines_state_file: config.machines_state_file.clone(),
    }));
    let tokens = Arc::new(TokenService::new(
        config.master_secret.clone(),
        config.token_expiry,
        TOKEN_ISSUER,
    ));

    let limiter = RateLimiter::new(AUTH_REQUEST_LIMIT, AUTH_REQUEST_WINDOW);
    let feed = Arc::new(FeedHub::new());
    let realtime = Arc::new(RealtimeServer::new(store.clone(), tokens.clone()));

    let state = AppState {
        store,
        tokens,
        auth_request_limiter: limiter,
        feed,
    };

    let app = web::build_router(state).merge(socketio::server::router(realtime.clone()));
    (app, realtime)
}

pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let (app, realtime) = build_app(&config);

    if let Some(path) = &config.machines_state_file {
        info!(path = %path.display(), "machines persistence enabled");
    }

    let service = app.into_make_service_with_connect_info::<SocketAddr>();
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "listening");

    axum::serve(listener, service)
        .with_graceful_shutdown({
            let realtime = realtime.clone();
            async move {
                shutdown_signal().await;
                info!("closing realtime connections");
                realtime.close_all();
            }
        })
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        signal(SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
