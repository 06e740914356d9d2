mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use parley_api::AppStateInner;
use parley_gateway::Services;
use parley_gateway::auth::TokenValidator;
use parley_gateway::connection;
use parley_gateway::dispatcher::Dispatcher;

use crate::config::Config;

#[derive(Debug, Deserialize)]
struct GatewayParams {
    /// Lets browsers authenticate at upgrade time; otherwise the client
    /// sends `session:identify` first.
    token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    if config.uses_placeholder_secret() {
        warn!("PARLEY_JWT_SECRET is unset or still a placeholder; tokens are forgeable");
    }

    // Init database
    let db = Arc::new(parley_db::Database::open(&config.db_path)?);
    info!("Database ready at {}", config.db_path.display());

    // Shared state
    let services = Arc::new(Services::new(db));
    let dispatcher = Dispatcher::new(
        services,
        TokenValidator::new(&config.jwt_secret),
        config.dispatcher(),
    );
    let sweeper = tokio::spawn(dispatcher.clone().run_typing_sweeper());

    // Routes
    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(dispatcher.clone());

    let app = Router::new()
        .merge(parley_api::router(AppStateInner::new(dispatcher)))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Parley server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    info!("Parley server stopped");
    Ok(())
}

async fn ws_upgrade(
    State(dispatcher): State<Dispatcher>,
    Query(params): Query<GatewayParams>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher, params.token))
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
