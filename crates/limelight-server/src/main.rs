use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, WebSocketUpgrade},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use limelight_api::middleware::require_auth;
use limelight_api::routes::{self, AppState, AppStateInner};
use limelight_game::GameEngine;
use limelight_gateway::{Dispatcher, connection};
use limelight_types::chat::ChatEvent;

mod commands;
mod dispatch;
mod notifier;

use dispatch::{BotContext, EventDispatcher};
use notifier::LogNotifier;

#[derive(Clone)]
struct ServerState {
    events: Arc<EventDispatcher>,
    dispatcher: Dispatcher,
    db: Arc<limelight_db::Database>,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "limelight=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("LIMELIGHT_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("LIMELIGHT_DB_PATH").unwrap_or_else(|_| "limelight.db".into());
    let host = std::env::var("LIMELIGHT_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("LIMELIGHT_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    let db = Arc::new(limelight_db::Database::open(&PathBuf::from(&db_path))?);

    let dispatcher = Dispatcher::new();
    let engine = GameEngine::new(db.clone(), dispatcher.clone(), Arc::new(LogNotifier));

    // Reconstruct turn deadlines before accepting any events; overdue ones
    // fire right here.
    let rebuild_engine = engine.clone();
    let restored =
        tokio::task::spawn_blocking(move || rebuild_engine.rebuild_from_durable_state()).await??;
    info!("restored {restored} turn deadlines");

    let events = Arc::new(commands::build_dispatcher(BotContext {
        engine,
        jwt_secret: jwt_secret.clone(),
    }));

    let app_state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        jwt_secret: jwt_secret.clone(),
    });

    let state = ServerState {
        events,
        dispatcher,
        db,
        jwt_secret,
    };

    let public_routes = Router::new()
        .route("/health", get(routes::health))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/validate", get(routes::validate))
        .route("/client-secret", get(routes::client_secret))
        .route("/turn-status", get(routes::turn_status))
        .route("/summary", get(routes::summary))
        .layer(middleware::from_fn(require_auth))
        .with_state(app_state);

    let event_routes = Router::new()
        .route("/ingest", post(ingest))
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(event_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Limelight listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Chat-platform adapter posts parsed events here.
async fn ingest(
    State(state): State<ServerState>,
    Json(event): Json<ChatEvent>,
) -> impl IntoResponse {
    state.events.dispatch(event);
    StatusCode::ACCEPTED
}

async fn ws_upgrade(State(state): State<ServerState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.dispatcher, state.db, state.jwt_secret)
    })
}
