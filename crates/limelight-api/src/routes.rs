use std::sync::Arc;

use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::DateTime;
use tracing::error;

use limelight_db::models::TurnRow;
use limelight_db::{Database, ledger, queries};
use limelight_types::api::{
    Claims, ClientSecretResponse, SummaryEntry, TurnStatusResponse, ValidateResponse,
};
use limelight_types::models::TurnStatus;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
}

/// Run blocking database work off the async handler thread.
async fn with_db<T, F>(state: &AppState, f: F) -> Result<T, StatusCode>
where
    T: Send + 'static,
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
{
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| {
            error!("database task panicked: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("database error: {e:#}");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

/// The one active game the token's subject manages, or 404.
fn managed_game(db: &Database, user_id: &str) -> anyhow::Result<Option<i64>> {
    db.with_conn(|conn| queries::manager_active_game(conn, user_id))
}

fn running_end_time(turn: &TurnRow) -> Option<f64> {
    let started = DateTime::parse_from_rfc3339(turn.started_at.as_deref()?).ok()?;
    let deadline = started + chrono::Duration::seconds(turn.assigned_duration_seconds);
    Some(deadline.timestamp_millis() as f64 / 1000.0)
}

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

pub async fn validate(Extension(claims): Extension<Claims>) -> impl IntoResponse {
    Json(ValidateResponse {
        user_id: claims.sub,
    })
}

pub async fn client_secret(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let user_id = claims.sub;
    let secret = with_db(&state, move |db| {
        let Some(game_id) = managed_game(db, &user_id)? else {
            return Ok(None);
        };
        db.with_conn(|conn| ledger::latest_secrets(conn, game_id))
            .map(|secrets| secrets.map(|(client, _)| client))
    })
    .await?;

    match secret {
        Some(client_secret) => Ok(Json(ClientSecretResponse { client_secret })),
        None => Err(StatusCode::NOT_FOUND),
    }
}

pub async fn turn_status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let user_id = claims.sub;
    let status = with_db(&state, move |db| {
        let Some(game_id) = managed_game(db, &user_id)? else {
            return Ok(None);
        };
        db.with_conn(|conn| {
            let Some(turn) = queries::open_turn(conn, game_id)? else {
                return Ok(Some(TurnStatusResponse::none()));
            };
            let user_name = queries::display_name(conn, &turn.user_id)?;
            let end_time = match turn.status() {
                Some(TurnStatus::InProgress | TurnStatus::Accepted) => running_end_time(&turn),
                _ => None,
            };
            Ok(Some(TurnStatusResponse {
                status: turn.status.clone(),
                user_id: Some(turn.user_id),
                user_name: Some(user_name),
                end_time,
            }))
        })
    })
    .await?;

    match status {
        Some(status) => Ok(Json(status)),
        None => Err(StatusCode::NOT_FOUND),
    }
}

pub async fn summary(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let user_id = claims.sub;
    let rows = with_db(&state, move |db| {
        let Some(game_id) = managed_game(db, &user_id)? else {
            return Ok(None);
        };
        db.with_conn(|conn| queries::summary_stats(conn, game_id))
            .map(Some)
    })
    .await?;

    match rows {
        Some(rows) => Ok(Json(
            rows.into_iter()
                .map(|row| SummaryEntry {
                    name: row.name,
                    successful_rounds: row.successful_rounds,
                    consecutive_skips: row.consecutive_skips,
                })
                .collect::<Vec<_>>(),
        )),
        None => Err(StatusCode::NOT_FOUND),
    }
}
