//! Database row types, mapping directly to SQLite rows. Kept distinct from
//! the limelight-types API models so the storage layer stays independent.

use limelight_types::models::{GameStatus, TurnStatus};

#[derive(Debug, Clone)]
pub struct GameRow {
    pub id: i64,
    pub room_id: String,
    pub channel_id: String,
    pub thread_id: String,
    pub status: String,
    pub started_at: String,
    pub ended_at: Option<String>,
}

impl GameRow {
    pub fn status(&self) -> Option<GameStatus> {
        GameStatus::parse(&self.status)
    }
}

#[derive(Debug, Clone)]
pub struct TurnRow {
    pub id: i64,
    pub game_id: i64,
    pub user_id: String,
    pub selected_at: String,
    pub started_at: Option<String>,
    pub assigned_duration_seconds: i64,
    pub status: String,
    pub timeout_notified: bool,
}

impl TurnRow {
    pub fn status(&self) -> Option<TurnStatus> {
        TurnStatus::parse(&self.status)
    }
}

#[derive(Debug, Clone)]
pub struct ParticipantRow {
    pub game_id: i64,
    pub user_id: String,
    pub opted_out: bool,
    pub consecutive_skips: i64,
    pub successful_rounds: i64,
    pub baseline_measure: Option<f64>,
    pub current_measure: Option<f64>,
    pub external_resource_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SummaryRow {
    pub user_id: String,
    pub name: String,
    pub successful_rounds: i64,
    pub consecutive_skips: i64,
}

#[derive(Debug, Clone)]
pub struct LedgerRow {
    pub id: i64,
    pub hash: String,
    pub previous_hash: Option<String>,
    pub timestamp: String,
    pub event_type: String,
    pub game_id: i64,
    pub user_id: Option<String>,
    pub details: Option<String>,
    pub client_secret: String,
    pub server_secret: String,
}

/// An open turn joined with its game's channel/thread, used to rebuild
/// timers after a restart.
#[derive(Debug, Clone)]
pub struct OpenTurnRow {
    pub turn: TurnRow,
    pub channel_id: String,
    pub thread_id: String,
}
