use serde::{Deserialize, Serialize};

/// Which live feed a push belongs to. Each game has one topic per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    /// Turn lifecycle updates for the dashboard countdown.
    Turn,
    /// Client-secret evolution as thread messages arrive.
    Client,
}

impl FeedKind {
    pub fn topic(self, game_id: i64) -> String {
        match self {
            Self::Turn => format!("turn/{game_id}"),
            Self::Client => format!("client/{game_id}"),
        }
    }
}

/// Payloads sent to live-dashboard subscribers. Delivery is at-most-once;
/// reconnecting clients poll the read API for current state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushPayload {
    TurnUpdate {
        status: String,
        user_id: String,
        user_name: String,
        #[serde(rename = "endTime", skip_serializing_if = "Option::is_none")]
        end_time: Option<f64>,
    },
    Secret {
        value: String,
    },
}

/// An event routed through the gateway dispatcher to topic subscribers.
#[derive(Debug, Clone)]
pub struct PushEvent {
    pub topic: String,
    pub payload: PushPayload,
}

impl PushEvent {
    pub fn turn_update(
        game_id: i64,
        status: &str,
        user_id: &str,
        user_name: &str,
        end_time: Option<f64>,
    ) -> Self {
        Self {
            topic: FeedKind::Turn.topic(game_id),
            payload: PushPayload::TurnUpdate {
                status: status.to_string(),
                user_id: user_id.to_string(),
                user_name: user_name.to_string(),
                end_time,
            },
        }
    }

    pub fn secret(game_id: i64, value: &str) -> Self {
        Self {
            topic: FeedKind::Client.topic(game_id),
            payload: PushPayload::Secret {
                value: value.to_string(),
            },
        }
    }
}

/// Commands sent FROM a dashboard client TO the gateway over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the connection and pick a feed. The server resolves the
    /// game the token's subject manages and scopes the subscription to it.
    Identify { token: String, feed: FeedKind },
}
