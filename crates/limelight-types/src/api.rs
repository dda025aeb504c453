use serde::{Deserialize, Serialize};

/// JWT claims for manager dashboard tokens. Canonical definition lives here
/// so limelight-api (REST middleware) and limelight-gateway (WebSocket
/// identify) validate the same shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iss: String,
    pub aud: String,
    pub exp: usize,
    pub iat: usize,
}

pub const TOKEN_ISSUER: &str = "bot";
pub const TOKEN_AUDIENCE: &str = "web";

#[derive(Debug, Serialize, Deserialize)]
pub struct ValidateResponse {
    pub user_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClientSecretResponse {
    pub client_secret: String,
}

/// Snapshot of the managed game's active turn, or `NO_ACTIVE_TURN`.
#[derive(Debug, Serialize, Deserialize)]
pub struct TurnStatusResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    /// Unix seconds when the running turn ends; only for timed states.
    #[serde(rename = "endTime", skip_serializing_if = "Option::is_none")]
    pub end_time: Option<f64>,
}

impl TurnStatusResponse {
    pub fn none() -> Self {
        Self {
            status: "NO_ACTIVE_TURN".to_string(),
            user_id: None,
            user_name: None,
            end_time: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SummaryEntry {
    pub name: String,
    pub successful_rounds: i64,
    pub consecutive_skips: i64,
}
