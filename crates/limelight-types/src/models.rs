use serde::{Deserialize, Serialize};

/// Lifecycle of a show. Terminal statuses never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameStatus {
    Active,
    Completed,
    Cancelled,
}

impl GameStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(Self::Active),
            "COMPLETED" => Some(Self::Completed),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }
}

/// Lifecycle of a single turn.
///
/// PENDING -> IN_PROGRESS -> ACCEPTED -> {COMPLETED | FAILED};
/// PENDING -> SKIPPED; IN_PROGRESS -> {REJECTED | SKIPPED | COMPLETED | FAILED}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TurnStatus {
    Pending,
    InProgress,
    Accepted,
    Completed,
    Failed,
    Skipped,
    Rejected,
}

impl TurnStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Accepted => "ACCEPTED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
            Self::Rejected => "REJECTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "IN_PROGRESS" => Some(Self::InProgress),
            "ACCEPTED" => Some(Self::Accepted),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            "SKIPPED" => Some(Self::Skipped),
            "REJECTED" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// A turn in a terminal status is immutable.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Skipped | Self::Rejected
        )
    }

    /// Open turns block another pick in the same game.
    pub fn is_open(self) -> bool {
        !self.is_terminal()
    }
}

/// Ledger event types. The `details` payload schema varies by event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerEvent {
    GameStart,
    MsgSent,
    UserSelected,
    ServerSecretUpdate,
    TurnStarted,
    TurnAccepted,
    TurnCompleted,
    TurnFailed,
    TurnSkipped,
    TurnRejected,
    GameCompleted,
    GameCancelled,
}

impl LedgerEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GameStart => "GAME_START",
            Self::MsgSent => "MSG_SENT",
            Self::UserSelected => "USER_SELECTED",
            Self::ServerSecretUpdate => "SERVER_SECRET_UPDATE",
            Self::TurnStarted => "TURN_STARTED",
            Self::TurnAccepted => "TURN_ACCEPTED",
            Self::TurnCompleted => "TURN_COMPLETED",
            Self::TurnFailed => "TURN_FAILED",
            Self::TurnSkipped => "TURN_SKIPPED",
            Self::TurnRejected => "TURN_REJECTED",
            Self::GameCompleted => "GAME_COMPLETED",
            Self::GameCancelled => "GAME_CANCELLED",
        }
    }

    pub fn for_turn(status: TurnStatus) -> Self {
        match status {
            TurnStatus::Pending => Self::UserSelected,
            TurnStatus::InProgress => Self::TurnStarted,
            TurnStatus::Accepted => Self::TurnAccepted,
            TurnStatus::Completed => Self::TurnCompleted,
            TurnStatus::Failed => Self::TurnFailed,
            TurnStatus::Skipped => Self::TurnSkipped,
            TurnStatus::Rejected => Self::TurnRejected,
        }
    }
}
