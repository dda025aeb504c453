use limelight_types::models::TurnStatus;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GameError>;

/// Domain failures. Precondition variants map to a private explanation for
/// the acting user; `Fairness` and `Db` are operator-facing.
#[derive(Debug, Error)]
pub enum GameError {
    #[error("no show has been started in this thread")]
    NotStarted,

    #[error("there is no active show here")]
    NoActiveGame,

    #[error("a show is already running here")]
    GameExists,

    #[error("there is no open turn to act on")]
    NoOpenTurn,

    #[error("a turn is already open for <@{user_id}>")]
    TurnAlreadyOpen { user_id: String },

    #[error("only a show manager can do that")]
    NotManager,

    #[error("it is not your turn")]
    NotYourTurn,

    #[error("nobody is eligible to be picked right now")]
    NoEligible,

    #[error("the last manager cannot leave; use force-leave to end the show")]
    LastManager,

    #[error("turn cannot move from {from:?} to {to:?}")]
    InvalidTransition { from: TurnStatus, to: TurnStatus },

    /// A provable-fairness guarantee would be violated. Never degraded to a
    /// warning; the operation is refused outright.
    #[error("fairness violation: {0}")]
    Fairness(String),

    #[error(transparent)]
    Db(anyhow::Error),
}

impl GameError {
    /// Unwrap a transaction result: domain errors raised inside the closure
    /// come back as themselves, anything else is a storage failure.
    pub fn from_tx(e: anyhow::Error) -> Self {
        match e.downcast::<GameError>() {
            Ok(game) => game,
            Err(other) => GameError::Db(other),
        }
    }
}
