use limelight_db::models::GameRow;

/// Where replies for a game land on the chat platform.
#[derive(Debug, Clone)]
pub struct GameRef {
    pub game_id: i64,
    pub channel_id: String,
    pub thread_id: String,
}

impl From<&GameRow> for GameRef {
    fn from(game: &GameRow) -> Self {
        Self {
            game_id: game.id,
            channel_id: game.channel_id.clone(),
            thread_id: game.thread_id.clone(),
        }
    }
}

/// Outbound chat seam. The platform transport lives behind this trait; the
/// engine only decides WHAT to say and to whom.
pub trait Notifier: Send + Sync {
    /// Post into the show thread, visible to everyone.
    fn public(&self, game: &GameRef, text: &str);

    /// Message one user privately.
    fn private(&self, user_id: &str, text: &str);

    /// No manager acted on a fresh pick in time: ask the managers whether
    /// the picked user should be skipped.
    fn prompt_confirm_skip(&self, game: &GameRef, user_id: &str);

    /// A running turn's time expired: ask the managers for a
    /// completed-or-failed decision.
    fn prompt_decision(&self, game: &GameRef, user_id: &str);
}
