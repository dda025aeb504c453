use limelight_game::{GameRef, Notifier};
use tracing::info;

/// Notifier that writes every outbound message to the log. The production
/// deployment swaps this for the chat-platform adapter; all engine and
/// command code goes through the `Notifier` trait either way.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn public(&self, game: &GameRef, text: &str) {
        info!(
            "[public {}/{}] {text}",
            game.channel_id, game.thread_id
        );
    }

    fn private(&self, user_id: &str, text: &str) {
        info!("[private -> {user_id}] {text}");
    }

    fn prompt_confirm_skip(&self, game: &GameRef, user_id: &str) {
        info!(
            "[prompt {}/{}] no manager action for <@{user_id}> - skip them? (confirm_skip)",
            game.channel_id, game.thread_id
        );
    }

    fn prompt_decision(&self, game: &GameRef, user_id: &str) {
        info!(
            "[prompt {}/{}] time is up for <@{user_id}> - completed or failed? \
             (turn_completed / turn_failed)",
            game.channel_id, game.thread_id
        );
    }
}
