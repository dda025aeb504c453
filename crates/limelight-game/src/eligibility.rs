use std::collections::HashSet;

use anyhow::Result;
use rusqlite::Connection;

use limelight_db::queries;
use limelight_types::models::TurnStatus;

/// Who can be picked right now, sorted ascending by user id.
///
/// Filters, in order: the game room's current roster, minus opted-out
/// participants, minus participants with two or more consecutive skips,
/// minus the recent-activity window. The window walks the turn history
/// newest-first, excluding every user it visits, and stops inclusively at
/// the first COMPLETED or FAILED turn; skip-chains between performances
/// therefore keep everyone they touched out of the next draw.
pub fn eligible(conn: &Connection, game_id: i64) -> Result<Vec<String>> {
    let mut candidates = queries::roster_candidates(conn, game_id)?;

    let turns = queries::turns_for_game(conn, game_id)?;
    let mut recently_active = HashSet::new();
    for turn in turns.iter().rev() {
        recently_active.insert(turn.user_id.as_str());
        if matches!(
            turn.status(),
            Some(TurnStatus::Completed | TurnStatus::Failed)
        ) {
            break;
        }
    }

    candidates.retain(|user| !recently_active.contains(user.as_str()));
    Ok(candidates)
}
