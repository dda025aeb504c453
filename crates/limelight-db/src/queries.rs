use std::collections::HashMap;

use anyhow::Result;
use rusqlite::Connection;

use crate::models::{GameRow, OpenTurnRow, ParticipantRow, SummaryRow, TurnRow};

// Free functions over a connection so they compose inside `Database::with_tx`
// next to ledger appends; `Database::with_conn` wraps them for one-shot reads.

// -- Users --

pub fn upsert_user(conn: &Connection, id: &str, name: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO user (id, name) VALUES (?1, ?2)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name",
        (id, name),
    )?;
    Ok(())
}

pub fn has_user(conn: &Connection, id: &str) -> Result<bool> {
    let mut stmt = conn.prepare("SELECT 1 FROM user WHERE id = ?1")?;
    Ok(stmt.exists([id])?)
}

pub fn user_names(conn: &Connection, ids: &[String]) -> Result<HashMap<String, String>> {
    let mut names = HashMap::new();
    let mut stmt = conn.prepare("SELECT name FROM user WHERE id = ?1")?;
    for id in ids {
        match stmt.query_row([id], |row| row.get::<_, String>(0)) {
            Ok(name) => {
                names.insert(id.clone(), name);
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(names)
}

pub fn display_name(conn: &Connection, id: &str) -> Result<String> {
    let mut stmt = conn.prepare("SELECT name FROM user WHERE id = ?1")?;
    match stmt.query_row([id], |row| row.get::<_, String>(0)) {
        Ok(name) => Ok(name),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(id.to_string()),
        Err(e) => Err(e.into()),
    }
}

// -- Rooms --

pub fn upsert_room(conn: &Connection, id: &str, channel_id: &str, started_at: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO room (id, channel_id, started_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET channel_id = excluded.channel_id
         WHERE excluded.channel_id != 'UNKNOWN'",
        (id, channel_id, started_at),
    )?;
    Ok(())
}

pub fn add_room_member(conn: &Connection, room_id: &str, user_id: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO room_member (room_id, user_id) VALUES (?1, ?2)",
        (room_id, user_id),
    )?;
    Ok(())
}

pub fn remove_room_member(conn: &Connection, room_id: &str, user_id: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM room_member WHERE room_id = ?1 AND user_id = ?2",
        (room_id, user_id),
    )?;
    Ok(())
}

/// Rooms the user is currently present in. Normally at most one.
pub fn rooms_for_user(conn: &Connection, user_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT room_id FROM room_member WHERE user_id = ?1")?;
    let rows = stmt
        .query_map([user_id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn room_members(conn: &Connection, room_id: &str) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT user_id FROM room_member WHERE room_id = ?1 ORDER BY user_id")?;
    let rows = stmt
        .query_map([room_id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// -- Games --

pub fn insert_game(
    conn: &Connection,
    room_id: &str,
    channel_id: &str,
    thread_id: &str,
    started_at: &str,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO game (room_id, channel_id, thread_id, status, started_at)
         VALUES (?1, ?2, ?3, 'ACTIVE', ?4)",
        (room_id, channel_id, thread_id, started_at),
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn game_by_id(conn: &Connection, game_id: i64) -> Result<Option<GameRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, room_id, channel_id, thread_id, status, started_at, ended_at
         FROM game WHERE id = ?1",
    )?;
    let row = stmt.query_row([game_id], |row| {
        Ok(GameRow {
            id: row.get(0)?,
            room_id: row.get(1)?,
            channel_id: row.get(2)?,
            thread_id: row.get(3)?,
            status: row.get(4)?,
            started_at: row.get(5)?,
            ended_at: row.get(6)?,
        })
    });
    match row {
        Ok(game) => Ok(Some(game)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Terminal statuses are sticky: the guard refuses to overwrite them.
pub fn set_game_status(
    conn: &Connection,
    game_id: i64,
    status: &str,
    ended_at: &str,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE game SET status = ?1, ended_at = ?2 WHERE id = ?3 AND status = 'ACTIVE'",
        (status, ended_at, game_id),
    )?;
    Ok(changed == 1)
}

pub fn active_game_in_room(conn: &Connection, room_id: &str) -> Result<Option<i64>> {
    opt_id(conn, "SELECT id FROM game WHERE room_id = ?1 AND status = 'ACTIVE' LIMIT 1", room_id)
}

pub fn active_game_by_thread(
    conn: &Connection,
    channel_id: &str,
    thread_id: &str,
) -> Result<Option<i64>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM game WHERE channel_id = ?1 AND thread_id = ?2 AND status = 'ACTIVE'
         LIMIT 1",
    )?;
    let row = stmt.query_row((channel_id, thread_id), |row| row.get(0));
    match row {
        Ok(id) => Ok(Some(id)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Any game (also ended ones), for summary/history in finished threads.
pub fn any_game_by_thread(
    conn: &Connection,
    channel_id: &str,
    thread_id: &str,
) -> Result<Option<i64>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM game WHERE channel_id = ?1 AND thread_id = ?2
         ORDER BY id DESC LIMIT 1",
    )?;
    let row = stmt.query_row((channel_id, thread_id), |row| row.get(0));
    match row {
        Ok(id) => Ok(Some(id)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn opt_id(conn: &Connection, sql: &str, param: &str) -> Result<Option<i64>> {
    let mut stmt = conn.prepare(sql)?;
    let row = stmt.query_row([param], |row| row.get(0));
    match row {
        Ok(id) => Ok(Some(id)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

// -- Managers --

pub fn add_manager(conn: &Connection, game_id: i64, user_id: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO game_manager (game_id, user_id) VALUES (?1, ?2)",
        (game_id, user_id),
    )?;
    Ok(())
}

pub fn remove_manager(conn: &Connection, game_id: i64, user_id: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM game_manager WHERE game_id = ?1 AND user_id = ?2",
        (game_id, user_id),
    )?;
    Ok(())
}

pub fn is_manager(conn: &Connection, game_id: i64, user_id: &str) -> Result<bool> {
    let mut stmt =
        conn.prepare("SELECT 1 FROM game_manager WHERE game_id = ?1 AND user_id = ?2")?;
    Ok(stmt.exists((game_id, user_id))?)
}

pub fn managers(conn: &Connection, game_id: i64) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT user_id FROM game_manager WHERE game_id = ?1 ORDER BY user_id")?;
    let rows = stmt
        .query_map([game_id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// The ACTIVE game this user manages, if any. Dashboard credentials are
/// scoped to exactly this game.
pub fn manager_active_game(conn: &Connection, user_id: &str) -> Result<Option<i64>> {
    let mut stmt = conn.prepare(
        "SELECT g.id FROM game_manager gm
         JOIN game g ON g.id = gm.game_id
         WHERE gm.user_id = ?1 AND g.status = 'ACTIVE'
         LIMIT 1",
    )?;
    let row = stmt.query_row([user_id], |row| row.get(0));
    match row {
        Ok(id) => Ok(Some(id)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// True if the user manages any ACTIVE game at all.
pub fn manages_some_active_game(conn: &Connection, user_id: &str) -> Result<bool> {
    Ok(manager_active_game(conn, user_id)?.is_some())
}

// -- Participants --

pub fn ensure_participant(conn: &Connection, game_id: i64, user_id: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO game_participant (game_id, user_id) VALUES (?1, ?2)",
        (game_id, user_id),
    )?;
    Ok(())
}

pub fn set_opted_out(conn: &Connection, game_id: i64, user_id: &str, opted_out: bool) -> Result<()> {
    conn.execute(
        "UPDATE game_participant SET opted_out = ?1 WHERE game_id = ?2 AND user_id = ?3",
        (opted_out, game_id, user_id),
    )?;
    Ok(())
}

pub fn record_turn_success(conn: &Connection, game_id: i64, user_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE game_participant
         SET successful_rounds = successful_rounds + 1, consecutive_skips = 0
         WHERE game_id = ?1 AND user_id = ?2",
        (game_id, user_id),
    )?;
    Ok(())
}

pub fn record_turn_skip(conn: &Connection, game_id: i64, user_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE game_participant
         SET consecutive_skips = consecutive_skips + 1
         WHERE game_id = ?1 AND user_id = ?2",
        (game_id, user_id),
    )?;
    Ok(())
}

/// Progress-tracking fields, maintained by the surrounding application
/// rather than the turn flow.
pub fn set_progress(
    conn: &Connection,
    game_id: i64,
    user_id: &str,
    baseline: Option<f64>,
    current: Option<f64>,
    external_resource_id: Option<&str>,
) -> Result<()> {
    conn.execute(
        "UPDATE game_participant
         SET baseline_measure = ?1, current_measure = ?2, external_resource_id = ?3
         WHERE game_id = ?4 AND user_id = ?5",
        (baseline, current, external_resource_id, game_id, user_id),
    )?;
    Ok(())
}

pub fn participant(
    conn: &Connection,
    game_id: i64,
    user_id: &str,
) -> Result<Option<ParticipantRow>> {
    let mut stmt = conn.prepare(
        "SELECT game_id, user_id, opted_out, consecutive_skips, successful_rounds,
                baseline_measure, current_measure, external_resource_id
         FROM game_participant WHERE game_id = ?1 AND user_id = ?2",
    )?;
    let row = stmt.query_row((game_id, user_id), |row| {
        Ok(ParticipantRow {
            game_id: row.get(0)?,
            user_id: row.get(1)?,
            opted_out: row.get(2)?,
            consecutive_skips: row.get(3)?,
            successful_rounds: row.get(4)?,
            baseline_measure: row.get(5)?,
            current_measure: row.get(6)?,
            external_resource_id: row.get(7)?,
        })
    });
    match row {
        Ok(p) => Ok(Some(p)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Roster filter for eligibility steps 1-3: everyone present in the game's
/// room, minus opted-out participants and participants with two or more
/// consecutive skips. The recent-activity window (step 4) is applied by
/// the eligibility engine on top of this.
pub fn roster_candidates(conn: &Connection, game_id: i64) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT rm.user_id FROM room_member rm
         JOIN game g ON g.room_id = rm.room_id
         LEFT JOIN game_participant gp
             ON gp.user_id = rm.user_id AND gp.game_id = g.id
         WHERE g.id = ?1
           AND (gp.opted_out IS NULL OR gp.opted_out = 0)
           AND (gp.consecutive_skips IS NULL OR gp.consecutive_skips < 2)
         ORDER BY rm.user_id",
    )?;
    let rows = stmt
        .query_map([game_id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Per-participant stats for the summary views; stats are frozen once the
/// game ends because turns stop mutating.
pub fn summary_stats(conn: &Connection, game_id: i64) -> Result<Vec<SummaryRow>> {
    let mut stmt = conn.prepare(
        "SELECT gp.user_id, COALESCE(u.name, gp.user_id),
                gp.successful_rounds, gp.consecutive_skips
         FROM game_participant gp
         LEFT JOIN user u ON u.id = gp.user_id
         WHERE gp.game_id = ?1
         ORDER BY gp.successful_rounds DESC, gp.user_id",
    )?;
    let rows = stmt
        .query_map([game_id], |row| {
            Ok(SummaryRow {
                user_id: row.get(0)?,
                name: row.get(1)?,
                successful_rounds: row.get(2)?,
                consecutive_skips: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// -- Turns --

fn turn_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TurnRow> {
    Ok(TurnRow {
        id: row.get(0)?,
        game_id: row.get(1)?,
        user_id: row.get(2)?,
        selected_at: row.get(3)?,
        started_at: row.get(4)?,
        assigned_duration_seconds: row.get(5)?,
        status: row.get(6)?,
        timeout_notified: row.get(7)?,
    })
}

const TURN_COLUMNS: &str =
    "id, game_id, user_id, selected_at, started_at, assigned_duration_seconds, \
     status, timeout_notified";

pub fn insert_turn(
    conn: &Connection,
    game_id: i64,
    user_id: &str,
    selected_at: &str,
    duration_seconds: i64,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO turn (game_id, user_id, selected_at, assigned_duration_seconds, status)
         VALUES (?1, ?2, ?3, ?4, 'PENDING')",
        (game_id, user_id, selected_at, duration_seconds),
    )?;
    Ok(conn.last_insert_rowid())
}

/// The one turn (if any) in a non-terminal status. The schema-level
/// invariant "at most one open turn per game" is what guards against
/// duplicate picks under concurrency.
pub fn open_turn(conn: &Connection, game_id: i64) -> Result<Option<TurnRow>> {
    let sql = format!(
        "SELECT {TURN_COLUMNS} FROM turn
         WHERE game_id = ?1 AND status IN ('PENDING', 'IN_PROGRESS', 'ACCEPTED')
         ORDER BY id DESC LIMIT 1"
    );
    let mut stmt = conn.prepare(&sql)?;
    let row = stmt.query_row([game_id], |row| turn_from_row(row));
    match row {
        Ok(turn) => Ok(Some(turn)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Status change with an optimistic guard on the previous status; returns
/// false when someone else already moved the turn.
pub fn set_turn_status(
    conn: &Connection,
    turn_id: i64,
    from_status: &str,
    to_status: &str,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE turn SET status = ?1 WHERE id = ?2 AND status = ?3",
        (to_status, turn_id, from_status),
    )?;
    Ok(changed == 1)
}

pub fn mark_turn_started(conn: &Connection, turn_id: i64, started_at: &str) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE turn SET status = 'IN_PROGRESS', started_at = ?1
         WHERE id = ?2 AND status = 'PENDING'",
        (started_at, turn_id),
    )?;
    Ok(changed == 1)
}

pub fn set_timeout_notified(conn: &Connection, turn_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE turn SET timeout_notified = 1 WHERE id = ?1",
        [turn_id],
    )?;
    Ok(())
}

/// Full turn history, oldest first.
pub fn turns_for_game(conn: &Connection, game_id: i64) -> Result<Vec<TurnRow>> {
    let sql = format!(
        "SELECT {TURN_COLUMNS} FROM turn WHERE game_id = ?1
         ORDER BY selected_at ASC, id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([game_id], |row| turn_from_row(row))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Every open turn across all games, joined with its game's channel and
/// thread. Used once at startup to reconstruct timers.
pub fn open_turns_all_games(conn: &Connection) -> Result<Vec<OpenTurnRow>> {
    let sql = format!(
        "SELECT t.{}, g.channel_id, g.thread_id
         FROM turn t JOIN game g ON g.id = t.game_id
         WHERE t.status IN ('PENDING', 'IN_PROGRESS', 'ACCEPTED')
         ORDER BY t.id ASC",
        TURN_COLUMNS.replace(", ", ", t.")
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(OpenTurnRow {
                turn: turn_from_row(row)?,
                channel_id: row.get(8)?,
                thread_id: row.get(9)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    #[test]
    fn progress_fields_default_to_null_and_round_trip() {
        let db = Database::open_in_memory().unwrap();
        db.with_tx(|tx| {
            let now = "2026-01-01T00:00:00.000000Z";
            upsert_user(tx, "U1", "Uma")?;
            upsert_room(tx, "R1", "C1", now)?;
            let game_id = insert_game(tx, "R1", "C1", "T1", now)?;
            ensure_participant(tx, game_id, "U1")?;

            let row = participant(tx, game_id, "U1")?.unwrap();
            assert!(row.baseline_measure.is_none());
            assert!(row.current_measure.is_none());
            assert!(row.external_resource_id.is_none());

            set_progress(tx, game_id, "U1", Some(82.5), Some(79.1), Some("res-1"))?;
            let row = participant(tx, game_id, "U1")?.unwrap();
            assert_eq!(row.baseline_measure, Some(82.5));
            assert_eq!(row.current_measure, Some(79.1));
            assert_eq!(row.external_resource_id.as_deref(), Some("res-1"));
            Ok(())
        })
        .unwrap();
    }
}
