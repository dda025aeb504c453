use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS user (
            id    TEXT PRIMARY KEY,
            name  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS room (
            id          TEXT PRIMARY KEY,
            channel_id  TEXT NOT NULL,
            started_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS room_member (
            room_id  TEXT NOT NULL REFERENCES room(id),
            user_id  TEXT NOT NULL REFERENCES user(id),
            UNIQUE(room_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS game (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            room_id     TEXT NOT NULL REFERENCES room(id),
            channel_id  TEXT NOT NULL,
            thread_id   TEXT NOT NULL,
            status      TEXT NOT NULL DEFAULT 'ACTIVE',
            started_at  TEXT NOT NULL,
            ended_at    TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_game_room_status
            ON game(room_id, status);
        CREATE INDEX IF NOT EXISTS idx_game_thread
            ON game(channel_id, thread_id);

        CREATE TABLE IF NOT EXISTS game_manager (
            game_id  INTEGER NOT NULL REFERENCES game(id),
            user_id  TEXT NOT NULL REFERENCES user(id),
            UNIQUE(game_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS game_participant (
            game_id               INTEGER NOT NULL REFERENCES game(id),
            user_id               TEXT NOT NULL REFERENCES user(id),
            opted_out             INTEGER NOT NULL DEFAULT 0,
            consecutive_skips     INTEGER NOT NULL DEFAULT 0,
            successful_rounds     INTEGER NOT NULL DEFAULT 0,
            -- Optional progress tracking, filled in by the application.
            baseline_measure      REAL,
            current_measure       REAL,
            external_resource_id  TEXT,
            UNIQUE(game_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS turn (
            id                         INTEGER PRIMARY KEY AUTOINCREMENT,
            game_id                    INTEGER NOT NULL REFERENCES game(id),
            user_id                    TEXT NOT NULL REFERENCES user(id),
            selected_at                TEXT NOT NULL,
            started_at                 TEXT,
            assigned_duration_seconds  INTEGER NOT NULL,
            status                     TEXT NOT NULL DEFAULT 'PENDING',
            timeout_notified           INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_turn_game_status
            ON turn(game_id, status);

        -- Append-only hash chain. Rows are never updated or deleted;
        -- ordering key is (timestamp, id), latest = highest id.
        CREATE TABLE IF NOT EXISTS ledger (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            hash           TEXT NOT NULL UNIQUE,
            previous_hash  TEXT,
            timestamp      TEXT NOT NULL,
            event_type     TEXT NOT NULL,
            game_id        INTEGER NOT NULL REFERENCES game(id),
            user_id        TEXT,
            details        TEXT,
            client_secret  TEXT NOT NULL,
            server_secret  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_ledger_game
            ON ledger(game_id, timestamp, id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
