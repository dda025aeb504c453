//! Append-only, hash-chained audit log.
//!
//! Every state transition that affects fairness lands here, together with
//! the (client_secret, server_secret) pair active at that moment. The pair
//! on the latest row is the sole authoritative secret state. The chain is
//! tamper evidence for honest-but-mutually-distrusting parties, not
//! consensus: a writer with full storage access can refabricate it.

use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use rusqlite::Connection;
use thiserror::Error;

use limelight_rand::digest::sha3_hex_bytes;
use limelight_types::models::LedgerEvent;

use crate::models::LedgerRow;

/// Version tag of the canonical hash-input encoding. Bump on any layout
/// change; verifiers select the recompute rule by it.
const ENCODING_TAG: &[u8] = b"lledger.v1";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChainViolation {
    #[error("row {index}: genesis row must have no previous hash")]
    GenesisHasPrevious { index: usize },
    #[error("row {index}: previous_hash does not match the prior row")]
    BrokenLink { index: usize },
    #[error("row {index}: stored hash does not match recomputed hash")]
    HashMismatch { index: usize },
}

/// Canonical, unambiguous serialization of the hashed fields: a version
/// tag, then per field a presence byte and a u32 big-endian length prefix
/// before the raw bytes. No two distinct field tuples share a preimage,
/// unlike plain concatenation.
fn canonical_input(
    previous_hash: Option<&str>,
    event_type: &str,
    game_id: i64,
    user_id: Option<&str>,
    details: Option<&str>,
    client_secret: &str,
    server_secret: &str,
    timestamp: &str,
) -> Vec<u8> {
    let game_id = game_id.to_string();
    let fields: [Option<&str>; 8] = [
        previous_hash,
        Some(event_type),
        Some(&game_id),
        user_id,
        details,
        Some(client_secret),
        Some(server_secret),
        Some(timestamp),
    ];

    let mut buf = Vec::with_capacity(256);
    buf.extend_from_slice(ENCODING_TAG);
    for field in fields {
        match field {
            Some(value) => {
                buf.push(1);
                buf.extend_from_slice(&(value.len() as u32).to_be_bytes());
                buf.extend_from_slice(value.as_bytes());
            }
            None => buf.push(0),
        }
    }
    buf
}

#[allow(clippy::too_many_arguments)]
pub fn chain_hash(
    previous_hash: Option<&str>,
    event_type: &str,
    game_id: i64,
    user_id: Option<&str>,
    details: Option<&str>,
    client_secret: &str,
    server_secret: &str,
    timestamp: &str,
) -> String {
    sha3_hex_bytes(&canonical_input(
        previous_hash,
        event_type,
        game_id,
        user_id,
        details,
        client_secret,
        server_secret,
        timestamp,
    ))
}

/// Hash of the most recent row for a game; None before GAME_START.
pub fn latest_hash(conn: &Connection, game_id: i64) -> Result<Option<String>> {
    let mut stmt = conn.prepare(
        "SELECT hash FROM ledger WHERE game_id = ?1
         ORDER BY timestamp DESC, id DESC LIMIT 1",
    )?;
    let row = stmt.query_row([game_id], |row| row.get(0));
    match row {
        Ok(hash) => Ok(Some(hash)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// The authoritative current secret pair, read from the highest-ordered
/// row. None means the game has no ledger rows yet ("not started").
pub fn latest_secrets(conn: &Connection, game_id: i64) -> Result<Option<(String, String)>> {
    let mut stmt = conn.prepare(
        "SELECT client_secret, server_secret FROM ledger WHERE game_id = ?1
         ORDER BY timestamp DESC, id DESC LIMIT 1",
    )?;
    let row = stmt.query_row([game_id], |row| Ok((row.get(0)?, row.get(1)?)));
    match row {
        Ok(pair) => Ok(Some(pair)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Details payload of the game's most recent row of one event type.
pub fn last_event_details(
    conn: &Connection,
    game_id: i64,
    event: LedgerEvent,
) -> Result<Option<String>> {
    let mut stmt = conn.prepare(
        "SELECT details FROM ledger WHERE game_id = ?1 AND event_type = ?2
         ORDER BY timestamp DESC, id DESC LIMIT 1",
    )?;
    let row = stmt.query_row((game_id, event.as_str()), |row| {
        row.get::<_, Option<String>>(0)
    });
    match row {
        Ok(details) => Ok(details),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Append one transaction, chaining it to the game's latest hash, and
/// return the new hash. Callers that pair the append with a domain
/// mutation must run both on the same transaction connection.
pub fn append(
    conn: &Connection,
    game_id: i64,
    event: LedgerEvent,
    user_id: Option<&str>,
    details: Option<&serde_json::Value>,
    client_secret: &str,
    server_secret: &str,
) -> Result<String> {
    let details = details.map(|d| d.to_string());
    let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
    let previous_hash = latest_hash(conn, game_id)?;

    let hash = chain_hash(
        previous_hash.as_deref(),
        event.as_str(),
        game_id,
        user_id,
        details.as_deref(),
        client_secret,
        server_secret,
        &timestamp,
    );

    conn.execute(
        "INSERT INTO ledger (hash, previous_hash, timestamp, event_type, game_id,
                             user_id, details, client_secret, server_secret)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        rusqlite::params![
            hash,
            previous_hash,
            timestamp,
            event.as_str(),
            game_id,
            user_id,
            details,
            client_secret,
            server_secret,
        ],
    )?;
    Ok(hash)
}

/// Full ordered dump of a game's chain, genesis first.
pub fn rows_for_game(conn: &Connection, game_id: i64) -> Result<Vec<LedgerRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, hash, previous_hash, timestamp, event_type, game_id,
                user_id, details, client_secret, server_secret
         FROM ledger WHERE game_id = ?1
         ORDER BY timestamp ASC, id ASC",
    )?;
    let rows = stmt
        .query_map([game_id], |row| {
            Ok(LedgerRow {
                id: row.get(0)?,
                hash: row.get(1)?,
                previous_hash: row.get(2)?,
                timestamp: row.get(3)?,
                event_type: row.get(4)?,
                game_id: row.get(5)?,
                user_id: row.get(6)?,
                details: row.get(7)?,
                client_secret: row.get(8)?,
                server_secret: row.get(9)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Offline audit: recompute every hash genesis-forward and check both the
/// stored hash and the link to the next row. A mismatch at row k is
/// detectable without rows k+1.., so any single-field flip is pinned to
/// its row.
pub fn verify_chain(rows: &[LedgerRow]) -> std::result::Result<(), ChainViolation> {
    let mut prev: Option<&str> = None;
    for (index, row) in rows.iter().enumerate() {
        if index == 0 && row.previous_hash.is_some() {
            return Err(ChainViolation::GenesisHasPrevious { index });
        }
        if row.previous_hash.as_deref() != prev {
            return Err(ChainViolation::BrokenLink { index });
        }
        let recomputed = chain_hash(
            row.previous_hash.as_deref(),
            &row.event_type,
            row.game_id,
            row.user_id.as_deref(),
            row.details.as_deref(),
            &row.client_secret,
            &row.server_secret,
            &row.timestamp,
        );
        if recomputed != row.hash {
            return Err(ChainViolation::HashMismatch { index });
        }
        prev = Some(&row.hash);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use crate::queries;
    use limelight_types::models::LedgerEvent;

    fn seeded_game(db: &Database) -> i64 {
        db.with_tx(|tx| {
            queries::upsert_user(tx, "U1", "Ada")?;
            queries::upsert_room(tx, "R1", "C1", "2026-01-01T00:00:00Z")?;
            let game_id = queries::insert_game(tx, "R1", "C1", "T1", "2026-01-01T00:00:00Z")?;
            append(
                tx,
                game_id,
                LedgerEvent::GameStart,
                None,
                None,
                "client0",
                "server0",
            )?;
            Ok(game_id)
        })
        .unwrap()
    }

    #[test]
    fn chain_grows_and_verifies() {
        let db = Database::open_in_memory().unwrap();
        let game_id = seeded_game(&db);

        db.with_tx(|tx| {
            for i in 0..5 {
                let details = serde_json::json!({ "text": format!("msg {i}") });
                append(
                    tx,
                    game_id,
                    LedgerEvent::MsgSent,
                    Some("U1"),
                    Some(&details),
                    &format!("client{i}"),
                    "server0",
                )?;
            }
            Ok(())
        })
        .unwrap();

        let rows = db
            .with_conn(|conn| rows_for_game(conn, game_id))
            .unwrap();
        assert_eq!(rows.len(), 6);
        assert!(rows[0].previous_hash.is_none());
        verify_chain(&rows).unwrap();
    }

    #[test]
    fn latest_secrets_tracks_highest_row() {
        let db = Database::open_in_memory().unwrap();
        let game_id = seeded_game(&db);

        let pair = db
            .with_conn(|conn| latest_secrets(conn, game_id))
            .unwrap()
            .unwrap();
        assert_eq!(pair, ("client0".to_string(), "server0".to_string()));

        db.with_tx(|tx| {
            append(
                tx,
                game_id,
                LedgerEvent::ServerSecretUpdate,
                None,
                None,
                "client0",
                "server1",
            )?;
            Ok(())
        })
        .unwrap();

        let pair = db
            .with_conn(|conn| latest_secrets(conn, game_id))
            .unwrap()
            .unwrap();
        assert_eq!(pair.1, "server1");

        // Unknown games report "not started".
        let none = db.with_conn(|conn| latest_secrets(conn, 999)).unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn flipping_any_field_is_detected_at_that_row() {
        let db = Database::open_in_memory().unwrap();
        let game_id = seeded_game(&db);
        db.with_tx(|tx| {
            for i in 0..4 {
                let details = serde_json::json!({ "duration_seconds": 300 + i });
                append(
                    tx,
                    game_id,
                    LedgerEvent::UserSelected,
                    Some("U1"),
                    Some(&details),
                    "client0",
                    "server0",
                )?;
            }
            Ok(())
        })
        .unwrap();

        let rows = db.with_conn(|conn| rows_for_game(conn, game_id)).unwrap();

        let mut tampered = rows.clone();
        tampered[2].details = Some("{\"duration_seconds\":9999}".to_string());
        assert_eq!(
            verify_chain(&tampered[..3]),
            Err(ChainViolation::HashMismatch { index: 2 })
        );

        let mut reordered = rows.clone();
        reordered.swap(1, 2);
        assert!(verify_chain(&reordered).is_err());

        let mut fake_genesis = rows;
        fake_genesis[0].previous_hash = Some("bogus".to_string());
        assert_eq!(
            verify_chain(&fake_genesis),
            Err(ChainViolation::GenesisHasPrevious { index: 0 })
        );
    }

    #[test]
    fn canonical_encoding_has_no_field_boundary_collisions() {
        // "ab" + "c" and "a" + "bc" must hash differently, as must an
        // absent field versus an empty one.
        let h1 = chain_hash(None, "ab", 1, Some("c"), None, "cs", "ss", "t");
        let h2 = chain_hash(None, "a", 1, Some("bc"), None, "cs", "ss", "t");
        assert_ne!(h1, h2);

        let absent = chain_hash(None, "E", 1, None, None, "cs", "ss", "t");
        let empty = chain_hash(None, "E", 1, Some(""), None, "cs", "ss", "t");
        assert_ne!(absent, empty);
    }
}
