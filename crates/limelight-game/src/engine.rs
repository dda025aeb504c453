use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{info, warn};

use limelight_db::models::{GameRow, SummaryRow, TurnRow};
use limelight_db::{Database, ledger, queries};
use limelight_gateway::Dispatcher;
use limelight_rand::sampler::{Draw, Sampler};
use limelight_types::events::PushEvent;
use limelight_types::models::{GameStatus, LedgerEvent, TurnStatus};

use crate::commitment;
use crate::eligibility;
use crate::error::{GameError, Result};
use crate::notify::{GameRef, Notifier};
use crate::timer::{TimerKind, TimerRegistry};
use crate::turns::{self, Actor, StatEffect};

/// How long managers have to act on a fresh pick before being nudged.
pub const MANAGER_ACTION_TIMEOUT: Duration = Duration::from_secs(120);

/// Assigned turn length bounds, in seconds.
pub const MIN_TURN_SECONDS: i64 = 300;
pub const MAX_TURN_SECONDS: i64 = 1200;

/// Result of opening a show: what the thread announcement needs.
#[derive(Debug, Clone)]
pub struct GameOpened {
    pub game_id: i64,
    pub client_secret: String,
    pub server_commitment: String,
}

/// Result of a pick: who, for how long, and the fairness data the
/// announcement publishes so the draw can be re-derived by anyone.
#[derive(Debug, Clone)]
pub struct Pick {
    pub game: GameRef,
    pub turn_id: i64,
    pub user_id: String,
    pub user_name: String,
    pub duration_seconds: i64,
    pub eligible: Vec<String>,
    pub used_client_secret: String,
    pub used_server_secret: String,
    pub seed_fingerprint: String,
    pub new_server_commitment: String,
}

/// The core state machine. Cheap to clone; all clones share the database,
/// dispatcher, notifier and timer registry.
#[derive(Clone)]
pub struct GameEngine {
    inner: Arc<Inner>,
}

struct Inner {
    db: Arc<Database>,
    dispatcher: Dispatcher,
    notifier: Arc<dyn Notifier>,
    timers: TimerRegistry,
}

fn now_stamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_stamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Wall-clock end of a running turn as fractional epoch seconds, the way
/// the dashboard countdown expects it.
fn turn_end_time(turn: &TurnRow) -> Option<f64> {
    let started = parse_stamp(turn.started_at.as_deref()?)?;
    let deadline = started + chrono::Duration::seconds(turn.assigned_duration_seconds);
    Some(deadline.timestamp_millis() as f64 / 1000.0)
}

impl GameEngine {
    /// Must be called from within a tokio runtime (the timer registry
    /// captures the current handle).
    pub fn new(db: Arc<Database>, dispatcher: Dispatcher, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            inner: Arc::new(Inner {
                db,
                dispatcher,
                notifier,
                timers: TimerRegistry::new(),
            }),
        }
    }

    pub fn db(&self) -> &Database {
        &self.inner.db
    }

    pub fn notifier(&self) -> Arc<dyn Notifier> {
        self.inner.notifier.clone()
    }

    // -- Game lifecycle --

    /// Open a show in a thread: refuse if the thread already hosted one or
    /// the room already has an active show. Creates the game, enrols the
    /// creator as manager/participant, and writes the GAME_START row with
    /// fresh secrets.
    pub fn init_game(
        &self,
        room_id: &str,
        channel_id: &str,
        thread_id: &str,
        creator_id: &str,
        creator_name: &str,
    ) -> Result<GameOpened> {
        let client_secret = commitment::random_secret();
        let server_secret = commitment::random_secret();
        let now = now_stamp();

        let game_id = self
            .inner
            .db
            .with_tx(|tx| {
                if queries::any_game_by_thread(tx, channel_id, thread_id)?.is_some() {
                    return Err(GameError::GameExists.into());
                }
                if queries::active_game_in_room(tx, room_id)?.is_some() {
                    return Err(GameError::GameExists.into());
                }
                queries::upsert_user(tx, creator_id, creator_name)?;
                queries::upsert_room(tx, room_id, channel_id, &now)?;
                let game_id = queries::insert_game(tx, room_id, channel_id, thread_id, &now)?;
                queries::add_manager(tx, game_id, creator_id)?;
                queries::ensure_participant(tx, game_id, creator_id)?;
                ledger::append(
                    tx,
                    game_id,
                    LedgerEvent::GameStart,
                    Some(creator_id),
                    None,
                    &client_secret,
                    &server_secret,
                )?;
                Ok(game_id)
            })
            .map_err(GameError::from_tx)?;

        info!("game {game_id} opened in {channel_id}/{thread_id} by {creator_id}");
        Ok(GameOpened {
            game_id,
            client_secret,
            server_commitment: commitment::commitment(&server_secret),
        })
    }

    /// Close the show. Any open turn stays as-is in the history; timers are
    /// dropped and their re-checks make a late firing a no-op.
    pub fn end_game(
        &self,
        game_id: i64,
        actor_id: &str,
        outcome: GameStatus,
    ) -> Result<Vec<SummaryRow>> {
        let event = match outcome {
            GameStatus::Completed => LedgerEvent::GameCompleted,
            GameStatus::Cancelled => LedgerEvent::GameCancelled,
            GameStatus::Active => {
                return Err(GameError::Db(anyhow::anyhow!(
                    "end_game called with a non-terminal status"
                )));
            }
        };
        let now = now_stamp();

        let summary = self
            .inner
            .db
            .with_tx(|tx| {
                if !queries::is_manager(tx, game_id, actor_id)? {
                    return Err(GameError::NotManager.into());
                }
                if !queries::set_game_status(tx, game_id, outcome.as_str(), &now)? {
                    return Err(GameError::NoActiveGame.into());
                }
                let (client, server) =
                    ledger::latest_secrets(tx, game_id)?.ok_or(GameError::NotStarted)?;
                let details = serde_json::json!({ "new_status": outcome.as_str() });
                ledger::append(
                    tx,
                    game_id,
                    event,
                    Some(actor_id),
                    Some(&details),
                    &client,
                    &server,
                )?;
                queries::summary_stats(tx, game_id)
            })
            .map_err(GameError::from_tx)?;

        self.inner.timers.cancel(game_id, TimerKind::ManagerAction);
        self.inner.timers.cancel(game_id, TimerKind::TurnExpiry);
        info!("game {game_id} ended as {} by {actor_id}", outcome.as_str());
        Ok(summary)
    }

    // -- Secrets --

    /// Fold one thread message into the client secret and publish the new
    /// value to the game's client feed.
    pub fn record_message(
        &self,
        game_id: i64,
        user_id: &str,
        message_id: &str,
        text: &str,
    ) -> Result<String> {
        let evolved = self
            .inner
            .db
            .with_tx(|tx| {
                let (client, server) =
                    ledger::latest_secrets(tx, game_id)?.ok_or(GameError::NotStarted)?;
                let next = commitment::evolve_client_secret(&client, message_id, text);
                let details = serde_json::json!({ "message_id": message_id, "text": text });
                ledger::append(
                    tx,
                    game_id,
                    LedgerEvent::MsgSent,
                    Some(user_id),
                    Some(&details),
                    &next,
                    &server,
                )?;
                Ok(next)
            })
            .map_err(GameError::from_tx)?;

        self.inner
            .dispatcher
            .publish(PushEvent::secret(game_id, &evolved));
        Ok(evolved)
    }

    /// Rotate the server secret and return the new commitment for
    /// publication. `actor_id` is checked for manager rights when present;
    /// the automatic post-pick rotation passes None.
    pub fn refresh_server_secret(&self, game_id: i64, actor_id: Option<&str>) -> Result<String> {
        let new_secret = commitment::random_secret();
        self.inner
            .db
            .with_tx(|tx| {
                if let Some(actor) = actor_id {
                    if !queries::is_manager(tx, game_id, actor)? {
                        return Err(GameError::NotManager.into());
                    }
                }
                let (client, _) =
                    ledger::latest_secrets(tx, game_id)?.ok_or(GameError::NotStarted)?;
                let details = serde_json::json!({ "new_server_secret": new_secret });
                ledger::append(
                    tx,
                    game_id,
                    LedgerEvent::ServerSecretUpdate,
                    actor_id,
                    Some(&details),
                    &client,
                    &new_secret,
                )?;
                Ok(())
            })
            .map_err(GameError::from_tx)?;
        Ok(commitment::commitment(&new_secret))
    }

    // -- Picking --

    /// Draw the next performer and their assigned duration from the current
    /// secret pair. The PENDING turn and its USER_SELECTED row are inserted
    /// atomically; the server secret rotates right after, since the pick
    /// reveals the old one to auditors.
    pub fn pick_next(&self, game_id: i64, actor_id: &str) -> Result<Pick> {
        let now = now_stamp();

        let (turn_id, user_id, user_name, duration, eligible, client, server, fingerprint, game) =
            self.inner
                .db
                .with_tx(|tx| {
                    let game = queries::game_by_id(tx, game_id)?.ok_or(GameError::NoActiveGame)?;
                    if game.status() != Some(GameStatus::Active) {
                        return Err(GameError::NoActiveGame.into());
                    }
                    if !queries::is_manager(tx, game_id, actor_id)? {
                        return Err(GameError::NotManager.into());
                    }
                    if let Some(open) = queries::open_turn(tx, game_id)? {
                        return Err(GameError::TurnAlreadyOpen {
                            user_id: open.user_id,
                        }
                        .into());
                    }

                    let eligible = eligibility::eligible(tx, game_id)?;
                    if eligible.is_empty() {
                        return Err(GameError::NoEligible.into());
                    }

                    let (client, server) =
                        ledger::latest_secrets(tx, game_id)?.ok_or(GameError::NotStarted)?;
                    let seed = commitment::seed(&client, &server);
                    let fingerprint = commitment::seed_fingerprint(&seed);

                    // A pick must never re-run on the seed of the previous
                    // pick. This cannot happen while rotation works; if it
                    // does, refuse loudly rather than draw a correlated
                    // outcome.
                    if let Some(details) =
                        ledger::last_event_details(tx, game_id, LedgerEvent::UserSelected)?
                    {
                        let details: serde_json::Value = serde_json::from_str(&details)?;
                        if details.get("seed_fingerprint").and_then(|v| v.as_str())
                            == Some(fingerprint.as_str())
                        {
                            return Err(GameError::Fairness(
                                "seed unchanged since the previous pick".to_string(),
                            )
                            .into());
                        }
                    }

                    let n = eligible.len() as i64;
                    let values = Sampler::new([
                        Draw::int(0, n - 1),
                        Draw::int(MIN_TURN_SECONDS, MAX_TURN_SECONDS),
                    ])
                    .with_seed(seed)
                    .retrieve()?;
                    let index = values[0].as_int().context("index draw must be an int")?;
                    let duration = values[1].as_int().context("duration draw must be an int")?;
                    let user_id = eligible[index as usize].clone();

                    queries::ensure_participant(tx, game_id, &user_id)?;
                    let turn_id = queries::insert_turn(tx, game_id, &user_id, &now, duration)?;
                    let details = serde_json::json!({
                        "duration_seconds": duration,
                        "seed_fingerprint": fingerprint,
                    });
                    ledger::append(
                        tx,
                        game_id,
                        LedgerEvent::UserSelected,
                        Some(&user_id),
                        Some(&details),
                        &client,
                        &server,
                    )?;

                    let user_name = queries::display_name(tx, &user_id)?;
                    Ok((
                        turn_id,
                        user_id,
                        user_name,
                        duration,
                        eligible,
                        client,
                        server,
                        fingerprint,
                        GameRef::from(&game),
                    ))
                })
                .map_err(GameError::from_tx)?;

        let new_server_commitment = self.refresh_server_secret(game_id, None)?;

        let engine = self.clone();
        self.inner.timers.schedule(
            game_id,
            TimerKind::ManagerAction,
            MANAGER_ACTION_TIMEOUT,
            move || {
                if let Err(e) = engine.on_manager_timeout(game_id, turn_id) {
                    warn!("manager timeout handling failed for game {game_id}: {e:#}");
                }
            },
        );

        self.inner.dispatcher.publish(PushEvent::turn_update(
            game_id,
            TurnStatus::Pending.as_str(),
            &user_id,
            &user_name,
            None,
        ));

        info!("game {game_id}: picked {user_id} for {duration}s (fingerprint {fingerprint})");
        Ok(Pick {
            game,
            turn_id,
            user_id,
            user_name,
            duration_seconds: duration,
            eligible,
            used_client_secret: client,
            used_server_secret: server,
            seed_fingerprint: fingerprint,
            new_server_commitment,
        })
    }

    // -- Turn transitions --

    /// A manager starts the picked user's turn. Stamps the start time and
    /// replaces the manager-action timer with the turn-expiry timer.
    pub fn start_turn(&self, game_id: i64, actor_id: &str) -> Result<TurnRow> {
        let now = now_stamp();

        let turn = self
            .inner
            .db
            .with_tx(|tx| {
                let game = queries::game_by_id(tx, game_id)?.ok_or(GameError::NoActiveGame)?;
                if game.status() != Some(GameStatus::Active) {
                    return Err(GameError::NoActiveGame.into());
                }
                if !queries::is_manager(tx, game_id, actor_id)? {
                    return Err(GameError::NotManager.into());
                }
                let turn = queries::open_turn(tx, game_id)?.ok_or(GameError::NoOpenTurn)?;
                let from = turn.status().context("turn row has unknown status")?;
                if !turns::allowed(from, TurnStatus::InProgress, Actor::Manager) {
                    return Err(GameError::InvalidTransition {
                        from,
                        to: TurnStatus::InProgress,
                    }
                    .into());
                }
                if !queries::mark_turn_started(tx, turn.id, &now)? {
                    return Err(GameError::InvalidTransition {
                        from,
                        to: TurnStatus::InProgress,
                    }
                    .into());
                }

                let (client, server) =
                    ledger::latest_secrets(tx, game_id)?.ok_or(GameError::NotStarted)?;
                let details = serde_json::json!({ "new_status": TurnStatus::InProgress.as_str() });
                ledger::append(
                    tx,
                    game_id,
                    LedgerEvent::TurnStarted,
                    Some(&turn.user_id),
                    Some(&details),
                    &client,
                    &server,
                )?;

                queries::open_turn(tx, game_id)?.ok_or_else(|| {
                    anyhow::anyhow!("turn {} vanished while starting", turn.id)
                })
            })
            .map_err(GameError::from_tx)?;

        self.inner.timers.cancel(game_id, TimerKind::ManagerAction);
        let engine = self.clone();
        let turn_id = turn.id;
        self.inner.timers.schedule(
            game_id,
            TimerKind::TurnExpiry,
            Duration::from_secs(turn.assigned_duration_seconds.max(0) as u64),
            move || {
                if let Err(e) = engine.on_turn_expired(game_id, turn_id) {
                    warn!("turn expiry handling failed for game {game_id}: {e:#}");
                }
            },
        );

        self.push_turn_update(game_id, &turn);
        Ok(turn)
    }

    /// The picked participant accepts their running turn.
    pub fn accept_turn(&self, game_id: i64, actor_id: &str) -> Result<TurnRow> {
        self.transition(game_id, actor_id, TurnStatus::Accepted)
    }

    /// The picked participant rejects their running turn.
    pub fn reject_turn(&self, game_id: i64, actor_id: &str) -> Result<TurnRow> {
        self.transition(game_id, actor_id, TurnStatus::Rejected)
    }

    /// Skip the open turn: manager or the picked user while it is pending,
    /// manager-only once it is running.
    pub fn skip_turn(&self, game_id: i64, actor_id: &str) -> Result<TurnRow> {
        self.transition(game_id, actor_id, TurnStatus::Skipped)
    }

    /// Manager answer to the timeout prompt; same transition as a skip.
    pub fn confirm_skip(&self, game_id: i64, actor_id: &str) -> Result<TurnRow> {
        self.skip_turn(game_id, actor_id)
    }

    pub fn mark_completed(&self, game_id: i64, actor_id: &str) -> Result<TurnRow> {
        self.transition(game_id, actor_id, TurnStatus::Completed)
    }

    pub fn mark_failed(&self, game_id: i64, actor_id: &str) -> Result<TurnRow> {
        self.transition(game_id, actor_id, TurnStatus::Failed)
    }

    /// Shared turn transition: resolves the actor's role, checks the guard
    /// table, then does the optimistic status swap, stat bookkeeping,
    /// ledger row and push, all on one transaction. An actor who is both a
    /// manager and the picked user may take either side's transitions.
    fn transition(&self, game_id: i64, actor_id: &str, to: TurnStatus) -> Result<TurnRow> {
        let turn = self
            .inner
            .db
            .with_tx(|tx| {
                let game = queries::game_by_id(tx, game_id)?.ok_or(GameError::NoActiveGame)?;
                if game.status() != Some(GameStatus::Active) {
                    return Err(GameError::NoActiveGame.into());
                }
                let turn = queries::open_turn(tx, game_id)?.ok_or(GameError::NoOpenTurn)?;
                let from = turn.status().context("turn row has unknown status")?;
                let is_manager = queries::is_manager(tx, game_id, actor_id)?;
                let is_picked = turn.user_id == actor_id;
                let permitted = (is_manager && turns::allowed(from, to, Actor::Manager))
                    || (is_picked && turns::allowed(from, to, Actor::Picked));
                if !permitted {
                    let err = if turns::allowed(from, to, Actor::Manager) {
                        GameError::NotManager
                    } else if turns::allowed(from, to, Actor::Picked) {
                        GameError::NotYourTurn
                    } else {
                        GameError::InvalidTransition { from, to }
                    };
                    return Err(err.into());
                }
                if !queries::set_turn_status(tx, turn.id, from.as_str(), to.as_str())? {
                    return Err(GameError::InvalidTransition { from, to }.into());
                }

                match turns::stat_effect(to) {
                    StatEffect::Success => queries::record_turn_success(tx, game_id, &turn.user_id)?,
                    StatEffect::Skip => queries::record_turn_skip(tx, game_id, &turn.user_id)?,
                    StatEffect::None => {}
                }

                let (client, server) =
                    ledger::latest_secrets(tx, game_id)?.ok_or(GameError::NotStarted)?;
                let details = serde_json::json!({ "new_status": to.as_str() });
                ledger::append(
                    tx,
                    game_id,
                    LedgerEvent::for_turn(to),
                    Some(&turn.user_id),
                    Some(&details),
                    &client,
                    &server,
                )?;

                Ok(TurnRow {
                    status: to.as_str().to_string(),
                    ..turn
                })
            })
            .map_err(GameError::from_tx)?;

        if to.is_terminal() {
            self.inner.timers.cancel(game_id, TimerKind::ManagerAction);
            self.inner.timers.cancel(game_id, TimerKind::TurnExpiry);
        }
        self.push_turn_update(game_id, &turn);
        Ok(turn)
    }

    fn push_turn_update(&self, game_id: i64, turn: &TurnRow) {
        let name = self
            .inner
            .db
            .with_conn(|conn| queries::display_name(conn, &turn.user_id))
            .unwrap_or_else(|_| turn.user_id.clone());
        let end_time = match turn.status() {
            Some(TurnStatus::InProgress | TurnStatus::Accepted) => turn_end_time(turn),
            _ => None,
        };
        self.inner.dispatcher.publish(PushEvent::turn_update(
            game_id,
            &turn.status,
            &turn.user_id,
            &name,
            end_time,
        ));
    }

    // -- Timeouts --

    /// Fired 120s after a pick. Re-checks durable state, so duplicate or
    /// stale firings (restarts included) degrade to no-ops.
    pub fn on_manager_timeout(&self, game_id: i64, turn_id: i64) -> Result<bool> {
        let prompt = self
            .inner
            .db
            .with_tx(|tx| {
                let game = match queries::game_by_id(tx, game_id)? {
                    Some(game) if game.status() == Some(GameStatus::Active) => game,
                    _ => return Ok(None),
                };
                let turn = match queries::open_turn(tx, game_id)? {
                    Some(turn)
                        if turn.id == turn_id
                            && turn.status() == Some(TurnStatus::Pending)
                            && !turn.timeout_notified =>
                    {
                        turn
                    }
                    _ => return Ok(None),
                };
                queries::set_timeout_notified(tx, turn.id)?;
                Ok(Some((GameRef::from(&game), turn.user_id)))
            })
            .map_err(GameError::from_tx)?;

        if let Some((game, user_id)) = prompt {
            info!("game {game_id}: no manager action on turn {turn_id}, prompting skip");
            self.inner.notifier.prompt_confirm_skip(&game, &user_id);
            return Ok(true);
        }
        Ok(false)
    }

    /// Fired when a running turn's assigned duration elapses.
    pub fn on_turn_expired(&self, game_id: i64, turn_id: i64) -> Result<bool> {
        let prompt = self
            .inner
            .db
            .with_tx(|tx| {
                let game = match queries::game_by_id(tx, game_id)? {
                    Some(game) if game.status() == Some(GameStatus::Active) => game,
                    _ => return Ok(None),
                };
                let turn = match queries::open_turn(tx, game_id)? {
                    Some(turn)
                        if turn.id == turn_id
                            && matches!(
                                turn.status(),
                                Some(TurnStatus::InProgress | TurnStatus::Accepted)
                            )
                            && !turn.timeout_notified =>
                    {
                        turn
                    }
                    _ => return Ok(None),
                };
                queries::set_timeout_notified(tx, turn.id)?;
                Ok(Some((GameRef::from(&game), turn.user_id)))
            })
            .map_err(GameError::from_tx)?;

        if let Some((game, user_id)) = prompt {
            info!("game {game_id}: turn {turn_id} time is up, prompting decision");
            self.inner.notifier.prompt_decision(&game, &user_id);
            return Ok(true);
        }
        Ok(false)
    }

    /// Reconstruct the timer set from turn rows after a restart. Overdue,
    /// un-notified deadlines fire synchronously here, before any new events
    /// are accepted; the rest are re-scheduled for their remainder.
    pub fn rebuild_from_durable_state(&self) -> Result<usize> {
        let open = self
            .inner
            .db
            .with_conn(queries::open_turns_all_games)
            .map_err(GameError::Db)?;
        let now = Utc::now();
        let mut restored = 0;

        for row in open {
            let turn = row.turn;
            if turn.timeout_notified {
                continue;
            }
            let (kind, deadline) = match turn.status() {
                Some(TurnStatus::Pending) => {
                    let Some(selected) = parse_stamp(&turn.selected_at) else {
                        warn!("turn {} has an unparseable selected_at, skipping", turn.id);
                        continue;
                    };
                    (
                        TimerKind::ManagerAction,
                        selected + chrono::Duration::from_std(MANAGER_ACTION_TIMEOUT)
                            .unwrap_or_else(|_| chrono::Duration::seconds(120)),
                    )
                }
                Some(TurnStatus::InProgress | TurnStatus::Accepted) => {
                    let base = turn.started_at.as_deref().unwrap_or(&turn.selected_at);
                    let Some(started) = parse_stamp(base) else {
                        warn!("turn {} has an unparseable started_at, skipping", turn.id);
                        continue;
                    };
                    (
                        TimerKind::TurnExpiry,
                        started + chrono::Duration::seconds(turn.assigned_duration_seconds),
                    )
                }
                _ => continue,
            };

            restored += 1;
            let game_id = turn.game_id;
            let turn_id = turn.id;
            if deadline <= now {
                let fired = match kind {
                    TimerKind::ManagerAction => self.on_manager_timeout(game_id, turn_id)?,
                    TimerKind::TurnExpiry => self.on_turn_expired(game_id, turn_id)?,
                };
                if fired {
                    info!("restored overdue {kind:?} deadline for turn {turn_id} fired");
                }
            } else {
                let remaining = (deadline - now)
                    .to_std()
                    .unwrap_or(Duration::from_secs(0));
                let engine = self.clone();
                self.inner.timers.schedule(game_id, kind, remaining, move || {
                    let result = match kind {
                        TimerKind::ManagerAction => engine.on_manager_timeout(game_id, turn_id),
                        TimerKind::TurnExpiry => engine.on_turn_expired(game_id, turn_id),
                    };
                    if let Err(e) = result {
                        warn!("restored timer for turn {turn_id} failed: {e:#}");
                    }
                });
            }
        }

        info!("restored {restored} turn deadlines from durable state");
        Ok(restored)
    }

    // -- Roster --

    /// Apply a venue presence change; joining a room with an active show
    /// enrols the user as a participant.
    pub fn handle_presence(
        &self,
        room_id: &str,
        channel_id: Option<&str>,
        user_id: &str,
        user_name: &str,
        joined: bool,
    ) -> Result<()> {
        let now = now_stamp();
        self.inner
            .db
            .with_tx(|tx| {
                queries::upsert_user(tx, user_id, user_name)?;
                queries::upsert_room(tx, room_id, channel_id.unwrap_or("UNKNOWN"), &now)?;
                if joined {
                    queries::add_room_member(tx, room_id, user_id)?;
                    if let Some(game_id) = queries::active_game_in_room(tx, room_id)? {
                        queries::ensure_participant(tx, game_id, user_id)?;
                    }
                } else {
                    queries::remove_room_member(tx, room_id, user_id)?;
                }
                Ok(())
            })
            .map_err(GameError::from_tx)
    }

    /// Participant opting out of (or back into) being picked.
    pub fn set_opted_out(&self, game_id: i64, user_id: &str, opted_out: bool) -> Result<()> {
        self.inner
            .db
            .with_tx(|tx| {
                if queries::game_by_id(tx, game_id)?.is_none() {
                    return Err(GameError::NoActiveGame.into());
                }
                queries::ensure_participant(tx, game_id, user_id)?;
                queries::set_opted_out(tx, game_id, user_id, opted_out)?;
                Ok(())
            })
            .map_err(GameError::from_tx)
    }

    // -- Manager roster --

    pub fn add_manager(&self, game_id: i64, actor_id: &str, new_manager_id: &str) -> Result<()> {
        self.inner
            .db
            .with_tx(|tx| {
                if !queries::is_manager(tx, game_id, actor_id)? {
                    return Err(GameError::NotManager.into());
                }
                queries::add_manager(tx, game_id, new_manager_id)?;
                queries::ensure_participant(tx, game_id, new_manager_id)?;
                Ok(())
            })
            .map_err(GameError::from_tx)
    }

    /// Strip another manager of their role. The last manager cannot be
    /// removed; end the show instead.
    pub fn remove_manager(&self, game_id: i64, actor_id: &str, target_id: &str) -> Result<()> {
        self.inner
            .db
            .with_tx(|tx| {
                if !queries::is_manager(tx, game_id, actor_id)? {
                    return Err(GameError::NotManager.into());
                }
                if !queries::is_manager(tx, game_id, target_id)? {
                    return Err(GameError::NotManager.into());
                }
                if queries::managers(tx, game_id)?.len() == 1 {
                    return Err(GameError::LastManager.into());
                }
                queries::remove_manager(tx, game_id, target_id)?;
                Ok(())
            })
            .map_err(GameError::from_tx)
    }

    /// A manager steps down. The last manager cannot leave this way; that
    /// path is `force_leave`, which ends the show.
    pub fn leave(&self, game_id: i64, actor_id: &str) -> Result<()> {
        self.inner
            .db
            .with_tx(|tx| {
                if !queries::is_manager(tx, game_id, actor_id)? {
                    return Err(GameError::NotManager.into());
                }
                if queries::managers(tx, game_id)?.len() == 1 {
                    return Err(GameError::LastManager.into());
                }
                queries::remove_manager(tx, game_id, actor_id)?;
                Ok(())
            })
            .map_err(GameError::from_tx)
    }

    /// A manager steps down unconditionally. When nobody is left to run the
    /// show, the game completes; the summary is returned in that case.
    pub fn force_leave(&self, game_id: i64, actor_id: &str) -> Result<Option<Vec<SummaryRow>>> {
        let now = now_stamp();
        let summary = self
            .inner
            .db
            .with_tx(|tx| {
                if !queries::is_manager(tx, game_id, actor_id)? {
                    return Err(GameError::NotManager.into());
                }
                queries::remove_manager(tx, game_id, actor_id)?;
                if !queries::managers(tx, game_id)?.is_empty() {
                    return Ok(None);
                }
                if !queries::set_game_status(tx, game_id, GameStatus::Completed.as_str(), &now)? {
                    return Err(GameError::NoActiveGame.into());
                }
                let (client, server) =
                    ledger::latest_secrets(tx, game_id)?.ok_or(GameError::NotStarted)?;
                let details =
                    serde_json::json!({ "new_status": GameStatus::Completed.as_str() });
                ledger::append(
                    tx,
                    game_id,
                    LedgerEvent::GameCompleted,
                    Some(actor_id),
                    Some(&details),
                    &client,
                    &server,
                )?;
                Ok(Some(queries::summary_stats(tx, game_id)?))
            })
            .map_err(GameError::from_tx)?;

        if summary.is_some() {
            self.inner.timers.cancel(game_id, TimerKind::ManagerAction);
            self.inner.timers.cancel(game_id, TimerKind::TurnExpiry);
            info!("game {game_id} completed after the last manager left");
        }
        Ok(summary)
    }

    // -- Read views --

    pub fn game(&self, game_id: i64) -> Result<Option<GameRow>> {
        self.inner
            .db
            .with_conn(|conn| queries::game_by_id(conn, game_id))
            .map_err(GameError::Db)
    }

    pub fn active_game_for_thread(
        &self,
        channel_id: &str,
        thread_id: &str,
    ) -> Result<Option<i64>> {
        self.inner
            .db
            .with_conn(|conn| queries::active_game_by_thread(conn, channel_id, thread_id))
            .map_err(GameError::Db)
    }

    pub fn game_for_thread(&self, channel_id: &str, thread_id: &str) -> Result<Option<i64>> {
        self.inner
            .db
            .with_conn(|conn| queries::any_game_by_thread(conn, channel_id, thread_id))
            .map_err(GameError::Db)
    }

    pub fn summary(&self, game_id: i64) -> Result<Vec<SummaryRow>> {
        self.inner
            .db
            .with_conn(|conn| queries::summary_stats(conn, game_id))
            .map_err(GameError::Db)
    }

    pub fn eligible_users(&self, game_id: i64) -> Result<Vec<String>> {
        self.inner
            .db
            .with_conn(|conn| eligibility::eligible(conn, game_id))
            .map_err(GameError::Db)
    }

    pub fn members(&self, game_id: i64) -> Result<Vec<String>> {
        self.inner
            .db
            .with_conn(|conn| {
                let game = queries::game_by_id(conn, game_id)?
                    .ok_or_else(|| anyhow::anyhow!("game {game_id} not found"))?;
                queries::room_members(conn, &game.room_id)
            })
            .map_err(GameError::Db)
    }

    pub fn history(&self, game_id: i64) -> Result<Vec<TurnRow>> {
        self.inner
            .db
            .with_conn(|conn| queries::turns_for_game(conn, game_id))
            .map_err(GameError::Db)
    }

    pub fn client_secret(&self, game_id: i64) -> Result<String> {
        self.inner
            .db
            .with_conn(|conn| ledger::latest_secrets(conn, game_id))
            .map_err(GameError::Db)?
            .map(|(client, _)| client)
            .ok_or(GameError::NotStarted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use limelight_types::events::PushPayload;
    use std::sync::Mutex;

    #[derive(Debug, PartialEq)]
    enum Note {
        ConfirmSkip(String),
        Decision(String),
    }

    #[derive(Default)]
    struct RecordingNotifier {
        notes: Mutex<Vec<Note>>,
    }

    impl RecordingNotifier {
        fn notes(&self) -> Vec<Note> {
            std::mem::take(&mut self.notes.lock().unwrap())
        }
    }

    impl Notifier for RecordingNotifier {
        fn public(&self, _game: &GameRef, _text: &str) {}
        fn private(&self, _user_id: &str, _text: &str) {}
        fn prompt_confirm_skip(&self, _game: &GameRef, user_id: &str) {
            self.notes
                .lock()
                .unwrap()
                .push(Note::ConfirmSkip(user_id.to_string()));
        }
        fn prompt_decision(&self, _game: &GameRef, user_id: &str) {
            self.notes
                .lock()
                .unwrap()
                .push(Note::Decision(user_id.to_string()));
        }
    }

    fn fixture() -> (GameEngine, Arc<RecordingNotifier>, Dispatcher) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = Dispatcher::new();
        let engine = GameEngine::new(db, dispatcher.clone(), notifier.clone());
        (engine, notifier, dispatcher)
    }

    fn opened(engine: &GameEngine) -> i64 {
        for (id, name) in [("M1", "Mana"), ("U1", "Uma"), ("U2", "Ugo"), ("U3", "Uta")] {
            engine
                .handle_presence("R1", Some("C1"), id, name, true)
                .unwrap();
        }
        engine
            .init_game("R1", "C1", "T1", "M1", "Mana")
            .unwrap()
            .game_id
    }

    #[tokio::test]
    async fn init_refuses_duplicate_thread_and_busy_room() {
        let (engine, _, _) = fixture();
        opened(&engine);

        let same_room = engine.init_game("R1", "C1", "T2", "M1", "Mana");
        assert!(matches!(same_room, Err(GameError::GameExists)));

        let same_thread = engine.init_game("R2", "C1", "T1", "M1", "Mana");
        assert!(matches!(same_thread, Err(GameError::GameExists)));
    }

    #[tokio::test]
    async fn messages_evolve_the_client_secret_and_push_it() {
        let (engine, _, dispatcher) = fixture();
        let game_id = opened(&engine);
        let mut rx = dispatcher.subscribe();

        let first = engine.record_message(game_id, "U1", "M100", "hello").unwrap();
        let second = engine.record_message(game_id, "U2", "M101", "again").unwrap();
        assert_ne!(first, second);
        assert_eq!(engine.client_secret(game_id).unwrap(), second);

        let push = rx.recv().await.unwrap();
        assert_eq!(push.topic, format!("client/{game_id}"));
        match push.payload {
            PushPayload::Secret { value } => assert_eq!(value, first),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn message_before_game_start_is_refused() {
        let (engine, _, _) = fixture();
        let result = engine.record_message(999, "U1", "M1", "hi");
        assert!(matches!(result, Err(GameError::NotStarted)));
    }

    #[tokio::test]
    async fn pick_requires_manager_and_refuses_double_pick() {
        let (engine, _, _) = fixture();
        let game_id = opened(&engine);

        let not_manager = engine.pick_next(game_id, "U1");
        assert!(matches!(not_manager, Err(GameError::NotManager)));

        let pick = engine.pick_next(game_id, "M1").unwrap();
        assert!(pick.eligible.contains(&pick.user_id));
        assert!((MIN_TURN_SECONDS..=MAX_TURN_SECONDS).contains(&pick.duration_seconds));
        assert_eq!(pick.seed_fingerprint.len(), 128);

        let again = engine.pick_next(game_id, "M1");
        assert!(matches!(again, Err(GameError::TurnAlreadyOpen { .. })));
    }

    #[tokio::test]
    async fn full_turn_flow_updates_stats_and_keeps_the_chain_valid() {
        let (engine, _, _) = fixture();
        let game_id = opened(&engine);

        let pick = engine.pick_next(game_id, "M1").unwrap();
        let picked = pick.user_id.clone();
        let outsider = ["U1", "U2", "U3"]
            .iter()
            .find(|u| **u != picked)
            .unwrap()
            .to_string();

        let wrong = engine.start_turn(game_id, &outsider);
        assert!(matches!(wrong, Err(GameError::NotManager)));

        let started = engine.start_turn(game_id, "M1").unwrap();
        assert_eq!(started.status(), Some(TurnStatus::InProgress));
        assert!(started.started_at.is_some());

        let wrong = engine.accept_turn(game_id, &outsider);
        assert!(matches!(wrong, Err(GameError::NotYourTurn)));

        engine.accept_turn(game_id, &picked).unwrap();
        let done = engine.mark_completed(game_id, "M1").unwrap();
        assert_eq!(done.status(), Some(TurnStatus::Completed));

        let stats = engine
            .db()
            .with_conn(|conn| queries::participant(conn, game_id, &picked))
            .unwrap()
            .unwrap();
        assert_eq!(stats.successful_rounds, 1);
        assert_eq!(stats.consecutive_skips, 0);

        let rows = engine
            .db()
            .with_conn(|conn| ledger::rows_for_game(conn, game_id))
            .unwrap();
        ledger::verify_chain(&rows).unwrap();
        // GAME_START, USER_SELECTED, rotation, TURN_STARTED, ACCEPTED, COMPLETED.
        assert_eq!(rows.len(), 6);
    }

    #[tokio::test]
    async fn managers_start_turns_and_picked_users_answer() {
        let (engine, _, _) = fixture();
        let game_id = opened(&engine);
        // Keep the manager out of the pool so the picked user is distinct.
        engine.set_opted_out(game_id, "M1", true).unwrap();

        let pick = engine.pick_next(game_id, "M1").unwrap();
        let picked = pick.user_id.clone();

        assert!(matches!(
            engine.start_turn(game_id, &picked),
            Err(GameError::NotManager)
        ));
        engine.start_turn(game_id, "M1").unwrap();

        assert!(matches!(
            engine.accept_turn(game_id, "M1"),
            Err(GameError::NotYourTurn)
        ));
        engine.accept_turn(game_id, &picked).unwrap();

        assert!(matches!(
            engine.mark_completed(game_id, &picked),
            Err(GameError::NotManager)
        ));
        engine.mark_completed(game_id, "M1").unwrap();
    }

    #[tokio::test]
    async fn skipped_and_rejected_turns_both_count_as_skips() {
        let (engine, _, _) = fixture();
        let game_id = opened(&engine);

        let first = engine.pick_next(game_id, "M1").unwrap();
        // The picked user may bow out of their own pending turn.
        engine.skip_turn(game_id, &first.user_id).unwrap();
        let stats = engine
            .db()
            .with_conn(|conn| queries::participant(conn, game_id, &first.user_id))
            .unwrap()
            .unwrap();
        assert_eq!(stats.consecutive_skips, 1);
        assert_eq!(stats.successful_rounds, 0);

        engine.record_message(game_id, "U1", "M200", "stir").unwrap();
        let second = engine.pick_next(game_id, "M1").unwrap();
        assert_ne!(second.user_id, first.user_id);
        engine.start_turn(game_id, "M1").unwrap();
        engine.reject_turn(game_id, &second.user_id).unwrap();
        let stats = engine
            .db()
            .with_conn(|conn| queries::participant(conn, game_id, &second.user_id))
            .unwrap()
            .unwrap();
        assert_eq!(stats.consecutive_skips, 1);
    }

    #[tokio::test]
    async fn unchanged_seed_is_a_fairness_violation() {
        let (engine, _, _) = fixture();
        let game_id = opened(&engine);

        // Forge a previous pick that used exactly the current seed.
        engine
            .db()
            .with_tx(|tx| {
                let (client, server) = ledger::latest_secrets(tx, game_id)?
                    .ok_or_else(|| anyhow::anyhow!("missing secrets"))?;
                let fingerprint =
                    commitment::seed_fingerprint(&commitment::seed(&client, &server));
                let details = serde_json::json!({
                    "duration_seconds": 600,
                    "seed_fingerprint": fingerprint,
                });
                ledger::append(
                    tx,
                    game_id,
                    LedgerEvent::UserSelected,
                    Some("U1"),
                    Some(&details),
                    &client,
                    &server,
                )?;
                Ok(())
            })
            .unwrap();

        let result = engine.pick_next(game_id, "M1");
        assert!(matches!(result, Err(GameError::Fairness(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn manager_timeout_prompts_skip_exactly_once() {
        let (engine, notifier, _) = fixture();
        let game_id = opened(&engine);
        let pick = engine.pick_next(game_id, "M1").unwrap();

        tokio::time::sleep(Duration::from_secs(119)).await;
        assert!(notifier.notes().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(notifier.notes(), vec![Note::ConfirmSkip(pick.user_id.clone())]);

        // A restart right after must not prompt again.
        assert_eq!(engine.rebuild_from_durable_state().unwrap(), 0);
        assert!(notifier.notes().is_empty());

        engine.confirm_skip(game_id, "M1").unwrap();
    }

    #[tokio::test]
    async fn restart_fires_overdue_pending_deadline_exactly_once() {
        let (engine, notifier, _) = fixture();
        let game_id = opened(&engine);

        let stale = (Utc::now() - chrono::Duration::seconds(300))
            .to_rfc3339_opts(SecondsFormat::Micros, true);
        engine
            .db()
            .with_tx(|tx| {
                queries::insert_turn(tx, game_id, "U1", &stale, 600)?;
                Ok(())
            })
            .unwrap();

        assert_eq!(engine.rebuild_from_durable_state().unwrap(), 1);
        assert_eq!(notifier.notes(), vec![Note::ConfirmSkip("U1".to_string())]);

        assert_eq!(engine.rebuild_from_durable_state().unwrap(), 0);
        assert!(notifier.notes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_reschedules_running_turn_remainder() {
        let (engine, notifier, _) = fixture();
        let game_id = opened(&engine);

        // A 600s turn that started 300s ago: half its time is left.
        let selected = (Utc::now() - chrono::Duration::seconds(360))
            .to_rfc3339_opts(SecondsFormat::Micros, true);
        let started = (Utc::now() - chrono::Duration::seconds(300))
            .to_rfc3339_opts(SecondsFormat::Micros, true);
        engine
            .db()
            .with_tx(|tx| {
                let turn_id = queries::insert_turn(tx, game_id, "U2", &selected, 600)?;
                queries::mark_turn_started(tx, turn_id, &started)?;
                Ok(())
            })
            .unwrap();

        assert_eq!(engine.rebuild_from_durable_state().unwrap(), 1);
        assert!(notifier.notes().is_empty());

        tokio::time::sleep(Duration::from_secs(302)).await;
        assert_eq!(notifier.notes(), vec![Note::Decision("U2".to_string())]);

        // The second restart sees the notified flag and stays quiet.
        assert_eq!(engine.rebuild_from_durable_state().unwrap(), 0);
        assert!(notifier.notes().is_empty());
    }

    #[tokio::test]
    async fn end_game_freezes_the_show() {
        let (engine, _, _) = fixture();
        let game_id = opened(&engine);

        let not_manager = engine.end_game(game_id, "U1", GameStatus::Completed);
        assert!(matches!(not_manager, Err(GameError::NotManager)));

        let summary = engine.end_game(game_id, "M1", GameStatus::Completed).unwrap();
        assert!(summary.iter().any(|row| row.user_id == "M1"));

        let pick = engine.pick_next(game_id, "M1");
        assert!(matches!(pick, Err(GameError::NoActiveGame)));

        let again = engine.end_game(game_id, "M1", GameStatus::Cancelled);
        assert!(matches!(again, Err(GameError::NoActiveGame)));
    }

    #[tokio::test]
    async fn last_manager_cannot_leave_but_can_force_leave() {
        let (engine, _, _) = fixture();
        let game_id = opened(&engine);

        assert!(matches!(
            engine.leave(game_id, "M1"),
            Err(GameError::LastManager)
        ));

        engine.add_manager(game_id, "M1", "U1").unwrap();
        engine.leave(game_id, "M1").unwrap();

        let summary = engine.force_leave(game_id, "U1").unwrap();
        assert!(summary.is_some());
        let game = engine.game(game_id).unwrap().unwrap();
        assert_eq!(game.status(), Some(GameStatus::Completed));
    }

    #[tokio::test]
    async fn opted_out_users_are_not_picked() {
        let (engine, _, _) = fixture();
        let game_id = opened(&engine);

        for user in ["M1", "U1", "U2"] {
            engine.set_opted_out(game_id, user, true).unwrap();
        }
        let eligible = engine.eligible_users(game_id).unwrap();
        assert_eq!(eligible, vec!["U3".to_string()]);

        let pick = engine.pick_next(game_id, "M1").unwrap();
        assert_eq!(pick.user_id, "U3");
    }

    #[tokio::test]
    async fn turn_updates_are_pushed_with_end_time_once_running() {
        let (engine, _, dispatcher) = fixture();
        let game_id = opened(&engine);
        let mut rx = dispatcher.subscribe();

        let pick = engine.pick_next(game_id, "M1").unwrap();
        engine.start_turn(game_id, "M1").unwrap();

        let pending = rx.recv().await.unwrap();
        assert_eq!(pending.topic, format!("turn/{game_id}"));
        match pending.payload {
            PushPayload::TurnUpdate { status, end_time, .. } => {
                assert_eq!(status, "PENDING");
                assert!(end_time.is_none());
            }
            other => panic!("unexpected payload: {other:?}"),
        }

        let running = rx.recv().await.unwrap();
        match running.payload {
            PushPayload::TurnUpdate { status, end_time, user_id, .. } => {
                assert_eq!(status, "IN_PROGRESS");
                assert_eq!(user_id, pick.user_id);
                let deadline = end_time.unwrap();
                let expected = Utc::now().timestamp() as f64 + pick.duration_seconds as f64;
                assert!((deadline - expected).abs() < 5.0);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }
}
