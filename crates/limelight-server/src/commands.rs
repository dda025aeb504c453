use tracing::{error, warn};

use limelight_db::models::SummaryRow;
use limelight_db::queries;
use limelight_game::{GameError, GameRef};
use limelight_types::chat::{ActionEvent, MessageEvent, PresenceEvent, PresenceState};
use limelight_types::models::GameStatus;

use crate::dispatch::{BotContext, EventDispatcher};

/// Wire up every command, action and presence handler.
pub fn build_dispatcher(ctx: BotContext) -> EventDispatcher {
    EventDispatcher::new(ctx)
        .command("!init", cmd_init)
        .command("!pick", cmd_pick)
        .command("!rnd", cmd_rnd)
        .command("!end", cmd_end)
        .command("!cancel", cmd_cancel)
        .command("!summary", cmd_summary)
        .command("!eligible", cmd_eligible)
        .command("!members", cmd_members)
        .command("!history", cmd_history)
        .command("!opt-out", cmd_opt_out)
        .command("!opt-in", cmd_opt_in)
        .command("!add-manager", cmd_add_manager)
        .command("!remove-manager", cmd_remove_manager)
        .command("!force-leave", cmd_force_leave)
        .command("!leave", cmd_leave)
        .command("!token", cmd_token)
        .on_message(track_thread_message)
        .action("turn_start", act_start)
        .action("turn_accept", act_accept)
        .action("turn_reject", act_reject)
        .action("turn_skip", act_skip)
        .action("turn_completed", act_completed)
        .action("turn_failed", act_failed)
        .action("confirm_skip", act_confirm_skip)
        .on_presence(track_presence)
}

// -- Helpers --

fn reply_err(ctx: &BotContext, user_id: &str, err: GameError) {
    match err {
        GameError::Db(e) => error!("command failed with a storage error: {e:#}"),
        other => ctx.engine.notifier().private(user_id, &other.to_string()),
    }
}

fn game_ref(ctx: &BotContext, game_id: i64) -> Option<GameRef> {
    match ctx.engine.game(game_id) {
        Ok(Some(game)) => Some(GameRef::from(&game)),
        Ok(None) => None,
        Err(e) => {
            error!("game lookup failed: {e}");
            None
        }
    }
}

/// Active game for the thread a message/action lives in, with a private
/// explanation when there is none.
fn active_game(ctx: &BotContext, channel_id: &str, thread_id: &str, user_id: &str) -> Option<i64> {
    match ctx.engine.active_game_for_thread(channel_id, thread_id) {
        Ok(Some(game_id)) => Some(game_id),
        Ok(None) => {
            reply_err(ctx, user_id, GameError::NoActiveGame);
            None
        }
        Err(e) => {
            reply_err(ctx, user_id, e);
            None
        }
    }
}

fn parse_mention(text: &str) -> Option<&str> {
    let arg = text.split_whitespace().nth(1)?;
    Some(
        arg.trim_start_matches("<@")
            .trim_end_matches('>')
            .trim_start_matches('@'),
    )
}

fn duration_label(seconds: i64) -> String {
    format!("{}m{:02}s", seconds / 60, seconds % 60)
}

fn format_summary(rows: &[SummaryRow]) -> String {
    if rows.is_empty() {
        return "nobody participated yet".to_string();
    }
    rows.iter()
        .map(|row| {
            format!(
                "{}: {} rounds, {} consecutive skips",
                row.name, row.successful_rounds, row.consecutive_skips
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn display_name(msg: &MessageEvent) -> &str {
    msg.user_name.as_deref().unwrap_or(&msg.user_id)
}

// -- Commands --

fn cmd_init(ctx: &BotContext, msg: &MessageEvent) {
    let rooms = ctx
        .engine
        .db()
        .with_conn(|conn| queries::rooms_for_user(conn, &msg.user_id));
    let room_id = match rooms {
        Ok(rooms) => match rooms.into_iter().next() {
            Some(room) => room,
            None => {
                ctx.engine
                    .notifier()
                    .private(&msg.user_id, "join the venue before opening a show");
                return;
            }
        },
        Err(e) => {
            error!("room lookup failed: {e:#}");
            return;
        }
    };

    match ctx.engine.init_game(
        &room_id,
        &msg.channel_id,
        msg.thread_root(),
        &msg.user_id,
        display_name(msg),
    ) {
        Ok(opened) => {
            if let Some(game) = game_ref(ctx, opened.game_id) {
                ctx.engine.notifier().public(
                    &game,
                    &format!(
                        "show is open. server commitment: {}\ninitial client secret: {}\n\
                         every message in this thread stirs the next draw",
                        opened.server_commitment, opened.client_secret
                    ),
                );
            }
        }
        Err(e) => reply_err(ctx, &msg.user_id, e),
    }
}

fn cmd_pick(ctx: &BotContext, msg: &MessageEvent) {
    let Some(game_id) = active_game(ctx, &msg.channel_id, msg.thread_root(), &msg.user_id) else {
        return;
    };
    match ctx.engine.pick_next(game_id, &msg.user_id) {
        Ok(pick) => {
            ctx.engine.notifier().public(
                &pick.game,
                &format!(
                    "<@{}> is up for {}! (drawn from {} eligible)\n\
                     client secret used: {}\nserver secret revealed: {}\n\
                     seed fingerprint: {}\nnext server commitment: {}",
                    pick.user_id,
                    duration_label(pick.duration_seconds),
                    pick.eligible.len(),
                    pick.used_client_secret,
                    pick.used_server_secret,
                    pick.seed_fingerprint,
                    pick.new_server_commitment,
                ),
            );
        }
        Err(e) => reply_err(ctx, &msg.user_id, e),
    }
}

fn cmd_rnd(ctx: &BotContext, msg: &MessageEvent) {
    let Some(game_id) = active_game(ctx, &msg.channel_id, msg.thread_root(), &msg.user_id) else {
        return;
    };
    match ctx.engine.refresh_server_secret(game_id, Some(&msg.user_id)) {
        Ok(new_commitment) => {
            if let Some(game) = game_ref(ctx, game_id) {
                ctx.engine.notifier().public(
                    &game,
                    &format!("server secret rotated. new commitment: {new_commitment}"),
                );
            }
        }
        Err(e) => reply_err(ctx, &msg.user_id, e),
    }
}

fn cmd_end(ctx: &BotContext, msg: &MessageEvent) {
    end_with(ctx, msg, GameStatus::Completed)
}

fn cmd_cancel(ctx: &BotContext, msg: &MessageEvent) {
    end_with(ctx, msg, GameStatus::Cancelled)
}

fn end_with(ctx: &BotContext, msg: &MessageEvent, outcome: GameStatus) {
    let Some(game_id) = active_game(ctx, &msg.channel_id, msg.thread_root(), &msg.user_id) else {
        return;
    };
    match ctx.engine.end_game(game_id, &msg.user_id, outcome) {
        Ok(summary) => {
            if let Some(game) = game_ref(ctx, game_id) {
                ctx.engine.notifier().public(
                    &game,
                    &format!(
                        "show {} -- final summary:\n{}",
                        outcome.as_str().to_lowercase(),
                        format_summary(&summary)
                    ),
                );
            }
        }
        Err(e) => reply_err(ctx, &msg.user_id, e),
    }
}

fn cmd_summary(ctx: &BotContext, msg: &MessageEvent) {
    // Works for finished shows too.
    let game_id = match ctx
        .engine
        .game_for_thread(&msg.channel_id, msg.thread_root())
    {
        Ok(Some(game_id)) => game_id,
        Ok(None) => return reply_err(ctx, &msg.user_id, GameError::NotStarted),
        Err(e) => return reply_err(ctx, &msg.user_id, e),
    };
    match ctx.engine.summary(game_id) {
        Ok(summary) => {
            if let Some(game) = game_ref(ctx, game_id) {
                ctx.engine.notifier().public(&game, &format_summary(&summary));
            }
        }
        Err(e) => reply_err(ctx, &msg.user_id, e),
    }
}

fn cmd_eligible(ctx: &BotContext, msg: &MessageEvent) {
    let Some(game_id) = active_game(ctx, &msg.channel_id, msg.thread_root(), &msg.user_id) else {
        return;
    };
    match ctx.engine.eligible_users(game_id) {
        Ok(eligible) => {
            if let Some(game) = game_ref(ctx, game_id) {
                let text = if eligible.is_empty() {
                    "nobody is eligible right now".to_string()
                } else {
                    format!("eligible for the next pick: {}", eligible.join(", "))
                };
                ctx.engine.notifier().public(&game, &text);
            }
        }
        Err(e) => reply_err(ctx, &msg.user_id, e),
    }
}

fn cmd_members(ctx: &BotContext, msg: &MessageEvent) {
    let Some(game_id) = active_game(ctx, &msg.channel_id, msg.thread_root(), &msg.user_id) else {
        return;
    };
    match ctx.engine.members(game_id) {
        Ok(members) => {
            if let Some(game) = game_ref(ctx, game_id) {
                ctx.engine
                    .notifier()
                    .public(&game, &format!("in the venue: {}", members.join(", ")));
            }
        }
        Err(e) => reply_err(ctx, &msg.user_id, e),
    }
}

fn cmd_history(ctx: &BotContext, msg: &MessageEvent) {
    let game_id = match ctx
        .engine
        .game_for_thread(&msg.channel_id, msg.thread_root())
    {
        Ok(Some(game_id)) => game_id,
        Ok(None) => return reply_err(ctx, &msg.user_id, GameError::NotStarted),
        Err(e) => return reply_err(ctx, &msg.user_id, e),
    };
    match ctx.engine.history(game_id) {
        Ok(turns) => {
            if let Some(game) = game_ref(ctx, game_id) {
                let lines = turns
                    .iter()
                    .map(|turn| {
                        format!(
                            "{} <@{}> {}",
                            turn.status,
                            turn.user_id,
                            duration_label(turn.assigned_duration_seconds)
                        )
                    })
                    .collect::<Vec<_>>();
                let text = if lines.is_empty() {
                    "no turns yet".to_string()
                } else {
                    lines.join("\n")
                };
                ctx.engine.notifier().public(&game, &text);
            }
        }
        Err(e) => reply_err(ctx, &msg.user_id, e),
    }
}

fn cmd_opt_out(ctx: &BotContext, msg: &MessageEvent) {
    set_opt(ctx, msg, true)
}

fn cmd_opt_in(ctx: &BotContext, msg: &MessageEvent) {
    set_opt(ctx, msg, false)
}

fn set_opt(ctx: &BotContext, msg: &MessageEvent, opted_out: bool) {
    let Some(game_id) = active_game(ctx, &msg.channel_id, msg.thread_root(), &msg.user_id) else {
        return;
    };
    match ctx.engine.set_opted_out(game_id, &msg.user_id, opted_out) {
        Ok(()) => {
            let text = if opted_out {
                "you are out of the pick pool until you opt back in"
            } else {
                "you are back in the pick pool"
            };
            ctx.engine.notifier().private(&msg.user_id, text);
        }
        Err(e) => reply_err(ctx, &msg.user_id, e),
    }
}

fn cmd_add_manager(ctx: &BotContext, msg: &MessageEvent) {
    let Some(target) = parse_mention(&msg.text) else {
        ctx.engine
            .notifier()
            .private(&msg.user_id, "usage: !add-manager @user");
        return;
    };
    let Some(game_id) = active_game(ctx, &msg.channel_id, msg.thread_root(), &msg.user_id) else {
        return;
    };
    match ctx.engine.add_manager(game_id, &msg.user_id, target) {
        Ok(()) => {
            if let Some(game) = game_ref(ctx, game_id) {
                ctx.engine
                    .notifier()
                    .public(&game, &format!("<@{target}> is now a manager"));
            }
        }
        Err(e) => reply_err(ctx, &msg.user_id, e),
    }
}

fn cmd_remove_manager(ctx: &BotContext, msg: &MessageEvent) {
    let Some(target) = parse_mention(&msg.text) else {
        ctx.engine
            .notifier()
            .private(&msg.user_id, "usage: !remove-manager @user");
        return;
    };
    let Some(game_id) = active_game(ctx, &msg.channel_id, msg.thread_root(), &msg.user_id) else {
        return;
    };
    match ctx.engine.remove_manager(game_id, &msg.user_id, target) {
        Ok(()) => {
            if let Some(game) = game_ref(ctx, game_id) {
                ctx.engine
                    .notifier()
                    .public(&game, &format!("<@{target}> is no longer a manager"));
            }
        }
        Err(e) => reply_err(ctx, &msg.user_id, e),
    }
}

fn cmd_leave(ctx: &BotContext, msg: &MessageEvent) {
    let Some(game_id) = active_game(ctx, &msg.channel_id, msg.thread_root(), &msg.user_id) else {
        return;
    };
    match ctx.engine.leave(game_id, &msg.user_id) {
        Ok(()) => {
            if let Some(game) = game_ref(ctx, game_id) {
                ctx.engine
                    .notifier()
                    .public(&game, &format!("<@{}> stepped down as manager", msg.user_id));
            }
        }
        Err(e) => reply_err(ctx, &msg.user_id, e),
    }
}

fn cmd_force_leave(ctx: &BotContext, msg: &MessageEvent) {
    let Some(game_id) = active_game(ctx, &msg.channel_id, msg.thread_root(), &msg.user_id) else {
        return;
    };
    match ctx.engine.force_leave(game_id, &msg.user_id) {
        Ok(Some(summary)) => {
            if let Some(game) = game_ref(ctx, game_id) {
                ctx.engine.notifier().public(
                    &game,
                    &format!(
                        "the last manager left; the show is over.\n{}",
                        format_summary(&summary)
                    ),
                );
            }
        }
        Ok(None) => {
            if let Some(game) = game_ref(ctx, game_id) {
                ctx.engine
                    .notifier()
                    .public(&game, &format!("<@{}> stepped down as manager", msg.user_id));
            }
        }
        Err(e) => reply_err(ctx, &msg.user_id, e),
    }
}

fn cmd_token(ctx: &BotContext, msg: &MessageEvent) {
    let manages = ctx
        .engine
        .db()
        .with_conn(|conn| queries::manager_active_game(conn, &msg.user_id));
    match manages {
        Ok(Some(_)) => match limelight_api::tokens::mint_manager_token(&ctx.jwt_secret, &msg.user_id)
        {
            Ok(token) => ctx
                .engine
                .notifier()
                .private(&msg.user_id, &format!("your dashboard token: {token}")),
            Err(e) => error!("token minting failed: {e:#}"),
        },
        Ok(None) => reply_err(ctx, &msg.user_id, GameError::NotManager),
        Err(e) => error!("manager lookup failed: {e:#}"),
    }
}

/// Catch-all: every message inside a show thread stirs the client secret.
fn track_thread_message(ctx: &BotContext, msg: &MessageEvent) {
    let game_id = match ctx
        .engine
        .active_game_for_thread(&msg.channel_id, msg.thread_root())
    {
        Ok(Some(game_id)) => game_id,
        Ok(None) => return,
        Err(e) => {
            warn!("thread lookup failed: {e}");
            return;
        }
    };
    if let Err(e) = ctx
        .engine
        .record_message(game_id, &msg.user_id, &msg.message_id, &msg.text)
    {
        warn!("failed to record message {}: {e}", msg.message_id);
    }
}

// -- Actions --

fn act_start(ctx: &BotContext, action: &ActionEvent) {
    let Some(game_id) =
        active_game(ctx, &action.channel_id, action.thread_root(), &action.user_id)
    else {
        return;
    };
    match ctx.engine.start_turn(game_id, &action.user_id) {
        Ok(turn) => {
            if let Some(game) = game_ref(ctx, game_id) {
                ctx.engine.notifier().public(
                    &game,
                    &format!(
                        "<@{}>'s turn is underway, {} on the clock",
                        turn.user_id,
                        duration_label(turn.assigned_duration_seconds)
                    ),
                );
            }
        }
        Err(e) => reply_err(ctx, &action.user_id, e),
    }
}

fn act_accept(ctx: &BotContext, action: &ActionEvent) {
    turn_action(ctx, action, "accepted their turn", |ctx, game_id, actor| {
        ctx.engine.accept_turn(game_id, actor).map(|_| ())
    })
}

fn act_reject(ctx: &BotContext, action: &ActionEvent) {
    turn_action(ctx, action, "rejected their turn", |ctx, game_id, actor| {
        ctx.engine.reject_turn(game_id, actor).map(|_| ())
    })
}

fn act_skip(ctx: &BotContext, action: &ActionEvent) {
    turn_action(ctx, action, "skipped the turn", |ctx, game_id, actor| {
        ctx.engine.skip_turn(game_id, actor).map(|_| ())
    })
}

fn act_completed(ctx: &BotContext, action: &ActionEvent) {
    turn_action(ctx, action, "marked the turn completed", |ctx, game_id, actor| {
        ctx.engine.mark_completed(game_id, actor).map(|_| ())
    })
}

fn act_failed(ctx: &BotContext, action: &ActionEvent) {
    turn_action(ctx, action, "marked the turn failed", |ctx, game_id, actor| {
        ctx.engine.mark_failed(game_id, actor).map(|_| ())
    })
}

fn act_confirm_skip(ctx: &BotContext, action: &ActionEvent) {
    turn_action(ctx, action, "confirmed the skip", |ctx, game_id, actor| {
        ctx.engine.confirm_skip(game_id, actor).map(|_| ())
    })
}

/// Shared shape of the turn-resolution buttons; the engine decides which
/// role may drive each transition.
fn turn_action(
    ctx: &BotContext,
    action: &ActionEvent,
    announcement: &str,
    run: impl Fn(&BotContext, i64, &str) -> limelight_game::Result<()>,
) {
    let Some(game_id) =
        active_game(ctx, &action.channel_id, action.thread_root(), &action.user_id)
    else {
        return;
    };
    match run(ctx, game_id, &action.user_id) {
        Ok(()) => {
            if let Some(game) = game_ref(ctx, game_id) {
                ctx.engine
                    .notifier()
                    .public(&game, &format!("<@{}> {announcement}", action.user_id));
            }
        }
        Err(e) => reply_err(ctx, &action.user_id, e),
    }
}

// -- Presence --

fn track_presence(ctx: &BotContext, presence: &PresenceEvent) {
    let joined = presence.state == PresenceState::Joined;
    if let Err(e) = ctx.engine.handle_presence(
        &presence.room_id,
        presence.channel_id.as_deref(),
        &presence.user_id,
        &presence.user_name,
        joined,
    ) {
        warn!(
            "presence update for {} in {} failed: {e}",
            presence.user_id, presence.room_id
        );
    }
}
