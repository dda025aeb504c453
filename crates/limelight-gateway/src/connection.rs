use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use limelight_db::{Database, queries};
use limelight_types::api::{Claims, TOKEN_AUDIENCE, TOKEN_ISSUER};
use limelight_types::events::GatewayCommand;

use crate::dispatcher::Dispatcher;

/// How long a fresh connection may take to send its Identify frame.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// Server sends a Ping every 15 seconds; two consecutive missed Pongs
/// (~30s) drop the connection.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle one dashboard WebSocket connection.
///
/// The client opens the socket and sends `Identify { token, feed }`. The
/// token's subject must manage an active game; the connection is then
/// subscribed to that game's topic for the chosen feed. Inbound text frames
/// after the handshake are acknowledged and otherwise ignored (the dashboard
/// uses them as keep-alives).
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    jwt_secret: String,
) {
    let (mut sender, mut receiver) = socket.split();

    let identify = match wait_for_identify(&mut receiver).await {
        Some(cmd) => cmd,
        None => {
            warn!("websocket client failed to identify, closing");
            return;
        }
    };
    let GatewayCommand::Identify { token, feed } = identify;

    let user_id = match validate_token(&token, &jwt_secret) {
        Some(user_id) => user_id,
        None => {
            warn!("websocket identify carried an invalid token, closing");
            return;
        }
    };

    // The token is scoped to the one active game its subject manages.
    let resolver = db.clone();
    let resolved_user = user_id.clone();
    let game_id = tokio::task::spawn_blocking(move || {
        resolver.with_conn(|conn| queries::manager_active_game(conn, &resolved_user))
    })
    .await;
    let game_id = match game_id {
        Ok(Ok(Some(game_id))) => game_id,
        Ok(Ok(None)) => {
            warn!("{user_id} identified but manages no active game, closing");
            return;
        }
        Ok(Err(e)) => {
            warn!("game lookup failed for {user_id}: {e:#}");
            return;
        }
        Err(e) => {
            warn!("game lookup task failed for {user_id}: {e}");
            return;
        }
    };

    let topic = feed.topic(game_id);
    info!("{user_id} connected to gateway, subscribed to {topic}");

    let mut broadcast_rx = dispatcher.subscribe();
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut missed_heartbeats: u8 = 0;

    loop {
        tokio::select! {
            result = broadcast_rx.recv() => {
                let event = match result {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        debug!("connection for {topic} lagged, dropped {n} events");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };
                if event.topic != topic {
                    continue;
                }
                let text = match serde_json::to_string(&event.payload) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("failed to encode push payload: {e}");
                        continue;
                    }
                };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(_))) => {
                        // Keep-alive from the dashboard; acknowledge it.
                        if sender
                            .send(Message::Text(r#"{"type":"ack"}"#.into()))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        missed_heartbeats = 0;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("websocket receive error on {topic}: {e}");
                        break;
                    }
                }
            }
            _ = heartbeat.tick() => {
                if missed_heartbeats >= 2 {
                    warn!("connection on {topic} missed heartbeats, dropping");
                    break;
                }
                missed_heartbeats += 1;
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    info!("{user_id} disconnected from {topic}");
}

async fn wait_for_identify(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
) -> Option<GatewayCommand> {
    let deadline = timeout(IDENTIFY_TIMEOUT, async {
        while let Some(message) = receiver.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    match serde_json::from_str::<GatewayCommand>(&text) {
                        Ok(cmd) => return Some(cmd),
                        Err(e) => {
                            debug!("ignoring non-identify frame: {e}");
                        }
                    }
                }
                Ok(Message::Close(_)) => return None,
                Ok(_) => {}
                Err(_) => return None,
            }
        }
        None
    });
    deadline.await.ok().flatten()
}

fn validate_token(token: &str, jwt_secret: &str) -> Option<String> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[TOKEN_ISSUER]);
    validation.set_audience(&[TOKEN_AUDIENCE]);
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims.sub)
    .ok()
}
