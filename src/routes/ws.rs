//! WebSocket gateway — inbound action dispatch and outbound fan-out.
//!
//! DESIGN
//! ======
//! On upgrade, resolves the connection's identity from an optional session
//! token and enters a `select!` loop:
//! - Incoming client frames → parse + dispatch by syscall prefix
//! - Frames from room/lobby/registry peers → forward to client
//!
//! The Room Coordinator owns all state transitions; this layer translates
//! frames into coordinator calls, replies to the sender, and fans the
//! returned emissions out. Errors reach the requester only.
//!
//! AUTH
//! ====
//! Token validation is deliberately permissive: a missing or invalid
//! token yields an anonymous connection rather than a rejected one.
//! Anonymous connections identify themselves per-action via the `player`
//! payload field, matching the reference client protocol.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::frame::{Data, Frame};
use crate::services::room::{self, DeleteOrigin};
use crate::services::session;
use crate::state::AppState;

// =============================================================================
// CONNECTION STATE
// =============================================================================

/// Per-connection bookkeeping threaded through dispatch.
struct Conn {
    client_id: Uuid,
    /// Identity resolved from the session token at connect time.
    auth_identity: Option<String>,
    /// Identity under which this connection is registered for targeted
    /// delivery. Authenticated connections register at connect; anonymous
    /// ones register with the `player` name of their first room join.
    registered_as: Option<String>,
    /// Room this connection is currently subscribed to.
    current_room: Option<Uuid>,
    in_lobby: bool,
    tx: mpsc::Sender<Frame>,
}

impl Conn {
    /// The identity acting in a request: the authenticated one, or the
    /// payload's field for anonymous connections.
    fn actor<'a>(&'a self, req: &'a Frame, key: &str) -> Option<&'a str> {
        self.auth_identity
            .as_deref()
            .or_else(|| req.str_field(key))
    }
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    // Best-effort auth: anything short of a valid token is anonymous.
    let identity = match params.get("token") {
        Some(token) => match session::validate_token(&state.pool, token).await {
            Ok(identity) => identity,
            Err(e) => {
                warn!(error = %e, "ws: token validation failed; connecting anonymously");
                None
            }
        },
        None => None,
    };

    ws.on_upgrade(move |socket| run_ws(socket, state, identity))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, identity: Option<String>) {
    let client_id = Uuid::new_v4();

    // Per-connection channel for frames pushed by rooms, the lobby, and
    // targeted notifications.
    let (tx, mut rx) = mpsc::channel::<Frame>(256);

    if let Some(identity) = &identity {
        state.registry.insert(identity, client_id, tx.clone()).await;
    }

    let mut conn = Conn {
        client_id,
        registered_as: identity.clone(),
        auth_identity: identity,
        current_room: None,
        in_lobby: false,
        tx,
    };

    let welcome = Frame::request("session:connected", Data::new())
        .with_data("client_id", client_id.to_string())
        .with_data("identity", serde_json::json!(conn.auth_identity));
    if send_frame(&mut socket, &welcome).await.is_err() {
        return;
    }

    info!(%client_id, identity = ?conn.auth_identity, "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let Ok(msg) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let replies = process_inbound_text(&state, &mut conn, &text).await;
                        let mut closed = false;
                        for frame in replies {
                            if send_frame(&mut socket, &frame).await.is_err() {
                                closed = true;
                                break;
                            }
                        }
                        if closed {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = rx.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    // Teardown order matters: notify rooms while the peer senders are
    // still subscribed, then drop our own registrations.
    state.lobby.write().await.remove(&client_id);
    room::on_disconnect(&state, conn.registered_as.as_deref(), client_id).await;
    if let Some(identity) = &conn.registered_as {
        state.registry.remove(identity, client_id).await;
    }
    info!(%client_id, "ws: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame, returning frames for the
/// sender. Kept transport-free so tests can drive dispatch directly.
async fn process_inbound_text(state: &AppState, conn: &mut Conn, text: &str) -> Vec<Frame> {
    let mut req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(client_id = %conn.client_id, error = %e, "ws: invalid inbound frame");
            let err = Frame::request("gateway:error", Data::new()).with_data("message", format!("invalid json: {e}"));
            return vec![err];
        }
    };

    // Stamp the authenticated identity as `from`.
    if let Some(identity) = &conn.auth_identity {
        req.from = Some(identity.clone());
    }

    info!(client_id = %conn.client_id, id = %req.id, syscall = %req.syscall, "ws: recv frame");

    let result = match req.prefix() {
        "lobby" => handle_lobby(state, conn, &req).await,
        "room" => handle_room(state, conn, &req).await,
        "game" => handle_game(state, conn, &req).await,
        "rematch" => handle_rematch(state, conn, &req).await,
        "chat" => handle_chat(state, conn, &req).await,
        prefix => Err(req.error(format!("unknown prefix: {prefix}"))),
    };

    match result {
        Ok(reply) => vec![req.done_with(reply)],
        Err(err_frame) => vec![err_frame],
    }
}

/// Run a coordinator operation: deliver its emissions, surface its reply.
async fn apply(
    state: &AppState,
    game_id: Uuid,
    req: &Frame,
    result: Result<room::Outcome, room::RoomError>,
) -> Result<Data, Frame> {
    match result {
        Ok(outcome) => {
            room::deliver(state, game_id, &outcome).await;
            Ok(outcome.reply)
        }
        Err(err) => Err(req.error_from(&err)),
    }
}

/// Resolve the target game id from the frame envelope or payload.
fn target_room(conn: &Conn, req: &Frame) -> Option<Uuid> {
    req.room_id
        .or_else(|| req.str_field("room").and_then(|s| s.parse().ok()))
        .or_else(|| req.str_field("game_id").and_then(|s| s.parse().ok()))
        .or(conn.current_room)
}

// =============================================================================
// LOBBY HANDLERS
// =============================================================================

async fn handle_lobby(state: &AppState, conn: &mut Conn, req: &Frame) -> Result<Data, Frame> {
    match req.op() {
        "join" => {
            state.lobby.write().await.insert(conn.client_id, conn.tx.clone());
            conn.in_lobby = true;

            // Reply with the same feed shape lobby subscribers get pushed.
            let feed = room::lobby_update_frame(state).await.map_err(|e| req.error_from(&e))?;
            Ok(feed.data)
        }
        "leave" => {
            state.lobby.write().await.remove(&conn.client_id);
            conn.in_lobby = false;
            Ok(Data::new())
        }
        "delete_game" => {
            let Some(game_id) = target_room(conn, req) else {
                return Err(req.error("game_id required"));
            };
            let Some(player) = conn.actor(req, "player").map(ToOwned::to_owned) else {
                return Err(req.error("player required"));
            };
            let result = room::delete_game(state, game_id, &player, DeleteOrigin::Lobby).await;
            apply(state, game_id, req, result).await
        }
        op => Err(req.error(format!("unknown lobby op: {op}"))),
    }
}

// =============================================================================
// ROOM HANDLERS
// =============================================================================

async fn handle_room(state: &AppState, conn: &mut Conn, req: &Frame) -> Result<Data, Frame> {
    match req.op() {
        "join" => {
            let Some(game_id) = target_room(conn, req) else {
                return Err(req.error("room required"));
            };
            let Some(player) = conn.actor(req, "player").map(ToOwned::to_owned) else {
                return Err(req.error("player required"));
            };

            // Leave the previous room before joining a new one.
            if let Some(old_room) = conn.current_room.take() {
                if old_room != game_id {
                    if let Some(identity) = conn.registered_as.clone() {
                        let result = room::leave_room(state, old_room, &identity, Some(conn.client_id)).await;
                        if let Ok(outcome) = result {
                            room::deliver(state, old_room, &outcome).await;
                        }
                    }
                }
            }

            let result = room::join_room(state, game_id, &player, conn.client_id, conn.tx.clone()).await;
            let reply = apply(state, game_id, req, result).await?;

            conn.current_room = Some(game_id);
            // Anonymous connections become reachable for targeted delivery
            // under their chosen player name.
            if conn.auth_identity.is_none() && conn.registered_as.as_deref() != Some(player.as_str()) {
                if let Some(old) = conn.registered_as.take() {
                    state.registry.remove(&old, conn.client_id).await;
                }
                state.registry.insert(&player, conn.client_id, conn.tx.clone()).await;
                conn.registered_as = Some(player);
            }
            Ok(reply)
        }
        "leave" => {
            let Some(game_id) = target_room(conn, req) else {
                return Err(req.error("room required"));
            };
            let Some(player) = conn.actor(req, "player").map(ToOwned::to_owned) else {
                return Err(req.error("player required"));
            };
            let result = room::leave_room(state, game_id, &player, Some(conn.client_id)).await;
            if conn.current_room == Some(game_id) {
                conn.current_room = None;
            }
            apply(state, game_id, req, result).await
        }
        op => Err(req.error(format!("unknown room op: {op}"))),
    }
}

// =============================================================================
// GAME HANDLERS
// =============================================================================

async fn handle_game(state: &AppState, conn: &mut Conn, req: &Frame) -> Result<Data, Frame> {
    let Some(game_id) = target_room(conn, req) else {
        return Err(req.error("room required"));
    };
    let Some(player) = conn.actor(req, "player").map(ToOwned::to_owned) else {
        return Err(req.error("player required"));
    };

    let result = match req.op() {
        "move" => {
            let Some(index) = req
                .data
                .get("index")
                .and_then(serde_json::Value::as_u64)
                .and_then(|v| usize::try_from(v).ok())
            else {
                return Err(req.error("index required"));
            };
            room::make_move(state, game_id, &player, index).await
        }
        // Accepting a restart is just the second vote.
        "restart_request" | "restart_accept" => room::request_restart(state, game_id, &player).await,
        "restart_decline" => room::decline_restart(state, game_id, &player).await,
        "delete" => room::delete_game(state, game_id, &player, DeleteOrigin::Room).await,
        op => return Err(req.error(format!("unknown game op: {op}"))),
    };
    apply(state, game_id, req, result).await
}

// =============================================================================
// REMATCH HANDLERS
// =============================================================================

async fn handle_rematch(state: &AppState, conn: &mut Conn, req: &Frame) -> Result<Data, Frame> {
    let Some(game_id) = target_room(conn, req) else {
        return Err(req.error("game_id required"));
    };
    let Some(inviter) = req.str_field("inviter").map(ToOwned::to_owned) else {
        return Err(req.error("inviter required"));
    };
    let Some(invitee) = req.str_field("invitee").map(ToOwned::to_owned) else {
        return Err(req.error("invitee required"));
    };

    let result = match req.op() {
        "invite" => room::send_rematch_invite(state, game_id, &inviter, &invitee).await,
        "respond" => {
            let accepted = req
                .data
                .get("accepted")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false);
            room::respond_to_rematch_invite(state, game_id, &inviter, &invitee, accepted).await
        }
        "cancel" => room::cancel_rematch_invite(state, game_id, &inviter, &invitee).await,
        op => return Err(req.error(format!("unknown rematch op: {op}"))),
    };
    apply(state, game_id, req, result).await
}

// =============================================================================
// CHAT HANDLERS (pass-through, not part of the game state machine)
// =============================================================================

async fn handle_chat(state: &AppState, conn: &mut Conn, req: &Frame) -> Result<Data, Frame> {
    let Some(game_id) = target_room(conn, req) else {
        return Err(req.error("room required"));
    };
    match req.op() {
        "message" | "typing" => {
            // Forwarded verbatim to room peers; the sender already has it.
            let Some(handle) = state.existing_room(game_id).await else {
                return Ok(Data::new());
            };
            let forward = Frame::request(&req.syscall, req.data.clone())
                .with_room_id(game_id)
                .with_from(req.from.clone().unwrap_or_default());
            let room = handle.lock().await;
            for (client_id, tx) in &room.clients {
                if *client_id == conn.client_id {
                    continue;
                }
                let _ = tx.try_send(forward.clone());
            }
            Ok(Data::new())
        }
        op => Err(req.error(format!("unknown chat op: {op}"))),
    }
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    if frame.status == crate::frame::Status::Error {
        let message = frame.str_field("message").unwrap_or("-");
        warn!(id = %frame.id, syscall = %frame.syscall, message, "ws: send frame status=Error");
    } else {
        info!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
    }
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
