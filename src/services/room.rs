//! Room coordinator — the per-game state machine.
//!
//! ARCHITECTURE
//! ============
//! Every operation that touches a game's state runs under that room's
//! mutex: read game → validate → mutate through the store → decide what to
//! emit. Operations are pure with respect to delivery — they return an
//! [`Outcome`] listing emissions, and the caller fans those out with
//! [`deliver`] after the room lock is released. Two concurrent moves can
//! therefore never both observe the same pre-state, and the emitted
//! `game:state_update` sequence is a linear history of the game.
//!
//! ERROR HANDLING
//! ==============
//! Errors are returned to the caller and reach the requester only; room
//! peers never observe a failed attempt. Persistence happens inside
//! `GameStore::update`, so a failed persist leaves no partial mutation.

use tracing::info;
use uuid::Uuid;

use crate::frame::{Data, Frame};
use crate::services::game::Game;
use crate::services::logic;
use crate::services::store::{GameStore, StoreError};
use crate::state::{AppState, RematchInvite, Room};

// =============================================================================
// EVENT SYSCALLS
// =============================================================================

pub const EV_STATE_UPDATE: &str = "game:state_update";
pub const EV_PLAYER_JOINED: &str = "room:player_joined";
pub const EV_PLAYER_LEFT: &str = "room:player_left";
pub const EV_PLAYER_DISCONNECTED: &str = "room:player_disconnected";
pub const EV_MOVE_MADE: &str = "game:move_made";
pub const EV_GAME_OVER: &str = "game:over";
pub const EV_GAME_STARTED: &str = "game:started";
pub const EV_GAME_READY: &str = "game:ready";
pub const EV_GAME_COMPLETED: &str = "game:completed";
pub const EV_GAME_RESTARTED: &str = "game:restarted";
pub const EV_RESTART_REQUESTED: &str = "game:restart_requested";
pub const EV_RESTART_DECLINED: &str = "game:restart_declined";
pub const EV_REMATCH_INVITE: &str = "rematch:invite";
pub const EV_REMATCH_RESPONSE: &str = "rematch:response";
pub const EV_REMATCH_CANCELLED: &str = "rematch:cancelled";
pub const EV_GAME_DELETED: &str = "game:deleted";
pub const EV_GAME_AUTO_DELETED: &str = "game:auto_deleted";
pub const EV_LOBBY_UPDATE: &str = "lobby:update";

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("game not found: {0}")]
    GameNotFound(Uuid),
    #[error("invalid move: {0}")]
    InvalidMove(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invitation from {inviter} to {invitee} is already pending")]
    AlreadyPending { inviter: String, invitee: String },
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for RoomError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::GameNotFound(id),
            other => Self::Store(other),
        }
    }
}

impl crate::frame::ErrorCode for RoomError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::GameNotFound(_) => "E_GAME_NOT_FOUND",
            Self::InvalidMove(_) => "E_INVALID_MOVE",
            Self::Unauthorized(_) => "E_UNAUTHORIZED",
            Self::InvalidInput(_) => "E_INVALID_INPUT",
            Self::AlreadyPending { .. } => "E_ALREADY_PENDING",
            Self::Store(err) => err.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Store(err) if err.retryable())
    }
}

// =============================================================================
// OUTCOME
// =============================================================================

/// Who receives an emitted frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// Every subscriber of the game's room.
    Room,
    /// Every lobby subscriber.
    Lobby,
    /// Every live connection of one identity, via the registry.
    Identity(String),
}

/// One frame headed for one audience.
#[derive(Debug, Clone)]
pub struct Emission {
    pub audience: Audience,
    pub frame: Frame,
}

impl Emission {
    fn room(frame: Frame) -> Self {
        Self { audience: Audience::Room, frame }
    }

    fn lobby(frame: Frame) -> Self {
        Self { audience: Audience::Lobby, frame }
    }

    fn identity(identity: impl Into<String>, frame: Frame) -> Self {
        Self { audience: Audience::Identity(identity.into()), frame }
    }
}

/// Result of one coordinator operation: a reply payload for the requester
/// plus the emissions decided atomically with the mutation.
#[derive(Debug, Default)]
pub struct Outcome {
    pub reply: Data,
    pub emissions: Vec<Emission>,
    /// Tear the room down after emissions are delivered.
    pub drop_room: bool,
}

/// Seat resolved for a joining identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    PlayerX,
    PlayerO,
    Spectator,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PlayerX => "X",
            Self::PlayerO => "O",
            Self::Spectator => "spectator",
        }
    }
}

// =============================================================================
// DELIVERY
// =============================================================================

/// Fan an outcome's emissions out to their audiences, then apply any room
/// teardown. Delivery is best-effort per subscriber: a full or closed
/// channel drops that copy without failing the operation.
pub async fn deliver(state: &AppState, game_id: Uuid, outcome: &Outcome) {
    for emission in &outcome.emissions {
        match &emission.audience {
            Audience::Room => {
                let Some(handle) = state.existing_room(game_id).await else {
                    continue;
                };
                let room = handle.lock().await;
                for tx in room.clients.values() {
                    let _ = tx.try_send(emission.frame.clone());
                }
            }
            Audience::Lobby => {
                let lobby = state.lobby.read().await;
                for tx in lobby.values() {
                    let _ = tx.try_send(emission.frame.clone());
                }
            }
            Audience::Identity(identity) => {
                state.registry.send_to(identity, &emission.frame).await;
            }
        }
    }
    if outcome.drop_room {
        state.drop_room(game_id).await;
    }
}

/// Build the waiting-games feed frame pushed to lobby subscribers whenever
/// the waiting list changes.
pub async fn lobby_update_frame(state: &AppState) -> Result<Frame, StoreError> {
    let waiting = state.store.list_waiting().await?;
    let games: Vec<serde_json::Value> = waiting
        .iter()
        .map(|g| {
            serde_json::json!({
                "id": g.id,
                "host": g.player_x,
                "status": game_status(g),
            })
        })
        .collect();
    Ok(Frame::request(EV_LOBBY_UPDATE, Data::new()).with_data("games", serde_json::json!(games)))
}

// =============================================================================
// JOIN / LEAVE
// =============================================================================

/// Join a game's room. Resolves the joiner's seat, claims the O seat on
/// the first foreign join, and announces membership to the room.
pub async fn join_room(
    state: &AppState,
    game_id: Uuid,
    identity: &str,
    client_id: Uuid,
    tx: tokio::sync::mpsc::Sender<Frame>,
) -> Result<Outcome, RoomError> {
    let identity = require_identity(identity)?;

    let handle = state.room(game_id).await;
    let mut room = handle.lock().await;

    let mut game = state.store.get(game_id).await?;

    // Seat resolution, in priority order: existing X, existing O, vacant O,
    // spectator.
    let (role, started) = if game.player_x == identity {
        (Role::PlayerX, false)
    } else if game.player_o.as_deref() == Some(identity) {
        (Role::PlayerO, false)
    } else if game.player_o.is_none() {
        game = state
            .store
            .update(game_id, &mut |g| {
                if g.player_o.is_none() {
                    g.player_o = Some(identity.to_string());
                }
            })
            .await?;
        (Role::PlayerO, true)
    } else {
        (Role::Spectator, false)
    };

    room.clients.insert(client_id, tx);
    match role {
        Role::PlayerX | Role::PlayerO => {
            room.players.insert(identity.to_string());
            room.spectators.remove(identity);
        }
        Role::Spectator => {
            room.spectators.insert(identity.to_string());
        }
    }

    info!(%game_id, identity, role = role.as_str(), "room: joined");

    let mut emissions = Vec::new();
    if started {
        emissions.push(Emission::lobby(
            Frame::request(EV_GAME_STARTED, Data::new()).with_data("game_id", game_id.to_string()),
        ));
        // The game just left the waiting list.
        emissions.push(Emission::lobby(lobby_update_frame(state).await?));
        emissions.push(Emission::room(
            Frame::request(EV_GAME_READY, Data::new())
                .with_room_id(game_id)
                .with_data("player_x", game.player_x.clone())
                .with_data("player_o", game.player_o.clone().unwrap_or_default()),
        ));
    }
    emissions.push(Emission::room(state_update_frame(&game, &room, Some(identity))));

    let both_present = game.player_o.is_some();
    emissions.push(Emission::room(
        Frame::request(EV_PLAYER_JOINED, Data::new())
            .with_room_id(game_id)
            .with_data("player", identity)
            .with_data("role", role.as_str())
            .with_data("both_present", both_present),
    ));

    let mut reply = game.to_data();
    reply.insert("role".into(), serde_json::json!(role.as_str()));
    Ok(Outcome { reply, emissions, drop_room: false })
}

/// Leave a room. Idempotent: leaving twice equals leaving once. Never
/// mutates the game.
pub async fn leave_room(
    state: &AppState,
    game_id: Uuid,
    identity: &str,
    client_id: Option<Uuid>,
) -> Result<Outcome, RoomError> {
    let identity = require_identity(identity)?;

    let Some(handle) = state.existing_room(game_id).await else {
        return Ok(Outcome::default());
    };
    let mut room = handle.lock().await;

    if let Some(client_id) = client_id {
        room.clients.remove(&client_id);
    }
    let was_player = room.players.remove(identity);
    let was_spectator = room.spectators.remove(identity);
    let was_present = was_player || was_spectator;

    let mut emissions = Vec::new();
    if was_present {
        emissions.push(Emission::room(
            Frame::request(EV_PLAYER_LEFT, Data::new())
                .with_room_id(game_id)
                .with_data("player", identity),
        ));
    }
    Ok(Outcome { reply: Data::new(), emissions, drop_room: false })
}

// =============================================================================
// MOVES
// =============================================================================

/// Apply one move for `identity` at `index`.
pub async fn make_move(
    state: &AppState,
    game_id: Uuid,
    identity: &str,
    index: usize,
) -> Result<Outcome, RoomError> {
    let identity = require_identity(identity)?;

    let handle = state.room(game_id).await;
    let room = handle.lock().await;

    let game = state.store.get(game_id).await?;

    // Game-state preconditions, checked in a fixed order. Every failing
    // reason is reported so the client can explain the rejection fully.
    let mut reasons = Vec::new();
    if game.winner.is_some() {
        reasons.push("game already has a winner");
    }
    if game.is_draw {
        reasons.push("game ended in a draw");
    }
    if game.player_o.is_none() {
        reasons.push("waiting for a second player");
    }
    if reasons.is_empty() && !game.is_turn_of(identity) {
        reasons.push("not your turn");
    }
    if !reasons.is_empty() {
        return Err(RoomError::InvalidMove(reasons.join("; ")));
    }

    if !logic::is_valid_index(index) || game.board.cell(index).is_some() {
        return Err(RoomError::InvalidMove("position already taken or invalid".into()));
    }

    let mover_symbol = game.current_turn;
    let updated = state
        .store
        .update(game_id, &mut |g| {
            g.board.0[index] = Some(g.current_turn);
            if let Some(eval) = logic::evaluate(&g.board) {
                g.winner = Some(eval.winner);
                g.winning_line = Some(eval.line);
                // current_turn stays put; the game is over.
            } else if logic::is_draw(&g.board, None) {
                g.is_draw = true;
            } else {
                g.current_turn = g.current_turn.other();
            }
        })
        .await?;

    info!(%game_id, identity, index, symbol = %mover_symbol, "room: move accepted");

    let ts = now_ms();
    let mut emissions = Vec::new();

    let mut state_update = state_update_frame(&updated, &room, Some(identity));
    state_update.data.insert(
        "last_move".into(),
        serde_json::json!({
            "index": index,
            "symbol": mover_symbol,
            "player": identity,
            "ts": ts,
        }),
    );
    emissions.push(Emission::room(state_update));

    emissions.push(Emission::room(
        Frame::request(EV_MOVE_MADE, Data::new())
            .with_room_id(game_id)
            .with_data("index", index)
            .with_data("symbol", mover_symbol.as_str())
            .with_data("player", identity)
            .with_data("ts", ts),
    ));

    if updated.is_completed() {
        let winner_name = updated
            .winner
            .and_then(|s| updated.identity_of(s))
            .map(ToOwned::to_owned);
        emissions.push(Emission::room(
            Frame::request(EV_GAME_OVER, Data::new())
                .with_room_id(game_id)
                .with_data("winner", serde_json::json!(updated.winner))
                .with_data("winner_name", serde_json::json!(winner_name))
                .with_data("is_draw", updated.is_draw)
                .with_data("board", serde_json::json!(updated.board))
                .with_data("winning_line", serde_json::json!(updated.winning_line))
                .with_data("ts", ts),
        ));
        emissions.push(Emission::lobby(
            Frame::request(EV_GAME_COMPLETED, Data::new()).with_data("game_id", game_id.to_string()),
        ));
    }

    Ok(Outcome { reply: updated.to_data(), emissions, drop_room: false })
}

// =============================================================================
// RESTART (vote-based)
// =============================================================================

/// Record a restart vote. "Accept" is the second vote through the same
/// door: when both participants have voted, the game resets.
pub async fn request_restart(state: &AppState, game_id: Uuid, identity: &str) -> Result<Outcome, RoomError> {
    let identity = require_identity(identity)?;

    let handle = state.room(game_id).await;
    let mut room = handle.lock().await;

    let game = state.store.get(game_id).await?;
    if !game.is_completed() {
        return Err(RoomError::InvalidMove("game is not finished yet".into()));
    }
    if !game.is_participant(identity) {
        return Err(RoomError::Unauthorized("only players can restart the game".into()));
    }

    room.restart_votes.insert(identity.to_string());

    let both_voted = game
        .player_o
        .as_deref()
        .is_some_and(|o| room.restart_votes.contains(o))
        && room.restart_votes.contains(&game.player_x);

    if both_voted {
        let (updated, mut emissions) = reset_for_restart(state, game_id, &mut room).await?;
        info!(%game_id, "room: restart committed");
        emissions.insert(
            0,
            Emission::room(
                Frame::request(EV_GAME_RESTARTED, Data::new())
                    .with_room_id(game_id)
                    .with_data("ts", now_ms()),
            ),
        );
        return Ok(Outcome { reply: updated.to_data(), emissions, drop_room: false });
    }

    let other = if game.player_x == identity {
        game.player_o.clone().unwrap_or_default()
    } else {
        game.player_x.clone()
    };
    let votes_needed = 2 - room.restart_votes.len();
    info!(%game_id, identity, votes_needed, "room: restart requested");

    let emissions = vec![Emission::room(
        Frame::request(EV_RESTART_REQUESTED, Data::new())
            .with_room_id(game_id)
            .with_data("requested_by", identity)
            .with_data("awaiting", other)
            .with_data("votes_needed", votes_needed),
    )];
    Ok(Outcome { reply: Data::new(), emissions, drop_room: false })
}

/// Withdraw from the restart negotiation. Clears all votes; safe to call
/// in any game state.
pub async fn decline_restart(state: &AppState, game_id: Uuid, identity: &str) -> Result<Outcome, RoomError> {
    let identity = require_identity(identity)?;

    // Confirm the game exists so unknown rooms still surface NotFound.
    state.store.get(game_id).await?;

    let handle = state.room(game_id).await;
    let mut room = handle.lock().await;
    room.restart_votes.clear();

    let emissions = vec![Emission::room(
        Frame::request(EV_RESTART_DECLINED, Data::new())
            .with_room_id(game_id)
            .with_data("declined_by", identity),
    )];
    Ok(Outcome { reply: Data::new(), emissions, drop_room: false })
}

/// Reset the game for a new round and clear the room's votes. Callers hold
/// the room lock and wrap the returned emissions with their own event.
async fn reset_for_restart(
    state: &AppState,
    game_id: Uuid,
    room: &mut Room,
) -> Result<(Game, Vec<Emission>), RoomError> {
    let updated = state.store.update(game_id, &mut Game::reset).await?;
    room.restart_votes.clear();

    let mut frame = state_update_frame(&updated, room, None);
    frame.data.insert("restarted".into(), serde_json::json!(true));
    Ok((updated, vec![Emission::room(frame)]))
}

// =============================================================================
// REMATCH (invitation-based)
// =============================================================================

/// Offer a rematch to the other participant. Targeted, not broadcast.
pub async fn send_rematch_invite(
    state: &AppState,
    game_id: Uuid,
    inviter: &str,
    invitee: &str,
) -> Result<Outcome, RoomError> {
    let inviter = require_identity(inviter)?;
    let invitee = require_identity(invitee)?;
    if inviter == invitee {
        return Err(RoomError::InvalidInput("cannot invite yourself".into()));
    }

    let handle = state.room(game_id).await;
    let mut room = handle.lock().await;

    let game = state.store.get(game_id).await?;
    if !game.is_completed() {
        return Err(RoomError::InvalidMove("game is not finished yet".into()));
    }
    if !game.is_participant(inviter) {
        return Err(RoomError::Unauthorized("only players can invite a rematch".into()));
    }
    if !game.is_participant(invitee) {
        return Err(RoomError::InvalidInput(format!("{invitee} is not a player in this game")));
    }
    if !state.registry.is_online(invitee).await {
        return Err(RoomError::InvalidInput(format!("{invitee} is not connected")));
    }

    let key = (inviter.to_string(), invitee.to_string());
    if room.pending_invites.contains_key(&key) {
        return Err(RoomError::AlreadyPending { inviter: inviter.into(), invitee: invitee.into() });
    }
    room.pending_invites.insert(
        key,
        RematchInvite {
            inviter: inviter.to_string(),
            invitee: invitee.to_string(),
            created_at: time::OffsetDateTime::now_utc(),
        },
    );

    info!(%game_id, inviter, invitee, "room: rematch invite sent");

    let emissions = vec![Emission::identity(
        invitee,
        Frame::request(EV_REMATCH_INVITE, Data::new())
            .with_room_id(game_id)
            .with_data("game_id", game_id.to_string())
            .with_data("inviter", inviter)
            .with_data("invitee", invitee),
    )];
    Ok(Outcome { reply: Data::new(), emissions, drop_room: false })
}

/// Answer a pending rematch invite. Accepting resets the game exactly like
/// a committed restart vote; declining just discards the invitation.
pub async fn respond_to_rematch_invite(
    state: &AppState,
    game_id: Uuid,
    inviter: &str,
    invitee: &str,
    accepted: bool,
) -> Result<Outcome, RoomError> {
    let inviter = require_identity(inviter)?;
    let invitee = require_identity(invitee)?;

    let handle = state.room(game_id).await;
    let mut room = handle.lock().await;

    let key = (inviter.to_string(), invitee.to_string());
    if !room.pending_invites.contains_key(&key) {
        return Err(RoomError::InvalidInput(format!("no pending invitation from {inviter} to {invitee}")));
    }

    let response = Frame::request(EV_REMATCH_RESPONSE, Data::new())
        .with_room_id(game_id)
        .with_data("game_id", game_id.to_string())
        .with_data("inviter", inviter)
        .with_data("invitee", invitee)
        .with_data("accepted", accepted);

    if !accepted {
        room.pending_invites.remove(&key);
        info!(%game_id, inviter, invitee, "room: rematch declined");
        let emissions = vec![Emission::identity(inviter, response)];
        return Ok(Outcome { reply: Data::new(), emissions, drop_room: false });
    }

    // Validate before consuming the invitation: a failed accept must leave
    // it pending so the inviter can still cancel or the invitee can retry.
    let game = state.store.get(game_id).await?;
    if !game.is_completed() {
        return Err(RoomError::InvalidMove("game is not finished yet".into()));
    }

    let invite = room.pending_invites.remove(&key);
    let (updated, reset_emissions) = match reset_for_restart(state, game_id, &mut room).await {
        Ok(reset) => reset,
        Err(e) => {
            // Persist failure: restore the invitation untouched.
            if let Some(invite) = invite {
                room.pending_invites.insert(key, invite);
            }
            return Err(e);
        }
    };
    info!(%game_id, inviter, invitee, "room: rematch accepted");

    let mut emissions = vec![
        Emission::identity(inviter, response),
        Emission::room(
            Frame::request(EV_GAME_RESTARTED, Data::new())
                .with_room_id(game_id)
                .with_data("ts", now_ms()),
        ),
    ];
    emissions.extend(reset_emissions);
    Ok(Outcome { reply: updated.to_data(), emissions, drop_room: false })
}

/// Withdraw an invite before the invitee answers.
pub async fn cancel_rematch_invite(
    state: &AppState,
    game_id: Uuid,
    inviter: &str,
    invitee: &str,
) -> Result<Outcome, RoomError> {
    let inviter = require_identity(inviter)?;
    let invitee = require_identity(invitee)?;

    let handle = state.room(game_id).await;
    let mut room = handle.lock().await;

    let key = (inviter.to_string(), invitee.to_string());
    if room.pending_invites.remove(&key).is_none() {
        return Err(RoomError::InvalidInput(format!("no pending invitation from {inviter} to {invitee}")));
    }

    let emissions = vec![Emission::identity(
        invitee,
        Frame::request(EV_REMATCH_CANCELLED, Data::new())
            .with_room_id(game_id)
            .with_data("game_id", game_id.to_string())
            .with_data("inviter", inviter)
            .with_data("reason", "cancelled by inviter"),
    )];
    Ok(Outcome { reply: Data::new(), emissions, drop_room: false })
}

// =============================================================================
// DELETE
// =============================================================================

/// Where a delete request came from. Lobby deletion is host-only; in-room
/// deletion is open to either participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOrigin {
    Room,
    Lobby,
}

/// Delete a game and tear its room down.
pub async fn delete_game(
    state: &AppState,
    game_id: Uuid,
    identity: &str,
    origin: DeleteOrigin,
) -> Result<Outcome, RoomError> {
    let identity = require_identity(identity)?;

    let handle = state.room(game_id).await;
    let _room = handle.lock().await;

    let game = state.store.get(game_id).await?;
    match origin {
        DeleteOrigin::Room => {
            if !game.is_completed() {
                return Err(RoomError::InvalidMove("game is not finished yet".into()));
            }
            if !game.is_participant(identity) {
                return Err(RoomError::Unauthorized("only players can delete the game".into()));
            }
        }
        DeleteOrigin::Lobby => {
            if game.player_x != identity {
                return Err(RoomError::Unauthorized("only the host can delete a game from the lobby".into()));
            }
            if game.player_o.is_some() && !game.is_completed() {
                return Err(RoomError::InvalidMove("cannot delete a game in progress".into()));
            }
        }
    }

    state.store.delete(game_id).await?;
    info!(%game_id, identity, ?origin, "room: game deleted");

    let mut emissions = vec![
        Emission::room(
            Frame::request(EV_GAME_DELETED, Data::new())
                .with_room_id(game_id)
                .with_data("game_id", game_id.to_string())
                .with_data("deleted_by", identity),
        ),
        Emission::lobby(
            Frame::request(EV_GAME_DELETED, Data::new()).with_data("game_id", game_id.to_string()),
        ),
    ];
    if game.player_o.is_none() {
        // A waiting game left the feed.
        emissions.push(Emission::lobby(lobby_update_frame(state).await?));
    }
    Ok(Outcome { reply: Data::new(), emissions, drop_room: true })
}

// =============================================================================
// DISCONNECT
// =============================================================================

/// Handle a dropped connection: unsubscribe it everywhere, notify rooms
/// where the identity was an active participant of an unfinished game, and
/// purge rematch invitations the identity was part of.
///
/// Spans many rooms, so it delivers as it goes — each room is decided under
/// its own lock and delivered after that lock is released.
pub async fn on_disconnect(state: &AppState, identity: Option<&str>, client_id: Uuid) {
    let handles: Vec<_> = {
        let rooms = state.rooms.read().await;
        rooms.iter().map(|(id, h)| (*id, h.clone())).collect()
    };

    for (game_id, handle) in handles {
        let mut emissions: Vec<Emission> = Vec::new();
        {
            let mut room = handle.lock().await;
            room.clients.remove(&client_id);

            let Some(identity) = identity else { continue };

            let was_player = room.players.remove(identity);
            room.spectators.remove(identity);

            // Purge invites involving the identity, notifying counterparts.
            let purged: Vec<(String, String)> = room
                .pending_invites
                .keys()
                .filter(|(from, to)| from.as_str() == identity || to.as_str() == identity)
                .cloned()
                .collect();
            for key in purged {
                let invite = room.pending_invites.remove(&key);
                if let Some(invite) = invite {
                    let counterpart = if invite.inviter == identity {
                        invite.invitee.clone()
                    } else {
                        invite.inviter.clone()
                    };
                    emissions.push(Emission::identity(
                        counterpart,
                        Frame::request(EV_REMATCH_CANCELLED, Data::new())
                            .with_room_id(game_id)
                            .with_data("game_id", game_id.to_string())
                            .with_data("inviter", invite.inviter.clone())
                            .with_data("reason", "player disconnected"),
                    ));
                }
            }

            if was_player {
                if let Ok(game) = state.store.get(game_id).await {
                    if !game.is_completed() && game.is_participant(identity) {
                        emissions.push(Emission::room(
                            Frame::request(EV_PLAYER_DISCONNECTED, Data::new())
                                .with_room_id(game_id)
                                .with_data("player", identity),
                        ));
                    }
                }
            }
        }

        let outcome = Outcome { reply: Data::new(), emissions, drop_room: false };
        deliver(state, game_id, &outcome).await;
    }

    if let Some(identity) = identity {
        info!(identity, %client_id, "room: disconnect handled");
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn require_identity(identity: &str) -> Result<&str, RoomError> {
    let trimmed = identity.trim();
    if trimmed.is_empty() {
        return Err(RoomError::InvalidInput("player identity is required".into()));
    }
    Ok(trimmed)
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| i64::try_from(d.as_millis()).ok())
        .unwrap_or(0)
}

/// Build the full `game:state_update` frame: game fields plus room
/// membership, and `is_your_turn` resolved for the identity the update was
/// triggered by.
fn state_update_frame(game: &Game, room: &Room, for_identity: Option<&str>) -> Frame {
    let mut players: Vec<&String> = room.players.iter().collect();
    players.sort();
    let mut spectators: Vec<&String> = room.spectators.iter().collect();
    spectators.sort();

    let mut frame = Frame::request(EV_STATE_UPDATE, game.to_data())
        .with_room_id(game.id)
        .with_data("players", serde_json::json!(players))
        .with_data("spectators", serde_json::json!(spectators));

    if let Some(identity) = for_identity {
        frame = frame.with_data("is_your_turn", !game.is_completed() && game.is_turn_of(identity));
    }
    frame
}

/// Lifecycle label for lobby and REST listings.
#[must_use]
pub fn game_status(game: &Game) -> &'static str {
    if game.is_completed() {
        "completed"
    } else if game.player_o.is_some() {
        "in_progress"
    } else {
        "waiting"
    }
}

#[cfg(test)]
#[path = "room_test.rs"]
mod tests;
