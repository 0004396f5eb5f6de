//! Game management REST routes.
//!
//! The websocket protocol is the primary surface; these endpoints exist for
//! game creation before a socket is open, and for tooling that wants to
//! inspect games without one.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::room;
use crate::services::session;
use crate::services::store::{GameStore, StoreError};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct GameResponse {
    pub id: Uuid,
    pub player_x: String,
    pub player_o: Option<String>,
    pub board: crate::services::game::Board,
    pub current_turn: String,
    pub winner: Option<String>,
    pub is_draw: bool,
    pub winning_line: Option<[usize; 3]>,
    pub status: String,
}

fn to_response(game: &crate::services::game::Game) -> GameResponse {
    GameResponse {
        id: game.id,
        player_x: game.player_x.clone(),
        player_o: game.player_o.clone(),
        board: game.board,
        current_turn: game.current_turn.as_str().to_owned(),
        winner: game.winner.map(|s| s.as_str().to_owned()),
        is_draw: game.is_draw,
        winning_line: game.winning_line,
        status: room::game_status(game).to_owned(),
    }
}

fn store_error_to_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::Conflict(_) => StatusCode::CONFLICT,
        StoreError::Corrupt(..) | StoreError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Deserialize)]
pub struct CreateGameBody {
    pub player: String,
}

/// `POST /api/games` — create a game with the caller seated as X.
pub async fn create_game(
    State(state): State<AppState>,
    Json(body): Json<CreateGameBody>,
) -> Result<(StatusCode, Json<GameResponse>), StatusCode> {
    let player = body.player.trim();
    if player.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let game = state
        .store
        .create(player)
        .await
        .map_err(|e| store_error_to_status(&e))?;

    // Push the refreshed waiting list to lobby subscribers.
    if let Ok(frame) = room::lobby_update_frame(&state).await {
        let lobby = state.lobby.read().await;
        for tx in lobby.values() {
            let _ = tx.try_send(frame.clone());
        }
    }

    Ok((StatusCode::CREATED, Json(to_response(&game))))
}

/// `GET /api/games` — list every game, newest first.
pub async fn list_games(State(state): State<AppState>) -> Result<Json<Vec<GameResponse>>, StatusCode> {
    let games = state
        .store
        .list_all()
        .await
        .map_err(|e| store_error_to_status(&e))?;
    Ok(Json(games.iter().map(to_response).collect()))
}

/// `GET /api/games/:id` — fetch one game.
pub async fn get_game(
    State(state): State<AppState>,
    Path(game_id): Path<Uuid>,
) -> Result<Json<GameResponse>, StatusCode> {
    let game = state
        .store
        .get(game_id)
        .await
        .map_err(|e| store_error_to_status(&e))?;
    Ok(Json(to_response(&game)))
}

#[derive(Deserialize)]
pub struct CreateSessionBody {
    pub identity: String,
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub token: String,
    pub identity: String,
}

/// `POST /api/sessions` — mint a session token for an identity.
///
/// There is no account system; a session just pins a display name to a
/// token so reconnects keep the same identity.
pub async fn create_session(
    State(state): State<AppState>,
    Json(body): Json<CreateSessionBody>,
) -> Result<(StatusCode, Json<SessionResponse>), StatusCode> {
    let identity = body.identity.trim();
    if identity.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let token = session::create_session(&state.pool, identity)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok((
        StatusCode::CREATED,
        Json(SessionResponse { token, identity: identity.to_owned() }),
    ))
}

#[cfg(test)]
#[path = "games_test.rs"]
mod tests;
