//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! Binds the websocket gateway and the game-management REST endpoints under
//! a single Axum router. CORS is wide open: the browser client is served
//! from a different origin during development.

pub mod games;
pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// The full application router.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/ws", get(ws::handle_ws))
        .route("/api/games", get(games::list_games).post(games::create_game))
        .route("/api/games/{id}", get(games::get_game))
        .route("/api/sessions", post(games::create_session))
        .route("/healthz", get(healthz))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
