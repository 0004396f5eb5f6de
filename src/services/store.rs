//! Session store — atomic read-modify-write access to games.
//!
//! ARCHITECTURE
//! ============
//! The Room Coordinator talks to `dyn GameStore`, never to sqlx directly.
//! `PgGameStore` is the production implementation; `MemoryGameStore` backs
//! unit tests and keeps the coordinator testable without a live database.
//!
//! CONCURRENCY
//! ===========
//! Coordinator operations already serialize per room, but `update` is
//! independently atomic per game id as a second line of defense: the
//! Postgres implementation re-reads and retries on a version mismatch, so
//! a bypassed room lock can never produce a lost update.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::services::game::{Board, Game, Symbol};

/// Attempts before a version-checked update gives up.
const UPDATE_RETRIES: usize = 3;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("game not found: {0}")]
    NotFound(Uuid),
    #[error("concurrent update conflict on game {0}")]
    Conflict(Uuid),
    #[error("corrupt game row {0}: {1}")]
    Corrupt(Uuid, String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::frame::ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_GAME_NOT_FOUND",
            Self::Conflict(_) => "E_CONFLICT",
            Self::Corrupt(..) => "E_CORRUPT",
            Self::Database(_) => "E_DATABASE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

// =============================================================================
// CONTRACT
// =============================================================================

/// Mutation applied inside [`GameStore::update`].
pub type Mutator<'a> = &'a mut (dyn FnMut(&mut Game) + Send);

/// Authoritative game storage. All methods are atomic per game id.
#[async_trait]
pub trait GameStore: Send + Sync {
    /// Allocate a new game hosted by `player_x`.
    async fn create(&self, player_x: &str) -> Result<Game, StoreError>;

    /// Fetch a game by id.
    async fn get(&self, id: Uuid) -> Result<Game, StoreError>;

    /// Load, mutate, and persist a game as one logical unit.
    async fn update(&self, id: Uuid, mutate: Mutator<'_>) -> Result<Game, StoreError>;

    /// Remove a game permanently.
    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;

    /// Games still waiting for a second player, newest first.
    async fn list_waiting(&self) -> Result<Vec<Game>, StoreError>;

    /// Every game, newest first. Feeds the REST listing.
    async fn list_all(&self) -> Result<Vec<Game>, StoreError>;

    /// Completed games last mutated before `cutoff`. Feeds the retention sweep.
    async fn list_stale_completed(&self, cutoff: OffsetDateTime) -> Result<Vec<Game>, StoreError>;
}

// =============================================================================
// POSTGRES IMPLEMENTATION
// =============================================================================

pub struct PgGameStore {
    pool: PgPool,
}

impl PgGameStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Raw column tuple for one `games` row.
type GameRow = (
    Uuid,
    String,
    Option<String>,
    serde_json::Value,
    String,
    Option<String>,
    bool,
    Option<serde_json::Value>,
    OffsetDateTime,
    OffsetDateTime,
    i64,
);

const GAME_COLUMNS: &str =
    "id, player_x, player_o, board, current_turn, winner, is_draw, winning_line, created_at, updated_at, version";

fn row_to_game(row: GameRow) -> Result<Game, StoreError> {
    let (id, player_x, player_o, board, current_turn, winner, is_draw, winning_line, created_at, updated_at, version) =
        row;

    let board: Board =
        serde_json::from_value(board).map_err(|e| StoreError::Corrupt(id, format!("board: {e}")))?;
    let current_turn = Symbol::parse(&current_turn)
        .ok_or_else(|| StoreError::Corrupt(id, format!("current_turn: {current_turn:?}")))?;
    let winner = match winner {
        None => None,
        Some(s) => {
            Some(Symbol::parse(&s).ok_or_else(|| StoreError::Corrupt(id, format!("winner: {s:?}")))?)
        }
    };
    let winning_line = match winning_line {
        None => None,
        Some(v) => Some(
            serde_json::from_value::<[usize; 3]>(v)
                .map_err(|e| StoreError::Corrupt(id, format!("winning_line: {e}")))?,
        ),
    };

    Ok(Game {
        id,
        player_x,
        player_o,
        board,
        current_turn,
        winner,
        is_draw,
        winning_line,
        created_at,
        updated_at,
        version,
    })
}

#[async_trait]
impl GameStore for PgGameStore {
    async fn create(&self, player_x: &str) -> Result<Game, StoreError> {
        let game = Game::new(player_x);
        sqlx::query(
            "INSERT INTO games (id, player_x, board, current_turn, is_draw, created_at, updated_at, version) \
             VALUES ($1, $2, $3, $4, false, $5, $6, $7)",
        )
        .bind(game.id)
        .bind(&game.player_x)
        .bind(serde_json::json!(game.board))
        .bind(game.current_turn.as_str())
        .bind(game.created_at)
        .bind(game.updated_at)
        .bind(game.version)
        .execute(&self.pool)
        .await?;
        Ok(game)
    }

    async fn get(&self, id: Uuid) -> Result<Game, StoreError> {
        let row = sqlx::query_as::<_, GameRow>(&format!("SELECT {GAME_COLUMNS} FROM games WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound(id))?;
        row_to_game(row)
    }

    async fn update(&self, id: Uuid, mutate: Mutator<'_>) -> Result<Game, StoreError> {
        for _ in 0..UPDATE_RETRIES {
            let mut game = self.get(id).await?;
            let expected_version = game.version;
            mutate(&mut game);
            game.version = expected_version + 1;
            game.updated_at = OffsetDateTime::now_utc();

            let result = sqlx::query(
                "UPDATE games SET player_o = $1, board = $2, current_turn = $3, winner = $4, \
                 is_draw = $5, winning_line = $6, updated_at = $7, version = $8 \
                 WHERE id = $9 AND version = $10",
            )
            .bind(&game.player_o)
            .bind(serde_json::json!(game.board))
            .bind(game.current_turn.as_str())
            .bind(game.winner.map(Symbol::as_str))
            .bind(game.is_draw)
            .bind(game.winning_line.map(|l| serde_json::json!(l)))
            .bind(game.updated_at)
            .bind(game.version)
            .bind(id)
            .bind(expected_version)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 1 {
                return Ok(game);
            }
            // Version raced with a concurrent writer; re-read and retry.
        }
        Err(StoreError::Conflict(id))
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM games WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn list_waiting(&self) -> Result<Vec<Game>, StoreError> {
        let rows = sqlx::query_as::<_, GameRow>(&format!(
            "SELECT {GAME_COLUMNS} FROM games \
             WHERE player_o IS NULL AND winner IS NULL AND is_draw = false \
             ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_game).collect()
    }

    async fn list_all(&self) -> Result<Vec<Game>, StoreError> {
        let rows =
            sqlx::query_as::<_, GameRow>(&format!("SELECT {GAME_COLUMNS} FROM games ORDER BY created_at DESC"))
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(row_to_game).collect()
    }

    async fn list_stale_completed(&self, cutoff: OffsetDateTime) -> Result<Vec<Game>, StoreError> {
        let rows = sqlx::query_as::<_, GameRow>(&format!(
            "SELECT {GAME_COLUMNS} FROM games \
             WHERE (winner IS NOT NULL OR is_draw = true) AND updated_at < $1 \
             ORDER BY updated_at ASC"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_game).collect()
    }
}

// =============================================================================
// IN-MEMORY IMPLEMENTATION
// =============================================================================

/// Map-backed store. One mutex guards the whole map, which trivially gives
/// per-id update atomicity.
#[derive(Default)]
pub struct MemoryGameStore {
    games: Mutex<HashMap<Uuid, Game>>,
}

impl MemoryGameStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a pre-built game, replacing any existing row. Test seeding.
    pub async fn insert(&self, game: Game) {
        self.games.lock().await.insert(game.id, game);
    }
}

#[async_trait]
impl GameStore for MemoryGameStore {
    async fn create(&self, player_x: &str) -> Result<Game, StoreError> {
        let game = Game::new(player_x);
        self.games.lock().await.insert(game.id, game.clone());
        Ok(game)
    }

    async fn get(&self, id: Uuid) -> Result<Game, StoreError> {
        self.games
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn update(&self, id: Uuid, mutate: Mutator<'_>) -> Result<Game, StoreError> {
        let mut games = self.games.lock().await;
        let game = games.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        mutate(game);
        game.version += 1;
        game.updated_at = OffsetDateTime::now_utc();
        Ok(game.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        self.games
            .lock()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }

    async fn list_waiting(&self) -> Result<Vec<Game>, StoreError> {
        let games = self.games.lock().await;
        let mut waiting: Vec<Game> = games
            .values()
            .filter(|g| g.player_o.is_none() && !g.is_completed())
            .cloned()
            .collect();
        waiting.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(waiting)
    }

    async fn list_all(&self) -> Result<Vec<Game>, StoreError> {
        let games = self.games.lock().await;
        let mut all: Vec<Game> = games.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    async fn list_stale_completed(&self, cutoff: OffsetDateTime) -> Result<Vec<Game>, StoreError> {
        let games = self.games.lock().await;
        let mut stale: Vec<Game> = games
            .values()
            .filter(|g| g.is_completed() && g.updated_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(stale)
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
