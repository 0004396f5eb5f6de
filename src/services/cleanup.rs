//! Retention sweep — background deletion of stale completed games.
//!
//! DESIGN
//! ======
//! A background task wakes up on an interval, lists completed games whose
//! last mutation predates the cutoff, and removes them one room at a
//! time. Each deletion locks only its own room, so the sweep never stalls
//! live games elsewhere.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use crate::frame::{Data, Frame};
use crate::services::room::{self, EV_GAME_AUTO_DELETED};
use crate::services::store::GameStore;
use crate::state::AppState;

const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 3600;
const DEFAULT_GAME_RETENTION_SECS: u64 = 24 * 3600;

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Spawn the periodic sweep. Interval and retention age come from
/// `CLEANUP_INTERVAL_SECS` / `GAME_RETENTION_SECS`.
pub fn spawn_cleanup_task(state: AppState) -> JoinHandle<()> {
    let interval_secs: u64 = env_parse("CLEANUP_INTERVAL_SECS", DEFAULT_CLEANUP_INTERVAL_SECS);
    let retention_secs: u64 = env_parse("GAME_RETENTION_SECS", DEFAULT_GAME_RETENTION_SECS);
    info!(interval_secs, retention_secs, "stale game cleanup configured");

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let retention = time::Duration::seconds(i64::try_from(retention_secs).unwrap_or(i64::MAX));
            let cutoff = time::OffsetDateTime::now_utc() - retention;
            if let Err(e) = cleanup_stale_games(&state, cutoff).await {
                error!(error = %e, "stale game cleanup cycle failed");
            }
        }
    })
}

/// Delete every completed game last touched before `cutoff`. Returns the
/// ids of deleted games.
pub async fn cleanup_stale_games(
    state: &AppState,
    cutoff: time::OffsetDateTime,
) -> Result<Vec<Uuid>, crate::services::store::StoreError> {
    let stale = state.store.list_stale_completed(cutoff).await?;
    let mut deleted = Vec::with_capacity(stale.len());

    for game in stale {
        // Lock this room alone; other rooms keep playing.
        let handle = state.room(game.id).await;
        {
            let _room = handle.lock().await;
            match state.store.delete(game.id).await {
                Ok(()) => {}
                // Raced with an explicit delete; nothing left to do.
                Err(crate::services::store::StoreError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        let frame = Frame::request(EV_GAME_AUTO_DELETED, Data::new())
            .with_room_id(game.id)
            .with_data("game_id", game.id.to_string());
        let outcome = room::Outcome {
            reply: Data::new(),
            emissions: vec![
                room::Emission { audience: room::Audience::Room, frame: frame.clone() },
                room::Emission { audience: room::Audience::Lobby, frame },
            ],
            drop_room: true,
        };
        room::deliver(state, game.id, &outcome).await;

        info!(game_id = %game.id, "stale game auto-deleted");
        deleted.push(game.id);
    }

    Ok(deleted)
}

#[cfg(test)]
#[path = "cleanup_test.rs"]
mod tests;
