use super::*;
use crate::services::game::Symbol;
use std::sync::Arc;
use time::Duration;

#[tokio::test]
async fn create_then_get_round_trips() {
    let store = MemoryGameStore::new();
    let game = store.create("alice").await.unwrap();

    let fetched = store.get(game.id).await.unwrap();
    assert_eq!(fetched.id, game.id);
    assert_eq!(fetched.player_x, "alice");
    assert!(fetched.player_o.is_none());
    assert_eq!(fetched.version, 1);
}

#[tokio::test]
async fn get_unknown_id_is_not_found() {
    let store = MemoryGameStore::new();
    let id = Uuid::new_v4();
    match store.get(id).await {
        Err(StoreError::NotFound(missing)) => assert_eq!(missing, id),
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn update_applies_mutation_and_bumps_version() {
    let store = MemoryGameStore::new();
    let game = store.create("alice").await.unwrap();

    let updated = store
        .update(game.id, &mut |g| {
            g.player_o = Some("bob".into());
        })
        .await
        .unwrap();

    assert_eq!(updated.player_o.as_deref(), Some("bob"));
    assert_eq!(updated.version, 2);
    assert!(updated.updated_at >= game.updated_at);
}

#[tokio::test]
async fn delete_removes_the_game() {
    let store = MemoryGameStore::new();
    let game = store.create("alice").await.unwrap();

    store.delete(game.id).await.unwrap();
    assert!(matches!(store.get(game.id).await, Err(StoreError::NotFound(_))));
    assert!(matches!(store.delete(game.id).await, Err(StoreError::NotFound(_))));
}

#[tokio::test]
async fn list_waiting_excludes_full_and_completed_games() {
    let store = MemoryGameStore::new();
    let waiting = store.create("alice").await.unwrap();

    let full = store.create("carol").await.unwrap();
    store
        .update(full.id, &mut |g| g.player_o = Some("dave".into()))
        .await
        .unwrap();

    let done = store.create("erin").await.unwrap();
    store
        .update(done.id, &mut |g| g.winner = Some(Symbol::X))
        .await
        .unwrap();

    let listed = store.list_waiting().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, waiting.id);
}

#[tokio::test]
async fn list_stale_completed_respects_cutoff_and_outcome() {
    let store = MemoryGameStore::new();

    let mut old_done = crate::services::game::Game::new("alice");
    old_done.is_draw = true;
    old_done.updated_at = OffsetDateTime::now_utc() - Duration::hours(48);
    let old_id = old_done.id;
    store.insert(old_done).await;

    let mut old_active = crate::services::game::Game::new("bob");
    old_active.updated_at = OffsetDateTime::now_utc() - Duration::hours(48);
    store.insert(old_active).await;

    let fresh_done = store.create("carol").await.unwrap();
    store
        .update(fresh_done.id, &mut |g| g.winner = Some(Symbol::O))
        .await
        .unwrap();

    let cutoff = OffsetDateTime::now_utc() - Duration::hours(24);
    let stale = store.list_stale_completed(cutoff).await.unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].id, old_id);
}

#[tokio::test]
async fn concurrent_updates_are_totally_ordered() {
    let store = Arc::new(MemoryGameStore::new());
    let game = store.create("alice").await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let store = Arc::clone(&store);
        let id = game.id;
        handles.push(tokio::spawn(async move {
            store.update(id, &mut |g| g.is_draw = !g.is_draw).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // 1 create + 16 updates: every mutation landed exactly once.
    let final_game = store.get(game.id).await.unwrap();
    assert_eq!(final_game.version, 17);
    assert!(!final_game.is_draw);
}
