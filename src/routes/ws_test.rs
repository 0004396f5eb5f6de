use super::*;
use crate::frame::Status;
use crate::services::game::Game;
use crate::services::store::{GameStore, MemoryGameStore};
use crate::state::test_helpers::{subscribe_client, test_app_state};
use std::sync::Arc;

fn test_conn(auth: Option<&str>) -> (Conn, mpsc::Receiver<Frame>) {
    let (tx, rx) = mpsc::channel(64);
    let conn = Conn {
        client_id: Uuid::new_v4(),
        auth_identity: auth.map(String::from),
        registered_as: auth.map(String::from),
        current_room: None,
        in_lobby: false,
        tx,
    };
    (conn, rx)
}

async fn seed_game(store: &Arc<MemoryGameStore>, player_x: &str, player_o: Option<&str>) -> Uuid {
    let mut game = Game::new(player_x);
    game.player_o = player_o.map(String::from);
    let id = game.id;
    store.insert(game).await;
    id
}

async fn dispatch(state: &AppState, conn: &mut Conn, req: &Frame) -> Frame {
    let text = serde_json::to_string(req).unwrap();
    let mut replies = process_inbound_text(state, conn, &text).await;
    assert_eq!(replies.len(), 1);
    replies.pop().unwrap()
}

#[tokio::test]
async fn invalid_json_yields_gateway_error() {
    let (state, _store) = test_app_state();
    let (mut conn, _rx) = test_conn(None);

    let replies = process_inbound_text(&state, &mut conn, "not json").await;
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].syscall, "gateway:error");
}

#[tokio::test]
async fn unknown_prefix_yields_error_reply() {
    let (state, _store) = test_app_state();
    let (mut conn, _rx) = test_conn(None);

    let req = Frame::request("bogus:op", Data::new());
    let reply = dispatch(&state, &mut conn, &req).await;
    assert_eq!(reply.status, Status::Error);
    assert_eq!(reply.parent_id, Some(req.id));
}

#[tokio::test]
async fn lobby_join_lists_waiting_games_only() {
    let (state, store) = test_app_state();
    let waiting_id = seed_game(&store, "alice", None).await;
    seed_game(&store, "carol", Some("dave")).await;

    let (mut conn, _rx) = test_conn(None);
    let req = Frame::request("lobby:join", Data::new());
    let reply = dispatch(&state, &mut conn, &req).await;

    assert_eq!(reply.status, Status::Done);
    let games = reply.data.get("games").and_then(|v| v.as_array()).unwrap();
    assert_eq!(games.len(), 1);
    assert_eq!(games[0]["id"], serde_json::json!(waiting_id));
    assert_eq!(games[0]["host"], serde_json::json!("alice"));
    assert!(conn.in_lobby);
    assert!(state.lobby.read().await.contains_key(&conn.client_id));
}

#[tokio::test]
async fn lobby_leave_unsubscribes() {
    let (state, _store) = test_app_state();
    let (mut conn, _rx) = test_conn(None);

    dispatch(&state, &mut conn, &Frame::request("lobby:join", Data::new())).await;
    dispatch(&state, &mut conn, &Frame::request("lobby:leave", Data::new())).await;

    assert!(!conn.in_lobby);
    assert!(!state.lobby.read().await.contains_key(&conn.client_id));
}

#[tokio::test]
async fn anonymous_room_join_claims_seat_and_registers_identity() {
    let (state, store) = test_app_state();
    let game_id = seed_game(&store, "alice", None).await;

    let (mut conn, _rx) = test_conn(None);
    let req = Frame::request("room:join", Data::new())
        .with_room_id(game_id)
        .with_data("player", "bob");
    let reply = dispatch(&state, &mut conn, &req).await;

    assert_eq!(reply.status, Status::Done);
    assert_eq!(reply.str_field("role"), Some("O"));
    assert_eq!(conn.current_room, Some(game_id));
    assert_eq!(conn.registered_as.as_deref(), Some("bob"));
    assert!(state.registry.is_online("bob").await);
}

#[tokio::test]
async fn authenticated_identity_overrides_player_field() {
    let (state, store) = test_app_state();
    let game_id = seed_game(&store, "alice", None).await;

    let (mut conn, _rx) = test_conn(Some("alice"));
    let req = Frame::request("room:join", Data::new())
        .with_room_id(game_id)
        .with_data("player", "mallory");
    let reply = dispatch(&state, &mut conn, &req).await;

    // The token identity wins: alice rejoins her own X seat.
    assert_eq!(reply.str_field("role"), Some("X"));
}

#[tokio::test]
async fn room_join_without_player_is_rejected() {
    let (state, store) = test_app_state();
    let game_id = seed_game(&store, "alice", None).await;

    let (mut conn, _rx) = test_conn(None);
    let req = Frame::request("room:join", Data::new()).with_room_id(game_id);
    let reply = dispatch(&state, &mut conn, &req).await;
    assert_eq!(reply.status, Status::Error);
}

#[tokio::test]
async fn game_move_is_applied_through_the_coordinator() {
    let (state, store) = test_app_state();
    let game_id = seed_game(&store, "alice", Some("bob")).await;

    let (mut conn, _rx) = test_conn(Some("alice"));
    dispatch(&state, &mut conn, &Frame::request("room:join", Data::new()).with_room_id(game_id)).await;

    let req = Frame::request("game:move", Data::new())
        .with_room_id(game_id)
        .with_data("index", 4);
    let reply = dispatch(&state, &mut conn, &req).await;

    assert_eq!(reply.status, Status::Done);
    let game = store.get(game_id).await.unwrap();
    assert!(game.board.cell(4).is_some());
}

#[tokio::test]
async fn game_move_error_carries_code() {
    let (state, store) = test_app_state();
    let game_id = seed_game(&store, "alice", Some("bob")).await;

    let (mut conn, _rx) = test_conn(Some("bob"));
    dispatch(&state, &mut conn, &Frame::request("room:join", Data::new()).with_room_id(game_id)).await;

    // X moves first; bob is out of turn.
    let req = Frame::request("game:move", Data::new())
        .with_room_id(game_id)
        .with_data("index", 0);
    let reply = dispatch(&state, &mut conn, &req).await;

    assert_eq!(reply.status, Status::Error);
    assert_eq!(reply.str_field("code"), Some("E_INVALID_MOVE"));
}

#[tokio::test]
async fn move_target_falls_back_to_current_room() {
    let (state, store) = test_app_state();
    let game_id = seed_game(&store, "alice", Some("bob")).await;

    let (mut conn, _rx) = test_conn(Some("alice"));
    dispatch(&state, &mut conn, &Frame::request("room:join", Data::new()).with_room_id(game_id)).await;

    // No room_id on the move frame; the connection's room is used.
    let req = Frame::request("game:move", Data::new()).with_data("index", 0);
    let reply = dispatch(&state, &mut conn, &req).await;
    assert_eq!(reply.status, Status::Done);
}

#[tokio::test]
async fn chat_is_forwarded_to_peers_but_not_the_sender() {
    let (state, store) = test_app_state();
    let game_id = seed_game(&store, "alice", Some("bob")).await;
    let (_peer_id, mut peer_rx) = subscribe_client(&state, game_id).await;

    let (mut conn, mut own_rx) = test_conn(Some("alice"));
    dispatch(&state, &mut conn, &Frame::request("room:join", Data::new()).with_room_id(game_id)).await;
    // Drain the join-time broadcasts so only chat remains.
    while peer_rx.try_recv().is_ok() {}
    while own_rx.try_recv().is_ok() {}

    let req = Frame::request("chat:message", Data::new())
        .with_room_id(game_id)
        .with_data("text", "gg");
    let reply = dispatch(&state, &mut conn, &req).await;
    assert_eq!(reply.status, Status::Done);

    let forwarded = peer_rx.try_recv().unwrap();
    assert_eq!(forwarded.syscall, "chat:message");
    assert_eq!(forwarded.str_field("text"), Some("gg"));
    assert_eq!(forwarded.from.as_deref(), Some("alice"));
    assert!(own_rx.try_recv().is_err());
}

#[tokio::test]
async fn joining_a_second_room_leaves_the_first() {
    let (state, store) = test_app_state();
    let first = seed_game(&store, "alice", None).await;
    let second = seed_game(&store, "carol", None).await;

    let (mut conn, _rx) = test_conn(Some("bob"));
    dispatch(&state, &mut conn, &Frame::request("room:join", Data::new()).with_room_id(first)).await;
    dispatch(&state, &mut conn, &Frame::request("room:join", Data::new()).with_room_id(second)).await;

    assert_eq!(conn.current_room, Some(second));
    let first_room = state.existing_room(first).await.unwrap();
    assert!(!first_room.lock().await.players.contains("bob"));
}

#[tokio::test]
async fn lobby_delete_requires_host() {
    let (state, store) = test_app_state();
    let game_id = seed_game(&store, "alice", None).await;

    let (mut conn, _rx) = test_conn(Some("bob"));
    let req = Frame::request("lobby:delete_game", Data::new()).with_data("game_id", game_id.to_string());
    let reply = dispatch(&state, &mut conn, &req).await;

    assert_eq!(reply.status, Status::Error);
    assert_eq!(reply.str_field("code"), Some("E_UNAUTHORIZED"));
    assert!(store.get(game_id).await.is_ok());
}

#[tokio::test]
async fn lobby_delete_by_host_removes_the_game() {
    let (state, store) = test_app_state();
    let game_id = seed_game(&store, "alice", None).await;

    let (mut conn, _rx) = test_conn(Some("alice"));
    let req = Frame::request("lobby:delete_game", Data::new()).with_data("game_id", game_id.to_string());
    let reply = dispatch(&state, &mut conn, &req).await;

    assert_eq!(reply.status, Status::Done);
    assert!(store.get(game_id).await.is_err());
}
