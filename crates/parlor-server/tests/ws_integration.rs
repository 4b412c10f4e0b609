#[allow(dead_code)]
mod common;

use common::{
    TestServer, ws_connect, ws_expect, ws_join, ws_login, ws_login_and_join, ws_read, ws_send,
    ws_send_raw, ws_try_read,
};
use futures::SinkExt;
use parlor_core::test_helpers::{auth, dm, join, room};
use tokio_tungstenite::tungstenite::Message;

#[tokio::test]
async fn auth_success_is_acknowledged() {
    let server = TestServer::new().await;
    let mut stream = ws_connect(&server.ws_url()).await;
    ws_send(&mut stream, &auth("alice", "alice-pw")).await;
    let ack = ws_expect(&mut stream, "auth").await;
    assert_eq!(ack.payload, "ok alice");
}

#[tokio::test]
async fn wrong_password_keeps_connection_open() {
    let server = TestServer::new().await;
    let mut stream = ws_connect(&server.ws_url()).await;

    ws_send(&mut stream, &auth("alice", "nope")).await;
    let err = ws_expect(&mut stream, "error").await;
    assert!(err.payload.starts_with("auth_failed: "), "{err:?}");

    ws_send(&mut stream, &auth("alice", "alice-pw")).await;
    ws_expect(&mut stream, "auth").await;
}

#[tokio::test]
async fn room_broadcast_then_disconnect() {
    let server = TestServer::new().await;
    let mut alice = ws_login_and_join(&server, "alice", "general").await;
    let mut bob = ws_login_and_join(&server, "bob", "general").await;

    ws_send(&mut alice, &room("general", "hello")).await;
    for stream in [&mut alice, &mut bob] {
        let env = ws_expect(stream, "room").await;
        assert_eq!(env.payload, "alice: hello");
        assert_eq!(env.room.as_deref(), Some("general"));
    }

    bob.close(None).await.unwrap();
    drop(bob);
    // Let the server run bob's cleanup
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    ws_send(&mut alice, &room("general", "anyone?")).await;
    let env = ws_expect(&mut alice, "room").await;
    assert_eq!(env.payload, "alice: anyone?");
    assert!(ws_try_read(&mut alice, 200).await.is_none());

    let health: serde_json::Value = reqwest::get(format!("{}/health", server.base_url()))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["sessions"], 1);
    assert_eq!(health["rooms"]["members"], 1);
}

#[tokio::test]
async fn unauthenticated_dm_is_rejected() {
    let server = TestServer::new().await;
    let mut bob = ws_login(&server, "bob").await;
    let mut anon = ws_connect(&server.ws_url()).await;

    ws_send(&mut anon, &dm("bob", "hi")).await;
    let err = ws_expect(&mut anon, "error").await;
    assert!(err.payload.starts_with("not_authenticated: "), "{err:?}");
    assert!(ws_try_read(&mut bob, 200).await.is_none());

    // Connection is still usable
    ws_send(&mut anon, &auth("carol", "carol-pw")).await;
    ws_expect(&mut anon, "auth").await;
}

#[tokio::test]
async fn direct_message_delivery() {
    let server = TestServer::new().await;
    let mut alice = ws_login(&server, "alice").await;
    let mut bob = ws_login(&server, "bob").await;

    ws_send(&mut alice, &dm("bob", "secret plan")).await;
    let env = ws_expect(&mut bob, "dm").await;
    assert_eq!(env.payload, "alice: secret plan");
    assert!(ws_try_read(&mut alice, 200).await.is_none());
}

#[tokio::test]
async fn direct_message_to_offline_and_unknown_users() {
    let server = TestServer::new().await;
    let mut alice = ws_login(&server, "alice").await;

    ws_send(&mut alice, &dm("bob", "hello?")).await;
    let err = ws_expect(&mut alice, "error").await;
    assert!(err.payload.starts_with("user_unreachable: "), "{err:?}");

    ws_send(&mut alice, &dm("zed", "hello?")).await;
    let err = ws_expect(&mut alice, "error").await;
    assert!(err.payload.starts_with("unknown_user: "), "{err:?}");
}

#[tokio::test]
async fn room_message_to_missing_room() {
    let server = TestServer::new().await;
    let mut alice = ws_login(&server, "alice").await;
    ws_send(&mut alice, &room("nowhere", "hi")).await;
    let err = ws_expect(&mut alice, "error").await;
    assert!(err.payload.starts_with("unknown_room: "), "{err:?}");
}

#[tokio::test]
async fn double_join_is_idempotent() {
    let server = TestServer::new().await;
    let mut alice = ws_login_and_join(&server, "alice", "general").await;
    ws_join(&mut alice, "general").await;

    ws_send(&mut alice, &room("general", "once")).await;
    ws_expect(&mut alice, "room").await;
    assert!(ws_try_read(&mut alice, 200).await.is_none());
}

#[tokio::test]
async fn malformed_frames_do_not_close_connection() {
    let server = TestServer::new().await;
    let mut alice = ws_login(&server, "alice").await;

    let frames = [
        "not json",
        "{}",
        r#"{"type":"shout","payload":"x"}"#,
        r#"{"type":"join","payload":""}"#,
    ];
    for raw in frames {
        ws_send_raw(&mut alice, raw).await;
        let err = ws_expect(&mut alice, "error").await;
        assert!(err.payload.starts_with("protocol: "), "{raw}: {err:?}");
    }

    ws_join(&mut alice, "general").await;
}

#[tokio::test]
async fn binary_json_frames_are_accepted() {
    let server = TestServer::new().await;
    let mut stream = ws_connect(&server.ws_url()).await;
    let frame = br#"{"type":"auth","payload":"alice alice-pw"}"#.to_vec();
    stream.send(Message::Binary(frame.into())).await.unwrap();
    ws_expect(&mut stream, "auth").await;
}

#[tokio::test]
async fn reauth_switches_identity() {
    let server = TestServer::new().await;
    let mut carol = ws_login(&server, "carol").await;
    let mut stream = ws_login_and_join(&server, "alice", "general").await;
    ws_join(&mut carol, "general").await;

    ws_send(&mut stream, &auth("bob", "bob-pw")).await;
    let ack = ws_expect(&mut stream, "auth").await;
    assert_eq!(ack.payload, "ok bob");

    // The old identity's memberships are gone
    ws_send(&mut carol, &room("general", "who is here")).await;
    ws_expect(&mut carol, "room").await;
    assert!(ws_try_read(&mut stream, 200).await.is_none());

    ws_send(&mut carol, &dm("bob", "hi bob")).await;
    let env = ws_read(&mut stream).await;
    assert_eq!(env.payload, "carol: hi bob");
}

#[tokio::test]
async fn join_before_auth_creates_nothing() {
    let server = TestServer::new().await;
    let mut anon = ws_connect(&server.ws_url()).await;
    ws_send(&mut anon, &join("secret-room")).await;
    ws_expect(&mut anon, "error").await;

    let rooms: serde_json::Value = reqwest::get(format!("{}/api/v1/rooms", server.base_url()))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(rooms.as_array().unwrap().len(), 0);
}
