//! Command dispatch over a real WebSocket session.
//!
//! Catalog, watch-history and error paths; authenticated commands with
//! and without a session.

mod common;

use ott_protocol::{ClientCommand, ServerEvent};
use ott_test_utils::MockWsClient;

async fn connect(server: &common::TestServer) -> MockWsClient {
    let mut client = MockWsClient::connect(&server.ws_url()).await.unwrap();
    match client.recv_event().await.unwrap() {
        ServerEvent::Ready { .. } => client,
        other => panic!("expected ready, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_command_is_a_bad_request_event() {
    let server = common::spawn_server(8).await;
    let mut client = connect(&server).await;

    client.send_text(r#"{"type":"warp_drive"}"#).await.unwrap();
    match client.recv_event().await.unwrap() {
        ServerEvent::Error { status, message } => {
            assert_eq!(status, "bad_request");
            assert_eq!(message, "unknown-command");
        }
        other => panic!("expected error, got {other:?}"),
    }

    // The connection stays usable afterwards.
    client.send_command(&ClientCommand::Ping).await.unwrap();
    assert!(matches!(
        client.recv_event().await.unwrap(),
        ServerEvent::Pong { .. }
    ));

    server.stop().await;
}

#[tokio::test]
async fn malformed_json_is_a_bad_request_event() {
    let server = common::spawn_server(8).await;
    let mut client = connect(&server).await;

    client.send_text("{not json").await.unwrap();
    assert!(matches!(
        client.recv_event().await.unwrap(),
        ServerEvent::Error { .. }
    ));

    server.stop().await;
}

#[tokio::test]
async fn list_videos_caps_at_twenty_newest_first() {
    let server = common::spawn_server(8).await;
    for i in 1..=25 {
        common::seed_video(&server, &format!("clip-{i:02}"), b"bytes");
    }
    let mut client = connect(&server).await;

    client.send_command(&ClientCommand::ListVideos).await.unwrap();
    match client.recv_event().await.unwrap() {
        ServerEvent::Videos { items } => {
            assert_eq!(items.len(), 20);
            assert_eq!(items[0].title, "clip-25");
            assert_eq!(items[19].title, "clip-06");
        }
        other => panic!("expected videos, got {other:?}"),
    }

    server.stop().await;
}

#[tokio::test]
async fn video_detail_found_and_not_found() {
    let server = common::spawn_server(8).await;
    let video_id = common::seed_video(&server, "the-clip", b"bytes");
    let mut client = connect(&server).await;

    client
        .send_command(&ClientCommand::VideoDetail { video_id })
        .await
        .unwrap();
    match client.recv_event().await.unwrap() {
        ServerEvent::VideoDetail(detail) => {
            assert_eq!(detail.id, video_id);
            assert_eq!(detail.title, "the-clip");
            assert_eq!(detail.file_path, "the-clip.mp4");
        }
        other => panic!("expected video_detail, got {other:?}"),
    }

    client
        .send_command(&ClientCommand::VideoDetail { video_id: 404_404 })
        .await
        .unwrap();
    match client.recv_event().await.unwrap() {
        ServerEvent::Error { status, message } => {
            assert_eq!(status, "not_found");
            assert_eq!(message, "video-not-found");
        }
        other => panic!("expected not_found error, got {other:?}"),
    }

    server.stop().await;
}

#[tokio::test]
async fn watch_commands_require_a_session() {
    let server = common::spawn_server(8).await;
    let video_id = common::seed_video(&server, "clip", b"bytes");
    let mut anon = connect(&server).await;

    for cmd in [
        ClientCommand::WatchGet { video_id },
        ClientCommand::WatchUpdate {
            video_id,
            position: 5,
        },
        ClientCommand::ListContinue,
    ] {
        anon.send_command(&cmd).await.unwrap();
        match anon.recv_event().await.unwrap() {
            ServerEvent::Error { status, message } => {
                assert_eq!(status, "unauthorized");
                assert_eq!(message, "login-required");
            }
            other => panic!("expected unauthorized for {cmd:?}, got {other:?}"),
        }
    }

    server.stop().await;
}

#[tokio::test]
async fn watch_update_then_get_and_continue_listing() {
    let server = common::spawn_server(8).await;
    let video_id = common::seed_video(&server, "clip", b"bytes");
    let session_id = common::seed_user_with_session(&server, "viewer", "pw");

    let mut client = MockWsClient::connect_with_session(&server.ws_url(), &session_id)
        .await
        .unwrap();
    assert!(matches!(
        client.recv_event().await.unwrap(),
        ServerEvent::Ready { .. }
    ));

    client
        .send_command(&ClientCommand::WatchUpdate {
            video_id,
            position: 73,
        })
        .await
        .unwrap();
    match client.recv_event().await.unwrap() {
        ServerEvent::WatchUpdate { status, position, .. } => {
            assert_eq!(status, "ok");
            assert_eq!(position, 73);
        }
        other => panic!("expected watch_update, got {other:?}"),
    }

    client
        .send_command(&ClientCommand::WatchGet { video_id })
        .await
        .unwrap();
    match client.recv_event().await.unwrap() {
        ServerEvent::WatchGet {
            status,
            video_id: got_video,
            position,
            ..
        } => {
            assert_eq!(status, "ok");
            assert_eq!(got_video, video_id);
            assert_eq!(position, 73);
        }
        other => panic!("expected watch_get, got {other:?}"),
    }

    client.send_command(&ClientCommand::ListContinue).await.unwrap();
    match client.recv_event().await.unwrap() {
        ServerEvent::ContinueVideos { items } => {
            assert_eq!(items.len(), 1);
            assert_eq!(items[0].id, video_id);
            assert_eq!(items[0].position, 73);
        }
        other => panic!("expected continue_videos, got {other:?}"),
    }

    // Unknown history row reports not_found but keeps the session alive.
    client
        .send_command(&ClientCommand::WatchGet {
            video_id: 999_999,
        })
        .await
        .unwrap();
    assert!(matches!(
        client.recv_event().await.unwrap(),
        ServerEvent::Error { .. }
    ));

    server.stop().await;
}

#[tokio::test]
async fn quic_send_against_unknown_connection_fails_cleanly() {
    let server = common::spawn_server(8).await;
    let mut client = connect(&server).await;

    client
        .send_command(&ClientCommand::QuicSend {
            connection_id: 0xDEAD,
            stream_id: 1,
            offset: 0,
            payload_hex: "102030".to_owned(),
        })
        .await
        .unwrap();
    match client.recv_event().await.unwrap() {
        ServerEvent::Error { status, .. } => {
            assert_eq!(status, "connection-not-found");
        }
        other => panic!("expected connection-not-found, got {other:?}"),
    }

    server.stop().await;
}

#[tokio::test]
async fn binary_frames_echo_back() {
    let server = common::spawn_server(8).await;
    let mut client = connect(&server).await;

    client.send_binary(b"opaque-bytes".to_vec()).await.unwrap();
    let echoed = client.recv_binary().await.unwrap();
    assert_eq!(echoed, b"opaque-bytes");

    server.stop().await;
}
