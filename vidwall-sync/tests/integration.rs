//! Integration tests for the video wall over real WebSockets.
//!
//! These tests start a real server and connect raw tungstenite clients,
//! covering registration, placement, playback fan-out and disconnects.

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use vidwall_sync::protocol::{ClientMessage, PlaybackCommand, ServerMessage};
use vidwall_sync::registry::{DisplayNode, Position};
use vidwall_sync::server::{ServerConfig, SyncServer};
use vidwall_sync::viewport::viewport;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Start a server on a free port, return it with the port.
async fn start_test_server() -> (Arc<SyncServer>, u16) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let config = ServerConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        broadcast_capacity: 64,
        ..ServerConfig::default()
    };
    let server = Arc::new(SyncServer::new(config));
    let serving = server.clone();
    tokio::spawn(async move {
        serving.serve(listener).await.unwrap();
    });
    (server, port)
}

async fn connect(port: u16) -> Ws {
    let url = format!("ws://127.0.0.1:{port}");
    let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    ws
}

async fn send(ws: &mut Ws, message: ClientMessage) {
    ws.send(Message::text(message.encode().unwrap())).await.unwrap();
}

/// Read frames until one matches, skipping the rest.
async fn recv_until(ws: &mut Ws, mut matches: impl FnMut(&ServerMessage) -> bool) -> ServerMessage {
    let result = timeout(Duration::from_secs(2), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    let message = ServerMessage::decode(&text).unwrap();
                    if matches(&message) {
                        return message;
                    }
                }
                Some(Ok(_)) => continue,
                other => panic!("Connection ended while waiting: {other:?}"),
            }
        }
    })
    .await;
    result.expect("Timed out waiting for message")
}

/// Connect and register a screen, returning its node.
async fn register_screen(port: u16) -> (Ws, DisplayNode) {
    let mut ws = connect(port).await;
    send(&mut ws, ClientMessage::Register).await;
    match recv_until(&mut ws, |m| matches!(m, ServerMessage::Registered { .. })).await {
        ServerMessage::Registered { node } => (ws, node),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_server_accepts_connections() {
    let (_server, port) = start_test_server().await;
    let url = format!("ws://127.0.0.1:{port}");

    let result = tokio_tungstenite::connect_async(&url).await;
    assert!(result.is_ok(), "Should connect to server");
}

#[tokio::test]
async fn test_register_receives_identity_and_config() {
    let (_server, port) = start_test_server().await;
    let (mut ws, node) = register_screen(port).await;

    assert!(node.id.to_string().starts_with("SCR-"));
    assert!(!node.is_assigned());

    match recv_until(&mut ws, |m| matches!(m, ServerMessage::Config { .. })).await {
        ServerMessage::Config { config } => {
            assert_eq!(config["rows"], 3);
            assert_eq!(config["cols"], 3);
            assert_eq!(config["volume"], 1.0);
            assert_eq!(config["audioMode"], "broadcast");
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_admin_sees_registrations() {
    let (_server, port) = start_test_server().await;
    let mut admin = connect(port).await;
    send(&mut admin, ClientMessage::Ping).await;
    recv_until(&mut admin, |m| *m == ServerMessage::Pong).await;

    let (_screen, node) = register_screen(port).await;

    let nodes = recv_until(&mut admin, |m| matches!(m, ServerMessage::NodesChanged { .. })).await;
    assert_eq!(nodes, ServerMessage::NodesChanged { nodes: vec![node] });
}

#[tokio::test]
async fn test_assign_sends_viewport_to_screen() {
    let (_server, port) = start_test_server().await;
    let (mut screen, node) = register_screen(port).await;
    let mut admin = connect(port).await;

    send(
        &mut admin,
        ClientMessage::Assign { row: 1, col: 2, connection_id: Some(node.connection_id) },
    )
    .await;

    let assigned = recv_until(&mut screen, |m| matches!(m, ServerMessage::PositionAssigned { .. })).await;
    assert_eq!(
        assigned,
        ServerMessage::PositionAssigned {
            position: Position::new(1, 2),
            viewport: viewport(1, 2, 3, 3),
        }
    );

    match recv_until(&mut admin, |m| matches!(m, ServerMessage::MatrixChanged { .. })).await {
        ServerMessage::MatrixChanged { matrix } => {
            let cell = matrix[1][2].as_ref().expect("cell should be occupied");
            assert_eq!(cell.node.id, node.id);
            assert_eq!(cell.viewport.offset_x, -200.0);
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_swap_moves_occupant() {
    let (server, port) = start_test_server().await;
    let (mut a, node_a) = register_screen(port).await;
    let (mut b, node_b) = register_screen(port).await;

    send(&mut a, ClientMessage::Assign { row: 0, col: 0, connection_id: None }).await;
    recv_until(&mut a, |m| matches!(m, ServerMessage::PositionAssigned { .. })).await;
    send(&mut b, ClientMessage::Assign { row: 1, col: 1, connection_id: None }).await;
    recv_until(&mut b, |m| matches!(m, ServerMessage::PositionAssigned { .. })).await;

    send(&mut a, ClientMessage::Assign { row: 1, col: 1, connection_id: None }).await;

    let moved = recv_until(&mut b, |m| matches!(m, ServerMessage::PositionAssigned { .. })).await;
    assert_eq!(
        moved,
        ServerMessage::PositionAssigned {
            position: Position::new(0, 0),
            viewport: viewport(0, 0, 3, 3),
        }
    );
    recv_until(&mut a, |m| {
        matches!(m, ServerMessage::PositionAssigned { position, .. } if *position == Position::new(1, 1))
    })
    .await;

    let matrix = server.inspect(|c| c.matrix()).await;
    assert_eq!(matrix[1][1].as_ref().unwrap().node.id, node_a.id);
    assert_eq!(matrix[0][0].as_ref().unwrap().node.id, node_b.id);
}

#[tokio::test]
async fn test_playback_commands_reach_every_screen() {
    let (_server, port) = start_test_server().await;
    let (mut a, _) = register_screen(port).await;
    let (mut b, _) = register_screen(port).await;
    let mut admin = connect(port).await;

    send(
        &mut admin,
        ClientMessage::Command { command: PlaybackCommand::SetUrl { url: "/uploads/v.mp4".into() } },
    )
    .await;
    send(&mut admin, ClientMessage::Command { command: PlaybackCommand::Play }).await;

    for screen in [&mut a, &mut b] {
        match recv_until(screen, |m| matches!(m, ServerMessage::PlaybackSync { .. })).await {
            ServerMessage::PlaybackSync { patch } => {
                assert_eq!(patch["videoUrl"], "/uploads/v.mp4");
                assert_eq!(patch["currentTime"], 0.0);
                assert_eq!(patch["isPlaying"], false);
            }
            _ => unreachable!(),
        }
        match recv_until(screen, |m| matches!(m, ServerMessage::PlaybackSync { .. })).await {
            ServerMessage::PlaybackSync { patch } => assert_eq!(patch["isPlaying"], true),
            _ => unreachable!(),
        }
    }
}

#[tokio::test]
async fn test_time_report_is_rebroadcast() {
    let (server, port) = start_test_server().await;
    let (mut screen, _) = register_screen(port).await;
    let mut admin = connect(port).await;
    send(&mut admin, ClientMessage::Ping).await;
    recv_until(&mut admin, |m| *m == ServerMessage::Pong).await;

    send(&mut screen, ClientMessage::ReportTime { time: 12.5 }).await;

    match recv_until(&mut admin, |m| matches!(m, ServerMessage::ConfigChanged { .. })).await {
        ServerMessage::ConfigChanged { patch } => {
            assert_eq!(patch.len(), 1);
            assert_eq!(patch["currentTime"], 12.5);
        }
        _ => unreachable!(),
    }
    assert_eq!(server.inspect(|c| c.playback().current_time).await, 12.5);
}

#[tokio::test]
async fn test_resize_evicts_screen() {
    let (_server, port) = start_test_server().await;
    let (mut screen, _) = register_screen(port).await;
    send(&mut screen, ClientMessage::Assign { row: 2, col: 2, connection_id: None }).await;
    recv_until(&mut screen, |m| matches!(m, ServerMessage::PositionAssigned { .. })).await;

    let mut admin = connect(port).await;
    send(
        &mut admin,
        ClientMessage::Command {
            command: PlaybackCommand::PatchConfig { patch: json!({"rows": 2, "cols": 2}) },
        },
    )
    .await;

    recv_until(&mut screen, |m| *m == ServerMessage::PositionUnassigned).await;
    match recv_until(&mut admin, |m| matches!(m, ServerMessage::ConfigChanged { .. })).await {
        ServerMessage::ConfigChanged { patch } => {
            assert_eq!(patch["rows"], 2);
            assert_eq!(patch["cols"], 2);
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_bad_frames_get_error_reply() {
    let (server, port) = start_test_server().await;
    let mut ws = connect(port).await;

    ws.send(Message::text(r#"{"type":"launchMissiles"}"#.to_string())).await.unwrap();
    assert!(matches!(
        recv_until(&mut ws, |m| matches!(m, ServerMessage::Error { .. })).await,
        ServerMessage::Error { .. }
    ));

    ws.send(Message::binary(vec![1u8, 2, 3])).await.unwrap();
    match recv_until(&mut ws, |m| matches!(m, ServerMessage::Error { .. })).await {
        ServerMessage::Error { message } => assert!(message.contains("binary")),
        _ => unreachable!(),
    }

    // Connection stays usable.
    send(&mut ws, ClientMessage::Ping).await;
    recv_until(&mut ws, |m| *m == ServerMessage::Pong).await;
    assert_eq!(server.stats().await.rejected_frames, 2);
}

#[tokio::test]
async fn test_disconnect_vacates_slot_and_keeps_timeline() {
    let (server, port) = start_test_server().await;
    let (mut screen, node) = register_screen(port).await;
    send(&mut screen, ClientMessage::Assign { row: 0, col: 0, connection_id: None }).await;
    recv_until(&mut screen, |m| matches!(m, ServerMessage::PositionAssigned { .. })).await;

    let mut admin = connect(port).await;
    send(&mut admin, ClientMessage::Command { command: PlaybackCommand::Play }).await;
    send(&mut admin, ClientMessage::Command { command: PlaybackCommand::Seek { time: 5.0 } }).await;
    recv_until(&mut admin, |m| {
        matches!(m, ServerMessage::PlaybackSync { patch } if patch.contains_key("currentTime"))
    })
    .await;

    screen.close(None).await.unwrap();

    recv_until(&mut admin, |m| matches!(m, ServerMessage::NodesChanged { nodes } if nodes.is_empty())).await;
    let (matrix, time, present) = server
        .inspect(|c| {
            (
                c.matrix(),
                c.playback().current_time,
                c.registry().find_by_node_id(&node.id).is_some(),
            )
        })
        .await;
    assert!(matrix[0][0].is_none());
    assert_eq!(time, 5.0);
    assert!(!present);
}

#[tokio::test]
async fn test_stats_track_connections() {
    let (server, port) = start_test_server().await;
    let (_a, _) = register_screen(port).await;
    let (_b, _) = register_screen(port).await;

    let stats = server.stats().await;
    assert_eq!(stats.total_connections, 2);
    assert_eq!(stats.active_connections, 2);
    assert!(stats.total_messages >= 2);
    assert!(stats.messages_sent > 0);
}

/// Every frame up to and including the next `pong`, in arrival order.
async fn recv_through_pong(ws: &mut Ws) -> Vec<ServerMessage> {
    let mut received = Vec::new();
    while received.last() != Some(&ServerMessage::Pong) {
        received.push(recv_until(ws, |_| true).await);
    }
    received
}

#[tokio::test]
async fn test_register_snapshot_never_overtakes_later_playback() {
    let (server, port) = start_test_server().await;
    let mut ws = connect(port).await;

    for trial in 0..20 {
        send(&mut ws, ClientMessage::Command { command: PlaybackCommand::Pause }).await;
        send(&mut ws, ClientMessage::Register).await;
        send(&mut ws, ClientMessage::Command { command: PlaybackCommand::Play }).await;
        send(&mut ws, ClientMessage::Ping).await;

        let received = recv_through_pong(&mut ws).await;

        // Fold the frames the way a screen applies them.
        let mut is_playing = None;
        for message in &received {
            match message {
                ServerMessage::Config { config } => is_playing = config["isPlaying"].as_bool(),
                ServerMessage::PlaybackSync { patch } if patch.contains_key("isPlaying") => {
                    is_playing = patch["isPlaying"].as_bool();
                }
                _ => {}
            }
        }
        assert_eq!(is_playing, Some(true), "trial {trial}: {received:?}");

        let kinds: Vec<_> = received
            .iter()
            .filter(|m| {
                matches!(
                    m,
                    ServerMessage::Registered { .. }
                        | ServerMessage::Config { .. }
                        | ServerMessage::PlaybackSync { .. }
                )
            })
            .map(ServerMessage::kind)
            .collect();
        assert_eq!(kinds, vec!["playbackSync", "registered", "config", "playbackSync"], "trial {trial}");
    }

    assert!(server.inspect(|c| c.playback().is_playing).await);
}
