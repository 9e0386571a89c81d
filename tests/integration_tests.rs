//! Integration tests for the pixel sync server and client
//!
//! Every test starts its own server on an ephemeral port and talks to it over
//! real WebSocket connections.

use client::network::{Client, ClientError, SyncEvent};
use futures_util::{SinkExt, StreamExt};
use server::{OriginPolicy, Server, ServerConfig, ServerHandle};
use shared::{Color, ServerPacket, UserInfo};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

fn test_config() -> ServerConfig {
    ServerConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        ..ServerConfig::default()
    }
}

async fn start_server(config: ServerConfig) -> (String, ServerHandle) {
    let server = Server::bind(config).await.unwrap();
    let url = format!("ws://{}", server.local_addr().unwrap());
    let handle = server.handle();
    tokio::spawn(server.run());
    (url, handle)
}

async fn connect(url: &str) -> Ws {
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

/// Next server packet, skipping control frames
async fn recv(ws: &mut Ws) -> ServerPacket {
    loop {
        let frame = timeout(FRAME_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed")
            .expect("websocket error");
        if let Message::Text(text) = frame {
            return ServerPacket::decode(text.as_str()).unwrap();
        }
    }
}

async fn send(ws: &mut Ws, json: &str) {
    ws.send(Message::text(json.to_string())).await.unwrap();
}

/// Connects and consumes the join sequence, returning the assigned id
async fn join(url: &str) -> (Ws, String) {
    let mut ws = connect(url).await;
    let user_id = match recv(&mut ws).await {
        ServerPacket::CanvasState { user_id, .. } => user_id,
        other => panic!("Expected canvasState first, got {}", other.kind()),
    };
    match recv(&mut ws).await {
        ServerPacket::UserList { .. } => {}
        other => panic!("Expected userList after canvasState, got {}", other.kind()),
    }
    (ws, user_id)
}

fn expect_roster(packet: ServerPacket) -> Vec<UserInfo> {
    match packet {
        ServerPacket::UserList { users } => users,
        other => panic!("Expected userList, got {}", other.kind()),
    }
}

fn ids(users: &[UserInfo]) -> Vec<&str> {
    users.iter().map(|u| u.id.as_str()).collect()
}

/// Polls the server until the roster has `len` entries
async fn wait_for_roster_len(handle: &ServerHandle, len: usize) -> Vec<UserInfo> {
    for _ in 0..100 {
        let roster = handle.roster().await.unwrap();
        if roster.len() == len {
            return roster;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("roster never reached {} entries", len);
}

/// JOIN AND LEAVE
mod lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn join_receives_canvas_then_roster() {
        let (url, handle) = start_server(test_config()).await;
        let mut ws = connect(&url).await;

        match recv(&mut ws).await {
            ServerPacket::CanvasState {
                canvas,
                user_id,
                user_color,
            } => {
                assert_eq!(canvas.width(), 64);
                assert_eq!(canvas.height(), 64);
                assert_eq!(canvas, handle.snapshot().await.unwrap());
                assert_eq!(user_id, "user_1");
                assert_eq!(user_color, Color::from("#4ECDC4"));
            }
            other => panic!("Expected canvasState, got {}", other.kind()),
        }

        let users = expect_roster(recv(&mut ws).await);
        assert_eq!(ids(&users), vec!["user_1"]);
        assert_eq!(users[0].name, "User 1");
        assert!(users[0].cursor.is_none());
    }

    #[tokio::test]
    async fn newcomer_canvas_includes_earlier_paint() {
        let (url, _handle) = start_server(test_config()).await;
        let (mut a, _) = join(&url).await;
        let (mut b, _) = join(&url).await;
        expect_roster(recv(&mut a).await);

        send(&mut a, r##"{"type":"pixelChange","x":7,"y":3,"color":"#123456"}"##).await;
        recv(&mut b).await;

        let mut c = connect(&url).await;
        match recv(&mut c).await {
            ServerPacket::CanvasState { canvas, .. } => {
                assert_eq!(canvas.get(7, 3), Some(&Color::from("#123456")));
                assert_eq!(canvas.rows()[3][7], Color::from("#123456"));
            }
            other => panic!("Expected canvasState, got {}", other.kind()),
        }
    }

    #[tokio::test]
    async fn disconnect_announces_departure_then_roster() {
        let (url, _handle) = start_server(test_config()).await;
        let (mut a, _) = join(&url).await;
        let (mut b, b_id) = join(&url).await;
        expect_roster(recv(&mut a).await);

        b.close(None).await.unwrap();

        assert_eq!(
            recv(&mut a).await,
            ServerPacket::UserDisconnected { user_id: b_id }
        );
        let users = expect_roster(recv(&mut a).await);
        assert_eq!(ids(&users), vec!["user_1"]);
    }

    #[tokio::test]
    async fn dropped_socket_counts_as_disconnect() {
        let (url, handle) = start_server(test_config()).await;
        let (_a, _) = join(&url).await;
        let (b, _) = join(&url).await;

        drop(b);

        let roster = wait_for_roster_len(&handle, 1).await;
        assert_eq!(ids(&roster), vec!["user_1"]);
    }

    #[tokio::test]
    async fn roster_consistent_after_connects_and_disconnects() {
        let (url, handle) = start_server(test_config()).await;

        let mut sockets = Vec::new();
        for _ in 0..5 {
            sockets.push(join(&url).await.0);
        }
        // Close user_2 and user_4
        let mut fourth = sockets.remove(3);
        let mut second = sockets.remove(1);
        second.close(None).await.unwrap();
        fourth.close(None).await.unwrap();

        let roster = wait_for_roster_len(&handle, 3).await;
        assert_eq!(ids(&roster), vec!["user_1", "user_3", "user_5"]);

        // Identities are never reused
        let mut late = connect(&url).await;
        recv(&mut late).await;
        let users = expect_roster(recv(&mut late).await);
        assert_eq!(ids(&users), vec!["user_1", "user_3", "user_5", "user_6"]);

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.total_connections, 6);
        assert_eq!(stats.connected, 4);
    }

    #[tokio::test]
    async fn shutdown_closes_connections() {
        let (url, handle) = start_server(test_config()).await;
        let (mut a, _) = join(&url).await;

        tokio_test::assert_ok!(handle.shutdown().await);

        let end = timeout(FRAME_TIMEOUT, async {
            loop {
                match a.next().await {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        })
        .await;
        assert!(end.is_ok());
        assert!(handle.roster().await.is_err());
    }
}

/// PEERS THAT CANNOT KEEP UP
mod slow_peer_tests {
    use super::*;

    #[tokio::test]
    async fn stalled_peer_is_evicted_and_its_socket_closed() {
        let config = ServerConfig {
            outbound_capacity: Some(4),
            ..test_config()
        };
        let (url, handle) = start_server(config).await;
        let (mut painter, _) = join(&url).await;
        let (mut stalled, _) = join(&url).await;
        expect_roster(recv(&mut painter).await);

        // One burst, flushed once, so the engine outruns the stalled writer
        for i in 0..2000 {
            let frame = format!(
                r##"{{"type":"pixelChange","x":{},"y":{},"color":"#000000"}}"##,
                i % 64,
                (i / 64) % 64
            );
            painter.feed(Message::text(frame)).await.unwrap();
        }
        painter.flush().await.unwrap();

        let roster = wait_for_roster_len(&handle, 1).await;
        assert_eq!(ids(&roster), vec!["user_1"]);
        assert_eq!(handle.stats().await.unwrap().evictions, 1);

        // The server hangs up instead of leaving a session-less socket open
        let end = timeout(FRAME_TIMEOUT, async {
            loop {
                match stalled.next().await {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        })
        .await;
        assert!(end.is_ok());

        // The painter saw the departure and is still served
        let mut departed = false;
        while !departed {
            departed = matches!(recv(&mut painter).await, ServerPacket::UserDisconnected { .. });
        }
        send(&mut painter, r#"{"type":"userNameChange","name":"Still here"}"#).await;
        loop {
            if let ServerPacket::UserList { users } = recv(&mut painter).await {
                if users[0].name == "Still here" {
                    break;
                }
            }
        }
    }
}

/// PAINTING AND RELAY
mod protocol_tests {
    use super::*;

    #[tokio::test]
    async fn pixel_change_relayed_to_others_only() {
        let (url, handle) = start_server(test_config()).await;
        let (mut a, a_id) = join(&url).await;
        let (mut b, _) = join(&url).await;
        expect_roster(recv(&mut a).await);

        send(&mut a, r##"{"type":"pixelChange","x":5,"y":5,"color":"#FF0000"}"##).await;

        assert_eq!(
            recv(&mut b).await,
            ServerPacket::PixelChange {
                x: 5,
                y: 5,
                color: Color::from("#FF0000"),
                user_id: a_id,
            }
        );
        assert_eq!(
            handle.pixel(5, 5).await.unwrap(),
            Some(Color::from("#FF0000"))
        );

        // The sender's next frame is the roster from its rename, not an echo
        send(&mut a, r#"{"type":"userNameChange","name":"Alice"}"#).await;
        let users = expect_roster(recv(&mut a).await);
        assert_eq!(users[0].name, "Alice");
        assert_eq!(expect_roster(recv(&mut b).await)[0].name, "Alice");
    }

    #[tokio::test]
    async fn out_of_bounds_pixel_is_dropped() {
        let (url, handle) = start_server(test_config()).await;
        let (mut a, _) = join(&url).await;
        let (mut b, _) = join(&url).await;
        expect_roster(recv(&mut a).await);
        let before = handle.snapshot().await.unwrap();

        send(&mut a, r##"{"type":"pixelChange","x":100,"y":5,"color":"#000000"}"##).await;
        send(&mut a, r##"{"type":"pixelChange","x":-1,"y":-1,"color":"#000000"}"##).await;
        send(&mut a, r#"{"type":"userNameChange","name":"Marker"}"#).await;

        // Nothing reached b before the rename's roster
        expect_roster(recv(&mut b).await);
        assert_eq!(handle.snapshot().await.unwrap(), before);
        assert_eq!(handle.stats().await.unwrap().pixels_dropped, 2);
    }

    #[tokio::test]
    async fn duplicate_pixel_change_broadcast_twice() {
        let (url, handle) = start_server(test_config()).await;
        let (mut a, _) = join(&url).await;
        let (mut b, _) = join(&url).await;
        expect_roster(recv(&mut a).await);

        let paint = r##"{"type":"pixelChange","x":1,"y":2,"color":"#00FF00"}"##;
        send(&mut a, paint).await;
        send(&mut a, paint).await;

        let first = recv(&mut b).await;
        let second = recv(&mut b).await;
        assert_eq!(first, second);
        assert_eq!(
            handle.pixel(1, 2).await.unwrap(),
            Some(Color::from("#00FF00"))
        );
    }

    #[tokio::test]
    async fn cursor_move_relayed_to_others() {
        let (url, handle) = start_server(test_config()).await;
        let (mut a, a_id) = join(&url).await;
        let (mut b, _) = join(&url).await;
        expect_roster(recv(&mut a).await);

        send(&mut a, r#"{"type":"cursorMove","x":10.5,"y":20.25}"#).await;

        match recv(&mut b).await {
            ServerPacket::CursorMove { user_id, cursor } => {
                assert_eq!(user_id, a_id);
                assert_approx_eq::assert_approx_eq!(cursor.x, 10.5, 0.0001);
                assert_approx_eq::assert_approx_eq!(cursor.y, 20.25, 0.0001);
            }
            other => panic!("Expected cursorMove, got {}", other.kind()),
        }

        let roster = handle.roster().await.unwrap();
        assert!(roster[0].cursor.is_some());
    }

    #[tokio::test]
    async fn malformed_frames_keep_connection_open() {
        let (url, handle) = start_server(test_config()).await;
        let (mut a, _) = join(&url).await;
        let (mut b, _) = join(&url).await;
        expect_roster(recv(&mut a).await);

        send(&mut a, "this is not json").await;
        send(&mut a, r#"{"x":1,"y":2}"#).await;
        send(&mut a, r#"{"type":"chatMessage","text":"hello"}"#).await;
        a.send(Message::binary(vec![1u8, 2, 3])).await.unwrap();
        send(&mut a, r##"{"type":"pixelChange","x":0,"y":0,"color":"#ABCDEF"}"##).await;

        match recv(&mut b).await {
            ServerPacket::PixelChange { color, .. } => assert_eq!(color, Color::from("#ABCDEF")),
            other => panic!("Expected pixelChange, got {}", other.kind()),
        }

        send(&mut a, r#"{"type":"userNameChange","name":"Still here"}"#).await;
        assert_eq!(expect_roster(recv(&mut a).await)[0].name, "Still here");

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.malformed, 2);
        assert_eq!(stats.connected, 2);
    }

    #[tokio::test]
    async fn blank_rename_is_ignored() {
        let (url, _handle) = start_server(test_config()).await;
        let (mut a, _) = join(&url).await;

        send(&mut a, r#"{"type":"userNameChange","name":"   "}"#).await;
        send(&mut a, r#"{"type":"userNameChange","name":""}"#).await;
        send(&mut a, r#"{"type":"userNameChange","name":"Bob"}"#).await;

        // Only the valid rename produced a roster
        let users = expect_roster(recv(&mut a).await);
        assert_eq!(users[0].name, "Bob");
    }
}

/// ORIGIN CHECKING
mod origin_tests {
    use super::*;

    fn restricted_config() -> ServerConfig {
        ServerConfig {
            origin_policy: OriginPolicy::AllowList(vec!["http://localhost:5173".to_string()]),
            ..test_config()
        }
    }

    fn assert_forbidden(result: Result<Client, ClientError>) {
        match result {
            Err(ClientError::WebSocket(tungstenite::Error::Http(response))) => {
                assert_eq!(response.status().as_u16(), 403);
            }
            Err(other) => panic!("Expected HTTP 403, got {}", other),
            Ok(_) => panic!("Handshake should have been rejected"),
        }
    }

    #[tokio::test]
    async fn disallowed_origin_rejected_with_403() {
        let (url, handle) = start_server(restricted_config()).await;

        assert_forbidden(Client::connect_with_origin(&url, "http://evil.example").await);
        assert_forbidden(Client::connect(&url).await);

        assert!(handle.roster().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn allowed_origin_accepted() {
        let (url, _handle) = start_server(restricted_config()).await;

        let mut client = Client::connect_with_origin(&url, "http://localhost:5173")
            .await
            .unwrap();
        client.wait_until_synced().await.unwrap();
        assert_eq!(client.mirror().user_id(), Some("user_1"));
    }
}

/// CLIENT LIBRARY AGAINST A REAL SERVER
mod client_tests {
    use super::*;

    fn small_config() -> ServerConfig {
        ServerConfig {
            grid_width: 8,
            grid_height: 8,
            ..test_config()
        }
    }

    #[tokio::test]
    async fn fill_sends_one_change_per_cell() {
        let (url, handle) = start_server(small_config()).await;
        let (mut watcher, _) = join(&url).await;

        let mut painter = Client::connect(&url).await.unwrap();
        painter.wait_until_synced().await.unwrap();
        expect_roster(recv(&mut watcher).await);

        let black = Color::from("#000000");
        let filled = painter.fill(0, 0, black.clone()).await.unwrap();
        assert_eq!(filled, 64);

        let mut cells = Vec::new();
        for _ in 0..64 {
            match recv(&mut watcher).await {
                ServerPacket::PixelChange { x, y, color, .. } => {
                    assert_eq!(color, black);
                    cells.push((x, y));
                }
                other => panic!("Expected pixelChange, got {}", other.kind()),
            }
        }
        cells.sort();
        cells.dedup();
        assert_eq!(cells.len(), 64);

        let snapshot = handle.snapshot().await.unwrap();
        assert!(snapshot.rows().iter().flatten().all(|cell| *cell == black));
        assert_eq!(painter.mirror().canvas(), &snapshot);
    }

    #[tokio::test]
    async fn full_canvas_fill_reaches_reading_watcher() {
        let (url, handle) = start_server(test_config()).await;
        let (mut watcher, _) = join(&url).await;

        let mut painter = Client::connect(&url).await.unwrap();
        painter.wait_until_synced().await.unwrap();

        let watching = tokio::spawn(async move {
            let mut changes = 0;
            while changes < 64 * 64 {
                if let ServerPacket::PixelChange { .. } = recv(&mut watcher).await {
                    changes += 1;
                }
            }
            changes
        });

        let filled = painter.fill(0, 0, Color::from("#000000")).await.unwrap();
        assert_eq!(filled, 64 * 64);

        let changes = timeout(Duration::from_secs(30), watching).await;
        assert!(matches!(changes, Ok(Ok(4096))));

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.evictions, 0);
        assert_eq!(stats.pixels_applied, 64 * 64);
        assert_eq!(handle.roster().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn mirror_follows_remote_activity() {
        let (url, _handle) = start_server(small_config()).await;
        let mut viewer = Client::connect(&url).await.unwrap();
        viewer.wait_until_synced().await.unwrap();

        let (mut other, other_id) = join(&url).await;
        send(&mut other, r#"{"type":"cursorMove","x":2,"y":3}"#).await;
        send(&mut other, r##"{"type":"pixelChange","x":4,"y":4,"color":"#FF6B6B"}"##).await;
        other.close(None).await.unwrap();

        loop {
            if let SyncEvent::UserLeft { user_id } = viewer.next_event().await.unwrap() {
                assert_eq!(user_id, other_id);
                break;
            }
        }

        let mirror = viewer.mirror();
        assert_eq!(mirror.canvas().get(4, 4), Some(&Color::from("#FF6B6B")));
        assert!(mirror.remote_cursor(&other_id).is_none());

        // The roster update that follows the departure
        match viewer.next_event().await.unwrap() {
            SyncEvent::RosterUpdated(users) => assert_eq!(ids(&users), vec!["user_1"]),
            other => panic!("Expected roster update, got {:?}", other),
        }
        assert_eq!(viewer.mirror().users().len(), 1);
    }

    #[tokio::test]
    async fn own_paint_applied_locally() {
        let (url, handle) = start_server(small_config()).await;
        let mut client = Client::connect(&url).await.unwrap();
        client.wait_until_synced().await.unwrap();

        client.paint(2, 2, Color::from("#4ECDC4")).await.unwrap();
        client.change_name("Painter").await.unwrap();

        // The rename's roster arrives after the paint has been applied
        loop {
            if let SyncEvent::RosterUpdated(users) = client.next_event().await.unwrap() {
                if users[0].name == "Painter" {
                    break;
                }
            }
        }
        assert_eq!(
            client.mirror().canvas().get(2, 2),
            Some(&Color::from("#4ECDC4"))
        );
        assert_eq!(
            handle.pixel(2, 2).await.unwrap(),
            Some(Color::from("#4ECDC4"))
        );

        client.disconnect().await.unwrap();
        wait_for_roster_len(&handle, 0).await;
    }
}
