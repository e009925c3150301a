//! Shared helpers for the integration tests: a real server on a random port
//! plus direct database seeding for accounts, follows and groups.

#![allow(dead_code)]

use futures_util::StreamExt;
use serde_json::Value;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use social_server::db::DbPool;
use social_server::directory::{follows, groups, sessions, users};
use social_server::ws::actor::KeepAlive;
use social_server::ws::{Hub, HubSettings};

pub type WsRead = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;
pub type WsWrite = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Image cap used by the test server.
pub const TEST_MAX_IMAGE_BYTES: usize = 64 * 1024;

/// Smallest byte string the server sniffs as PNG.
pub const PNG_BYTES: &[u8] = &[
    0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13, b'I', b'H', b'D', b'R',
];

pub struct TestServer {
    pub base_url: String,
    pub addr: SocketAddr,
    pub db: DbPool,
    pub hub: Hub,
    pub client: reqwest::Client,
}

pub struct TestUser {
    pub id: String,
    pub token: String,
}

/// Start the server on a random port.
pub async fn start_test_server() -> TestServer {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = social_server::db::init_db(&data_dir).expect("Failed to init DB");
    let hub = Hub::spawn(HubSettings {
        write_timeout: Duration::from_millis(500),
        outbound_queue: 16,
    });

    let state = social_server::state::AppState {
        db: db.clone(),
        hub: hub.clone(),
        keepalive: KeepAlive::default(),
        images_dir: social_server::media::message_images_dir(&data_dir),
        max_image_bytes: TEST_MAX_IMAGE_BYTES,
    };

    let app = social_server::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
        let _keep = tmp_dir;
    });

    TestServer {
        base_url: format!("http://{}", addr),
        addr,
        db,
        hub,
        client: reqwest::Client::new(),
    }
}

impl TestServer {
    /// Insert a user with a live session.
    pub fn user(&self, first_name: &str) -> TestUser {
        let conn = self.db.lock().unwrap();
        let id = users::create_user(
            &conn,
            &users::NewUser {
                username: Some(first_name.to_lowercase()),
                first_name: first_name.to_string(),
                last_name: "Tester".to_string(),
                avatar: None,
            },
        )
        .unwrap();
        let token = sessions::create_session(&conn, &id).unwrap();
        TestUser { id, token }
    }

    pub fn follow(&self, follower: &TestUser, followee: &TestUser) {
        let conn = self.db.lock().unwrap();
        follows::follow(&conn, &follower.id, &followee.id).unwrap();
    }

    pub fn group(&self, owner: &TestUser, members: &[&TestUser]) -> String {
        let conn = self.db.lock().unwrap();
        let gid = groups::create_group(&conn, &owner.id, "Test group").unwrap();
        for member in members {
            groups::join_group(&conn, &gid, &member.id).unwrap();
        }
        gid
    }

    pub fn count(&self, table: &str) -> i64 {
        let conn = self.db.lock().unwrap();
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
            row.get(0)
        })
        .unwrap()
    }

    /// POST /api/messages with text content to the given recipients.
    pub async fn send_text(&self, from: &TestUser, to: &[&TestUser], text: &str) -> reqwest::Response {
        let mut form = reqwest::multipart::Form::new().text("content", text.to_string());
        for recipient in to {
            form = form.text("receiver", recipient.id.clone());
        }
        self.client
            .post(format!("{}/api/messages", self.base_url))
            .bearer_auth(&from.token)
            .multipart(form)
            .send()
            .await
            .unwrap()
    }

    /// POST /api/messages/group with text content.
    pub async fn send_group_text(&self, from: &TestUser, group_id: &str, text: &str) -> reqwest::Response {
        let form = reqwest::multipart::Form::new()
            .text("groupID", group_id.to_string())
            .text("content", text.to_string());
        self.client
            .post(format!("{}/api/messages/group", self.base_url))
            .bearer_auth(&from.token)
            .multipart(form)
            .send()
            .await
            .unwrap()
    }

    /// Open a WebSocket for `user` and wait until the hub has registered it.
    pub async fn connect(&self, user: &TestUser) -> (WsWrite, WsRead) {
        let before = self.hub.connections_of(&user.id);
        let ws_url = format!("ws://{}/ws?token={}", self.addr, user.token);
        let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
            .await
            .expect("Failed to connect to WebSocket");

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while self.hub.connections_of(&user.id) <= before {
            assert!(
                tokio::time::Instant::now() < deadline,
                "connection was never registered"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        ws_stream.split()
    }
}

/// Wait for the next JSON text frame whose `type` is `kind`, skipping others.
pub async fn next_event(read: &mut WsRead, kind: &str) -> Option<Value> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, read.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                let value: Value = serde_json::from_str(text.as_str()).unwrap();
                if value["type"] == kind {
                    return Some(value);
                }
            }
            Ok(Some(Ok(_))) => continue,
            _ => return None,
        }
    }
}
