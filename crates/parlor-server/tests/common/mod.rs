use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use parlor_core::envelope::{Envelope, decode_envelope, encode_envelope};
use parlor_core::test_helpers;

use parlor_server::build_app;
use parlor_server::config::{AuthFileConfig, SeedUser, ServerConfig};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Accounts every test server is seeded with. Password is `<name>-pw`.
pub const SEED_USERS: &[&str] = &["alice", "bob", "carol"];

pub struct TestServer {
    pub addr: SocketAddr,
    _shutdown: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Start a test server with seeded users and no admin auth.
    pub async fn new() -> Self {
        Self::from_config(seeded_config()).await
    }

    /// Start a test server whose admin API requires `token`.
    pub async fn with_admin_token(token: &str) -> Self {
        let config = ServerConfig {
            auth: AuthFileConfig {
                admin_token: Some(token.to_string()),
            },
            ..seeded_config()
        };
        Self::from_config(config).await
    }

    pub async fn from_config(config: ServerConfig) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (app, _state) = build_app(config).await;

        let handle = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        // Give the server a moment to start accepting
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            _shutdown: handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

/// Default config plus the seed accounts.
pub fn seeded_config() -> ServerConfig {
    ServerConfig {
        users: SEED_USERS
            .iter()
            .map(|name| SeedUser {
                username: name.to_string(),
                password: password_for(name),
            })
            .collect(),
        ..ServerConfig::default()
    }
}

pub fn password_for(name: &str) -> String {
    format!("{name}-pw")
}

/// Connect a WebSocket client to the given URL.
pub async fn ws_connect(url: &str) -> WsStream {
    let (stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    stream
}

pub async fn ws_send_raw(stream: &mut WsStream, text: &str) {
    stream.send(Message::Text(text.into())).await.unwrap();
}

pub async fn ws_send(stream: &mut WsStream, envelope: &Envelope) {
    let text = encode_envelope(envelope).unwrap();
    ws_send_raw(stream, &text).await;
}

/// Read the next envelope (5s timeout).
pub async fn ws_read(stream: &mut WsStream) -> Envelope {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return decode_envelope(text.as_str()).unwrap(),
                Some(Ok(Message::Close(_))) => panic!("WebSocket closed unexpectedly"),
                Some(Err(e)) => panic!("WebSocket error: {e}"),
                None => panic!("WebSocket stream ended"),
                _ => continue,
            }
        }
    })
    .await
    .expect("Timed out waiting for WebSocket message")
}

/// Try to read an envelope, returning None on timeout.
pub async fn ws_try_read(stream: &mut WsStream, timeout_ms: u64) -> Option<Envelope> {
    tokio::time::timeout(Duration::from_millis(timeout_ms), async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return decode_envelope(text.as_str()).unwrap(),
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    panic!("WebSocket error or closed")
                },
                _ => continue,
            }
        }
    })
    .await
    .ok()
}

/// Read the next envelope and assert its kind.
pub async fn ws_expect(stream: &mut WsStream, kind: &str) -> Envelope {
    let env = ws_read(stream).await;
    assert_eq!(env.kind, kind, "Expected {kind} envelope, got: {env:?}");
    env
}

/// Connect and authenticate as a seeded user, consuming the ack.
pub async fn ws_login(server: &TestServer, name: &str) -> WsStream {
    let mut stream = ws_connect(&server.ws_url()).await;
    ws_send(&mut stream, &test_helpers::auth(name, &password_for(name))).await;
    let ack = ws_expect(&mut stream, "auth").await;
    assert_eq!(ack.payload, format!("ok {name}"));
    stream
}

/// Join `room`, consuming the ack.
pub async fn ws_join(stream: &mut WsStream, room: &str) {
    ws_send(stream, &test_helpers::join(room)).await;
    let ack = ws_expect(stream, "join").await;
    assert_eq!(ack.payload, room);
}

pub async fn ws_login_and_join(server: &TestServer, name: &str, room: &str) -> WsStream {
    let mut stream = ws_login(server, name).await;
    ws_join(&mut stream, room).await;
    stream
}
