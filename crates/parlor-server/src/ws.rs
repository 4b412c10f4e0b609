use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use axum::extract::{ConnectInfo, FromRequest, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use parlor_core::envelope::{EnvelopeKind, ProtocolError, decode_envelope};

use crate::error::RouteError;
use crate::rate_limit::ConnectionRateLimiter;
use crate::router::ConnectionContext;
use crate::session::Frame;
use crate::state::{AppState, ConnectionGuard, IpConnectionGuard};

pub async fn ws_handler(
    State(state): State<AppState>,
    request: axum::extract::Request,
) -> Result<axum::response::Response, StatusCode> {
    let max_ws = state.config.limits.max_ws_connections;
    let current = state.ws_connection_count.load(Ordering::Relaxed);
    if current >= max_ws {
        tracing::warn!(current, max = max_ws, "WS connection limit reached");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
    let max_per_ip = state.config.limits.max_ws_per_ip;
    let Some(ip_guard) =
        IpConnectionGuard::try_acquire(ip, Arc::clone(&state.ws_per_ip), max_per_ip)
    else {
        tracing::warn!(%ip, max_per_ip, "Per-IP WS connection limit reached");
        return Err(StatusCode::TOO_MANY_REQUESTS);
    };

    let ws = WebSocketUpgrade::from_request(request, &state)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    Ok(ws
        .on_upgrade(move |socket| handle_socket(socket, state, ip, ip_guard))
        .into_response())
}

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    ip: IpAddr,
    _ip_guard: IpConnectionGuard,
) {
    let _guard = ConnectionGuard::new(Arc::clone(&state.ws_connection_count));
    let (ws_sender, mut ws_receiver) = socket.split();

    let (tx, rx) = mpsc::channel::<Frame>(state.config.limits.outbound_buffer);
    let mut ctx = state.router.open(tx);
    tracing::info!(connection_id = %ctx.id(), %ip, "WebSocket connected");

    let writer = spawn_writer(ws_sender, rx);

    read_loop(&mut ws_receiver, &state, &mut ctx, ip).await;

    state.router.disconnect(&mut ctx).await;
    // Last sender gone: the writer drains what is queued, then stops.
    drop(ctx);
    if let Err(e) = writer.await {
        tracing::debug!(error = %e, "Writer task ended abnormally");
    }
}

fn spawn_writer(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Frame>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_sender.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    })
}

/// Text carried by a data frame. Binary frames are accepted when they hold
/// UTF-8 JSON.
fn frame_text(msg: Message) -> Option<Result<Utf8Bytes, ProtocolError>> {
    match msg {
        Message::Text(text) => Some(Ok(text)),
        Message::Binary(data) => Some(
            String::from_utf8(data.to_vec())
                .map(Utf8Bytes::from)
                .map_err(|_| ProtocolError::Malformed("binary frame is not UTF-8".into())),
        ),
        _ => None,
    }
}

async fn read_loop(
    ws_receiver: &mut SplitStream<WebSocket>,
    state: &AppState,
    ctx: &mut ConnectionContext,
    ip: IpAddr,
) {
    let router = &state.router;
    let mut rate_limiter =
        ConnectionRateLimiter::per_second(state.config.limits.ws_rate_limit_per_sec);

    while let Some(msg) = ws_receiver.next().await {
        let msg = match msg {
            Ok(Message::Close(_)) => break,
            Ok(msg) => msg,
            Err(e) => {
                let err = RouteError::Transport(e.to_string());
                tracing::info!(connection_id = %ctx.id(), error = %err, "Connection read failed");
                break;
            },
        };
        let Some(text) = frame_text(msg) else {
            continue;
        };

        if !rate_limiter.allow() {
            tracing::warn!(connection_id = %ctx.id(), "Rate limited");
            continue;
        }

        let envelope = match text.and_then(|t| decode_envelope(t.as_str())) {
            Ok(envelope) => envelope,
            Err(e) => {
                router.report(ctx, &RouteError::Protocol(e));
                continue;
            },
        };

        if envelope.client_kind() == Some(EnvelopeKind::Auth)
            && !state.auth_limiter.check(ip).await
        {
            router.report(ctx, &RouteError::RateLimited);
            continue;
        }

        if let Err(e) = router.dispatch(ctx, &envelope).await
            && e.is_fatal()
        {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_frames_pass_through() {
        let got = frame_text(Message::Text("{\"type\":\"join\"}".into()));
        assert_eq!(got.unwrap().unwrap().as_str(), "{\"type\":\"join\"}");
    }

    #[test]
    fn binary_utf8_frames_are_accepted() {
        let got = frame_text(Message::Binary(b"{}".to_vec().into()));
        assert_eq!(got.unwrap().unwrap().as_str(), "{}");
    }

    #[test]
    fn binary_garbage_is_malformed() {
        let got = frame_text(Message::Binary(vec![0xff, 0xfe].into()));
        assert!(matches!(got, Some(Err(ProtocolError::Malformed(_)))));
    }

    #[test]
    fn control_frames_are_ignored() {
        assert!(frame_text(Message::Ping(Vec::new().into())).is_none());
    }
}
