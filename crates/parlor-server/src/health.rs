use std::sync::atomic::Ordering;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::identity::IdentityError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub connections: ConnectionInfo,
    /// Authenticated connections.
    pub sessions: usize,
    pub rooms: RoomInfo,
}

#[derive(Serialize)]
pub struct ConnectionInfo {
    pub websocket: usize,
}

#[derive(Serialize)]
pub struct RoomInfo {
    pub active: usize,
    pub members: usize,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let websocket = state.ws_connection_count.load(Ordering::Relaxed);
    let sessions = state.router.directory().online_count().await;
    let (active, members) = state.router.rooms().stats().await;

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        connections: ConnectionInfo { websocket },
        sessions,
        rooms: RoomInfo { active, members },
    })
}

/// Ready once the identity store answers.
pub async fn readiness_check(State(state): State<AppState>) -> &'static str {
    match state.router.identity().find_by_id(0).await {
        Err(IdentityError::Unavailable(_)) => "not ready: identity store unavailable",
        _ => "ready",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_response_serializes() {
        let resp = HealthResponse {
            status: "healthy",
            version: "0.1.0",
            connections: ConnectionInfo { websocket: 5 },
            sessions: 3,
            rooms: RoomInfo {
                active: 1,
                members: 3,
            },
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"websocket\":5"));
        assert!(json.contains("\"sessions\":3"));
        assert!(json.contains("\"members\":3"));
    }

    #[tokio::test]
    async fn reports_router_counts() {
        let state = AppState::new(crate::config::ServerConfig::default());
        state.router.rooms().get_or_create("general").await;
        let Json(resp) = health_check(State(state)).await;
        assert_eq!(resp.rooms.active, 1);
        assert_eq!(resp.sessions, 0);
    }
}
