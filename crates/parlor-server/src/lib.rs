pub mod api;
pub mod auth;
pub mod config;
pub mod directory;
pub mod error;
pub mod health;
pub mod history;
pub mod identity;
pub mod rate_limit;
pub mod rooms;
pub mod router;
pub mod session;
pub mod state;
pub mod ws;

use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum::middleware;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;

use config::ServerConfig;
use state::AppState;

const API_TIMEOUT: Duration = Duration::from_secs(10);
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);
const LIMITER_IDLE_TTL: Duration = Duration::from_secs(600);

/// Build the Axum router and application state from a config, provisioning
/// seed users and initial rooms.
pub async fn build_app(config: ServerConfig) -> (Router<()>, AppState) {
    let state = AppState::new(config);
    seed(&state).await;

    let api_routes = Router::new()
        .route("/users", post(api::create_user))
        .route("/rooms", get(api::list_rooms))
        .route("/rooms/{name}/messages", get(api::room_messages))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::admin_auth,
        ))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            API_TIMEOUT,
        ))
        .layer(CorsLayer::permissive());

    let app = Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .nest("/api/v1", api_routes)
        .with_state(state.clone());

    (app, state)
}

async fn seed(state: &AppState) {
    let identity = state.router.identity();
    for user in &state.config.users {
        if let Err(e) = identity.create(&user.username, &user.password).await {
            tracing::warn!(username = %user.username, error = %e, "Failed to seed user");
        }
    }
    for name in &state.config.rooms.initial {
        state.router.rooms().get_or_create(name).await;
    }
}

/// Background task that periodically drops idle auth-limiter buckets.
pub fn spawn_maintenance(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(MAINTENANCE_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            let removed = state.auth_limiter.cleanup(LIMITER_IDLE_TTL).await;
            if removed > 0 {
                tracing::debug!(removed, "Pruned idle auth limiter entries");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SeedUser;

    #[tokio::test]
    async fn build_app_seeds_users_and_rooms() {
        let mut config = ServerConfig::default();
        config.users = vec![
            SeedUser {
                username: "alice".into(),
                password: "pw".into(),
            },
            SeedUser {
                username: "alice".into(),
                password: "dup".into(),
            },
        ];
        config.rooms.initial = vec!["General".into(), "Random".into()];

        let (_app, state) = build_app(config).await;
        assert!(state.router.identity().verify("alice", "pw").await.is_ok());
        let names: Vec<_> = state
            .router
            .rooms()
            .list()
            .await
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["General", "Random"]);
    }
}
