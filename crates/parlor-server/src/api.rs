use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};

use parlor_core::user::User;

use crate::error::AppError;
use crate::history::LoggedMessage;
use crate::identity::IdentityError;
use crate::rooms::RoomSummary;
use crate::state::AppState;

const DEFAULT_HISTORY_LIMIT: usize = 50;
const MAX_HISTORY_LIMIT: usize = 500;
const MAX_PASSWORD_LEN: usize = 256;

#[derive(Debug, Deserialize)]
pub struct CreateUserBody {
    pub username: String,
    pub password: String,
}

/// POST /api/v1/users: register an account.
pub async fn create_user(
    State(state): State<AppState>,
    Json(body): Json<CreateUserBody>,
) -> Result<(StatusCode, Json<User>), AppError> {
    if body.password.len() > MAX_PASSWORD_LEN {
        return Err(AppError::BadRequest(format!(
            "password exceeds {MAX_PASSWORD_LEN} bytes"
        )));
    }
    let identity = state.router.identity();
    let id = identity
        .create(&body.username, &body.password)
        .await
        .map_err(|e| match e {
            IdentityError::DuplicateUsername(_) => AppError::Conflict(e.to_string()),
            IdentityError::InvalidUsername(_) | IdentityError::InvalidPassword => {
                AppError::BadRequest(e.to_string())
            },
            other => AppError::Internal(other.to_string()),
        })?;

    Ok((
        StatusCode::CREATED,
        Json(User {
            id,
            username: body.username,
        }),
    ))
}

/// GET /api/v1/rooms
pub async fn list_rooms(State(state): State<AppState>) -> Json<Vec<RoomSummary>> {
    Json(state.router.rooms().list().await)
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct RoomHistory {
    pub room: String,
    pub messages: Vec<LoggedMessage>,
}

/// GET /api/v1/rooms/{name}/messages?limit=N: most recent messages, oldest first.
pub async fn room_messages(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<RoomHistory>, AppError> {
    let room = state
        .router
        .rooms()
        .get(&name)
        .await
        .ok_or_else(|| AppError::NotFound(format!("room {name:?} does not exist")))?;

    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);
    let messages = state
        .router
        .message_log()
        .recent(room.id(), limit)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(RoomHistory {
        room: name,
        messages,
    }))
}
