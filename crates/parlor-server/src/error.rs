use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use parlor_core::envelope::ProtocolError;

/// Failure of a single routed operation. Every variant is local to the
/// connection that issued the envelope; only `Transport` ends the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    Protocol(ProtocolError),
    Auth(String),
    NotAuthenticated,
    UnknownRoom(String),
    UnknownUser(String),
    UserUnreachable(String),
    RateLimited,
    Transport(String),
}

impl RouteError {
    /// Stable short code used in `error` envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Protocol(_) => "protocol",
            Self::Auth(_) => "auth_failed",
            Self::NotAuthenticated => "not_authenticated",
            Self::UnknownRoom(_) => "unknown_room",
            Self::UnknownUser(_) => "unknown_user",
            Self::UserUnreachable(_) => "user_unreachable",
            Self::RateLimited => "rate_limited",
            Self::Transport(_) => "transport",
        }
    }

    /// Whether the error terminates the connection.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl std::fmt::Display for RouteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Protocol(e) => write!(f, "{e}"),
            Self::Auth(m) => write!(f, "authentication failed: {m}"),
            Self::NotAuthenticated => write!(f, "connection is not authenticated"),
            Self::UnknownRoom(room) => write!(f, "room {room:?} does not exist"),
            Self::UnknownUser(user) => write!(f, "user {user:?} not found"),
            Self::UserUnreachable(user) => write!(f, "user {user:?} has no active connection"),
            Self::RateLimited => write!(f, "too many attempts, slow down"),
            Self::Transport(m) => write!(f, "transport error: {m}"),
        }
    }
}

impl std::error::Error for RouteError {}

impl From<ProtocolError> for RouteError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

/// Errors surfaced by the admin HTTP API.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest(m) | Self::NotFound(m) | Self::Conflict(m) | Self::Internal(m) => {
                write!(f, "{m}")
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
