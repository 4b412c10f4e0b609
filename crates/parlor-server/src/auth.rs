use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::Response;

use crate::state::AppState;

/// Extract the token from an `Authorization: Bearer <token>` header.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Whether `headers` satisfy the configured admin token. No token configured
/// means admin auth is disabled.
pub fn is_authorized(expected: Option<&str>, headers: &HeaderMap) -> bool {
    match expected {
        None => true,
        Some(expected) => bearer_token(headers) == Some(expected),
    }
}

/// Axum middleware guarding the admin REST API.
pub async fn admin_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if !is_authorized(state.config.auth.admin_token.as_deref(), request.headers()) {
        tracing::warn!(path = %request.uri().path(), "Rejected admin request");
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(auth: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert("authorization", HeaderValue::from_str(auth).unwrap());
        h
    }

    #[test]
    fn disabled_when_no_token() {
        assert!(is_authorized(None, &HeaderMap::new()));
    }

    #[test]
    fn requires_matching_bearer() {
        assert!(is_authorized(Some("s3cret"), &headers("Bearer s3cret")));
        assert!(!is_authorized(Some("s3cret"), &headers("Bearer wrong")));
        assert!(!is_authorized(Some("s3cret"), &headers("s3cret")));
        assert!(!is_authorized(Some("s3cret"), &HeaderMap::new()));
    }
}
