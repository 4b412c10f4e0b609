use serde::{Deserialize, Serialize};

/// Stable numeric identity assigned by the identity store.
pub type UserId = u64;

/// Maximum username length in bytes.
pub const MAX_USERNAME_LEN: usize = 32;

/// Read-only view of a user held by a session. Credential material never
/// leaves the identity store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
}

/// Usernames are single tokens (the `dm` grammar splits on the first space),
/// non-empty, bounded, and free of control characters.
pub fn is_valid_username(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_USERNAME_LEN
        && !name.chars().any(|c| c.is_whitespace() || c.is_control())
}
