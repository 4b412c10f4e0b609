use std::collections::HashMap;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::sync::RwLock;

use parlor_core::user::{User, UserId, is_valid_username};

type HmacSha256 = Hmac<Sha256>;

/// Failures reported by an identity store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// Unknown user or wrong password. Deliberately indistinguishable.
    InvalidCredentials,
    NotFound,
    DuplicateUsername(String),
    InvalidUsername(String),
    InvalidPassword,
    /// Backing store could not answer.
    Unavailable(String),
}

impl std::fmt::Display for IdentityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidCredentials => write!(f, "invalid username or password"),
            Self::NotFound => write!(f, "user not found"),
            Self::DuplicateUsername(name) => write!(f, "username {name:?} is taken"),
            Self::InvalidUsername(name) => write!(f, "username {name:?} is not valid"),
            Self::InvalidPassword => write!(f, "password must not be empty"),
            Self::Unavailable(e) => write!(f, "identity store unavailable: {e}"),
        }
    }
}

impl std::error::Error for IdentityError {}

/// Credential verification and user lookup.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn verify(&self, username: &str, password: &str) -> Result<User, IdentityError>;
    async fn find_by_username(&self, username: &str) -> Result<User, IdentityError>;
    async fn find_by_id(&self, id: UserId) -> Result<User, IdentityError>;
    async fn create(&self, username: &str, password: &str) -> Result<UserId, IdentityError>;
}

struct StoredUser {
    user: User,
    salt: [u8; 16],
    digest: Vec<u8>,
}

#[derive(Default)]
struct Accounts {
    users: HashMap<UserId, StoredUser>,
    by_name: HashMap<String, UserId>,
}

/// In-process identity store. Passwords are kept as HMAC-SHA256 digests keyed
/// by a random per-user salt.
pub struct MemoryIdentityStore {
    accounts: RwLock<Accounts>,
    next_id: std::sync::atomic::AtomicU64,
}

impl Default for MemoryIdentityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(Accounts::default()),
            next_id: std::sync::atomic::AtomicU64::new(1),
        }
    }

    pub async fn len(&self) -> usize {
        self.accounts.read().await.users.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn password_digest(salt: &[u8], password: &str) -> Option<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(salt).ok()?;
    mac.update(password.as_bytes());
    Some(mac.finalize().into_bytes().to_vec())
}

/// Constant-time comparison of `password` against a stored digest.
fn password_matches(salt: &[u8], password: &str, digest: &[u8]) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(salt) else {
        return false;
    };
    mac.update(password.as_bytes());
    mac.verify_slice(digest).is_ok()
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn verify(&self, username: &str, password: &str) -> Result<User, IdentityError> {
        let accounts = self.accounts.read().await;
        let stored = accounts
            .by_name
            .get(username)
            .and_then(|id| accounts.users.get(id))
            .ok_or(IdentityError::InvalidCredentials)?;
        if password_matches(&stored.salt, password, &stored.digest) {
            Ok(stored.user.clone())
        } else {
            Err(IdentityError::InvalidCredentials)
        }
    }

    async fn find_by_username(&self, username: &str) -> Result<User, IdentityError> {
        let accounts = self.accounts.read().await;
        accounts
            .by_name
            .get(username)
            .and_then(|id| accounts.users.get(id))
            .map(|s| s.user.clone())
            .ok_or(IdentityError::NotFound)
    }

    async fn find_by_id(&self, id: UserId) -> Result<User, IdentityError> {
        let accounts = self.accounts.read().await;
        accounts
            .users
            .get(&id)
            .map(|s| s.user.clone())
            .ok_or(IdentityError::NotFound)
    }

    async fn create(&self, username: &str, password: &str) -> Result<UserId, IdentityError> {
        if !is_valid_username(username) {
            return Err(IdentityError::InvalidUsername(username.to_string()));
        }
        if password.is_empty() {
            return Err(IdentityError::InvalidPassword);
        }

        let salt: [u8; 16] = rand::random();
        let digest = password_digest(&salt, password)
            .ok_or_else(|| IdentityError::Unavailable("failed to key password hash".into()))?;

        let mut accounts = self.accounts.write().await;
        if accounts.by_name.contains_key(username) {
            return Err(IdentityError::DuplicateUsername(username.to_string()));
        }
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        accounts.by_name.insert(username.to_string(), id);
        accounts.users.insert(
            id,
            StoredUser {
                user: User {
                    id,
                    username: username.to_string(),
                },
                salt,
                digest,
            },
        );
        tracing::info!(user_id = id, username, "User created");
        Ok(id)
    }
}
