use std::collections::{BTreeSet, HashMap};

use tokio::sync::RwLock;

use parlor_core::user::{User, UserId};

use crate::session::{ConnectionHandle, ConnectionId, Session};

/// Result of binding a user to a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rebind {
    /// The connection had no session.
    Fresh,
    /// The connection was already bound to the same user; memberships kept.
    SameUser,
    /// The connection was bound to a different user. Its room memberships
    /// were dropped from the directory and must be left by the caller.
    Replaced { previous: User, rooms: Vec<String> },
}

/// A session removed by `unbind`, with the rooms it had joined.
#[derive(Debug, Clone)]
pub struct Unbound {
    pub session: Session,
    pub rooms: Vec<String>,
}

struct SessionEntry {
    session: Session,
    rooms: BTreeSet<String>,
}

#[derive(Default)]
struct DirectoryInner {
    sessions: HashMap<ConnectionId, SessionEntry>,
    /// Bound connections per user in bind order; the last entry wins for
    /// direct-message delivery.
    by_user: HashMap<UserId, Vec<ConnectionId>>,
}

impl DirectoryInner {
    fn detach_user_index(&mut self, user_id: UserId, conn: ConnectionId) {
        if let Some(conns) = self.by_user.get_mut(&user_id) {
            conns.retain(|c| *c != conn);
            if conns.is_empty() {
                self.by_user.remove(&user_id);
            }
        }
    }
}

/// Maps live connections to the identities bound to them. The single source
/// of truth for who is online and on which connection.
#[derive(Default)]
pub struct ConnectionDirectory {
    inner: RwLock<DirectoryInner>,
}

impl ConnectionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `Session{connection, user}`, replacing any prior binding on the
    /// same connection.
    pub async fn bind(&self, connection: ConnectionHandle, user: User) -> Rebind {
        let conn = connection.id();
        let mut inner = self.inner.write().await;

        let outcome = match inner.sessions.remove(&conn) {
            None => {
                inner.sessions.insert(
                    conn,
                    SessionEntry {
                        session: Session { connection, user: user.clone() },
                        rooms: BTreeSet::new(),
                    },
                );
                Rebind::Fresh
            },
            Some(prev) if prev.session.user.id == user.id => {
                inner.sessions.insert(
                    conn,
                    SessionEntry {
                        session: Session { connection, user: user.clone() },
                        rooms: prev.rooms,
                    },
                );
                // Re-auth counts as the most recent bind for this user.
                inner.detach_user_index(user.id, conn);
                Rebind::SameUser
            },
            Some(prev) => {
                inner.detach_user_index(prev.session.user.id, conn);
                inner.sessions.insert(
                    conn,
                    SessionEntry {
                        session: Session { connection, user: user.clone() },
                        rooms: BTreeSet::new(),
                    },
                );
                Rebind::Replaced {
                    previous: prev.session.user,
                    rooms: prev.rooms.into_iter().collect(),
                }
            },
        };

        inner.by_user.entry(user.id).or_default().push(conn);
        outcome
    }

    /// The session bound to `conn`, if authenticated.
    pub async fn lookup(&self, conn: ConnectionId) -> Option<Session> {
        let inner = self.inner.read().await;
        inner.sessions.get(&conn).map(|e| e.session.clone())
    }

    /// The most recently bound connection of `user_id` that is still live.
    /// Bindings whose writer has already gone are skipped, so a stale
    /// reference is never returned.
    pub async fn lookup_by_user(&self, user_id: UserId) -> Option<ConnectionHandle> {
        let inner = self.inner.read().await;
        inner
            .by_user
            .get(&user_id)?
            .iter()
            .rev()
            .filter_map(|conn| inner.sessions.get(conn))
            .map(|e| &e.session.connection)
            .find(|handle| !handle.is_closed())
            .cloned()
    }

    /// Record that `conn` joined `room`. Returns false when the connection
    /// has no session, in which case nothing is recorded.
    pub async fn record_join(&self, conn: ConnectionId, room: &str) -> bool {
        let mut inner = self.inner.write().await;
        match inner.sessions.get_mut(&conn) {
            Some(entry) => {
                entry.rooms.insert(room.to_string());
                true
            },
            None => false,
        }
    }

    /// Forget a recorded membership. No-op if absent.
    pub async fn record_leave(&self, conn: ConnectionId, room: &str) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.sessions.get_mut(&conn) {
            entry.rooms.remove(room);
        }
    }

    /// Rooms recorded for `conn`, sorted by name.
    pub async fn rooms_of(&self, conn: ConnectionId) -> Vec<String> {
        let inner = self.inner.read().await;
        inner
            .sessions
            .get(&conn)
            .map(|e| e.rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove the binding. Returns the removed session exactly once; later
    /// calls for the same connection return `None`.
    pub async fn unbind(&self, conn: ConnectionId) -> Option<Unbound> {
        let mut inner = self.inner.write().await;
        let entry = inner.sessions.remove(&conn)?;
        inner.detach_user_index(entry.session.user.id, conn);
        Some(Unbound {
            session: entry.session,
            rooms: entry.rooms.into_iter().collect(),
        })
    }

    /// Number of authenticated connections.
    pub async fn online_count(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    /// Distinct usernames with at least one session, sorted.
    pub async fn online_users(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        let names: BTreeSet<&str> = inner
            .sessions
            .values()
            .map(|e| e.session.user.username.as_str())
            .collect();
        names.into_iter().map(str::to_string).collect()
    }
}
