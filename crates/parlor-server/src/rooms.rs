use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use parlor_core::envelope::{Envelope, ProtocolError};

use crate::session::{ConnectionHandle, ConnectionId, DeliveryError, Session, encode_frame};

/// Numeric room identity, used as the message-log key.
pub type RoomId = u64;

/// Whether a broadcast is delivered back to its sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoPolicy {
    IncludeSender,
    ExcludeSender,
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Frames handed to a member's outbound queue.
    pub delivered: usize,
    /// Members in the snapshot whose queue was closed or full.
    pub skipped: usize,
}

/// A named broadcast group. Membership is keyed by connection, so the same
/// user on two devices is two members.
pub struct Room {
    id: RoomId,
    name: String,
    members: Mutex<HashMap<ConnectionId, ConnectionHandle>>,
}

impl Room {
    fn new(id: RoomId, name: String) -> Self {
        Self {
            id,
            name,
            members: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> RoomId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add the session's connection. Returns false if it was already a member.
    pub async fn join(&self, session: &Session) -> bool {
        let mut members = self.members.lock().await;
        if members.contains_key(&session.connection_id()) {
            return false;
        }
        members.insert(session.connection_id(), session.connection.clone());
        true
    }

    /// Remove a connection. Returns false if it was not a member.
    pub async fn leave(&self, conn: ConnectionId) -> bool {
        self.members.lock().await.remove(&conn).is_some()
    }

    pub async fn contains(&self, conn: ConnectionId) -> bool {
        self.members.lock().await.contains_key(&conn)
    }

    pub async fn len(&self) -> usize {
        self.members.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Member connection ids, sorted.
    pub async fn member_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.members.lock().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Deliver `text` from `sender` to every member present when the
    /// membership lock is taken. Delivery runs on that snapshot after the
    /// lock is released; members that have gone since are soft failures.
    pub async fn broadcast(
        &self,
        sender: &Session,
        text: &str,
        echo: EchoPolicy,
    ) -> Result<BroadcastReport, ProtocolError> {
        let envelope = Envelope::room_message(&self.name, &sender.user.username, text);
        let frame = encode_frame(&envelope)?;

        let snapshot: Vec<ConnectionHandle> = {
            let members = self.members.lock().await;
            members
                .values()
                .filter(|m| echo == EchoPolicy::IncludeSender || m.id() != sender.connection_id())
                .cloned()
                .collect()
        };

        let mut report = BroadcastReport::default();
        for member in &snapshot {
            match member.send_frame(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.skipped += 1;
                    let reason = match e {
                        DeliveryError::Full => "queue full",
                        _ => "connection closed",
                    };
                    tracing::debug!(
                        room = %self.name,
                        connection_id = %member.id(),
                        reason,
                        "Skipping broadcast to unreachable member"
                    );
                },
            }
        }
        Ok(report)
    }
}

/// Room name with its current member count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomSummary {
    pub id: RoomId,
    pub name: String,
    pub members: usize,
}

/// Owns every room. Rooms are created lazily and never removed.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    next_id: AtomicU64,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Existing room by name.
    pub async fn get(&self, name: &str) -> Option<Arc<Room>> {
        self.rooms.read().await.get(name).cloned()
    }

    /// Existing room, or a new one. Concurrent callers for the same name all
    /// receive the same instance. The flag is true for the creating caller.
    pub async fn get_or_create(&self, name: &str) -> (Arc<Room>, bool) {
        if let Some(room) = self.get(name).await {
            return (room, false);
        }

        let mut rooms = self.rooms.write().await;
        // Re-check under the write lock: another caller may have won.
        if let Some(room) = rooms.get(name) {
            return (Arc::clone(room), false);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let room = Arc::new(Room::new(id, name.to_string()));
        rooms.insert(name.to_string(), Arc::clone(&room));
        tracing::info!(room = name, room_id = id, "Room created");
        (room, true)
    }

    /// Remove `conn` from each named room. Unknown names are ignored.
    /// Returns how many memberships were actually removed.
    pub async fn leave_all(&self, conn: ConnectionId, names: &[String]) -> usize {
        let mut removed = 0;
        for name in names {
            if let Some(room) = self.get(name).await
                && room.leave(conn).await
            {
                removed += 1;
            }
        }
        removed
    }

    /// (room count, total memberships).
    pub async fn stats(&self) -> (usize, usize) {
        let rooms: Vec<Arc<Room>> = self.rooms.read().await.values().cloned().collect();
        let mut members = 0;
        for room in &rooms {
            members += room.len().await;
        }
        (rooms.len(), members)
    }

    /// Every room with its member count, sorted by name.
    pub async fn list(&self) -> Vec<RoomSummary> {
        let rooms: Vec<Arc<Room>> = self.rooms.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(rooms.len());
        for room in rooms {
            out.push(RoomSummary {
                id: room.id(),
                name: room.name().to_string(),
                members: room.len().await,
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}
