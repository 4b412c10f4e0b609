use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;

use parlor_core::time::unix_millis;
use parlor_core::user::UserId;

use crate::rooms::RoomId;

pub type MessageId = u64;

/// Default number of messages kept per room before the oldest are evicted.
const DEFAULT_MAX_MESSAGES_PER_ROOM: usize = 500;

/// A room message as recorded by the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoggedMessage {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub content: String,
    pub created_at_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogError {
    Unavailable(String),
}

impl std::fmt::Display for LogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(e) => write!(f, "message log unavailable: {e}"),
        }
    }
}

impl std::error::Error for LogError {}

/// Durable record of room traffic. Live delivery never waits on it.
#[async_trait]
pub trait MessageLog: Send + Sync {
    async fn append(
        &self,
        room_id: RoomId,
        sender_id: UserId,
        content: &str,
    ) -> Result<MessageId, LogError>;

    /// Most recent messages of a room, oldest first.
    async fn recent(&self, room_id: RoomId, limit: usize) -> Result<Vec<LoggedMessage>, LogError>;
}

/// In-memory, bounded per-room message log.
pub struct MemoryMessageLog {
    rooms: Mutex<HashMap<RoomId, VecDeque<LoggedMessage>>>,
    next_id: AtomicU64,
    max_per_room: usize,
}

impl Default for MemoryMessageLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMessageLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_MESSAGES_PER_ROOM)
    }

    pub fn with_capacity(max_per_room: usize) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            max_per_room,
        }
    }
}

#[async_trait]
impl MessageLog for MemoryMessageLog {
    async fn append(
        &self,
        room_id: RoomId,
        sender_id: UserId,
        content: &str,
    ) -> Result<MessageId, LogError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut rooms = self.rooms.lock().await;
        let log = rooms.entry(room_id).or_default();
        log.push_back(LoggedMessage {
            id,
            room_id,
            sender_id,
            content: content.to_string(),
            created_at_ms: unix_millis(),
        });
        while log.len() > self.max_per_room {
            log.pop_front();
        }
        Ok(id)
    }

    async fn recent(&self, room_id: RoomId, limit: usize) -> Result<Vec<LoggedMessage>, LogError> {
        let rooms = self.rooms.lock().await;
        let Some(log) = rooms.get(&room_id) else {
            return Ok(Vec::new());
        };
        let skip = log.len().saturating_sub(limit);
        Ok(log.iter().skip(skip).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_assigns_increasing_ids() {
        let log = MemoryMessageLog::new();
        let a = log.append(1, 10, "hello").await.unwrap();
        let b = log.append(1, 11, "hi").await.unwrap();
        assert!(b > a);
    }

    #[tokio::test]
    async fn recent_returns_tail_oldest_first() {
        let log = MemoryMessageLog::new();
        for i in 0..5 {
            log.append(1, 10, &format!("m{i}")).await.unwrap();
        }
        let tail = log.recent(1, 2).await.unwrap();
        let contents: Vec<_> = tail.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m3", "m4"]);
    }

    #[tokio::test]
    async fn rooms_are_separate() {
        let log = MemoryMessageLog::new();
        log.append(1, 10, "in one").await.unwrap();
        log.append(2, 10, "in two").await.unwrap();
        assert_eq!(log.recent(1, 10).await.unwrap().len(), 1);
        assert!(log.recent(3, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn evicts_oldest_at_capacity() {
        let log = MemoryMessageLog::with_capacity(3);
        for i in 0..5 {
            log.append(1, 10, &format!("m{i}")).await.unwrap();
        }
        let all = log.recent(1, 100).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].content, "m2");
    }
}
