use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::Utf8Bytes;
use tokio::sync::mpsc;

use parlor_core::envelope::{Envelope, ProtocolError, encode_envelope};
use parlor_core::user::User;

/// Encoded outbound text frame. Cloning is cheap, so one encoding is shared
/// by every recipient of a broadcast.
pub type Frame = Utf8Bytes;

/// Per-connection sender for outbound frames. Bounded so a slow client cannot
/// exhaust memory; a full queue drops the delivery.
pub type OutboundSender = mpsc::Sender<Frame>;

/// Opaque identity of one live transport stream. Never reused within a
/// process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Monotonic connection id source.
#[derive(Debug)]
pub struct ConnectionIdAllocator {
    next: AtomicU64,
}

impl Default for ConnectionIdAllocator {
    fn default() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }
}

impl ConnectionIdAllocator {
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Why a frame could not be handed to a connection's writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Writer task is gone (socket closed).
    Closed,
    /// Outbound queue is full (slow client).
    Full,
    Encode(ProtocolError),
}

impl std::fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "connection closed"),
            Self::Full => write!(f, "outbound queue full"),
            Self::Encode(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for DeliveryError {}

/// A connection id paired with the capability to send to it.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: OutboundSender,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, sender: OutboundSender) -> Self {
        Self { id, sender }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// True once the writer side has dropped its receiver.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Non-blocking send of a pre-encoded frame.
    pub fn send_frame(&self, frame: Frame) -> Result<(), DeliveryError> {
        self.sender.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Encode and send one envelope.
    pub fn send(&self, envelope: &Envelope) -> Result<(), DeliveryError> {
        let frame = encode_frame(envelope).map_err(DeliveryError::Encode)?;
        self.send_frame(frame)
    }
}

pub fn encode_frame(envelope: &Envelope) -> Result<Frame, ProtocolError> {
    encode_envelope(envelope).map(Frame::from)
}

/// The binding of one connection to one authenticated user.
#[derive(Debug, Clone)]
pub struct Session {
    pub connection: ConnectionHandle,
    pub user: User,
}

impl Session {
    pub fn connection_id(&self) -> ConnectionId {
        self.connection.id()
    }
}
