use serde::{Deserialize, Serialize};

/// Maximum inbound envelope size in bytes.
pub const MAX_ENVELOPE_SIZE: usize = 16 * 1024; // 16 KiB

/// Maximum outbound envelope size in bytes.
///
/// Re-encoding an accepted inbound `room` or `dm` adds at most the sender
/// prefix (a username of `MAX_USERNAME_LEN` bytes, doubled by escaping, plus
/// `": "`) and the `"room"` field framing; the room name itself only moves
/// from the payload to that field. The headroom covers both.
pub const MAX_OUTBOUND_ENVELOPE_SIZE: usize = MAX_ENVELOPE_SIZE + 1024;

/// Envelope kind discriminator as it appears in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    // Client -> Server (and acknowledgements Server -> Client)
    Auth,
    Join,
    // Both directions
    Room,
    Dm,
    // Server -> Client
    Error,
}

impl EnvelopeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Join => "join",
            Self::Room => "room",
            Self::Dm => "dm",
            Self::Error => "error",
        }
    }

    /// Parse a wire tag. Only the four client-originated kinds are accepted;
    /// `error` is server-only and is treated as unknown when sent by a client.
    pub fn from_client_tag(tag: &str) -> Option<Self> {
        match tag {
            "auth" => Some(Self::Auth),
            "join" => Some(Self::Join),
            "room" => Some(Self::Room),
            "dm" => Some(Self::Dm),
            _ => None,
        }
    }
}

impl std::fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of wire exchange: `{"type": ..., "payload": ...}`.
///
/// The kind is kept as a raw string so that unknown kinds survive decoding
/// and can be reported by the router instead of failing the whole frame.
/// Outbound room broadcasts additionally carry the room name in `room`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
}

impl Envelope {
    pub fn new(kind: EnvelopeKind, payload: impl Into<String>) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            payload: payload.into(),
            room: None,
        }
    }

    /// Room broadcast as delivered to members: `"<sender>: <text>"`.
    pub fn room_message(room: &str, sender: &str, text: &str) -> Self {
        Self {
            room: Some(room.to_string()),
            ..Self::new(EnvelopeKind::Room, format!("{sender}: {text}"))
        }
    }

    /// Direct message as delivered to the recipient: `"<sender>: <text>"`.
    pub fn direct_message(sender: &str, text: &str) -> Self {
        Self::new(EnvelopeKind::Dm, format!("{sender}: {text}"))
    }

    /// Authentication acknowledgement.
    pub fn auth_ok(username: &str) -> Self {
        Self::new(EnvelopeKind::Auth, format!("ok {username}"))
    }

    /// Join acknowledgement; the payload is the joined room name.
    pub fn joined(room: &str) -> Self {
        Self::new(EnvelopeKind::Join, room)
    }

    /// Error report echoed to the sender: `"<code>: <detail>"`.
    pub fn error(code: &str, detail: &str) -> Self {
        Self::new(EnvelopeKind::Error, format!("{code}: {detail}"))
    }

    /// Kind as a known client tag, or `None` for anything else.
    pub fn client_kind(&self) -> Option<EnvelopeKind> {
        EnvelopeKind::from_client_tag(&self.kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    EmptyFrame,
    FrameTooLarge(usize),
    Malformed(String),
    UnknownKind(String),
    InvalidPayload { kind: EnvelopeKind, reason: String },
    Serialize(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyFrame => write!(f, "empty frame"),
            Self::FrameTooLarge(size) => write!(f, "frame too large: {size} bytes"),
            Self::Malformed(e) => write!(f, "malformed envelope: {e}"),
            Self::UnknownKind(kind) => write!(f, "unknown envelope type: {kind:?}"),
            Self::InvalidPayload { kind, reason } => {
                write!(f, "invalid {kind} payload: {reason}")
            },
            Self::Serialize(e) => write!(f, "serialize error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Decode one text frame into an envelope.
pub fn decode_envelope(text: &str) -> Result<Envelope, ProtocolError> {
    if text.trim().is_empty() {
        return Err(ProtocolError::EmptyFrame);
    }
    if text.len() > MAX_ENVELOPE_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Encode an envelope to a JSON text frame.
pub fn encode_envelope(envelope: &Envelope) -> Result<String, ProtocolError> {
    let text =
        serde_json::to_string(envelope).map_err(|e| ProtocolError::Serialize(e.to_string()))?;
    if text.len() > MAX_OUTBOUND_ENVELOPE_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    Ok(text)
}
