//! Payload grammars for the four client envelope kinds.
//!
//! Payloads are split on the first single space only, so message text and
//! passwords may themselves contain spaces.

use crate::envelope::{Envelope, EnvelopeKind, ProtocolError};

/// A decoded client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    Auth { username: String, password: String },
    Join { room: String },
    Room { room: String, text: String },
    Dm { username: String, text: String },
}

impl ClientRequest {
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Self::Auth { .. } => EnvelopeKind::Auth,
            Self::Join { .. } => EnvelopeKind::Join,
            Self::Room { .. } => EnvelopeKind::Room,
            Self::Dm { .. } => EnvelopeKind::Dm,
        }
    }

    /// Interpret an inbound envelope according to its declared kind.
    pub fn parse(envelope: &Envelope) -> Result<Self, ProtocolError> {
        let kind = envelope
            .client_kind()
            .ok_or_else(|| ProtocolError::UnknownKind(envelope.kind.clone()))?;
        let payload = envelope.payload.as_str();
        match kind {
            EnvelopeKind::Auth => {
                let (username, password) = split_pair(kind, payload, "<username> <password>")?;
                Ok(Self::Auth { username, password })
            },
            EnvelopeKind::Join => {
                if payload.is_empty() {
                    return Err(invalid(kind, "expected <room_name>"));
                }
                Ok(Self::Join {
                    room: payload.to_string(),
                })
            },
            EnvelopeKind::Room => {
                let (room, text) = split_pair(kind, payload, "<room_name> <message_text>")?;
                Ok(Self::Room { room, text })
            },
            EnvelopeKind::Dm => {
                let (username, text) = split_pair(kind, payload, "<username> <message_text>")?;
                Ok(Self::Dm { username, text })
            },
            EnvelopeKind::Error => Err(ProtocolError::UnknownKind(envelope.kind.clone())),
        }
    }
}

fn split_pair(
    kind: EnvelopeKind,
    payload: &str,
    shape: &str,
) -> Result<(String, String), ProtocolError> {
    match payload.split_once(' ') {
        Some((head, rest)) if !head.is_empty() => Ok((head.to_string(), rest.to_string())),
        _ => Err(invalid(kind, &format!("expected {shape}"))),
    }
}

fn invalid(kind: EnvelopeKind, reason: &str) -> ProtocolError {
    ProtocolError::InvalidPayload {
        kind,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn env(kind: &str, payload: &str) -> Envelope {
        Envelope {
            kind: kind.to_string(),
            payload: payload.to_string(),
            room: None,
        }
    }

    #[test]
    fn parse_auth() {
        let req = ClientRequest::parse(&env("auth", "alice s3cret pass")).unwrap();
        assert_eq!(
            req,
            ClientRequest::Auth {
                username: "alice".into(),
                password: "s3cret pass".into(),
            }
        );
    }

    #[test]
    fn auth_without_separator_is_invalid() {
        let err = ClientRequest::parse(&env("auth", "alice")).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidPayload {
                kind: EnvelopeKind::Auth,
                ..
            }
        ));
    }

    #[test]
    fn join_takes_whole_payload() {
        let req = ClientRequest::parse(&env("join", "lounge two")).unwrap();
        assert_eq!(
            req,
            ClientRequest::Join {
                room: "lounge two".into()
            }
        );
    }

    #[test]
    fn empty_join_is_invalid() {
        assert!(ClientRequest::parse(&env("join", "")).is_err());
    }

    #[test]
    fn room_splits_on_first_space_only() {
        let req = ClientRequest::parse(&env("room", "general hello   world")).unwrap();
        assert_eq!(
            req,
            ClientRequest::Room {
                room: "general".into(),
                text: "hello   world".into(),
            }
        );
    }

    #[test]
    fn dm_with_leading_space_is_invalid() {
        assert!(ClientRequest::parse(&env("dm", " bob hi")).is_err());
    }

    #[test]
    fn unknown_kind_reported() {
        let err = ClientRequest::parse(&env("leave", "general")).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownKind("leave".into()));
    }

    proptest! {
        #[test]
        fn room_text_survives_split(
            room in "[a-z0-9_-]{1,16}",
            text in "[ -~]{0,64}",
        ) {
            let req = ClientRequest::parse(&env("room", &format!("{room} {text}"))).unwrap();
            prop_assert_eq!(req, ClientRequest::Room { room, text });
        }

        #[test]
        fn dm_target_never_contains_space(payload in "[ -~]{0,64}") {
            if let Ok(ClientRequest::Dm { username, .. }) =
                ClientRequest::parse(&env("dm", &payload))
            {
                prop_assert!(!username.contains(' '));
                prop_assert!(!username.is_empty());
            }
        }
    }
}
