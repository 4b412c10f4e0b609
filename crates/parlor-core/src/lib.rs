pub mod envelope;
pub mod payload;
pub mod time;
pub mod user;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers {
    use crate::envelope::{Envelope, EnvelopeKind};

    /// Build an inbound `auth` envelope.
    pub fn auth(username: &str, password: &str) -> Envelope {
        Envelope::new(EnvelopeKind::Auth, format!("{username} {password}"))
    }

    /// Build an inbound `join` envelope.
    pub fn join(room: &str) -> Envelope {
        Envelope::new(EnvelopeKind::Join, room)
    }

    /// Build an inbound `room` envelope.
    pub fn room(room: &str, text: &str) -> Envelope {
        Envelope::new(EnvelopeKind::Room, format!("{room} {text}"))
    }

    /// Build an inbound `dm` envelope.
    pub fn dm(username: &str, text: &str) -> Envelope {
        Envelope::new(EnvelopeKind::Dm, format!("{username} {text}"))
    }
}
