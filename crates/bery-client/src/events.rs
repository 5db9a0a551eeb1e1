use std::time::Duration;

use bery_shared::protocol::{ChatMessage, StatusUpdate, Typing};
use bery_shared::Envelope;

/// Everything a session reports to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Socket open; the `register` envelope has been sent.
    Connected,
    /// The relay confirmed our identity.
    Registered { user_id: String, user_name: String },
    /// Inbound chat message; `contact_id` is the sender.
    Message(ChatMessage),
    /// Receipt for one of our outbound messages.
    Status(StatusUpdate),
    Typing(Typing),
    /// The socket closed; a reconnect will follow if attempts remain.
    Disconnected,
    Reconnecting { attempt: u32, delay: Duration },
    /// Terminal: every reconnect attempt failed. Show "unable to connect".
    Unreachable { attempts: u32 },
}

impl SessionEvent {
    /// Map an inbound envelope to an event. Client-to-server kinds yield `None`.
    pub fn from_envelope(envelope: Envelope) -> Option<Self> {
        match envelope {
            Envelope::Registered(r) => Some(Self::Registered {
                user_id: r.user_id,
                user_name: r.user_name,
            }),
            Envelope::Message(message) => Some(Self::Message(message)),
            Envelope::Media(media) => Some(Self::Message(media.into())),
            Envelope::Status(status) => Some(Self::Status(status)),
            Envelope::Typing(typing) => Some(Self::Typing(typing)),
            Envelope::Connect(_) | Envelope::Register(_) | Envelope::Unknown => None,
        }
    }
}

/// Connection lifecycle as observed through [`crate::SessionHandle::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Unreachable { attempts: u32 },
    Closed,
}
