use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::{DeliveryStatus, MediaType, MessageId};

/// Every JSON frame exchanged over a relay connection.
///
/// The `type` field selects the variant. Kinds the relay does not know
/// decode as [`Envelope::Unknown`] instead of failing, so newer clients can
/// talk to an older relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Envelope {
    /// Client hello, acknowledged by logging only
    Connect(Connect),

    /// Bind the connection to a logical identity
    Register(Registration),

    /// Server confirmation of a `register`
    Registered(Registration),

    /// Chat message (client → server, and forwarded server → client)
    Message(ChatMessage),

    /// Media message; forwarded to the peer as a `message`
    Media(MediaMessage),

    /// Delivery receipt for a previously sent message
    Status(StatusUpdate),

    /// Presence hint relayed to every other connection
    Typing(Typing),

    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Connect {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub user_id: String,
    pub user_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Recipient on the way in, sender on the way out.
    pub contact_id: String,
    pub message_id: MessageId,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<MediaType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMessage {
    pub contact_id: String,
    pub media_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<MediaType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    /// The original recipient, so the sender can find the right thread.
    pub contact_id: String,
    pub message_id: MessageId,
    pub status: DeliveryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Typing {
    pub contact_id: String,
    /// Any other fields the client sent, relayed untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Media carried by a chat message.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaAttachment {
    pub url: String,
    pub media_type: Option<MediaType>,
    pub name: Option<String>,
}

impl Envelope {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Malformed)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// Wire name of the envelope kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Register(_) => "register",
            Self::Registered(_) => "registered",
            Self::Message(_) => "message",
            Self::Media(_) => "media",
            Self::Status(_) => "status",
            Self::Typing(_) => "typing",
            Self::Unknown => "unknown",
        }
    }

    pub fn register(user_id: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self::Register(Registration {
            user_id: user_id.into(),
            user_name: user_name.into(),
        })
    }

    pub fn registered(user_id: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self::Registered(Registration {
            user_id: user_id.into(),
            user_name: user_name.into(),
        })
    }

    pub fn status(
        contact_id: impl Into<String>,
        message_id: MessageId,
        status: DeliveryStatus,
    ) -> Self {
        Self::Status(StatusUpdate {
            contact_id: contact_id.into(),
            message_id,
            status,
            error: None,
        })
    }

    pub fn failed(
        contact_id: impl Into<String>,
        message_id: MessageId,
        error: impl Into<String>,
    ) -> Self {
        Self::Status(StatusUpdate {
            contact_id: contact_id.into(),
            message_id,
            status: DeliveryStatus::Failed,
            error: Some(error.into()),
        })
    }
}

impl ChatMessage {
    /// A plain text message stamped with the current time.
    pub fn text(
        contact_id: impl Into<String>,
        message_id: MessageId,
        text: impl Into<String>,
    ) -> Self {
        Self {
            contact_id: contact_id.into(),
            message_id,
            timestamp: now_iso(),
            text: Some(text.into()),
            media_url: None,
            media_type: None,
            media_name: None,
            sender_name: None,
        }
    }

    pub fn media(&self) -> Option<MediaAttachment> {
        self.media_url.as_ref().map(|url| MediaAttachment {
            url: url.clone(),
            media_type: self.media_type,
            name: self.media_name.clone(),
        })
    }
}

impl From<MediaMessage> for ChatMessage {
    /// Normalise a `media` envelope into the `message` shape, filling in
    /// an id and timestamp when the client left them out.
    fn from(media: MediaMessage) -> Self {
        Self {
            contact_id: media.contact_id,
            message_id: media.message_id.unwrap_or_else(MessageId::generate),
            timestamp: media.timestamp.unwrap_or_else(now_iso),
            text: media.text,
            media_url: Some(media.media_url),
            media_type: media.media_type,
            media_name: media.media_name,
            sender_name: media.sender_name,
        }
    }
}

/// Current time as an ISO-8601 string with millisecond precision.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
