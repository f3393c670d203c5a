//! Domain model: messages, conversations, and the boundary decode step that
//! turns broker payloads into them.

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::{ChatError, ChatResult};
use crate::messages::{ConversationSummaryDto, MessageDto, WireMessage};

pub type ConversationId = i64;
pub type UserId = i64;
pub type MessageId = i64;

/// Id carried by locally synthesized messages. Never matches a real message.
pub const PLACEHOLDER_MESSAGE_ID: MessageId = 0;

/// Sender id used when a payload has no usable sender.
pub const UNKNOWN_SENDER_ID: UserId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryState {
    Sent,
    Delivered,
    Read,
}

impl DeliveryState {
    fn from_read_flag(read: bool) -> Self {
        if read {
            Self::Read
        } else {
            Self::Delivered
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub id: UserId,
    pub name: String,
    pub email: String,
}

impl Sender {
    pub fn new(id: UserId, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            email: email.into(),
        }
    }

    /// Sentinel substituted for a missing sender.
    pub fn unknown() -> Self {
        Self::new(UNKNOWN_SENDER_ID, "Unknown", "")
    }

    pub fn is_unknown(&self) -> bool {
        self.id == UNKNOWN_SENDER_ID
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub sender: Sender,
    pub content: String,
    pub sent_at: NaiveDateTime,
    pub state: DeliveryState,
}

impl Message {
    pub fn is_placeholder(&self) -> bool {
        self.id == PLACEHOLDER_MESSAGE_ID
    }
}

impl TryFrom<MessageDto> for Message {
    type Error = ChatError;

    fn try_from(dto: MessageDto) -> ChatResult<Self> {
        Ok(Message {
            id: dto.id,
            sender: Sender::new(dto.sender_id, dto.sender_name, dto.sender_email),
            content: dto.content,
            sent_at: parse_timestamp(&dto.sent_at)?,
            state: DeliveryState::from_read_flag(dto.read),
        })
    }
}

/// Classification of an inbound message payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedMessage {
    Full(Message),
    /// The payload carried no usable sender; [`Sender::unknown`] was substituted.
    SenderMissing(Message),
}

impl DecodedMessage {
    pub fn message(&self) -> &Message {
        match self {
            Self::Full(m) | Self::SenderMissing(m) => m,
        }
    }

    pub fn into_message(self) -> Message {
        match self {
            Self::Full(m) | Self::SenderMissing(m) => m,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::SenderMissing(_))
    }
}

/// A decoded message-topic delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    pub message: DecodedMessage,
    /// Conversation named inside the payload, if any.
    pub conversation_id: Option<ConversationId>,
}

/// Decode a message-topic body.
///
/// Fails only when the payload is not JSON, lacks an id, or carries an
/// unparsable timestamp. A missing sender degrades instead of failing.
pub fn decode_delivery(body: &str) -> ChatResult<Delivered> {
    let wire: WireMessage = serde_json::from_str(body)?;
    let sent_at = match wire.sent_at.as_deref() {
        Some(ts) => parse_timestamp(ts)?,
        None => return Err(ChatError::Codec("missing timestampEnvio".into())),
    };

    let sender = wire.sender.and_then(|s| match s.id {
        Some(id) if id != UNKNOWN_SENDER_ID => Some(Sender::new(
            id,
            s.name.unwrap_or_default(),
            s.email.unwrap_or_default(),
        )),
        _ => None,
    });

    let build = |sender: Sender| Message {
        id: wire.id,
        sender,
        content: wire.content.clone().unwrap_or_default(),
        sent_at,
        state: DeliveryState::from_read_flag(wire.read),
    };
    let message = match sender {
        Some(s) => DecodedMessage::Full(build(s)),
        None => DecodedMessage::SenderMissing(build(Sender::unknown())),
    };

    Ok(Delivered {
        message,
        conversation_id: wire.conversation.map(|c| c.id),
    })
}

/// Decode a typing or read-receipt body: a bare user id.
pub fn decode_user_id(body: &str) -> ChatResult<UserId> {
    Ok(serde_json::from_str::<UserId>(body.trim())?)
}

/// Parse a backend timestamp: ISO local date-time (optional fraction) or RFC 3339.
pub fn parse_timestamp(s: &str) -> ChatResult<NaiveDateTime> {
    // seconds are omitted by the backend when they are zero
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(ts);
        }
    }
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc).naive_utc())
        .map_err(|e| ChatError::Codec(format!("invalid timestamp {s:?}: {e}")))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: UserId,
    pub name: String,
    pub email: String,
}

impl Participant {
    pub fn new(id: UserId, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            email: email.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    /// `[local user, other user]`.
    pub participants: [Participant; 2],
    pub title: String,
    pub last_message: Option<Message>,
    pub unread_count: u32,
    pub updated_at: NaiveDateTime,
}

impl Conversation {
    /// Build from a retrieval summary. The last message becomes a placeholder.
    pub fn from_summary(dto: ConversationSummaryDto, local: &Participant) -> ChatResult<Self> {
        let other = Participant::new(
            dto.other_user_id,
            dto.other_user_name.clone(),
            dto.other_user_email.clone(),
        );
        let updated_at = match dto.last_message_at.as_deref() {
            Some(ts) => parse_timestamp(ts)?,
            None => NaiveDateTime::MIN,
        };
        let last_message = dto.last_message.map(|content| Message {
            id: PLACEHOLDER_MESSAGE_ID,
            sender: Sender::new(other.id, other.name.clone(), other.email.clone()),
            content,
            sent_at: updated_at,
            state: DeliveryState::Read,
        });

        Ok(Conversation {
            id: dto.conversation_id,
            title: dto.other_user_name,
            participants: [local.clone(), other],
            last_message,
            unread_count: dto.unread_count,
            updated_at,
        })
    }

    pub fn other_participant(&self) -> &Participant {
        &self.participants[1]
    }
}

/// Partial update merged into an existing conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationPatch {
    pub last_message: Option<Message>,
    pub updated_at: Option<NaiveDateTime>,
    pub unread_count: Option<u32>,
    pub title: Option<String>,
}

impl ConversationPatch {
    /// Patch recording `message` as the newest activity.
    pub fn last_message(message: &Message) -> Self {
        Self {
            updated_at: Some(message.sent_at),
            last_message: Some(message.clone()),
            ..Default::default()
        }
    }

    pub fn apply(self, conversation: &mut Conversation) {
        if let Some(m) = self.last_message {
            conversation.last_message = Some(m);
        }
        if let Some(ts) = self.updated_at {
            conversation.updated_at = ts;
        }
        if let Some(n) = self.unread_count {
            conversation.unread_count = n;
        }
        if let Some(t) = self.title {
            conversation.title = t;
        }
    }
}
