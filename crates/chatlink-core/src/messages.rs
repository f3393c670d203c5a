//! Broker destinations and the JSON payloads exchanged with the chat backend.
//!
//! Field names follow the backend's wire format and must not change.

use serde::{Deserialize, Serialize};

/// Publish destination for a new chat message.
pub const SEND_MESSAGE_DESTINATION: &str = "/app/chat.enviarMensaje";
/// Publish destination for typing notifications.
pub const TYPING_DESTINATION: &str = "/app/chat.typing";
/// Publish destination for read acknowledgements.
pub const MARK_READ_DESTINATION: &str = "/app/chat.leerMensajes";

const TOPIC_PREFIX: &str = "/topic/conversacion/";

/// Conversation id reserved for the per-user new-conversation announcements.
pub const NEW_CONVERSATION_CHANNEL: i64 = 0;

/// The three per-conversation channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelKind {
    Messages,
    Typing,
    ReadReceipts,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 3] = [Self::Messages, Self::Typing, Self::ReadReceipts];

    fn suffix(&self) -> &'static str {
        match self {
            Self::Messages => "",
            Self::Typing => "/typing",
            Self::ReadReceipts => "/leido",
        }
    }
}

/// Logical subscription key: (channel kind, conversation id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelKey {
    pub kind: ChannelKind,
    pub conversation_id: i64,
}

impl ChannelKey {
    pub fn new(kind: ChannelKind, conversation_id: i64) -> Self {
        Self {
            kind,
            conversation_id,
        }
    }

    pub fn messages(conversation_id: i64) -> Self {
        Self::new(ChannelKind::Messages, conversation_id)
    }

    pub fn typing(conversation_id: i64) -> Self {
        Self::new(ChannelKind::Typing, conversation_id)
    }

    pub fn read_receipts(conversation_id: i64) -> Self {
        Self::new(ChannelKind::ReadReceipts, conversation_id)
    }

    pub fn new_conversations() -> Self {
        Self::messages(NEW_CONVERSATION_CHANNEL)
    }

    /// Broker topic this key subscribes to.
    pub fn topic(&self) -> String {
        format!("{TOPIC_PREFIX}{}{}", self.conversation_id, self.kind.suffix())
    }

    /// Inverse of [`ChannelKey::topic`].
    pub fn from_topic(topic: &str) -> Option<Self> {
        let rest = topic.strip_prefix(TOPIC_PREFIX)?;
        let (id, kind) = match rest.split_once('/') {
            None => (rest, ChannelKind::Messages),
            Some((id, "typing")) => (id, ChannelKind::Typing),
            Some((id, "leido")) => (id, ChannelKind::ReadReceipts),
            Some(_) => return None,
        };
        Some(Self::new(kind, id.parse().ok()?))
    }
}

impl std::fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.topic())
    }
}

// ── Outbound payloads ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    #[serde(rename = "idConversacion")]
    pub conversation_id: i64,
    #[serde(rename = "idEmisor")]
    pub sender_id: i64,
    #[serde(rename = "contenido")]
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingNotice {
    #[serde(rename = "idConversacion")]
    pub conversation_id: i64,
    #[serde(rename = "idUsuario")]
    pub user_id: i64,
}

/// Body of both the broker mark-read publish and the REST fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadRequest {
    #[serde(rename = "idConversacion")]
    pub conversation_id: i64,
    #[serde(rename = "idUsuario")]
    pub user_id: i64,
}

// ── Inbound payloads ────────────────────────────────────────────────

/// Message as delivered on a conversation topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub id: i64,
    #[serde(rename = "contenido", default)]
    pub content: Option<String>,
    #[serde(rename = "leido", default)]
    pub read: bool,
    #[serde(rename = "timestampEnvio", default)]
    pub sent_at: Option<String>,
    #[serde(rename = "emisor", default)]
    pub sender: Option<WireSender>,
    #[serde(rename = "conversacion", default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<WireConversationRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireSender {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(rename = "nombre", alias = "name", default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireConversationRef {
    pub id: i64,
}

// ── Retrieval API payloads ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummaryDto {
    #[serde(rename = "idConversacion")]
    pub conversation_id: i64,
    #[serde(rename = "idOtroUsuario")]
    pub other_user_id: i64,
    #[serde(rename = "nombreOtroUsuario", default)]
    pub other_user_name: String,
    #[serde(rename = "emailOtroUsuario", default)]
    pub other_user_email: String,
    #[serde(rename = "ultimoMensaje", default)]
    pub last_message: Option<String>,
    #[serde(rename = "timestampUltimoMensaje", default)]
    pub last_message_at: Option<String>,
    #[serde(rename = "mensajesNoLeidos", default)]
    pub unread_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDto {
    pub id: i64,
    #[serde(rename = "contenido", default)]
    pub content: String,
    #[serde(rename = "leido", default)]
    pub read: bool,
    #[serde(rename = "timestampEnvio")]
    pub sent_at: String,
    #[serde(rename = "emisorId")]
    pub sender_id: i64,
    #[serde(rename = "emisorNombre", default)]
    pub sender_name: String,
    #[serde(rename = "emisorEmail", default)]
    pub sender_email: String,
}
