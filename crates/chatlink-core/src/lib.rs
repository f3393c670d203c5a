//! chatlink-core: Shared protocol library for the chatlink messaging client.
//!
//! Provides STOMP 1.2 text framing, the chat backend's JSON wire types and
//! destinations, and the conversation/message domain model. No I/O.

pub mod codec;
pub mod error;
pub mod messages;
pub mod model;

// Re-export commonly used items at crate root.
pub use codec::{Command, Frame, FrameDecoder, HeartBeat, Inbound};
pub use error::{ChatError, ChatResult, ConnectionFailure};
pub use messages::{ChannelKey, ChannelKind, NEW_CONVERSATION_CHANNEL};
pub use model::{
    ConversationId, Conversation, ConversationPatch, DecodedMessage, Delivered, DeliveryState,
    Message, MessageId, Participant, Sender, UserId,
};
