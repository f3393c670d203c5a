//! chatlink-client: async client engine for the chatlink messaging backend.
//!
//! Keeps one STOMP-over-WebSocket connection alive with bounded reconnects,
//! routes broker deliveries to per-conversation channels, and maintains the
//! conversation directory and per-conversation message logs.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use chatlink_client::{
//!     ChatSession, ConnectionConfig, ConnectionManager, HttpRetrievalApi, SessionConfig,
//!     WebSocketConnector,
//! };
//! use chatlink_core::Participant;
//!
//! # async fn example() -> chatlink_core::ChatResult<()> {
//! let connection = ConnectionManager::new(
//!     Arc::new(WebSocketConnector::new()),
//!     ConnectionConfig::new("ws://localhost:8080/ws"),
//! );
//! let retrieval = Arc::new(HttpRetrievalApi::new("http://localhost:8080"));
//! let me = Participant::new(1, "alice", "alice@example.com");
//!
//! let session = ChatSession::open(connection, retrieval, SessionConfig::new(me))?;
//! session.load_conversations().await?;
//! session.connect().await?;
//!
//! session.open_conversation(42).await?;
//! session.send_message(42, "hello")?;
//!
//! session.close();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod retrieval;
pub mod session;
pub mod stomp;
pub mod store;
pub mod subscription;
pub mod timers;
pub mod transport;

#[cfg(test)]
mod testing;

// Re-export primary public types.
pub use config::{ClientConfig, Endpoints, Environment};
pub use connection::{ConnectionConfig, ConnectionEvent, ConnectionManager, ConnectionStatus};
pub use retrieval::{HttpRetrievalApi, RetrievalApi};
pub use session::{ChannelState, ChatSession, SessionConfig, SessionEvent};
pub use stomp::{StompClient, StompConfig};
pub use store::{ConversationDirectory, MessageLogStore, PageState};
pub use subscription::{ChannelPayload, SubscriptionHandle, SubscriptionRegistry};
pub use transport::{Connector, WebSocketConnector};

// Re-export chatlink-core error types for convenience.
pub use chatlink_core::{ChatError, ChatResult};
