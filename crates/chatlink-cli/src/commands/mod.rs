//! CLI subcommand implementations.

pub mod conversations;
pub mod history;
pub mod send;
pub mod watch;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use chatlink_client::{ChatSession, ConnectionManager, HttpRetrievalApi, SessionConfig, WebSocketConnector};
use chatlink_core::{Message, Participant};

use crate::config::Settings;

const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Session wired to the selected environment. Not yet connected.
pub fn open_session(settings: &Settings) -> Result<ChatSession> {
    let connection = ConnectionManager::new(
        Arc::new(WebSocketConnector::new()),
        settings.client.connection_config(&settings.endpoints.socket_url),
    );
    let retrieval = Arc::new(HttpRetrievalApi::with_timeout(
        settings.endpoints.base_url.clone(),
        HTTP_TIMEOUT,
    ));
    let config = SessionConfig::from_client_config(settings.user.clone(), &settings.client);
    ChatSession::open(connection, retrieval, config).map_err(anyhow::Error::new)
}

/// `[2024-01-01 10:15] alice: hello`
pub fn format_message(message: &Message, me: &Participant) -> String {
    let who = if message.sender.id == me.id {
        "me".to_string()
    } else if message.sender.is_unknown() {
        "?".to_string()
    } else {
        message.sender.name.clone()
    };
    format!(
        "[{}] {who}: {}",
        message.sent_at.format("%Y-%m-%d %H:%M"),
        message.content
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatlink_core::{DeliveryState, Sender};

    fn msg(sender: Sender) -> Message {
        Message {
            id: 1,
            sender,
            content: "hola".into(),
            sent_at: "2024-03-05T10:15:00".parse().unwrap(),
            state: DeliveryState::Delivered,
        }
    }

    #[test]
    fn formats_sender_names() {
        let me = Participant::new(1, "alice", "");
        assert_eq!(
            format_message(&msg(Sender::new(2, "bob", "")), &me),
            "[2024-03-05 10:15] bob: hola"
        );
        assert_eq!(
            format_message(&msg(Sender::new(1, "alice", "")), &me),
            "[2024-03-05 10:15] me: hola"
        );
        assert_eq!(
            format_message(&msg(Sender::unknown()), &me),
            "[2024-03-05 10:15] ?: hola"
        );
    }
}
