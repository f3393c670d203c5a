//! `chatlink send <id> <text...>`: publish one message and disconnect.

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::Settings;

/// Time allowed for the socket to flush before the process exits.
const FLUSH_GRACE: Duration = Duration::from_millis(250);

pub async fn run(settings: &Settings, conversation_id: i64, text: &str) -> Result<()> {
    let session = super::open_session(settings)?;
    session
        .connect()
        .await
        .with_context(|| format!("failed to connect to {}", settings.endpoints.socket_url))?;

    let sent = session.send_message(conversation_id, text);
    session.close();
    sent.with_context(|| format!("failed to send to conversation {conversation_id}"))?;

    tokio::time::sleep(FLUSH_GRACE).await;
    info!(conversation_id, "message sent");
    Ok(())
}
