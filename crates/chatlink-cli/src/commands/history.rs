//! `chatlink history <id>`: print a conversation's messages, oldest first.

use anyhow::{Context, Result};
use tracing::debug;

use crate::config::Settings;

pub async fn run(settings: &Settings, conversation_id: i64, pages: u32) -> Result<()> {
    if pages == 0 {
        anyhow::bail!("--pages must be at least 1");
    }
    let session = super::open_session(settings)?;
    session
        .load_messages(conversation_id)
        .await
        .with_context(|| format!("failed to load conversation {conversation_id}"))?;

    for _ in 1..pages {
        if !session.page_state(conversation_id).has_more {
            break;
        }
        let inserted = session
            .load_older_messages(conversation_id)
            .await
            .with_context(|| format!("failed to load older messages of {conversation_id}"))?;
        debug!(conversation_id, inserted, "fetched older page");
    }

    let messages = session.messages(conversation_id);
    if messages.is_empty() {
        println!("No messages.");
        return Ok(());
    }
    for message in &messages {
        println!("{}", super::format_message(message, session.user()));
    }
    if session.page_state(conversation_id).has_more {
        println!("(older messages available, use --pages)");
    }
    Ok(())
}
