//! `chatlink conversations`: list the user's conversations.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use chatlink_core::Conversation;

use crate::config::Settings;

#[derive(Serialize)]
struct Row<'a> {
    id: i64,
    with: &'a str,
    unread: u32,
    last_message: Option<&'a str>,
    updated_at: String,
}

impl<'a> From<&'a Conversation> for Row<'a> {
    fn from(c: &'a Conversation) -> Self {
        Self {
            id: c.id,
            with: &c.title,
            unread: c.unread_count,
            last_message: c.last_message.as_ref().map(|m| m.content.as_str()),
            updated_at: c.updated_at.format("%Y-%m-%d %H:%M").to_string(),
        }
    }
}

pub async fn run(settings: &Settings, json: bool) -> Result<()> {
    let session = super::open_session(settings)?;
    let conversations = session
        .load_conversations()
        .await
        .context("failed to load conversations")?;
    info!(count = conversations.len(), "loaded conversations");

    let rows: Vec<Row<'_>> = conversations.iter().map(Row::from).collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("No conversations.");
        return Ok(());
    }
    println!("{:<8} {:<20} {:>6}  {:<16}  {}", "ID", "WITH", "UNREAD", "UPDATED", "LAST");
    for row in &rows {
        println!(
            "{:<8} {:<20} {:>6}  {:<16}  {}",
            row.id,
            row.with,
            row.unread,
            row.updated_at,
            row.last_message.unwrap_or("")
        );
    }
    Ok(())
}
