//! `chatlink watch`: print live session events until Ctrl-C or until the
//! connection gives up reconnecting.

use anyhow::{Context, Result};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use chatlink_client::{ChatSession, SessionEvent};

use crate::config::Settings;

pub async fn run(settings: &Settings, open: Option<i64>) -> Result<()> {
    let session = super::open_session(settings)?;
    let mut events = session.events();

    session
        .load_conversations()
        .await
        .context("failed to load conversations")?;
    session
        .connect()
        .await
        .with_context(|| format!("failed to connect to {}", settings.endpoints.socket_url))?;
    println!(
        "connected ({}), watching {} conversation(s)",
        settings.environment,
        session.conversations().len()
    );

    if let Some(id) = open {
        session
            .open_conversation(id)
            .await
            .with_context(|| format!("failed to open conversation {id}"))?;
        info!(conversation_id = id, "conversation open");
    }

    let result = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break Ok(()),
            event = events.recv() => match event {
                Ok(event) => {
                    if let Some(err) = print_event(&session, event) {
                        break Err(err);
                    }
                }
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "event stream lagged"),
                Err(RecvError::Closed) => break Ok(()),
            },
        }
    };

    session.close();
    result
}

/// Print one event. Returns an error when watching cannot continue.
fn print_event(session: &ChatSession, event: SessionEvent) -> Option<anyhow::Error> {
    match event {
        SessionEvent::MessageAppended {
            conversation_id,
            message,
        } => {
            println!(
                "#{conversation_id} {}",
                super::format_message(&message, session.user())
            );
        }
        SessionEvent::TypingChanged {
            conversation_id,
            typing,
        } if !typing.is_empty() => {
            let who: Vec<String> = typing.iter().map(|id| format!("user {id}")).collect();
            println!("#{conversation_id} {} typing...", who.join(", "));
        }
        SessionEvent::ReadReceipt {
            conversation_id,
            reader,
        } if reader != session.user().id => {
            println!("#{conversation_id} read by user {reader}");
        }
        SessionEvent::Connection(status) => println!("connection: {status:?}"),
        SessionEvent::Reconnecting { attempt, delay } => {
            println!("reconnecting (attempt {attempt}, in {}ms)", delay.as_millis());
        }
        SessionEvent::MalformedPayload {
            destination,
            reason,
        } => warn!(%destination, %reason, "ignored malformed payload"),
        SessionEvent::GaveUp(err) => {
            return Some(anyhow::Error::new(err).context("connection lost"));
        }
        _ => {}
    }
    None
}
