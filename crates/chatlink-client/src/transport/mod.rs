//! Transport socket adapter.
//!
//! A [`Connector`] opens a [`Socket`]: a pair of channels carrying text
//! frames out and socket events in. The connection manager only ever sees
//! this shape, so tests substitute an in-memory connector.

pub mod websocket;

pub use websocket::WebSocketConnector;

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use chatlink_core::error::{ChatError, ChatResult};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Frames the client writes to the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Text(String),
    Close,
}

/// Events surfaced by the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Text(String),
    Closed { code: u16, reason: String },
    Error(String),
}

/// An open socket. Dropping `outgoing` closes the socket.
pub struct Socket {
    pub outgoing: mpsc::UnboundedSender<Outgoing>,
    pub events: mpsc::UnboundedReceiver<SocketEvent>,
}

/// Opens physical sockets.
pub trait Connector: Send + Sync + 'static {
    fn open<'a>(&'a self, url: &'a str) -> BoxFuture<'a, ChatResult<Socket>>;
}

/// Reject URLs that are not `ws://` or `wss://`.
pub fn validate_socket_url(url: &str) -> ChatResult<()> {
    let lower = url.to_lowercase();
    if lower.starts_with("ws://") || lower.starts_with("wss://") {
        Ok(())
    } else {
        Err(ChatError::Config(format!(
            "unsupported socket URL scheme: {url} (expected ws:// or wss://)"
        )))
    }
}
