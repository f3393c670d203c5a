//! WebSocket implementation of the socket adapter.
//!
//! One pump task per socket owns both halves of the stream: it forwards
//! [`Outgoing`] frames to the sink and turns everything read into
//! [`SocketEvent`]s. The pump exits when the socket closes or when the
//! outgoing sender is dropped.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use chatlink_core::error::{ChatError, ChatResult};

use super::{validate_socket_url, BoxFuture, Connector, Outgoing, Socket, SocketEvent};

/// Close code reported when the stream ends without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;
/// Close code reported for a close frame without a status.
const NO_STATUS: u16 = 1005;

/// Opens `ws://` and `wss://` sockets with tokio-tungstenite.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector {
    _private: (),
}

impl WebSocketConnector {
    pub fn new() -> Self {
        // Fails harmlessly if a provider is already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();
        Self { _private: () }
    }
}

impl Connector for WebSocketConnector {
    fn open<'a>(&'a self, url: &'a str) -> BoxFuture<'a, ChatResult<Socket>> {
        Box::pin(async move {
            validate_socket_url(url)?;
            let (ws, _response) = connect_async(url)
                .await
                .map_err(|e| ChatError::transport(format!("WebSocket connect error: {e}")))?;

            tracing::info!(url, "WebSocket connected");

            let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            tokio::spawn(pump(ws, outgoing_rx, events_tx));

            Ok(Socket {
                outgoing: outgoing_tx,
                events: events_rx,
            })
        })
    }
}

async fn pump(
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    events: mpsc::UnboundedSender<SocketEvent>,
) {
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            out = outgoing.recv() => match out {
                Some(Outgoing::Text(text)) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        let _ = events.send(SocketEvent::Error(format!("WS write error: {e}")));
                        break;
                    }
                }
                Some(Outgoing::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = sink.close().await;
                    tracing::debug!("WebSocket closed by client");
                    break;
                }
            },
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(SocketEvent::Text(text));
                }
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => {
                        let _ = events.send(SocketEvent::Text(text));
                    }
                    Err(_) => tracing::warn!("dropping non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Ping(payload))) => {
                    let _ = sink.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(f) => (u16::from(f.code), f.reason.into_owned()),
                        None => (NO_STATUS, String::new()),
                    };
                    tracing::debug!(code, %reason, "WebSocket close frame received");
                    let _ = events.send(SocketEvent::Closed { code, reason });
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::error!("WebSocket read error: {}", e);
                    let _ = events.send(SocketEvent::Error(e.to_string()));
                    break;
                }
                None => {
                    let _ = events.send(SocketEvent::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason: "stream ended".into(),
                    });
                    break;
                }
            },
        }
    }

    tracing::debug!("WebSocket pump ended");
}
