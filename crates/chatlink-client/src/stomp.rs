//! STOMP session over an open socket.
//!
//! [`handshake`] performs CONNECT/CONNECTED under a timeout and spawns the
//! session task, which routes MESSAGE frames, sends heartbeats, and watches
//! for inbound silence. The task's return value is the reason the session
//! ended.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use chatlink_core::codec::{Command, Frame, FrameDecoder, HeartBeat, Inbound};
use chatlink_core::error::{ChatError, ChatResult, ConnectionFailure};

use crate::transport::{Outgoing, Socket, SocketEvent};

/// Session-level settings.
#[derive(Debug, Clone)]
pub struct StompConfig {
    /// Heartbeat periods requested in CONNECT.
    pub heart_beat: HeartBeat,
    /// Time allowed for the CONNECTED reply.
    pub connect_timeout: Duration,
}

impl Default for StompConfig {
    fn default() -> Self {
        Self {
            heart_beat: HeartBeat::new(10_000, 10_000),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// A MESSAGE frame, routed by its subscription id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub subscription: String,
    pub destination: String,
    pub body: String,
}

/// Sending half of a live STOMP session. Cheap to clone.
#[derive(Debug, Clone)]
pub struct StompClient {
    outgoing: mpsc::UnboundedSender<Outgoing>,
    /// Shared across sessions so subscription ids never repeat.
    sub_counter: Arc<AtomicU64>,
    receipt_counter: Arc<AtomicU64>,
    alive: Arc<AtomicBool>,
}

impl StompClient {
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire) && !self.outgoing.is_closed()
    }

    /// Send SUBSCRIBE and return the new subscription id.
    pub fn subscribe(&self, destination: &str) -> ChatResult<String> {
        let id = format!("sub-{}", self.sub_counter.fetch_add(1, Ordering::Relaxed));
        self.send(Frame::subscribe(&id, destination))?;
        tracing::debug!(%destination, subscription = %id, "subscribed");
        Ok(id)
    }

    pub fn unsubscribe(&self, id: &str) -> ChatResult<()> {
        self.send(Frame::unsubscribe(id))?;
        tracing::debug!(subscription = %id, "unsubscribed");
        Ok(())
    }

    pub fn publish(&self, destination: &str, body: impl Into<String>) -> ChatResult<()> {
        self.send(Frame::send(destination, body))
    }

    pub fn publish_json<T: Serialize>(&self, destination: &str, payload: &T) -> ChatResult<()> {
        let body = serde_json::to_string(payload)?;
        self.publish(destination, body)
    }

    /// Send DISCONNECT and close the socket. Safe to call more than once.
    pub fn disconnect(&self) {
        if !self.alive.swap(false, Ordering::AcqRel) {
            return;
        }
        let receipt = format!(
            "close-{}",
            self.receipt_counter.fetch_add(1, Ordering::Relaxed)
        );
        let _ = self
            .outgoing
            .send(Outgoing::Text(Frame::disconnect(&receipt).encode()));
        let _ = self.outgoing.send(Outgoing::Close);
    }

    fn send(&self, frame: Frame) -> ChatResult<()> {
        if !self.alive.load(Ordering::Acquire) {
            return Err(ChatError::NotConnected);
        }
        self.outgoing
            .send(Outgoing::Text(frame.encode()))
            .map_err(|_| ChatError::NotConnected)
    }
}

/// An established session: its client and the task driving it.
pub struct StompSession {
    pub client: StompClient,
    pub heart_beat: HeartBeat,
    pub task: JoinHandle<ChatError>,
}

/// Run the STOMP handshake on `socket` and start the session task.
///
/// MESSAGE frames are forwarded to `deliveries`.
pub async fn handshake(
    socket: Socket,
    config: &StompConfig,
    sub_counter: Arc<AtomicU64>,
    deliveries: mpsc::UnboundedSender<Delivery>,
) -> ChatResult<StompSession> {
    let Socket {
        outgoing,
        mut events,
    } = socket;

    outgoing
        .send(Outgoing::Text(Frame::connect(config.heart_beat).encode()))
        .map_err(|_| ChatError::transport("socket closed before CONNECT"))?;

    let mut decoder = FrameDecoder::new();
    let result = time::timeout(
        config.connect_timeout,
        await_connected(&mut events, &mut decoder),
    )
    .await;

    let (server_hb, leftover) = match result {
        Ok(Ok(v)) => v,
        Ok(Err(e)) => {
            let _ = outgoing.send(Outgoing::Close);
            return Err(e);
        }
        Err(_) => {
            let _ = outgoing.send(Outgoing::Close);
            return Err(ConnectionFailure::Timeout.into());
        }
    };

    let heart_beat = HeartBeat::negotiate(config.heart_beat, server_hb);
    tracing::info!(
        outgoing_ms = heart_beat.outgoing_ms,
        incoming_ms = heart_beat.incoming_ms,
        "STOMP session established"
    );

    let alive = Arc::new(AtomicBool::new(true));
    let client = StompClient {
        outgoing: outgoing.clone(),
        sub_counter,
        receipt_counter: Arc::new(AtomicU64::new(0)),
        alive: alive.clone(),
    };

    let task = tokio::spawn(async move {
        let reason = run_session(events, decoder, &outgoing, heart_beat, &deliveries, leftover).await;
        alive.store(false, Ordering::Release);
        let _ = outgoing.send(Outgoing::Close);
        reason
    });

    Ok(StompSession {
        client,
        heart_beat,
        task,
    })
}

/// Wait for CONNECTED. Returns the broker's heartbeat header and any frames
/// that arrived in the same chunk after it.
async fn await_connected(
    events: &mut mpsc::UnboundedReceiver<SocketEvent>,
    decoder: &mut FrameDecoder,
) -> ChatResult<(HeartBeat, Vec<Frame>)> {
    loop {
        let Some(event) = events.recv().await else {
            return Err(ChatError::transport("socket closed during handshake"));
        };
        let text = match event {
            SocketEvent::Text(text) => text,
            SocketEvent::Closed { code, reason } => {
                return Err(ConnectionFailure::Closed { code, reason }.into())
            }
            SocketEvent::Error(e) => return Err(ChatError::transport(e)),
        };

        let items = decoder
            .feed(&text)
            .map_err(|e| ConnectionFailure::HandshakeRejected(e.to_string()))?;
        let mut items = items.into_iter();
        while let Some(item) = items.next() {
            let Inbound::Frame(frame) = item else {
                continue;
            };
            match frame.command {
                Command::Connected => {
                    let hb = match frame.get("heart-beat") {
                        Some(v) => HeartBeat::parse(v)
                            .map_err(|e| ConnectionFailure::HandshakeRejected(e.to_string()))?,
                        None => HeartBeat::default(),
                    };
                    let leftover = items
                        .filter_map(|i| match i {
                            Inbound::Frame(f) => Some(f),
                            Inbound::Heartbeat => None,
                        })
                        .collect();
                    return Ok((hb, leftover));
                }
                Command::Error => {
                    return Err(ConnectionFailure::HandshakeRejected(error_text(&frame)).into())
                }
                other => tracing::debug!(command = other.as_str(), "ignoring frame before CONNECTED"),
            }
        }
    }
}

async fn run_session(
    mut events: mpsc::UnboundedReceiver<SocketEvent>,
    mut decoder: FrameDecoder,
    outgoing: &mpsc::UnboundedSender<Outgoing>,
    heart_beat: HeartBeat,
    deliveries: &mpsc::UnboundedSender<Delivery>,
    leftover: Vec<Frame>,
) -> ChatError {
    for frame in leftover {
        if let Some(reason) = route(frame, deliveries) {
            return reason;
        }
    }

    let mut ticker = (heart_beat.outgoing_ms > 0).then(|| {
        let period = Duration::from_millis(heart_beat.outgoing_ms);
        let mut i = time::interval_at(Instant::now() + period, period);
        i.set_missed_tick_behavior(MissedTickBehavior::Delay);
        i
    });
    let window_ms = heart_beat.incoming_ms.saturating_mul(2);
    let window = (window_ms > 0).then(|| Duration::from_millis(window_ms));
    let mut deadline = window.map(|w| Instant::now() + w);

    loop {
        tokio::select! {
            _ = tick(&mut ticker) => {
                if outgoing.send(Outgoing::Text("\n".into())).is_err() {
                    return ChatError::transport("socket closed");
                }
            }
            _ = expire(deadline) => {
                tracing::warn!(window_ms, "heartbeat window elapsed");
                return ConnectionFailure::HeartbeatTimeout { window_ms }.into();
            }
            event = events.recv() => match event {
                Some(SocketEvent::Text(text)) => {
                    if let Some(w) = window {
                        deadline = Some(Instant::now() + w);
                    }
                    let items = match decoder.feed(&text) {
                        Ok(items) => items,
                        Err(e) => {
                            tracing::warn!(error = %e, "dropping malformed frame");
                            continue;
                        }
                    };
                    for item in items {
                        if let Inbound::Frame(frame) = item {
                            if let Some(reason) = route(frame, deliveries) {
                                return reason;
                            }
                        }
                    }
                }
                Some(SocketEvent::Closed { code, reason }) => {
                    return ConnectionFailure::Closed { code, reason }.into();
                }
                Some(SocketEvent::Error(e)) => return ChatError::transport(e),
                None => return ChatError::transport("socket event stream ended"),
            },
        }
    }
}

/// Route one frame. Returns the session-ending reason for ERROR frames.
fn route(frame: Frame, deliveries: &mpsc::UnboundedSender<Delivery>) -> Option<ChatError> {
    match frame.command {
        Command::Message => {
            let Some(subscription) = frame.get("subscription").map(str::to_string) else {
                tracing::warn!("MESSAGE frame without subscription header");
                return None;
            };
            let destination = frame.get("destination").unwrap_or_default().to_string();
            tracing::debug!(%subscription, %destination, "delivery");
            let _ = deliveries.send(Delivery {
                subscription,
                destination,
                body: frame.body,
            });
            None
        }
        Command::Error => {
            let text = error_text(&frame);
            tracing::error!(error = %text, "broker sent ERROR");
            Some(ConnectionFailure::Broker(text).into())
        }
        Command::Receipt => {
            tracing::debug!(receipt = frame.get("receipt-id").unwrap_or_default(), "receipt");
            None
        }
        other => {
            tracing::debug!(command = other.as_str(), "ignoring frame");
            None
        }
    }
}

fn error_text(frame: &Frame) -> String {
    match frame.get("message") {
        Some(m) if !m.is_empty() => m.to_string(),
        _ => frame.body.clone(),
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(i) => {
            i.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(d) => time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Peer {
        from_client: mpsc::UnboundedReceiver<Outgoing>,
        to_client: mpsc::UnboundedSender<SocketEvent>,
    }

    fn socket_pair() -> (Socket, Peer) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        (
            Socket {
                outgoing: out_tx,
                events: ev_rx,
            },
            Peer {
                from_client: out_rx,
                to_client: ev_tx,
            },
        )
    }

    impl Peer {
        async fn next_text(&mut self) -> String {
            match self.from_client.recv().await {
                Some(Outgoing::Text(t)) => t,
                other => panic!("expected text, got {other:?}"),
            }
        }

        fn send(&self, text: &str) {
            self.to_client
                .send(SocketEvent::Text(text.to_string()))
                .unwrap();
        }
    }

    fn config() -> StompConfig {
        StompConfig {
            heart_beat: HeartBeat::new(1000, 1000),
            connect_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn handshake_then_message_routing() {
        let (socket, mut peer) = socket_pair();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let broker = tokio::spawn(async move {
            let connect = peer.next_text().await;
            assert!(connect.starts_with("CONNECT\n"));
            peer.send("CONNECTED\nversion:1.2\nheart-beat:0,0\n\n\0");
            peer
        });

        let session = handshake(socket, &config(), Arc::new(AtomicU64::new(0)), tx)
            .await
            .unwrap();
        assert_eq!(session.heart_beat, HeartBeat::new(0, 0));
        let mut peer = broker.await.unwrap();

        let id = session.client.subscribe("/topic/conversacion/1").unwrap();
        assert_eq!(id, "sub-0");
        let sub = peer.next_text().await;
        assert!(sub.contains("destination:/topic/conversacion/1"));

        peer.send("MESSAGE\nsubscription:sub-0\ndestination:/topic/conversacion/1\n\n{}\0");
        let d = rx.recv().await.unwrap();
        assert_eq!(d.subscription, "sub-0");
        assert_eq!(d.body, "{}");
    }

    #[tokio::test]
    async fn error_frame_rejects_handshake() {
        let (socket, mut peer) = socket_pair();
        let (tx, _rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            peer.next_text().await;
            peer.send("ERROR\nmessage:bad credentials\n\n\0");
            peer
        });
        let err = handshake(socket, &config(), Arc::new(AtomicU64::new(0)), tx)
            .await
            .err()
            .unwrap();
        assert_eq!(
            err,
            ChatError::Connection(ConnectionFailure::HandshakeRejected("bad credentials".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_times_out() {
        let (socket, _peer) = socket_pair();
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = handshake(socket, &config(), Arc::new(AtomicU64::new(0)), tx)
            .await
            .err()
            .unwrap();
        assert_eq!(err, ChatError::Connection(ConnectionFailure::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_broker_trips_heartbeat_window() {
        let (socket, mut peer) = socket_pair();
        let (tx, _rx) = mpsc::unbounded_channel();
        let broker = tokio::spawn(async move {
            peer.next_text().await;
            peer.send("CONNECTED\nversion:1.2\nheart-beat:1000,1000\n\n\0");
            peer
        });
        let session = handshake(socket, &config(), Arc::new(AtomicU64::new(0)), tx)
            .await
            .unwrap();
        let _peer = broker.await.unwrap();

        let reason = session.task.await.unwrap();
        assert_eq!(
            reason,
            ChatError::Connection(ConnectionFailure::HeartbeatTimeout { window_ms: 2000 })
        );
        assert!(!session.client.is_alive());
    }

    #[tokio::test(start_paused = true)]
    async fn sends_heartbeats_on_negotiated_period() {
        let (socket, mut peer) = socket_pair();
        let (tx, _rx) = mpsc::unbounded_channel();
        let broker = tokio::spawn(async move {
            peer.next_text().await;
            peer.send("CONNECTED\nversion:1.2\nheart-beat:0,500\n\n\0");
            peer
        });
        let _session = handshake(socket, &config(), Arc::new(AtomicU64::new(0)), tx)
            .await
            .unwrap();
        let mut peer = broker.await.unwrap();

        time::sleep(Duration::from_millis(1001)).await;
        assert_eq!(peer.next_text().await, "\n");
    }

    #[tokio::test]
    async fn send_after_disconnect_is_not_connected() {
        let (socket, mut peer) = socket_pair();
        let (tx, _rx) = mpsc::unbounded_channel();
        let broker = tokio::spawn(async move {
            peer.next_text().await;
            peer.send("CONNECTED\nversion:1.2\n\n\0");
            peer
        });
        let session = handshake(socket, &config(), Arc::new(AtomicU64::new(0)), tx)
            .await
            .unwrap();
        let mut peer = broker.await.unwrap();

        session.client.disconnect();
        session.client.disconnect();
        assert!(peer.next_text().await.starts_with("DISCONNECT\nreceipt:close-0"));
        assert_eq!(peer.from_client.recv().await, Some(Outgoing::Close));
        assert_eq!(
            session.client.publish("/app/chat.typing", "{}"),
            Err(ChatError::NotConnected)
        );
    }
}
