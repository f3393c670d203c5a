//! In-memory doubles for the socket and the retrieval API.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use chatlink_core::codec::{Command, Frame, FrameDecoder, Inbound};
use chatlink_core::error::{ChatError, ChatResult};
use chatlink_core::messages::{ConversationSummaryDto, MessageDto, ReadRequest};
use chatlink_core::model::{
    Conversation, ConversationId, DeliveryState, Message, Participant, Sender, UserId,
};

use crate::retrieval::RetrievalApi;
use crate::transport::{BoxFuture, Connector, Outgoing, Socket, SocketEvent};

pub const LOCAL_USER: UserId = 1;

pub fn local_user() -> Participant {
    Participant::new(LOCAL_USER, "Me", "me@example.com")
}

/// Fixed base time plus `minutes`.
pub fn at(minutes: i64) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap()
        + TimeDelta::minutes(minutes)
}

pub fn message(id: i64, sender: UserId, content: &str) -> Message {
    Message {
        id,
        sender: Sender::new(sender, format!("user{sender}"), ""),
        content: content.to_string(),
        sent_at: at(id),
        state: DeliveryState::Delivered,
    }
}

pub fn conversation(id: ConversationId, other: UserId, updated_at: NaiveDateTime) -> Conversation {
    Conversation {
        id,
        participants: [local_user(), Participant::new(other, format!("user{other}"), "")],
        title: format!("user{other}"),
        last_message: None,
        unread_count: 0,
        updated_at,
    }
}

pub fn summary(id: ConversationId, other: UserId, minutes: i64) -> ConversationSummaryDto {
    ConversationSummaryDto {
        conversation_id: id,
        other_user_id: other,
        other_user_name: format!("user{other}"),
        other_user_email: String::new(),
        last_message: Some("hello".into()),
        last_message_at: Some(at(minutes).format("%Y-%m-%dT%H:%M:%S").to_string()),
        unread_count: 0,
    }
}

pub fn message_dto(id: i64, sender: UserId) -> MessageDto {
    MessageDto {
        id,
        content: format!("m{id}"),
        read: false,
        sent_at: at(id).format("%Y-%m-%dT%H:%M:%S").to_string(),
        sender_id: sender,
        sender_name: format!("user{sender}"),
        sender_email: String::new(),
    }
}

pub fn message_dtos(ids: std::ops::RangeInclusive<i64>, sender: UserId) -> Vec<MessageDto> {
    ids.map(|id| message_dto(id, sender)).collect()
}

/// JSON body of a message-topic delivery.
pub fn wire_message(id: i64, sender: UserId, content: &str, conversation: ConversationId) -> String {
    serde_json::json!({
        "id": id,
        "contenido": content,
        "leido": false,
        "timestampEnvio": at(id).format("%Y-%m-%dT%H:%M:%S").to_string(),
        "emisor": { "id": sender, "nombre": format!("user{sender}"), "email": "" },
        "conversacion": { "id": conversation },
    })
    .to_string()
}

// ── Fake broker ─────────────────────────────────────────────────────

#[derive(Default)]
struct BrokerLog {
    frames: Vec<Frame>,
    /// subscription id → destination
    subscriptions: HashMap<String, String>,
    subscribe_frames: usize,
    unsubscribed: Vec<String>,
    sent: Vec<(String, String)>,
    closed: bool,
}

struct BrokerInner {
    log: Mutex<BrokerLog>,
    to_client: Mutex<Option<mpsc::UnboundedSender<SocketEvent>>>,
    version: watch::Sender<u64>,
    message_seq: AtomicU64,
}

/// STOMP peer on the far side of a [`MockConnector`] socket.
#[derive(Clone)]
pub struct FakeBroker {
    inner: Arc<BrokerInner>,
}

impl FakeBroker {
    fn spawn(
        mut from_client: mpsc::UnboundedReceiver<Outgoing>,
        to_client: mpsc::UnboundedSender<SocketEvent>,
        heart_beat: String,
    ) -> Self {
        let broker = Self {
            inner: Arc::new(BrokerInner {
                log: Mutex::new(BrokerLog::default()),
                to_client: Mutex::new(Some(to_client)),
                version: watch::channel(0).0,
                message_seq: AtomicU64::new(0),
            }),
        };
        let this = broker.clone();
        tokio::spawn(async move {
            let mut decoder = FrameDecoder::new();
            while let Some(out) = from_client.recv().await {
                let text = match out {
                    Outgoing::Text(text) => text,
                    Outgoing::Close => break,
                };
                let Ok(items) = decoder.feed(&text) else {
                    continue;
                };
                for item in items {
                    if let Inbound::Frame(frame) = item {
                        this.handle(frame, &heart_beat);
                    }
                }
            }
            this.inner.log.lock().closed = true;
            this.bump();
        });
        broker
    }

    fn handle(&self, frame: Frame, heart_beat: &str) {
        {
            let mut log = self.inner.log.lock();
            match frame.command {
                Command::Connect => {
                    self.send_text(format!(
                        "CONNECTED\nversion:1.2\nheart-beat:{heart_beat}\n\n\0"
                    ));
                }
                Command::Subscribe => {
                    if let (Some(id), Some(dest)) = (frame.get("id"), frame.get("destination")) {
                        log.subscriptions.insert(id.to_string(), dest.to_string());
                    }
                    log.subscribe_frames += 1;
                }
                Command::Unsubscribe => {
                    if let Some(id) = frame.get("id") {
                        log.subscriptions.remove(id);
                        log.unsubscribed.push(id.to_string());
                    }
                }
                Command::Send => {
                    let dest = frame.get("destination").unwrap_or_default().to_string();
                    log.sent.push((dest, frame.body.clone()));
                }
                _ => {}
            }
            log.frames.push(frame);
        }
        self.bump();
    }

    fn send_text(&self, text: String) -> bool {
        match self.inner.to_client.lock().as_ref() {
            Some(tx) => tx.send(SocketEvent::Text(text)).is_ok(),
            None => false,
        }
    }

    fn bump(&self) {
        self.inner.version.send_modify(|v| *v += 1);
    }

    async fn wait_until(&self, f: impl Fn(&BrokerLog) -> bool) {
        let mut rx = self.inner.version.subscribe();
        loop {
            if f(&self.inner.log.lock()) {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Deliver `body` to the client's subscription on `destination`.
    /// Returns false when the client is not subscribed to it.
    pub fn publish(&self, destination: &str, body: &str) -> bool {
        let id = {
            let log = self.inner.log.lock();
            log.subscriptions
                .iter()
                .find(|(_, d)| d.as_str() == destination)
                .map(|(id, _)| id.clone())
        };
        let Some(id) = id else {
            return false;
        };
        let seq = self.inner.message_seq.fetch_add(1, Ordering::Relaxed);
        let frame = Frame::new(Command::Message)
            .header("subscription", id)
            .header("destination", destination)
            .header("message-id", seq.to_string())
            .with_body(body);
        self.send_text(frame.encode())
    }

    /// Send raw text to the client.
    pub fn send_raw(&self, text: &str) -> bool {
        self.send_text(text.to_string())
    }

    /// Simulate the network dropping: the client's event stream ends.
    pub fn drop_connection(&self) {
        self.inner.to_client.lock().take();
    }

    /// Encoded frames received from the client, heartbeats excluded.
    pub fn frames(&self) -> Vec<String> {
        self.inner.log.lock().frames.iter().map(Frame::encode).collect()
    }

    /// Destinations with a live subscription, sorted.
    pub fn subscriptions(&self) -> Vec<String> {
        let mut out: Vec<String> = self.inner.log.lock().subscriptions.values().cloned().collect();
        out.sort();
        out
    }

    pub fn subscribe_frames(&self) -> usize {
        self.inner.log.lock().subscribe_frames
    }

    /// Bodies SENT to `destination`.
    pub fn sent_to(&self, destination: &str) -> Vec<String> {
        self.inner
            .log
            .lock()
            .sent
            .iter()
            .filter(|(d, _)| d == destination)
            .map(|(_, b)| b.clone())
            .collect()
    }

    pub async fn closed(&self) {
        self.wait_until(|log| log.closed).await;
    }

    pub async fn wait_for_subscription(&self, destination: &str) {
        self.wait_until(|log| log.subscriptions.values().any(|d| d == destination))
            .await;
    }

    pub async fn wait_for_subscriptions(&self, count: usize) {
        self.wait_until(|log| log.subscriptions.len() >= count).await;
    }

    pub async fn wait_for_unsubscribe(&self, id: &str) {
        self.wait_until(|log| log.unsubscribed.iter().any(|u| u == id))
            .await;
    }

    pub async fn wait_for_sent(&self, destination: &str, count: usize) -> Vec<String> {
        self.wait_until(|log| log.sent.iter().filter(|(d, _)| d == destination).count() >= count)
            .await;
        self.sent_to(destination)
    }
}

// ── Mock connector ──────────────────────────────────────────────────

/// Connector whose sockets lead to [`FakeBroker`]s.
pub struct MockConnector {
    opens: AtomicUsize,
    refuse: AtomicBool,
    server_heart_beat: Mutex<String>,
    brokers: Mutex<Vec<FakeBroker>>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            opens: AtomicUsize::new(0),
            refuse: AtomicBool::new(false),
            server_heart_beat: Mutex::new("0,0".into()),
            brokers: Mutex::new(Vec::new()),
        })
    }

    /// Make subsequent opens fail with a transport error.
    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Heart-beat header value the broker puts in CONNECTED.
    pub fn set_server_heart_beat(&self, value: &str) {
        *self.server_heart_beat.lock() = value.to_string();
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Broker behind the `index`-th successful open.
    pub fn broker(&self, index: usize) -> FakeBroker {
        self.brokers.lock()[index].clone()
    }

    pub fn latest_broker(&self) -> FakeBroker {
        let brokers = self.brokers.lock();
        brokers[brokers.len() - 1].clone()
    }

    pub fn broker_count(&self) -> usize {
        self.brokers.lock().len()
    }
}

impl Connector for MockConnector {
    fn open<'a>(&'a self, _url: &'a str) -> BoxFuture<'a, ChatResult<Socket>> {
        Box::pin(async move {
            self.opens.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.refuse.load(Ordering::SeqCst) {
                return Err(ChatError::transport("connection refused"));
            }
            let (out_tx, out_rx) = mpsc::unbounded_channel();
            let (ev_tx, ev_rx) = mpsc::unbounded_channel();
            let hb = self.server_heart_beat.lock().clone();
            let broker = FakeBroker::spawn(out_rx, ev_tx, hb);
            self.brokers.lock().push(broker);
            Ok(Socket {
                outgoing: out_tx,
                events: ev_rx,
            })
        })
    }
}

// ── Mock retrieval ──────────────────────────────────────────────────

#[derive(Default)]
pub struct MockRetrieval {
    summaries: Mutex<Vec<ConversationSummaryDto>>,
    recent: Mutex<HashMap<ConversationId, Vec<MessageDto>>>,
    pages: Mutex<HashMap<(ConversationId, u32), Vec<MessageDto>>>,
    summary_delay: Mutex<Duration>,
    page_delay: Mutex<Duration>,
    fail_summaries: AtomicBool,
    summary_calls: AtomicUsize,
    page_requests: Mutex<Vec<(ConversationId, u32, usize)>>,
    mark_read_requests: Mutex<Vec<ReadRequest>>,
}

impl MockRetrieval {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_summaries(&self, summaries: Vec<ConversationSummaryDto>) {
        *self.summaries.lock() = summaries;
    }

    pub fn set_recent(&self, conversation_id: ConversationId, messages: Vec<MessageDto>) {
        self.recent.lock().insert(conversation_id, messages);
    }

    pub fn set_page(&self, conversation_id: ConversationId, page: u32, messages: Vec<MessageDto>) {
        self.pages.lock().insert((conversation_id, page), messages);
    }

    pub fn set_summary_delay(&self, delay: Duration) {
        *self.summary_delay.lock() = delay;
    }

    pub fn set_page_delay(&self, delay: Duration) {
        *self.page_delay.lock() = delay;
    }

    pub fn set_fail_summaries(&self, fail: bool) {
        self.fail_summaries.store(fail, Ordering::SeqCst);
    }

    pub fn summary_calls(&self) -> usize {
        self.summary_calls.load(Ordering::SeqCst)
    }

    pub fn page_requests(&self) -> Vec<(ConversationId, u32, usize)> {
        self.page_requests.lock().clone()
    }

    pub fn mark_read_requests(&self) -> Vec<ReadRequest> {
        self.mark_read_requests.lock().clone()
    }
}

impl RetrievalApi for MockRetrieval {
    fn conversation_summaries(
        &self,
        _user_id: UserId,
    ) -> BoxFuture<'_, ChatResult<Vec<ConversationSummaryDto>>> {
        Box::pin(async move {
            self.summary_calls.fetch_add(1, Ordering::SeqCst);
            let delay = *self.summary_delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if self.fail_summaries.load(Ordering::SeqCst) {
                return Err(ChatError::Retrieval("backend unavailable".into()));
            }
            Ok(self.summaries.lock().clone())
        })
    }

    fn recent_messages(
        &self,
        conversation_id: ConversationId,
    ) -> BoxFuture<'_, ChatResult<Vec<MessageDto>>> {
        Box::pin(async move {
            Ok(self
                .recent
                .lock()
                .get(&conversation_id)
                .cloned()
                .unwrap_or_default())
        })
    }

    fn message_page(
        &self,
        conversation_id: ConversationId,
        page: u32,
        size: usize,
    ) -> BoxFuture<'_, ChatResult<Vec<MessageDto>>> {
        Box::pin(async move {
            self.page_requests.lock().push((conversation_id, page, size));
            let delay = *self.page_delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok(self
                .pages
                .lock()
                .get(&(conversation_id, page))
                .cloned()
                .unwrap_or_default())
        })
    }

    fn mark_read(&self, request: ReadRequest) -> BoxFuture<'_, ChatResult<()>> {
        Box::pin(async move {
            self.mark_read_requests.lock().push(request);
            Ok(())
        })
    }
}
