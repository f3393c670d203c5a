//! Chat session orchestrator.
//!
//! A `ChatSession` composes the connection manager, the subscription
//! registry, the message log and the conversation directory. It resubscribes
//! every known conversation whenever the connection comes up, applies inbound
//! deliveries to the caches, and exposes the actions the UI layer calls.
//!
//! A background pump consumes connection events and MESSAGE deliveries.
//! Handlers and timers only hold weak references, so dropping the last
//! `ChatSession` clone stops everything.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use chatlink_core::error::{ChatError, ChatResult};
use chatlink_core::messages::{
    ChannelKey, ChannelKind, MessageDto, OutgoingMessage, ReadRequest, TypingNotice,
    MARK_READ_DESTINATION, NEW_CONVERSATION_CHANNEL, SEND_MESSAGE_DESTINATION, TYPING_DESTINATION,
};
use chatlink_core::model::{
    Conversation, ConversationId, ConversationPatch, DecodedMessage, Message, Participant, UserId,
};

use crate::config::ClientConfig;
use crate::connection::{ConnectionEvent, ConnectionManager, ConnectionStatus};
use crate::retrieval::RetrievalApi;
use crate::stomp::Delivery;
use crate::store::{ConversationDirectory, FetchedPage, MessageLogStore, PageState};
use crate::subscription::{ChannelPayload, Handler, SubscriptionRegistry};
use crate::timers::{TaskScheduler, TimerKey};

/// Session settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// The local user.
    pub user: Participant,
    pub page_size: usize,
    pub typing_expiry: Duration,
    pub mark_read_debounce: Duration,
}

impl SessionConfig {
    pub fn new(user: Participant) -> Self {
        Self {
            user,
            page_size: crate::store::DEFAULT_PAGE_SIZE,
            typing_expiry: Duration::from_millis(3000),
            mark_read_debounce: Duration::from_millis(100),
        }
    }

    pub fn from_client_config(user: Participant, config: &ClientConfig) -> Self {
        Self {
            user,
            page_size: config.chat.page_size,
            typing_expiry: Duration::from_millis(config.chat.typing_expiry_ms),
            mark_read_debounce: Duration::from_millis(config.chat.mark_read_debounce_ms),
        }
    }
}

/// Subscription lifecycle of one conversation's channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Unsubscribed,
    Subscribing,
    Subscribed,
}

/// Notifications for the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connection(ConnectionStatus),
    Reconnecting {
        attempt: u32,
        delay: Duration,
    },
    /// Automatic reconnection stopped; `connect()` must be called again.
    GaveUp(ChatError),
    DirectoryChanged,
    MessageAppended {
        conversation_id: ConversationId,
        message: Message,
    },
    PageLoaded {
        conversation_id: ConversationId,
        inserted: usize,
        has_more: bool,
    },
    TypingChanged {
        conversation_id: ConversationId,
        typing: Vec<UserId>,
    },
    ReadReceipt {
        conversation_id: ConversationId,
        reader: UserId,
    },
    MalformedPayload {
        destination: String,
        reason: String,
    },
    /// A background directory reload failed.
    ReloadFailed(ChatError),
}

#[derive(Default)]
struct ReloadState {
    running: bool,
    again: bool,
}

#[derive(Default)]
struct SessionState {
    directory: ConversationDirectory,
    log: MessageLogStore,
    active: Option<ConversationId>,
    typing: HashMap<ConversationId, BTreeSet<UserId>>,
    channels: HashMap<ConversationId, ChannelState>,
    /// Bumped whenever subscriptions are invalidated.
    channel_epoch: u64,
    reload: ReloadState,
}

struct SessionInner {
    config: SessionConfig,
    connection: ConnectionManager,
    registry: SubscriptionRegistry,
    retrieval: Arc<dyn RetrievalApi>,
    state: Mutex<SessionState>,
    timers: TaskScheduler<TimerKey>,
    events: broadcast::Sender<SessionEvent>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a chat session. Cheap to clone.
#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<SessionInner>,
}

impl ChatSession {
    /// Bind a session to `connection`.
    ///
    /// A connection serves one session: its delivery stream is taken here.
    pub fn open(
        connection: ConnectionManager,
        retrieval: Arc<dyn RetrievalApi>,
        config: SessionConfig,
    ) -> ChatResult<Self> {
        let deliveries = connection
            .take_deliveries()
            .ok_or_else(|| ChatError::Config("connection is already bound to a session".into()))?;
        let connection_events = connection.events();
        let (events, _) = broadcast::channel(256);

        let inner = Arc::new(SessionInner {
            registry: SubscriptionRegistry::new(connection.clone()),
            state: Mutex::new(SessionState {
                log: MessageLogStore::new(config.page_size),
                ..Default::default()
            }),
            config,
            connection,
            retrieval,
            timers: TaskScheduler::new(),
            events,
            pump: Mutex::new(None),
        });

        let pump = tokio::spawn(pump(Arc::downgrade(&inner), connection_events, deliveries));
        *inner.pump.lock() = Some(pump);

        if inner.connection.is_connected() {
            inner.subscribe_all();
        }

        tracing::debug!(user_id = inner.config.user.id, "chat session opened");
        Ok(Self { inner })
    }

    /// Connect (or join the attempt in flight). Channels are subscribed once
    /// the connection is up.
    pub async fn connect(&self) -> ChatResult<()> {
        self.inner.connection.connect().await
    }

    /// Stop the session: cancel timers, drop subscriptions, disconnect.
    pub fn close(&self) {
        if let Some(pump) = self.inner.pump.lock().take() {
            pump.abort();
        }
        self.inner.timers.cancel_all();
        self.inner.registry.unsubscribe_all();
        self.inner.connection.disconnect();
        self.inner.reset_channels();
        tracing::debug!("chat session closed");
    }

    /// Fetch conversation summaries and replace the directory.
    pub async fn load_conversations(&self) -> ChatResult<Vec<Conversation>> {
        self.inner.reload_directory().await?;
        Ok(self.conversations())
    }

    /// Make `conversation_id` the active conversation, load its latest page
    /// if needed, and mark it read.
    pub async fn open_conversation(&self, conversation_id: ConversationId) -> ChatResult<()> {
        validate_conversation_id(conversation_id)?;
        self.set_active_conversation(Some(conversation_id));
        let loaded = self.inner.state.lock().log.is_loaded(conversation_id);
        if !loaded {
            self.load_messages(conversation_id).await?;
        }
        self.inner.mark_read(conversation_id).await
    }

    pub fn set_active_conversation(&self, conversation_id: Option<ConversationId>) {
        self.inner.state.lock().active = conversation_id;
    }

    /// Load the most recent page, replacing the conversation's log.
    pub async fn load_messages(&self, conversation_id: ConversationId) -> ChatResult<usize> {
        validate_conversation_id(conversation_id)?;
        let page = self.inner.retrieval.recent_messages(conversation_id).await?;
        let page = convert_page(conversation_id, page);
        let count = page.messages.len();
        let has_more = {
            let mut st = self.inner.state.lock();
            st.log.load_initial(conversation_id, page);
            st.log.has_more(conversation_id)
        };
        tracing::debug!(conversation_id, count, has_more, "loaded latest messages");
        self.inner.emit(SessionEvent::PageLoaded {
            conversation_id,
            inserted: count,
            has_more,
        });
        Ok(count)
    }

    /// Fetch the next older page. Returns how many messages were inserted;
    /// 0 without fetching when no older pages remain or a fetch is running.
    pub async fn load_older_messages(&self, conversation_id: ConversationId) -> ChatResult<usize> {
        let (page, size) = {
            let mut st = self.inner.state.lock();
            if !st.log.begin_page_load(conversation_id) {
                return Ok(0);
            }
            (st.log.next_page(conversation_id), st.log.page_size())
        };

        let fetched = self
            .inner
            .retrieval
            .message_page(conversation_id, page, size)
            .await;
        let fetched = match fetched {
            Ok(f) => f,
            Err(e) => {
                self.inner.state.lock().log.finish_page_load(conversation_id);
                return Err(e);
            }
        };

        let fetched = convert_page(conversation_id, fetched);
        let (inserted, has_more) = {
            let mut st = self.inner.state.lock();
            let inserted = st.log.merge_page(conversation_id, page, fetched);
            st.log.finish_page_load(conversation_id);
            (inserted, st.log.has_more(conversation_id))
        };
        tracing::debug!(conversation_id, page, inserted, has_more, "loaded older page");
        self.inner.emit(SessionEvent::PageLoaded {
            conversation_id,
            inserted,
            has_more,
        });
        Ok(inserted)
    }

    /// Publish a chat message. Never queued: fails with `NotConnected`
    /// while the connection is down.
    pub fn send_message(&self, conversation_id: ConversationId, content: &str) -> ChatResult<()> {
        validate_conversation_id(conversation_id)?;
        let content = content.trim();
        if content.is_empty() {
            return Err(ChatError::InvalidMessage("message content is empty".into()));
        }
        let client = self.inner.connection.client().ok_or(ChatError::NotConnected)?;
        client.publish_json(
            SEND_MESSAGE_DESTINATION,
            &OutgoingMessage {
                conversation_id,
                sender_id: self.inner.config.user.id,
                content: content.to_string(),
            },
        )?;
        tracing::debug!(conversation_id, "message sent");
        Ok(())
    }

    /// Mark the conversation read; falls back to the retrieval API when the
    /// connection is down.
    pub async fn mark_read(&self, conversation_id: ConversationId) -> ChatResult<()> {
        validate_conversation_id(conversation_id)?;
        self.inner.mark_read(conversation_id).await
    }

    pub fn notify_typing(&self, conversation_id: ConversationId) -> ChatResult<()> {
        validate_conversation_id(conversation_id)?;
        let client = self.inner.connection.client().ok_or(ChatError::NotConnected)?;
        client.publish_json(
            TYPING_DESTINATION,
            &TypingNotice {
                conversation_id,
                user_id: self.inner.config.user.id,
            },
        )
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.inner.connection
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connection.is_connected()
    }

    pub fn user(&self) -> &Participant {
        &self.inner.config.user
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.inner.state.lock().directory.list().to_vec()
    }

    pub fn conversation(&self, conversation_id: ConversationId) -> Option<Conversation> {
        self.inner.state.lock().directory.get(conversation_id).cloned()
    }

    pub fn messages(&self, conversation_id: ConversationId) -> Vec<Message> {
        self.inner.state.lock().log.messages(conversation_id)
    }

    pub fn page_state(&self, conversation_id: ConversationId) -> PageState {
        self.inner.state.lock().log.page_state(conversation_id)
    }

    pub fn typing_users(&self, conversation_id: ConversationId) -> Vec<UserId> {
        self.inner
            .state
            .lock()
            .typing
            .get(&conversation_id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn channel_state(&self, conversation_id: ConversationId) -> ChannelState {
        self.inner
            .state
            .lock()
            .channels
            .get(&conversation_id)
            .copied()
            .unwrap_or(ChannelState::Unsubscribed)
    }

    pub fn active_conversation(&self) -> Option<ConversationId> {
        self.inner.state.lock().active
    }
}

impl SessionInner {
    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn handler(self: &Arc<Self>) -> Handler {
        let weak = Arc::downgrade(self);
        Arc::new(move |key, payload| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_inbound(key, payload);
            }
        })
    }

    fn on_connection_event(self: &Arc<Self>, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected => {
                self.emit(SessionEvent::Connection(ConnectionStatus::Connected));
                self.subscribe_all();
            }
            ConnectionEvent::Disconnected { reason } => {
                if let Some(reason) = &reason {
                    tracing::debug!(error = %reason, "clearing subscriptions after connection loss");
                }
                self.registry.unsubscribe_all();
                self.reset_channels();
                self.emit(SessionEvent::Connection(ConnectionStatus::Disconnected));
            }
            ConnectionEvent::Reconnecting { attempt, delay } => {
                self.emit(SessionEvent::Connection(ConnectionStatus::Connecting));
                self.emit(SessionEvent::Reconnecting { attempt, delay });
            }
            ConnectionEvent::GaveUp { error } => self.emit(SessionEvent::GaveUp(error)),
        }
    }

    /// Rebuild all subscriptions after missed lifecycle events.
    fn resync(self: &Arc<Self>) {
        self.registry.unsubscribe_all();
        self.reset_channels();
        if self.connection.is_connected() {
            self.subscribe_all();
        }
    }

    fn reset_channels(&self) {
        let mut st = self.state.lock();
        st.channel_epoch += 1;
        for state in st.channels.values_mut() {
            *state = ChannelState::Unsubscribed;
        }
    }

    fn subscribe_all(self: &Arc<Self>) {
        let ids = self.state.lock().directory.ids();
        if let Err(e) = self
            .registry
            .subscribe(ChannelKey::new_conversations(), self.handler())
        {
            tracing::warn!(error = %e, "failed to subscribe to new-conversation channel");
        }
        for id in ids {
            self.subscribe_conversation(id);
        }
    }

    fn subscribe_conversation(self: &Arc<Self>, conversation_id: ConversationId) {
        let Some(epoch) = self.begin_subscribe(conversation_id) else {
            return;
        };

        let mut result = Ok(());
        for kind in ChannelKind::ALL {
            if let Err(e) = self
                .registry
                .subscribe(ChannelKey::new(kind, conversation_id), self.handler())
            {
                result = Err(e);
                break;
            }
        }

        self.finish_subscribe(conversation_id, epoch, result);
    }

    /// Claim `conversation_id` for subscribing. Returns the channel epoch the
    /// claim belongs to, or `None` if it is already subscribed or in progress.
    fn begin_subscribe(&self, conversation_id: ConversationId) -> Option<u64> {
        let mut st = self.state.lock();
        let epoch = st.channel_epoch;
        let entry = st
            .channels
            .entry(conversation_id)
            .or_insert(ChannelState::Unsubscribed);
        if *entry != ChannelState::Unsubscribed {
            return None;
        }
        *entry = ChannelState::Subscribing;
        Some(epoch)
    }

    /// Record the outcome of a claim. A claim from an older epoch was already
    /// reset by a disconnect and must not mark the channels live.
    fn finish_subscribe(&self, conversation_id: ConversationId, epoch: u64, result: ChatResult<()>) {
        let mut st = self.state.lock();
        if st.channel_epoch != epoch {
            tracing::debug!(conversation_id, "subscription outcome from a previous connection ignored");
            return;
        }
        let state = match result {
            Ok(()) => ChannelState::Subscribed,
            Err(e) => {
                tracing::warn!(conversation_id, error = %e, "failed to subscribe conversation");
                ChannelState::Unsubscribed
            }
        };
        st.channels.insert(conversation_id, state);
    }

    fn on_delivery(&self, delivery: &Delivery) {
        match self.registry.dispatch(delivery) {
            Ok(_) => {}
            Err(ChatError::MalformedPayload {
                destination,
                reason,
            }) => {
                tracing::warn!(%destination, %reason, "dropping malformed payload");
                self.emit(SessionEvent::MalformedPayload {
                    destination,
                    reason,
                });
            }
            Err(e) => tracing::warn!(error = %e, "dispatch failed"),
        }
    }

    fn handle_inbound(self: &Arc<Self>, key: ChannelKey, payload: ChannelPayload) {
        match payload {
            ChannelPayload::Message(delivered) => {
                let conversation_id = if key.conversation_id == NEW_CONVERSATION_CHANNEL {
                    match delivered.conversation_id {
                        Some(id) => id,
                        None => {
                            tracing::debug!("new-conversation announcement without id");
                            self.request_reload();
                            return;
                        }
                    }
                } else {
                    key.conversation_id
                };
                self.on_message(conversation_id, delivered.message);
            }
            ChannelPayload::Typing(user_id) => self.on_typing(key.conversation_id, user_id),
            ChannelPayload::ReadReceipt(reader) => self.on_read_receipt(key.conversation_id, reader),
        }
    }

    fn on_message(self: &Arc<Self>, conversation_id: ConversationId, decoded: DecodedMessage) {
        if decoded.is_degraded() {
            tracing::warn!(
                conversation_id,
                message_id = decoded.message().id,
                "message without sender, showing as unknown"
            );
        }
        let me = self.config.user.id;

        let (message, known, from_other, active) = {
            let mut st = self.state.lock();
            let outcome = st.log.append(conversation_id, decoded.into_message());
            if outcome.is_duplicate() {
                tracing::debug!(conversation_id, message_id = outcome.message().id, "duplicate delivery");
                return;
            }
            let message = outcome.message().clone();
            let known = st.directory.contains(conversation_id);
            let from_other = message.sender.id != me;
            let active = st.active == Some(conversation_id);
            if known {
                st.directory
                    .upsert(conversation_id, ConversationPatch::last_message(&message));
                if from_other && !active {
                    st.directory.increment_unread(conversation_id);
                }
            }
            (message, known, from_other, active)
        };

        tracing::debug!(conversation_id, message_id = message.id, "message appended");
        self.emit(SessionEvent::MessageAppended {
            conversation_id,
            message,
        });

        if known {
            self.emit(SessionEvent::DirectoryChanged);
        } else {
            tracing::info!(conversation_id, "message for unknown conversation, reloading directory");
            self.request_reload();
        }

        if from_other && active {
            self.schedule_mark_read(conversation_id);
        }
    }

    fn on_typing(self: &Arc<Self>, conversation_id: ConversationId, user_id: UserId) {
        if user_id == self.config.user.id {
            return;
        }
        let typing: Vec<UserId> = {
            let mut st = self.state.lock();
            let set = st.typing.entry(conversation_id).or_default();
            set.insert(user_id);
            set.iter().copied().collect()
        };
        self.emit(SessionEvent::TypingChanged {
            conversation_id,
            typing,
        });

        let weak = Arc::downgrade(self);
        self.timers.schedule(
            TimerKey::Typing(conversation_id, user_id),
            self.config.typing_expiry,
            async move {
                if let Some(inner) = weak.upgrade() {
                    inner.expire_typing(conversation_id, user_id);
                }
            },
        );
    }

    fn expire_typing(&self, conversation_id: ConversationId, user_id: UserId) {
        let typing: Option<Vec<UserId>> = {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            match st.typing.get_mut(&conversation_id) {
                Some(set) if set.contains(&user_id) => {
                    set.remove(&user_id);
                    let remaining: Vec<UserId> = set.iter().copied().collect();
                    if remaining.is_empty() {
                        st.typing.remove(&conversation_id);
                    }
                    Some(remaining)
                }
                _ => None,
            }
        };
        if let Some(typing) = typing {
            self.emit(SessionEvent::TypingChanged {
                conversation_id,
                typing,
            });
        }
    }

    fn on_read_receipt(&self, conversation_id: ConversationId, reader: UserId) {
        let (changed, cleared) = {
            let mut st = self.state.lock();
            let changed = st.log.mark_read_by(conversation_id, reader);
            // our own receipt, possibly from another device
            let cleared = reader == self.config.user.id && st.directory.mark_read(conversation_id);
            (changed, cleared)
        };
        tracing::debug!(conversation_id, reader, changed, "read receipt");
        self.emit(SessionEvent::ReadReceipt {
            conversation_id,
            reader,
        });
        if cleared {
            self.emit(SessionEvent::DirectoryChanged);
        }
    }

    fn schedule_mark_read(self: &Arc<Self>, conversation_id: ConversationId) {
        let weak = Arc::downgrade(self);
        self.timers.schedule(
            TimerKey::MarkRead(conversation_id),
            self.config.mark_read_debounce,
            async move {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if let Err(e) = inner.mark_read(conversation_id).await {
                    tracing::warn!(conversation_id, error = %e, "mark read failed");
                }
            },
        );
    }

    async fn mark_read(&self, conversation_id: ConversationId) -> ChatResult<()> {
        let request = ReadRequest {
            conversation_id,
            user_id: self.config.user.id,
        };
        let published = match self.connection.client() {
            Some(client) => client.publish_json(MARK_READ_DESTINATION, &request).is_ok(),
            None => false,
        };
        if !published {
            tracing::debug!(conversation_id, "socket down, marking read over the retrieval API");
            self.retrieval.mark_read(request).await?;
        }

        let cleared = self.state.lock().directory.mark_read(conversation_id);
        if cleared {
            self.emit(SessionEvent::DirectoryChanged);
        }
        Ok(())
    }

    /// Reload the directory in the background. Triggers during a running
    /// reload collapse into a single follow-up.
    fn request_reload(self: &Arc<Self>) {
        {
            let mut st = self.state.lock();
            if st.reload.running {
                st.reload.again = true;
                return;
            }
            st.reload.running = true;
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                if let Err(e) = this.reload_directory().await {
                    tracing::warn!(error = %e, "directory reload failed");
                    this.emit(SessionEvent::ReloadFailed(e));
                }
                let again = {
                    let mut st = this.state.lock();
                    if st.reload.again {
                        st.reload.again = false;
                        true
                    } else {
                        st.reload.running = false;
                        false
                    }
                };
                if !again {
                    break;
                }
            }
        });
    }

    async fn reload_directory(self: &Arc<Self>) -> ChatResult<()> {
        let summaries = self
            .retrieval
            .conversation_summaries(self.config.user.id)
            .await?;

        let conversations: Vec<Conversation> = summaries
            .into_iter()
            .filter_map(|dto| {
                let id = dto.conversation_id;
                match Conversation::from_summary(dto, &self.config.user) {
                    Ok(c) => Some(c),
                    Err(e) => {
                        tracing::warn!(conversation_id = id, error = %e, "skipping conversation summary");
                        None
                    }
                }
            })
            .collect();

        let (ids, added) = {
            let mut st = self.state.lock();
            let before: HashSet<ConversationId> = st.directory.ids().into_iter().collect();
            st.directory.replace_all(conversations);
            let ids = st.directory.ids();
            let added = ids.iter().filter(|id| !before.contains(id)).count();
            (ids, added)
        };
        tracing::debug!(count = ids.len(), added, "directory loaded");
        self.emit(SessionEvent::DirectoryChanged);

        if self.connection.is_connected() {
            for id in ids {
                self.subscribe_conversation(id);
            }
        }
        Ok(())
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.get_mut().take() {
            pump.abort();
        }
    }
}

async fn pump(
    inner: Weak<SessionInner>,
    mut connection_events: broadcast::Receiver<ConnectionEvent>,
    mut deliveries: mpsc::UnboundedReceiver<Delivery>,
) {
    loop {
        tokio::select! {
            biased;
            event = connection_events.recv() => {
                let Some(inner) = inner.upgrade() else { return };
                match event {
                    Ok(event) => inner.on_connection_event(event),
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "missed connection events, resyncing");
                        inner.resync();
                    }
                    Err(RecvError::Closed) => return,
                }
            }
            delivery = deliveries.recv() => {
                let Some(delivery) = delivery else { return };
                let Some(inner) = inner.upgrade() else { return };
                inner.on_delivery(&delivery);
            }
        }
    }
}

fn validate_conversation_id(conversation_id: ConversationId) -> ChatResult<()> {
    if conversation_id <= 0 {
        return Err(ChatError::InvalidMessage(format!(
            "invalid conversation id: {conversation_id}"
        )));
    }
    Ok(())
}

/// Convert a retrieval page, skipping rows that fail to convert. The
/// returned page still counts every fetched row.
fn convert_page(conversation_id: ConversationId, page: Vec<MessageDto>) -> FetchedPage {
    let fetched = page.len();
    let messages = page
        .into_iter()
        .filter_map(|dto| {
            let id = dto.id;
            match Message::try_from(dto) {
                Ok(m) => Some(m),
                Err(e) => {
                    tracing::warn!(conversation_id, message_id = id, error = %e, "skipping message");
                    None
                }
            }
        })
        .collect();
    FetchedPage { messages, fetched }
}
