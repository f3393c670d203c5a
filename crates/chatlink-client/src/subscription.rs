//! Subscription registry.
//!
//! Maps each [`ChannelKey`] to at most one broker subscription and routes
//! deliveries to its handler. Subscribing to a key that is already live
//! returns a handle to the existing subscription; no second SUBSCRIBE frame
//! is sent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use chatlink_core::error::{ChatError, ChatResult};
use chatlink_core::messages::{ChannelKey, ChannelKind};
use chatlink_core::model::{decode_delivery, decode_user_id, Delivered, UserId};

use crate::connection::ConnectionManager;
use crate::stomp::{Delivery, StompClient};

/// Decoded payload of one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelPayload {
    Message(Delivered),
    Typing(UserId),
    ReadReceipt(UserId),
}

pub type Handler = Arc<dyn Fn(ChannelKey, ChannelPayload) + Send + Sync>;

struct Entry {
    id: String,
    handler: Handler,
}

#[derive(Default)]
struct RegistryState {
    by_key: HashMap<ChannelKey, Entry>,
    by_id: HashMap<String, ChannelKey>,
}

impl RegistryState {
    /// Remove `key` only if it is still bound to subscription `id`.
    fn remove_if(&mut self, key: &ChannelKey, id: &str) -> bool {
        if self.by_key.get(key).map(|e| e.id.as_str()) != Some(id) {
            return false;
        }
        self.by_key.remove(key);
        self.by_id.remove(id);
        true
    }
}

#[derive(Clone)]
pub struct SubscriptionRegistry {
    connection: ConnectionManager,
    state: Arc<Mutex<RegistryState>>,
}

impl SubscriptionRegistry {
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            state: Arc::new(Mutex::new(RegistryState::default())),
        }
    }

    /// Subscribe `handler` to `key`.
    ///
    /// If `key` is already live the existing subscription is kept, `handler`
    /// is discarded, and the returned handle refers to the existing one.
    pub fn subscribe(&self, key: ChannelKey, handler: Handler) -> ChatResult<SubscriptionHandle> {
        let client = self.connection.client().ok_or(ChatError::NotConnected)?;
        let mut st = self.state.lock();

        if let Some(entry) = st.by_key.get(&key) {
            tracing::debug!(%key, subscription = %entry.id, "already subscribed");
            return Ok(SubscriptionHandle::new(key, entry.id.clone(), &self.state, client));
        }

        let id = client.subscribe(&key.topic())?;
        st.by_id.insert(id.clone(), key);
        st.by_key.insert(
            key,
            Entry {
                id: id.clone(),
                handler,
            },
        );
        Ok(SubscriptionHandle::new(key, id, &self.state, client))
    }

    /// Decode `delivery` and hand it to its subscription's handler.
    ///
    /// Returns `Ok(false)` for deliveries on subscriptions that are no longer
    /// registered. A payload that fails to decode is a `MalformedPayload`
    /// error and reaches no handler.
    pub fn dispatch(&self, delivery: &Delivery) -> ChatResult<bool> {
        let (key, handler) = {
            let st = self.state.lock();
            let Some(key) = st.by_id.get(&delivery.subscription).copied() else {
                tracing::debug!(subscription = %delivery.subscription, "delivery for removed subscription");
                return Ok(false);
            };
            let Some(entry) = st.by_key.get(&key) else {
                return Ok(false);
            };
            (key, entry.handler.clone())
        };

        let payload = match key.kind {
            ChannelKind::Messages => decode_delivery(&delivery.body).map(ChannelPayload::Message),
            ChannelKind::Typing => decode_user_id(&delivery.body).map(ChannelPayload::Typing),
            ChannelKind::ReadReceipts => {
                decode_user_id(&delivery.body).map(ChannelPayload::ReadReceipt)
            }
        }
        .map_err(|e| ChatError::MalformedPayload {
            destination: delivery.destination.clone(),
            reason: e.to_string(),
        })?;

        handler(key, payload);
        Ok(true)
    }

    /// Forget every subscription. Sends UNSUBSCRIBE for each while the
    /// connection is still up.
    pub fn unsubscribe_all(&self) {
        let drained: Vec<String> = {
            let mut st = self.state.lock();
            st.by_id.clear();
            st.by_key.drain().map(|(_, e)| e.id).collect()
        };
        if drained.is_empty() {
            return;
        }
        tracing::debug!(count = drained.len(), "clearing subscriptions");
        if let Some(client) = self.connection.client() {
            for id in drained {
                let _ = client.unsubscribe(&id);
            }
        }
    }

    pub fn is_subscribed(&self, key: &ChannelKey) -> bool {
        self.state.lock().by_key.contains_key(key)
    }

    pub fn keys(&self) -> Vec<ChannelKey> {
        self.state.lock().by_key.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Capability to cancel one subscription.
///
/// `close` is idempotent. Closing a handle whose subscription was already
/// replaced or cleared is a no-op. Dropping a handle does not unsubscribe.
pub struct SubscriptionHandle {
    key: ChannelKey,
    id: String,
    registry: Weak<Mutex<RegistryState>>,
    client: StompClient,
    closed: AtomicBool,
}

impl SubscriptionHandle {
    fn new(
        key: ChannelKey,
        id: String,
        registry: &Arc<Mutex<RegistryState>>,
        client: StompClient,
    ) -> Self {
        Self {
            key,
            id,
            registry: Arc::downgrade(registry),
            client,
            closed: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> ChannelKey {
        self.key
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Unsubscribe. Returns true only for the call that removed the
    /// subscription.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        if !registry.lock().remove_if(&self.key, &self.id) {
            return false;
        }
        if self.client.is_alive() {
            let _ = self.client.unsubscribe(&self.id);
        }
        true
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("key", &self.key)
            .field("id", &self.id)
            .finish()
    }
}
