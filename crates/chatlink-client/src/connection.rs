//! Connection manager.
//!
//! Owns the one physical connection. Concurrent `connect()` calls join a
//! single in-flight attempt; an unexpected session end starts a reconnect
//! loop with linear backoff that gives up after a fixed number of attempts.
//!
//! Every `disconnect()` bumps a session generation. Tasks spawned for an
//! older generation notice the mismatch and stand down.

use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::future::{FutureExt, Shared};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time;

use chatlink_core::error::{ChatError, ChatResult, ConnectionFailure};

use crate::stomp::{self, Delivery, StompClient, StompConfig};
use crate::transport::{BoxFuture, Connector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    /// `reason` is `None` after an explicit `disconnect()`.
    Disconnected { reason: Option<ChatError> },
    Reconnecting { attempt: u32, delay: Duration },
    /// Terminal: automatic retries stopped. Call `connect()` to resume.
    GaveUp { error: ChatError },
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub url: String,
    pub stomp: StompConfig,
    /// Delay before attempt `n` is `reconnect_base_delay * n`.
    pub reconnect_base_delay: Duration,
    pub max_reconnect_attempts: u32,
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            stomp: StompConfig::default(),
            reconnect_base_delay: Duration::from_millis(2000),
            max_reconnect_attempts: 5,
        }
    }
}

type ConnectOutcome = Shared<BoxFuture<'static, ChatResult<()>>>;

struct State {
    status: ConnectionStatus,
    generation: u64,
    client: Option<StompClient>,
    pending: Option<ConnectOutcome>,
    attempts: u32,
    connect_task: Option<AbortHandle>,
    session_task: Option<AbortHandle>,
    watcher: Option<JoinHandle<()>>,
    reconnect_task: Option<JoinHandle<()>>,
}

impl State {
    fn abort_tasks(&mut self) {
        for handle in [self.connect_task.take(), self.session_task.take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
        for handle in [self.watcher.take(), self.reconnect_task.take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
    }
}

struct Inner {
    connector: Arc<dyn Connector>,
    config: ConnectionConfig,
    state: Mutex<State>,
    events: broadcast::Sender<ConnectionEvent>,
    deliveries_tx: mpsc::UnboundedSender<Delivery>,
    deliveries_rx: Mutex<Option<mpsc::UnboundedReceiver<Delivery>>>,
    sub_counter: Arc<AtomicU64>,
}

/// Handle to the shared connection. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, config: ConnectionConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        let (deliveries_tx, deliveries_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                connector,
                config,
                state: Mutex::new(State {
                    status: ConnectionStatus::Disconnected,
                    generation: 0,
                    client: None,
                    pending: None,
                    attempts: 0,
                    connect_task: None,
                    session_task: None,
                    watcher: None,
                    reconnect_task: None,
                }),
                events,
                deliveries_tx,
                deliveries_rx: Mutex::new(Some(deliveries_rx)),
                sub_counter: Arc::new(AtomicU64::new(0)),
            }),
        }
    }

    /// Connect, or join the attempt already in flight.
    ///
    /// Resolves once the STOMP handshake completes. Returns immediately if
    /// already connected.
    pub async fn connect(&self) -> ChatResult<()> {
        let outcome = {
            let mut st = self.inner.state.lock();
            if st.status == ConnectionStatus::Connected {
                return Ok(());
            }
            self.inner.begin_connect(&mut st)
        };
        outcome.await
    }

    /// Tear down the session. No-op when already disconnected.
    pub fn disconnect(&self) {
        let (client, was) = {
            let mut st = self.inner.state.lock();
            st.generation += 1;
            st.attempts = 0;
            st.pending = None;
            st.abort_tasks();
            let was = st.status;
            st.status = ConnectionStatus::Disconnected;
            (st.client.take(), was)
        };
        if let Some(client) = client {
            client.disconnect();
        }
        if was != ConnectionStatus::Disconnected {
            tracing::info!("disconnected");
            let _ = self
                .inner
                .events
                .send(ConnectionEvent::Disconnected { reason: None });
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().status == ConnectionStatus::Connected
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.state.lock().status
    }

    /// The live STOMP client, if connected.
    pub fn client(&self) -> Option<StompClient> {
        let st = self.inner.state.lock();
        match st.status {
            ConnectionStatus::Connected => st.client.clone(),
            _ => None,
        }
    }

    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// Take the stream of MESSAGE frames from every session. Yields `None`
    /// after the first call.
    pub fn take_deliveries(&self) -> Option<mpsc::UnboundedReceiver<Delivery>> {
        self.inner.deliveries_rx.lock().take()
    }

    /// Consecutive failed reconnect attempts so far.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.state.lock().attempts
    }

    pub fn url(&self) -> &str {
        &self.inner.config.url
    }
}

impl Inner {
    /// Start an attempt unless one is in flight. Caller holds the state lock.
    fn begin_connect(self: &Arc<Self>, st: &mut State) -> ConnectOutcome {
        if let Some(pending) = &st.pending {
            return pending.clone();
        }
        st.status = ConnectionStatus::Connecting;
        let generation = st.generation;
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.open_session(generation).await });
        st.connect_task = Some(handle.abort_handle());

        let outcome: BoxFuture<'static, ChatResult<()>> = Box::pin(async move {
            match handle.await {
                Ok(result) => result,
                Err(_) => Err(ConnectionFailure::Superseded.into()),
            }
        });
        let shared = outcome.shared();
        st.pending = Some(shared.clone());
        shared
    }

    async fn open_session(self: Arc<Self>, generation: u64) -> ChatResult<()> {
        tracing::debug!(url = %self.config.url, "opening connection");
        let result = async {
            let socket = self.connector.open(&self.config.url).await?;
            stomp::handshake(
                socket,
                &self.config.stomp,
                self.sub_counter.clone(),
                self.deliveries_tx.clone(),
            )
            .await
        }
        .await;

        let mut st = self.state.lock();
        if st.generation != generation {
            if let Ok(session) = result {
                session.client.disconnect();
                session.task.abort();
            }
            return Err(ConnectionFailure::Superseded.into());
        }
        st.pending = None;
        st.connect_task = None;

        match result {
            Ok(session) => {
                st.status = ConnectionStatus::Connected;
                st.attempts = 0;
                st.client = Some(session.client);
                st.session_task = Some(session.task.abort_handle());
                st.watcher = Some(watch(Arc::downgrade(&self), generation, session.task));
                drop(st);
                tracing::info!(url = %self.config.url, "connected");
                let _ = self.events.send(ConnectionEvent::Connected);
                Ok(())
            }
            Err(e) => {
                st.status = ConnectionStatus::Disconnected;
                drop(st);
                tracing::warn!(error = %e, "connect failed");
                Err(e)
            }
        }
    }

    fn on_session_lost(self: &Arc<Self>, generation: u64, reason: ChatError) {
        {
            let mut st = self.state.lock();
            if st.generation != generation || st.status != ConnectionStatus::Connected {
                return;
            }
            st.status = ConnectionStatus::Disconnected;
            st.client = None;
            st.session_task = None;
            st.watcher = None;
        }
        tracing::warn!(error = %reason, "connection lost");
        let _ = self.events.send(ConnectionEvent::Disconnected {
            reason: Some(reason),
        });

        let mut st = self.state.lock();
        if st.generation == generation {
            let weak = Arc::downgrade(self);
            st.reconnect_task = Some(tokio::spawn(reconnect_loop(weak, generation)));
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let st = self.state.get_mut();
        st.abort_tasks();
        if let Some(client) = st.client.take() {
            client.disconnect();
        }
    }
}

fn watch(inner: Weak<Inner>, generation: u64, task: JoinHandle<ChatError>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let reason = match task.await {
            Ok(reason) => reason,
            // Aborted sessions were ended on purpose.
            Err(e) if e.is_cancelled() => return,
            Err(e) => {
                tracing::error!(error = %e, "session task failed");
                ChatError::transport(format!("session task failed: {e}"))
            }
        };
        if let Some(inner) = inner.upgrade() {
            inner.on_session_lost(generation, reason);
        }
    })
}

async fn reconnect_loop(inner: Weak<Inner>, generation: u64) {
    loop {
        let Some(this) = inner.upgrade() else {
            return;
        };
        let max = this.config.max_reconnect_attempts;
        let attempt = {
            let mut st = this.state.lock();
            if st.generation != generation || st.status == ConnectionStatus::Connected {
                return;
            }
            st.attempts += 1;
            if st.attempts > max {
                st.attempts = max;
                st.reconnect_task = None;
                None
            } else {
                Some(st.attempts)
            }
        };

        let Some(attempt) = attempt else {
            let error: ChatError = ConnectionFailure::RetriesExhausted { attempts: max }.into();
            tracing::error!(attempts = max, "giving up on reconnect");
            let _ = this.events.send(ConnectionEvent::GaveUp { error });
            return;
        };

        let delay = this.config.reconnect_base_delay * attempt;
        tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting");
        let _ = this
            .events
            .send(ConnectionEvent::Reconnecting { attempt, delay });
        drop(this);

        time::sleep(delay).await;

        let Some(this) = inner.upgrade() else {
            return;
        };
        let outcome = {
            let mut st = this.state.lock();
            if st.generation != generation || st.status == ConnectionStatus::Connected {
                return;
            }
            this.begin_connect(&mut st)
        };
        drop(this);

        match outcome.await {
            Ok(()) => return,
            Err(e) => tracing::warn!(attempt, error = %e, "reconnect attempt failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockConnector;

    fn config() -> ConnectionConfig {
        let mut cfg = ConnectionConfig::new("ws://broker.test/ws");
        cfg.reconnect_base_delay = Duration::from_millis(100);
        cfg
    }

    #[tokio::test]
    async fn concurrent_connects_open_one_transport() {
        let connector = MockConnector::new();
        let manager = ConnectionManager::new(connector.clone(), config());

        let (a, b) = tokio::join!(manager.connect(), manager.connect());
        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(connector.open_count(), 1);
        assert!(manager.is_connected());

        manager.connect().await.unwrap();
        assert_eq!(connector.open_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_connects_share_failure() {
        let connector = MockConnector::new();
        connector.set_refuse(true);
        let manager = ConnectionManager::new(connector.clone(), config());

        let (a, b) = tokio::join!(manager.connect(), manager.connect());
        assert!(a.unwrap_err().is_connection());
        assert!(b.unwrap_err().is_connection());
        assert_eq!(connector.open_count(), 1);
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let connector = MockConnector::new();
        let manager = ConnectionManager::new(connector.clone(), config());
        let mut events = manager.events();

        manager.disconnect();
        manager.connect().await.unwrap();
        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Connected);

        manager.disconnect();
        manager.disconnect();
        assert!(!manager.is_connected());
        assert!(manager.client().is_none());
        assert_eq!(
            events.recv().await.unwrap(),
            ConnectionEvent::Disconnected { reason: None }
        );
        assert!(events.try_recv().is_err());

        let broker = connector.broker(0);
        broker.closed().await;
        assert!(broker.frames().iter().any(|f| f.starts_with("DISCONNECT\n")));
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_unexpected_close() {
        let connector = MockConnector::new();
        let manager = ConnectionManager::new(connector.clone(), config());
        let mut events = manager.events();
        manager.connect().await.unwrap();
        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Connected);

        connector.broker(0).drop_connection();

        assert!(matches!(
            events.recv().await.unwrap(),
            ConnectionEvent::Disconnected { reason: Some(_) }
        ));
        assert_eq!(
            events.recv().await.unwrap(),
            ConnectionEvent::Reconnecting {
                attempt: 1,
                delay: Duration::from_millis(100)
            }
        );
        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Connected);
        assert_eq!(connector.open_count(), 2);
        assert_eq!(manager.reconnect_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_gives_up_after_max_attempts() {
        let connector = MockConnector::new();
        let manager = ConnectionManager::new(connector.clone(), config());
        let mut events = manager.events();
        manager.connect().await.unwrap();

        connector.set_refuse(true);
        connector.broker(0).drop_connection();

        let mut delays = Vec::new();
        let error = loop {
            match events.recv().await.unwrap() {
                ConnectionEvent::Reconnecting { attempt, delay } => delays.push((attempt, delay)),
                ConnectionEvent::GaveUp { error } => break error,
                _ => {}
            }
        };

        assert_eq!(
            error,
            ChatError::Connection(ConnectionFailure::RetriesExhausted { attempts: 5 })
        );
        assert_eq!(
            delays,
            (1..=5)
                .map(|n| (n, Duration::from_millis(100 * n as u64)))
                .collect::<Vec<_>>()
        );
        // initial connect plus five retries, never a sixth
        assert_eq!(connector.open_count(), 6);
        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.open_count(), 6);

        connector.set_refuse(false);
        manager.connect().await.unwrap();
        assert_eq!(connector.open_count(), 7);
        assert_eq!(manager.reconnect_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_reconnect() {
        let connector = MockConnector::new();
        let manager = ConnectionManager::new(connector.clone(), config());
        let mut events = manager.events();
        manager.connect().await.unwrap();

        connector.broker(0).drop_connection();
        loop {
            if let ConnectionEvent::Reconnecting { .. } = events.recv().await.unwrap() {
                break;
            }
        }
        manager.disconnect();
        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(connector.open_count(), 1);
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn failed_initial_connect_does_not_retry() {
        let connector = MockConnector::new();
        connector.set_refuse(true);
        let manager = ConnectionManager::new(connector.clone(), config());
        assert!(manager.connect().await.is_err());
        tokio::task::yield_now().await;
        assert_eq!(connector.open_count(), 1);
        assert_eq!(manager.reconnect_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_broker_trips_heartbeat_and_reconnects() {
        let connector = MockConnector::new();
        connector.set_server_heart_beat("10000,10000");
        let manager = ConnectionManager::new(connector.clone(), config());
        let mut events = manager.events();
        manager.connect().await.unwrap();

        let reason = loop {
            if let ConnectionEvent::Disconnected { reason } = events.recv().await.unwrap() {
                break reason;
            }
        };
        assert_eq!(
            reason,
            Some(ChatError::Connection(ConnectionFailure::HeartbeatTimeout {
                window_ms: 20_000
            }))
        );
        loop {
            if let ConnectionEvent::Connected = events.recv().await.unwrap() {
                break;
            }
        }
        assert_eq!(connector.open_count(), 2);
        assert!(manager.is_connected());
    }

    async fn crashed_session() -> ChatError {
        panic!("session task crashed")
    }

    #[tokio::test(start_paused = true)]
    async fn crashed_session_task_counts_as_lost_connection() {
        let connector = MockConnector::new();
        let manager = ConnectionManager::new(connector.clone(), config());
        let mut events = manager.events();
        manager.connect().await.unwrap();
        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Connected);

        // the live session is cancelled quietly, its replacement panics
        let generation = {
            let mut st = manager.inner.state.lock();
            if let Some(task) = st.session_task.take() {
                task.abort();
            }
            st.generation
        };
        let _watcher = watch(
            Arc::downgrade(&manager.inner),
            generation,
            tokio::spawn(crashed_session()),
        );

        let reason = loop {
            if let ConnectionEvent::Disconnected { reason } = events.recv().await.unwrap() {
                break reason;
            }
        };
        match reason {
            Some(ChatError::Connection(ConnectionFailure::Transport(msg))) => {
                assert!(msg.contains("session task failed"), "{msg}");
            }
            other => panic!("unexpected reason: {other:?}"),
        }
        loop {
            if let ConnectionEvent::Connected = events.recv().await.unwrap() {
                break;
            }
        }
        assert_eq!(connector.open_count(), 2);
        assert!(manager.is_connected());
    }
}
