//! Keyed, cancellable delayed tasks.
//!
//! Scheduling a key that already has a pending task replaces it, which gives
//! both expiry refresh (typing) and debounce (mark-read) semantics. Tasks run
//! on tokio time, so paused-clock tests drive them deterministically.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use chatlink_core::model::{ConversationId, UserId};

/// Timers used by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKey {
    /// Expiry of a "user is typing" entry.
    Typing(ConversationId, UserId),
    /// Debounced read acknowledgement.
    MarkRead(ConversationId),
}

type Tasks<K> = Arc<Mutex<HashMap<K, (u64, JoinHandle<()>)>>>;

pub struct TaskScheduler<K> {
    tasks: Tasks<K>,
    next_token: AtomicU64,
}

impl<K> Default for TaskScheduler<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> TaskScheduler<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            next_token: AtomicU64::new(0),
        }
    }

    /// Run `task` after `delay`, replacing any pending task for `key`.
    pub fn schedule<F>(&self, key: K, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let weak = Arc::downgrade(&self.tasks);
        let mut tasks = self.tasks.lock();
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(tasks) = weak.upgrade() else {
                return;
            };
            {
                let mut tasks = tasks.lock();
                match tasks.get(&task_key) {
                    Some((t, _)) if *t == token => {
                        tasks.remove(&task_key);
                    }
                    _ => return,
                }
            }
            task.await;
        });
        if let Some((_, previous)) = tasks.insert(key, (token, handle)) {
            previous.abort();
        }
    }

    /// Cancel the pending task for `key`. Returns whether one was pending.
    pub fn cancel(&self, key: &K) -> bool {
        match self.tasks.lock().remove(key) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, key: &K) -> bool {
        self.tasks.lock().contains_key(key)
    }

    pub fn cancel_all(&self) {
        for (_, (_, handle)) in self.tasks.lock().drain() {
            handle.abort();
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K> Drop for TaskScheduler<K> {
    fn drop(&mut self) {
        for (_, (_, handle)) in self.tasks.lock().drain() {
            handle.abort();
        }
    }
}
