//! Per-conversation ordered, deduplicated message log with a backward
//! pagination cursor.

use std::collections::{HashMap, HashSet};

use chatlink_core::model::{ConversationId, DeliveryState, Message, MessageId, UserId};

/// Page size of the retrieval API.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Result of [`MessageLogStore::append`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended(Message),
    /// A message with this id was already present; carries the stored entry.
    Duplicate(Message),
}

impl AppendOutcome {
    pub fn message(&self) -> &Message {
        match self {
            Self::Appended(m) | Self::Duplicate(m) => m,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}

/// One page from the retrieval API after conversion to [`Message`]s.
///
/// `fetched` counts the rows the API returned, including rows that failed to
/// convert, and alone decides whether older pages remain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub messages: Vec<Message>,
    pub fetched: usize,
}

impl From<Vec<Message>> for FetchedPage {
    fn from(messages: Vec<Message>) -> Self {
        Self {
            fetched: messages.len(),
            messages,
        }
    }
}

/// Pagination cursor of one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageState {
    /// Index of the oldest page merged so far.
    pub page: u32,
    pub has_more: bool,
    pub loading: bool,
}

#[derive(Debug, Default)]
struct ConversationLog {
    messages: Vec<Message>,
    ids: HashSet<MessageId>,
    page: PageState,
    loaded: bool,
}

impl ConversationLog {
    fn knows(&self, id: MessageId) -> bool {
        id != 0 && self.ids.contains(&id)
    }

    /// Drop messages whose ids are already present or repeat within `page`.
    fn fresh(&self, page: Vec<Message>) -> Vec<Message> {
        let mut seen = HashSet::new();
        page.into_iter()
            .filter(|m| m.is_placeholder() || (!self.knows(m.id) && seen.insert(m.id)))
            .collect()
    }

    fn index(&mut self) {
        self.ids = self
            .messages
            .iter()
            .filter(|m| !m.is_placeholder())
            .map(|m| m.id)
            .collect();
    }
}

#[derive(Debug)]
pub struct MessageLogStore {
    page_size: usize,
    logs: HashMap<ConversationId, ConversationLog>,
}

impl Default for MessageLogStore {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl MessageLogStore {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            logs: HashMap::new(),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Append a live message. Idempotent by non-zero id.
    pub fn append(&mut self, conversation_id: ConversationId, message: Message) -> AppendOutcome {
        let log = self.logs.entry(conversation_id).or_default();
        if log.knows(message.id) {
            if let Some(existing) = log.messages.iter().find(|m| m.id == message.id) {
                return AppendOutcome::Duplicate(existing.clone());
            }
        }
        if !message.is_placeholder() {
            log.ids.insert(message.id);
        }
        log.messages.push(message.clone());
        AppendOutcome::Appended(message)
    }

    /// Insert an older page before the earliest entry, keeping its order.
    /// Returns how many messages were inserted.
    pub fn prepend_page(&mut self, conversation_id: ConversationId, page: Vec<Message>) -> usize {
        let log = self.logs.entry(conversation_id).or_default();
        let fresh = log.fresh(page);
        let inserted = fresh.len();
        log.messages.splice(0..0, fresh);
        log.index();
        inserted
    }

    /// Replace the log with the most recent page and reset pagination.
    pub fn load_initial(&mut self, conversation_id: ConversationId, page: impl Into<FetchedPage>) {
        let page = page.into();
        let has_more = page.fetched >= self.page_size;
        let log = self.logs.entry(conversation_id).or_default();
        log.messages.clear();
        log.ids.clear();
        log.messages = log.fresh(page.messages);
        log.index();
        log.page = PageState {
            page: 0,
            has_more,
            loading: false,
        };
        log.loaded = true;
    }

    /// Merge older page `page_index` and update the cursor. Returns how many
    /// messages were inserted.
    pub fn merge_page(
        &mut self,
        conversation_id: ConversationId,
        page_index: u32,
        page: impl Into<FetchedPage>,
    ) -> usize {
        let FetchedPage { messages, fetched } = page.into();
        let page_size = self.page_size;
        let inserted = if messages.is_empty() {
            0
        } else {
            self.prepend_page(conversation_id, messages)
        };
        let log = self.logs.entry(conversation_id).or_default();
        if fetched > 0 {
            log.page.page = page_index;
        }
        log.page.has_more = fetched >= page_size;
        inserted
    }

    /// Claim the conversation for an older-page fetch. False if a fetch is
    /// already running or no older pages remain.
    pub fn begin_page_load(&mut self, conversation_id: ConversationId) -> bool {
        let Some(log) = self.logs.get_mut(&conversation_id) else {
            return false;
        };
        if log.page.loading || !log.page.has_more {
            return false;
        }
        log.page.loading = true;
        true
    }

    pub fn finish_page_load(&mut self, conversation_id: ConversationId) {
        if let Some(log) = self.logs.get_mut(&conversation_id) {
            log.page.loading = false;
        }
    }

    /// Index of the next older page to request.
    pub fn next_page(&self, conversation_id: ConversationId) -> u32 {
        self.page_state(conversation_id).page + 1
    }

    pub fn page_state(&self, conversation_id: ConversationId) -> PageState {
        self.logs
            .get(&conversation_id)
            .map(|l| l.page)
            .unwrap_or_default()
    }

    pub fn has_more(&self, conversation_id: ConversationId) -> bool {
        self.page_state(conversation_id).has_more
    }

    pub fn is_loaded(&self, conversation_id: ConversationId) -> bool {
        self.logs
            .get(&conversation_id)
            .map(|l| l.loaded)
            .unwrap_or(false)
    }

    pub fn contains(&self, conversation_id: ConversationId, id: MessageId) -> bool {
        self.logs
            .get(&conversation_id)
            .map(|l| l.knows(id))
            .unwrap_or(false)
    }

    pub fn messages(&self, conversation_id: ConversationId) -> Vec<Message> {
        self.logs
            .get(&conversation_id)
            .map(|l| l.messages.clone())
            .unwrap_or_default()
    }

    pub fn len(&self, conversation_id: ConversationId) -> usize {
        self.logs
            .get(&conversation_id)
            .map(|l| l.messages.len())
            .unwrap_or(0)
    }

    /// Mark as read every message not sent by `reader`. Returns the number changed.
    pub fn mark_read_by(&mut self, conversation_id: ConversationId, reader: UserId) -> usize {
        let Some(log) = self.logs.get_mut(&conversation_id) else {
            return 0;
        };
        let mut changed = 0;
        for m in log
            .messages
            .iter_mut()
            .filter(|m| m.sender.id != reader && m.state != DeliveryState::Read)
        {
            m.state = DeliveryState::Read;
            changed += 1;
        }
        changed
    }

    pub fn conversation_ids(&self) -> Vec<ConversationId> {
        self.logs.keys().copied().collect()
    }

    pub fn clear(&mut self) {
        self.logs.clear();
    }
}
