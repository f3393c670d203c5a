//! Conversation directory, kept sorted by last update, newest first.

use chatlink_core::model::{Conversation, ConversationId, ConversationPatch};

#[derive(Debug, Default)]
pub struct ConversationDirectory {
    conversations: Vec<Conversation>,
}

impl ConversationDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole directory, as after a retrieval load.
    pub fn replace_all(&mut self, conversations: Vec<Conversation>) {
        self.conversations = conversations;
        self.sort();
    }

    /// Merge `patch` into an existing conversation. Unknown ids are ignored
    /// and return false.
    pub fn upsert(&mut self, conversation_id: ConversationId, patch: ConversationPatch) -> bool {
        let Some(conversation) = self.find_mut(conversation_id) else {
            return false;
        };
        patch.apply(conversation);
        self.sort();
        true
    }

    pub fn mark_read(&mut self, conversation_id: ConversationId) -> bool {
        match self.find_mut(conversation_id) {
            Some(c) => {
                c.unread_count = 0;
                true
            }
            None => false,
        }
    }

    /// Returns the new count, or `None` for an unknown conversation.
    pub fn increment_unread(&mut self, conversation_id: ConversationId) -> Option<u32> {
        let c = self.find_mut(conversation_id)?;
        c.unread_count = c.unread_count.saturating_add(1);
        Some(c.unread_count)
    }

    pub fn contains(&self, conversation_id: ConversationId) -> bool {
        self.get(conversation_id).is_some()
    }

    pub fn get(&self, conversation_id: ConversationId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == conversation_id)
    }

    pub fn list(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn ids(&self) -> Vec<ConversationId> {
        self.conversations.iter().map(|c| c.id).collect()
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    fn find_mut(&mut self, conversation_id: ConversationId) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.id == conversation_id)
    }

    // Stable, so equal timestamps keep their relative order.
    fn sort(&mut self) {
        self.conversations
            .sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    }
}
