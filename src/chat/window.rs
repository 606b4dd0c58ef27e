// ConversationWindow: the in-memory message list for the open conversation
// Ordered ascending by created_at. Appended to by the live stream, prepended
// to by history fetches; nothing else mutates it.

use log::debug;

use crate::models::{Message, MessageStatus};

pub struct ConversationWindow {
    conversation_id: Option<String>,
    messages: Vec<Message>,
}

impl ConversationWindow {
    pub fn new() -> Self {
        ConversationWindow {
            conversation_id: None,
            messages: Vec::new(),
        }
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    /// Select a conversation, discarding the previous window contents.
    pub fn select(&mut self, conversation_id: &str) {
        self.conversation_id = Some(conversation_id.to_string());
        self.messages.clear();
    }

    pub fn clear(&mut self) {
        self.conversation_id = None;
        self.messages.clear();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.messages.iter().any(|m| m.id == id)
    }

    /// Append a live message, keeping ascending created_at order. The live
    /// stream is mostly in order already, so this walks back from the tail.
    pub fn append(&mut self, message: Message) {
        if self.contains(&message.id) {
            debug!("Skipping duplicate append of message {}", message.id);
            return;
        }
        let at = self
            .messages
            .iter()
            .rposition(|m| m.created_at <= message.created_at)
            .map(|i| i + 1)
            .unwrap_or(0);
        self.messages.insert(at, message);
    }

    /// Prepend an older history page, filtering out IDs already present.
    /// The page arrives oldest-first, so splicing it ahead of the existing
    /// window preserves overall ascending order.
    pub fn prepend_history(&mut self, page: Vec<Message>) -> usize {
        let fresh: Vec<Message> = page
            .into_iter()
            .filter(|m| !self.contains(&m.id))
            .collect();
        let added = fresh.len();
        self.messages.splice(0..0, fresh);
        added
    }

    /// Remove a message by ID, returning it if present.
    pub fn remove(&mut self, id: &str) -> Option<Message> {
        let at = self.messages.iter().position(|m| m.id == id)?;
        Some(self.messages.remove(at))
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    /// Transition the listed messages to READ, whatever state they were in.
    pub fn mark_read(&mut self, ids: &[String]) -> usize {
        let mut changed = 0;
        for message in &mut self.messages {
            if ids.iter().any(|id| *id == message.id) && message.status != MessageStatus::Read {
                message.status = MessageStatus::Read;
                message.updated_at = chrono::Utc::now();
                changed += 1;
            }
        }
        changed
    }
}

impl Default for ConversationWindow {
    fn default() -> Self {
        Self::new()
    }
}
