// Read-receipt batching
// Filters the visible-message report down to unread, non-self messages and
// publishes one mark-as-read batch. Filtering only; the visibility
// collaborator sets the cadence.

use anyhow::Result;
use log::debug;
use std::sync::{Arc, Mutex};

use super::connection::ConnectionManager;
use super::events;
use super::window::ConversationWindow;
use crate::models::{MarkAsReadPayload, MessageStatus};

pub struct ReadReceiptBatcher {
    conn: Arc<ConnectionManager>,
    window: Arc<Mutex<ConversationWindow>>,
    current_user_id: String,
}

impl ReadReceiptBatcher {
    pub fn new(
        conn: Arc<ConnectionManager>,
        window: Arc<Mutex<ConversationWindow>>,
        current_user_id: &str,
    ) -> Self {
        ReadReceiptBatcher {
            conn,
            window,
            current_user_id: current_user_id.to_string(),
        }
    }

    /// Report the message IDs currently visible on screen. Messages already
    /// READ or authored by the current user are dropped; if anything is
    /// left, a single `mark-as-read` batch goes out.
    pub async fn report_visible(&self, visible_ids: &[String]) -> Result<()> {
        let (conversation_id, unread) = {
            let window = self.window.lock().unwrap();
            let Some(conversation_id) = window.conversation_id().map(str::to_string) else {
                return Ok(());
            };
            let unread: Vec<String> = window
                .messages()
                .iter()
                .filter(|m| visible_ids.iter().any(|id| *id == m.id))
                .filter(|m| m.status != MessageStatus::Read)
                .filter(|m| m.sender_id != self.current_user_id)
                .map(|m| m.id.clone())
                .collect();
            (conversation_id, unread)
        };

        if unread.is_empty() {
            return Ok(());
        }

        debug!("Marking {} visible message(s) as read", unread.len());
        let payload = MarkAsReadPayload {
            conversation_id,
            message_ids: unread,
        };
        self.conn
            .publish(events::MARK_AS_READ, serde_json::to_value(&payload)?)
            .await
    }
}
