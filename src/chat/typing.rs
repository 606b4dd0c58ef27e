// Typing indicators: outbound debounce and inbound expiry
// One stop-typing debounce timer per conversation, one expiry timer per
// remote user. All timers are owned so teardown can cancel them.

use log::debug;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

use super::connection::ConnectionManager;
use super::events;
use crate::models::TypingUser;

/// Quiet period after the last keystroke before `stop-typing` goes out.
pub const TYPING_STOP_DEBOUNCE: Duration = Duration::from_secs(1);
/// How long an inbound typing indicator lives without a refresh.
pub const TYPING_EXPIRY: Duration = Duration::from_secs(3);

struct InboundEntry {
    user: TypingUser,
    expiry: JoinHandle<()>,
}

pub struct TypingCoordinator {
    conn: Arc<ConnectionManager>,
    conversation_id: Mutex<Option<String>>,
    stop_timer: Mutex<Option<JoinHandle<()>>>,
    inbound: Mutex<HashMap<String, InboundEntry>>,
}

impl TypingCoordinator {
    pub fn new(conn: Arc<ConnectionManager>) -> Arc<Self> {
        Arc::new(TypingCoordinator {
            conn,
            conversation_id: Mutex::new(None),
            stop_timer: Mutex::new(None),
            inbound: Mutex::new(HashMap::new()),
        })
    }

    pub fn set_conversation(&self, conversation_id: &str) {
        *self.conversation_id.lock().unwrap() = Some(conversation_id.to_string());
    }

    /// Outbound path, called on every keystroke in the composer. Publishes
    /// `typing` while content is non-empty and not mid-IME-composition, and
    /// resets the single stop-typing debounce timer. `stop-typing` goes out
    /// only once the composer has been quiet for the debounce period.
    pub async fn keystroke(self: &Arc<Self>, content: &str, composing: bool) {
        if content.is_empty() || composing {
            return;
        }
        let Some(conversation_id) = self.conversation_id.lock().unwrap().clone() else {
            return;
        };

        let _ = self
            .conn
            .publish(
                events::TYPING,
                json!({ "conversationId": conversation_id.clone() }),
            )
            .await;

        let coordinator = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(TYPING_STOP_DEBOUNCE).await;
            let _ = coordinator
                .conn
                .publish(
                    events::STOP_TYPING,
                    json!({ "conversationId": conversation_id }),
                )
                .await;
        });
        if let Some(previous) = self.stop_timer.lock().unwrap().replace(handle) {
            previous.abort();
        }
    }

    /// Inbound `user-typing`: add the user to the active set if absent and
    /// re-arm their 3 s expiry timer. Users are tracked independently, one
    /// timer each.
    pub fn on_user_typing(self: &Arc<Self>, user: TypingUser) {
        let coordinator = Arc::clone(self);
        let user_id = user.user_id.clone();
        let expiry = tokio::spawn(async move {
            tokio::time::sleep(TYPING_EXPIRY).await;
            coordinator.expire(&user_id);
        });

        let mut inbound = self.inbound.lock().unwrap();
        if let Some(previous) = inbound.insert(
            user.user_id.clone(),
            InboundEntry {
                user: user.clone(),
                expiry,
            },
        ) {
            debug!("Refreshed typing indicator for {}", user.user_id);
            previous.expiry.abort();
        } else {
            debug!("{} started typing", user.user_id);
        }
    }

    /// Inbound `user-stop-typing`: remove immediately and cancel the timer.
    pub fn on_user_stop_typing(&self, user_id: &str) {
        if let Some(entry) = self.inbound.lock().unwrap().remove(user_id) {
            entry.expiry.abort();
            debug!("{} stopped typing", user_id);
        }
    }

    fn expire(&self, user_id: &str) {
        if self.inbound.lock().unwrap().remove(user_id).is_some() {
            debug!("Typing indicator for {} expired", user_id);
        }
    }

    /// Users currently showing a typing indicator.
    pub fn typing_users(&self) -> Vec<TypingUser> {
        self.inbound
            .lock()
            .unwrap()
            .values()
            .map(|entry| entry.user.clone())
            .collect()
    }

    /// Cancel the debounce timer and every per-user expiry timer.
    pub fn teardown(&self) {
        if let Some(handle) = self.stop_timer.lock().unwrap().take() {
            handle.abort();
        }
        let drained: Vec<InboundEntry> = {
            let mut inbound = self.inbound.lock().unwrap();
            inbound.drain().map(|(_, entry)| entry).collect()
        };
        for entry in drained {
            entry.expiry.abort();
        }
        *self.conversation_id.lock().unwrap() = None;
    }
}
