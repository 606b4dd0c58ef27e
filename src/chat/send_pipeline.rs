// Optimistic message sending: validation, retry, and reconciliation
// Each accepted submit owns one PENDING placeholder and one ack timer.
// Reconciliation and the retry timer may race; whichever runs second finds
// the pending record gone and does nothing.

use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::connection::ConnectionManager;
use super::events;
use super::window::ConversationWindow;
use crate::errors::{ChatError, NoticeBoard};
use crate::models::{
    Message, MessageStatus, MessageType, MessagesMarkedReadPayload, SendMessagePayload,
    SendMetadata,
};

/// Maximum accepted message length, in characters.
pub const MAX_MESSAGE_LEN: usize = 5000;
/// Minimum spacing between accepted submits in one conversation.
pub const SUBMIT_MIN_INTERVAL: Duration = Duration::from_millis(500);
/// How long to wait for the server echo before re-publishing.
pub const SEND_ACK_TIMEOUT: Duration = Duration::from_secs(5);
/// Re-publish attempts after the initial send.
pub const MAX_SEND_RETRIES: u32 = 3;

/// Where a pending send is in its retry cycle. Kept as a tagged state so
/// exhaustion and cancellation transitions stay explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPhase {
    /// Waiting on the ack timer; `attempt` counts re-publishes so far.
    Armed { attempt: u32 },
    /// All retries spent; the record is about to be escalated and dropped.
    Exhausted,
}

/// Book-keeping for one in-flight send, keyed by its local temporary ID.
/// Destroyed on reconciliation, on retry exhaustion, or at teardown, and the
/// owned timer dies with it.
pub struct PendingSend {
    pub local_id: String,
    pub payload: SendMessagePayload,
    pub phase: RetryPhase,
    pub last_retry: Option<Instant>,
    timer: Option<JoinHandle<()>>,
}

pub struct MessageSendPipeline {
    conn: Arc<ConnectionManager>,
    window: Arc<Mutex<ConversationWindow>>,
    notices: Arc<NoticeBoard>,
    pending: Mutex<HashMap<String, PendingSend>>,
    last_accept: Mutex<Option<Instant>>,
}

impl MessageSendPipeline {
    pub fn new(
        conn: Arc<ConnectionManager>,
        window: Arc<Mutex<ConversationWindow>>,
        notices: Arc<NoticeBoard>,
    ) -> Arc<Self> {
        Arc::new(MessageSendPipeline {
            conn,
            window,
            notices,
            pending: Mutex::new(HashMap::new()),
            last_accept: Mutex::new(None),
        })
    }

    /// Validate and send user-submitted content. On acceptance the message
    /// appears in the window immediately with PENDING status and a local
    /// temporary ID, which is returned.
    ///
    /// Rejections are posted to the notice board and returned as errors. A
    /// disconnected transport rejects without creating an optimistic entry:
    /// a placeholder with no send behind it would never reconcile.
    pub async fn submit(
        self: &Arc<Self>,
        content: &str,
        message_type: MessageType,
    ) -> Result<String, ChatError> {
        let trimmed = content.trim();

        let conversation_id = {
            let window = self.window.lock().unwrap();
            let conversation_id = match window.conversation_id() {
                Some(id) => id.to_string(),
                None => return Err(self.reject(ChatError::NoConversation)),
            };
            if trimmed.is_empty() {
                return Err(self.reject(ChatError::EmptyMessage));
            }
            if trimmed.chars().count() > MAX_MESSAGE_LEN {
                return Err(self.reject(ChatError::MessageTooLong {
                    limit: MAX_MESSAGE_LEN,
                }));
            }
            conversation_id
        };

        {
            let last = self.last_accept.lock().unwrap();
            if let Some(at) = *last {
                if at.elapsed() < SUBMIT_MIN_INTERVAL {
                    return Err(self.reject(ChatError::RateLimited));
                }
            }
        }

        if !self.conn.is_connected() {
            return Err(self.reject(ChatError::NotConnected));
        }

        *self.last_accept.lock().unwrap() = Some(Instant::now());

        let message = Message::pending(&conversation_id, trimmed, message_type);
        let local_id = message.id.clone();
        let payload = SendMessagePayload {
            conversation_id,
            content: trimmed.to_string(),
            message_type,
            metadata: SendMetadata {
                local_id: local_id.clone(),
            },
        };

        self.window.lock().unwrap().append(message);
        {
            let mut pending = self.pending.lock().unwrap();
            pending.insert(
                local_id.clone(),
                PendingSend {
                    local_id: local_id.clone(),
                    payload: payload.clone(),
                    phase: RetryPhase::Armed { attempt: 0 },
                    last_retry: None,
                    timer: None,
                },
            );
        }

        info!("Accepted submit, local ID {}", local_id);
        self.publish_send(&payload).await;
        self.arm_ack_timer(local_id.clone());
        Ok(local_id)
    }

    fn reject(&self, error: ChatError) -> ChatError {
        debug!("Rejected submit: {}", error);
        self.notices.post(error.clone());
        error
    }

    async fn publish_send(&self, payload: &SendMessagePayload) {
        let value = serde_json::to_value(payload).unwrap_or_default();
        if let Err(e) = self.conn.publish(events::SEND_MESSAGE, value).await {
            warn!("Failed to publish send-message: {}", e);
        }
    }

    /// Arm a single-shot ack timer for a pending record. The previous timer,
    /// if any, is replaced; there is never more than one per record.
    fn arm_ack_timer(self: &Arc<Self>, local_id: String) {
        let pipeline = Arc::clone(self);
        let id = local_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(SEND_ACK_TIMEOUT).await;
            pipeline.on_ack_timeout(&id).await;
        });

        let mut pending = self.pending.lock().unwrap();
        if let Some(record) = pending.get_mut(&local_id) {
            if let Some(old) = record.timer.replace(handle) {
                old.abort();
            }
        } else {
            // Reconciled between publish and arming; nothing to time out.
            handle.abort();
        }
    }

    /// Ack timer expiry. A missing record means reconciliation won the race,
    /// which is the normal outcome, not an error.
    async fn on_ack_timeout(self: &Arc<Self>, local_id: &str) {
        let retry_payload = {
            let mut pending = self.pending.lock().unwrap();
            match pending.get_mut(local_id) {
                None => {
                    debug!("Ack timer fired for reconciled send {}", local_id);
                    return;
                }
                Some(record) => match record.phase {
                    RetryPhase::Armed { attempt } if attempt < MAX_SEND_RETRIES => {
                        record.phase = RetryPhase::Armed {
                            attempt: attempt + 1,
                        };
                        record.last_retry = Some(Instant::now());
                        Some((attempt + 1, record.payload.clone()))
                    }
                    _ => {
                        record.phase = RetryPhase::Exhausted;
                        None
                    }
                },
            }
        };

        match retry_payload {
            Some((attempt, payload)) => {
                info!(
                    "No ack for {} within {:?}, retry {}/{}",
                    local_id, SEND_ACK_TIMEOUT, attempt, MAX_SEND_RETRIES
                );
                self.publish_send(&payload).await;
                self.arm_ack_timer(local_id.to_string());
            }
            None => self.escalate_exhausted(local_id),
        }
    }

    /// Terminal failure: stop retrying, surface the error, and force the
    /// placeholder to SENT (best effort, unreconciled) so it stops spinning.
    fn escalate_exhausted(&self, local_id: &str) {
        let removed = self.pending.lock().unwrap().remove(local_id);
        let Some(record) = removed else {
            return;
        };
        if let Some(timer) = record.timer {
            timer.abort();
        }
        warn!(
            "Send {} not acknowledged after {} retries, giving up",
            local_id, MAX_SEND_RETRIES
        );
        self.notices.post(ChatError::DeliveryTimeout);

        let mut window = self.window.lock().unwrap();
        if let Some(message) = window.get_mut(local_id) {
            message.status = MessageStatus::Sent;
            message.updated_at = chrono::Utc::now();
        }
    }

    /// Apply an inbound canonical message. If its content matches a pending
    /// placeholder (sender matching is "any" while the local sender is still
    /// empty), the placeholder and its timer are destroyed and the canonical
    /// message takes its place, exactly once per canonical message.
    ///
    /// Matching on content is a known compromise: the echo does not carry
    /// the client's local ID, so two distinct sends of identical content
    /// inside one retry window cannot be told apart.
    pub fn reconcile(&self, inbound: Message) {
        {
            let window = self.window.lock().unwrap();
            if window.conversation_id() != Some(inbound.conversation_id.as_str()) {
                debug!(
                    "Dropping inbound {} for inactive conversation {}",
                    inbound.id, inbound.conversation_id
                );
                return;
            }
        }

        let matched = {
            let mut pending = self.pending.lock().unwrap();
            let key = pending.iter().find_map(|(id, record)| {
                let same_conversation =
                    record.payload.conversation_id == inbound.conversation_id;
                let same_content = record.payload.content == inbound.content;
                if same_conversation && same_content {
                    Some(id.clone())
                } else {
                    None
                }
            });
            key.and_then(|id| pending.remove(&id))
        };

        let mut window = self.window.lock().unwrap();
        if let Some(record) = matched {
            debug!(
                "Reconciled pending {} with canonical {}",
                record.local_id, inbound.id
            );
            if let Some(timer) = record.timer {
                timer.abort();
            }
            window.remove(&record.local_id);
        }
        window.append(inbound);
    }

    /// Inbound `messages-marked-read`: transition the listed messages to
    /// READ regardless of their current state.
    pub fn apply_read_receipts(&self, payload: MessagesMarkedReadPayload) {
        let changed = self.window.lock().unwrap().mark_read(&payload.message_ids);
        debug!(
            "Read receipt from {} marked {} message(s)",
            payload.user_id, changed
        );
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn is_pending(&self, local_id: &str) -> bool {
        self.pending.lock().unwrap().contains_key(local_id)
    }

    /// Cancel every outstanding ack timer and drop all pending records.
    /// Called on conversation switch, credential change, and view teardown.
    pub fn teardown(&self) {
        let drained: Vec<PendingSend> = {
            let mut pending = self.pending.lock().unwrap();
            pending.drain().map(|(_, record)| record).collect()
        };
        if !drained.is_empty() {
            info!("Cancelling {} pending send(s) at teardown", drained.len());
        }
        for record in drained {
            if let Some(timer) = record.timer {
                timer.abort();
            }
        }
        *self.last_accept.lock().unwrap() = None;
    }
}
