// Chat reliability layer
// This module wires the connection, subscription, send, history, typing, and
// read-receipt components together behind one client facade.

use anyhow::Result;
use log::{info, warn};
use serde_json::json;
use std::sync::{Arc, Mutex};

pub mod connection;
pub mod history;
pub mod read_receipts;
pub mod send_pipeline;
pub mod subscriptions;
pub mod transport;
pub mod typing;
pub mod window;

pub use connection::{ConnectionManager, LifecycleHooks};
pub use history::{HistoryApi, HistoryPager, RestHistoryApi};
pub use read_receipts::ReadReceiptBatcher;
pub use send_pipeline::MessageSendPipeline;
pub use subscriptions::SubscriptionRegistry;
pub use transport::{EventTransport, LoopbackTransport};
pub use typing::TypingCoordinator;
pub use window::ConversationWindow;

use crate::errors::{ChatError, NoticeBoard};
use crate::models::{
    ErrorPayload, Message, MessageType, MessagesMarkedReadPayload, TypingUser,
    UserStopTypingPayload,
};

/// Event names on the transport wire.
pub mod events {
    // Outbound
    pub const JOIN_CONVERSATION: &str = "join-conversation";
    pub const LEAVE_CONVERSATION: &str = "leave-conversation";
    pub const SEND_MESSAGE: &str = "send-message";
    pub const TYPING: &str = "typing";
    pub const STOP_TYPING: &str = "stop-typing";
    pub const MARK_AS_READ: &str = "mark-as-read";

    // Inbound
    pub const MESSAGE_RECEIVED: &str = "message-received";
    pub const USER_TYPING: &str = "user-typing";
    pub const USER_STOP_TYPING: &str = "user-stop-typing";
    pub const MESSAGES_MARKED_READ: &str = "messages-marked-read";
    pub const ERROR: &str = "error";
}

/// Client facade over the reliability layer. Owns the conversation window
/// and every timer-bearing component; `shutdown` (or dropping the client
/// after `shutdown`) leaves no timers or handlers behind.
pub struct ChatClient {
    conn: Arc<ConnectionManager>,
    registry: Mutex<Option<SubscriptionRegistry>>,
    window: Arc<Mutex<ConversationWindow>>,
    notices: Arc<NoticeBoard>,
    pipeline: Arc<MessageSendPipeline>,
    typing: Arc<TypingCoordinator>,
    pager: HistoryPager,
    receipts: ReadReceiptBatcher,
}

impl ChatClient {
    pub fn new(
        transport: Arc<dyn EventTransport>,
        history_api: Arc<dyn HistoryApi>,
        current_user_id: &str,
        hooks: LifecycleHooks,
    ) -> Arc<Self> {
        let conn = Arc::new(ConnectionManager::new(transport, hooks));
        let window = Arc::new(Mutex::new(ConversationWindow::new()));
        let notices = NoticeBoard::new();

        let pipeline =
            MessageSendPipeline::new(Arc::clone(&conn), Arc::clone(&window), Arc::clone(&notices));
        let typing = TypingCoordinator::new(Arc::clone(&conn));
        let pager = HistoryPager::new(history_api, Arc::clone(&window), Arc::clone(&notices));
        let receipts =
            ReadReceiptBatcher::new(Arc::clone(&conn), Arc::clone(&window), current_user_id);

        Arc::new(ChatClient {
            conn,
            registry: Mutex::new(None),
            window,
            notices,
            pipeline,
            typing,
            pager,
            receipts,
        })
    }

    /// Establish (or re-establish) the transport session and rebuild the
    /// listener registry from scratch. Never appends to an existing
    /// registry, so reconnect cycles cannot double up handlers.
    pub async fn connect(&self, credential: &str) -> Result<()> {
        // Old handlers go first so nothing listens on the dying session.
        if let Some(old) = self.registry.lock().unwrap().take() {
            old.teardown();
        }
        self.conn.connect(credential).await?;

        let registry = SubscriptionRegistry::new(self.conn.raw_transport());
        self.attach_listeners(&registry);
        *self.registry.lock().unwrap() = Some(registry);
        Ok(())
    }

    /// Credential change: cancel in-flight work, drop the session, and
    /// rebuild everything against a fresh one.
    pub async fn set_credential(&self, credential: &str) -> Result<()> {
        info!("Credential changed, re-establishing session");
        self.pipeline.teardown();
        self.typing.teardown();
        self.connect(credential).await?;

        let conversation = self.window.lock().unwrap().conversation_id().map(str::to_string);
        if let Some(id) = conversation {
            self.typing.set_conversation(&id);
            self.conn
                .publish(events::JOIN_CONVERSATION, json!({ "conversationId": id }))
                .await?;
        }
        Ok(())
    }

    fn attach_listeners(&self, registry: &SubscriptionRegistry) {
        let pipeline = Arc::clone(&self.pipeline);
        registry.subscribe(
            events::MESSAGE_RECEIVED,
            Arc::new(move |payload| match serde_json::from_value::<Message>(payload) {
                Ok(message) => pipeline.reconcile(message),
                Err(e) => warn!("Malformed message-received payload: {}", e),
            }),
        );

        let typing = Arc::clone(&self.typing);
        registry.subscribe(
            events::USER_TYPING,
            Arc::new(move |payload| match serde_json::from_value::<TypingUser>(payload) {
                Ok(user) => typing.on_user_typing(user),
                Err(e) => warn!("Malformed user-typing payload: {}", e),
            }),
        );

        let typing = Arc::clone(&self.typing);
        registry.subscribe(
            events::USER_STOP_TYPING,
            Arc::new(move |payload| {
                match serde_json::from_value::<UserStopTypingPayload>(payload) {
                    Ok(stop) => typing.on_user_stop_typing(&stop.user_id),
                    Err(e) => warn!("Malformed user-stop-typing payload: {}", e),
                }
            }),
        );

        let pipeline = Arc::clone(&self.pipeline);
        registry.subscribe(
            events::MESSAGES_MARKED_READ,
            Arc::new(move |payload| {
                match serde_json::from_value::<MessagesMarkedReadPayload>(payload) {
                    Ok(receipts) => pipeline.apply_read_receipts(receipts),
                    Err(e) => warn!("Malformed messages-marked-read payload: {}", e),
                }
            }),
        );

        let conn = Arc::clone(&self.conn);
        registry.subscribe(
            events::ERROR,
            Arc::new(move |payload| {
                let message = serde_json::from_value::<ErrorPayload>(payload)
                    .map(|e| e.message)
                    .unwrap_or_else(|_| "unknown server error".to_string());
                warn!("Server reported error: {}", message);
                conn.report_error(&message);
            }),
        );
    }

    /// Select a conversation: leave the previous one, cancel its timers and
    /// pagination state, join the new one, and load its newest page.
    pub async fn open_conversation(&self, conversation_id: &str) -> Result<()> {
        self.leave_current().await;

        self.window.lock().unwrap().select(conversation_id);
        self.pager.reset();
        self.typing.set_conversation(conversation_id);
        self.conn
            .publish(
                events::JOIN_CONVERSATION,
                json!({ "conversationId": conversation_id }),
            )
            .await?;

        if let Err(e) = self.pager.load_initial(conversation_id).await {
            warn!("Initial history load failed: {}", e);
        }
        Ok(())
    }

    /// Leave the currently open conversation. The `leave-conversation`
    /// publish is best effort: timer and record teardown must run even when
    /// the socket is already dying underneath us.
    async fn leave_current(&self) {
        let previous = self.window.lock().unwrap().conversation_id().map(str::to_string);
        if let Some(id) = previous {
            if let Err(e) = self
                .conn
                .publish(events::LEAVE_CONVERSATION, json!({ "conversationId": id }))
                .await
            {
                warn!("Failed to publish leave-conversation for {}: {}", id, e);
            }
            self.pipeline.teardown();
            self.typing.teardown();
        }
    }

    /// Leave the chat view entirely: cancel every timer, dispose every
    /// subscription, and close the session. Every step runs unconditionally;
    /// a failing transport must not leave timers armed or handlers attached.
    pub async fn shutdown(&self) -> Result<()> {
        self.leave_current().await;
        self.window.lock().unwrap().clear();
        if let Some(registry) = self.registry.lock().unwrap().take() {
            registry.teardown();
        }
        self.conn.disconnect().await
    }

    // Delegations used by the embedding UI.

    pub async fn submit(&self, content: &str) -> Result<String, ChatError> {
        self.pipeline.submit(content, MessageType::Text).await
    }

    pub async fn submit_typed(
        &self,
        content: &str,
        message_type: MessageType,
    ) -> Result<String, ChatError> {
        self.pipeline.submit(content, message_type).await
    }

    pub async fn load_older(&self) {
        let conversation = self.window.lock().unwrap().conversation_id().map(str::to_string);
        if let Some(id) = conversation {
            self.pager.load_older(&id).await;
        }
    }

    pub async fn keystroke(&self, content: &str, composing: bool) {
        self.typing.keystroke(content, composing).await;
    }

    pub async fn report_visible(&self, visible_ids: &[String]) -> Result<()> {
        self.receipts.report_visible(visible_ids).await
    }

    pub fn messages(&self) -> Vec<Message> {
        self.window.lock().unwrap().messages().to_vec()
    }

    pub fn typing_users(&self) -> Vec<TypingUser> {
        self.typing.typing_users()
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    pub fn current_notice(&self) -> Option<ChatError> {
        self.notices.current()
    }

    pub fn acknowledge_notice(&self) {
        self.notices.acknowledge()
    }
}
