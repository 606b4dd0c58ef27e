// Common test utilities for integration tests
// This module contains shared code for all integration tests

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use log::LevelFilter;
use serde_json::Value;

use chatlink::chat::history::{FetchError, HistoryApi};
use chatlink::chat::transport::{EventHandler, EventTransport, SubscriptionToken};
use chatlink::chat::{ChatClient, LifecycleHooks, LoopbackTransport};
use chatlink::models::{Message, MessageStatus, MessageType};

// Initialize logging once
static INIT_LOGGER: Once = Once::new();

/// Set up the logger for the tests
pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .init();
    });
}

/// Build a canonical (server-assigned) message.
pub fn canonical(id: &str, conversation: &str, sender: &str, content: &str) -> Message {
    let at = Utc::now();
    Message {
        id: id.to_string(),
        conversation_id: conversation.to_string(),
        sender_id: sender.to_string(),
        content: content.to_string(),
        message_type: MessageType::Text,
        status: MessageStatus::Sent,
        created_at: at,
        updated_at: at,
    }
}

/// Build a history page of `count` messages, oldest first, with creation
/// times spaced one second apart starting at `start_index`.
pub fn history_page(conversation: &str, start_index: usize, count: usize) -> Vec<Message> {
    (0..count)
        .map(|i| {
            let n = start_index + i;
            let at = Utc::now() - ChronoDuration::hours(1) + ChronoDuration::seconds(n as i64);
            Message {
                id: format!("hist-{}", n),
                conversation_id: conversation.to_string(),
                sender_id: "alice".to_string(),
                content: format!("history message {}", n),
                message_type: MessageType::Text,
                status: MessageStatus::Sent,
                created_at: at,
                updated_at: at,
            }
        })
        .collect()
}

/// What the scripted history API should answer next.
pub enum Scripted {
    Page(Vec<Message>),
    Unauthorized,
    Transient(String),
}

/// `HistoryApi` double driven by a script of responses. Once the script
/// runs out it answers with empty pages. Records every (skip, take) pair
/// and can delay responses to force request overlap.
pub struct MockHistoryApi {
    script: Mutex<VecDeque<Scripted>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<(usize, usize)>>,
    delay: Mutex<Option<Duration>>,
}

impl MockHistoryApi {
    pub fn new() -> Arc<Self> {
        Arc::new(MockHistoryApi {
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            delay: Mutex::new(None),
        })
    }

    pub fn push(&self, response: Scripted) {
        self.script.lock().unwrap().push_back(response);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<(usize, usize)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HistoryApi for MockHistoryApi {
    async fn fetch_page(
        &self,
        _conversation_id: &str,
        skip: usize,
        take: usize,
    ) -> Result<Vec<Message>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push((skip, take));

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Page(messages)) => Ok(messages),
            Some(Scripted::Unauthorized) => Err(FetchError::Unauthorized),
            Some(Scripted::Transient(reason)) => Err(FetchError::Transient(reason)),
            None => Ok(Vec::new()),
        }
    }
}

/// Transport wrapper that fails `emit` for configured event names while
/// delegating everything else to the loopback underneath. Exercises the
/// teardown paths where the socket dies mid-publish.
pub struct FaultyTransport {
    inner: Arc<LoopbackTransport>,
    fail_on: Mutex<HashSet<String>>,
}

impl FaultyTransport {
    pub fn new(inner: Arc<LoopbackTransport>) -> Arc<Self> {
        Arc::new(FaultyTransport {
            inner,
            fail_on: Mutex::new(HashSet::new()),
        })
    }

    /// Make every subsequent emit of `event` fail.
    pub fn fail_emit_of(&self, event: &str) {
        self.fail_on.lock().unwrap().insert(event.to_string());
    }
}

#[async_trait]
impl EventTransport for FaultyTransport {
    async fn open(&self, credential: &str) -> Result<()> {
        self.inner.open(credential).await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    async fn emit(&self, event: &str, payload: Value) -> Result<()> {
        if self.fail_on.lock().unwrap().contains(event) {
            return Err(anyhow!("socket write failed for '{}'", event));
        }
        self.inner.emit(event, payload).await
    }

    fn subscribe(&self, event: &str, handler: EventHandler) -> SubscriptionToken {
        self.inner.subscribe(event, handler)
    }

    fn unsubscribe(&self, event: &str, token: SubscriptionToken) {
        self.inner.unsubscribe(event, token)
    }
}

/// A fully wired client over the loopback transport and scripted API.
pub struct Harness {
    pub transport: Arc<LoopbackTransport>,
    pub api: Arc<MockHistoryApi>,
    pub client: Arc<ChatClient>,
}

impl Harness {
    /// Connected client with no conversation selected.
    pub async fn connected(current_user: &str) -> Self {
        setup_logging();
        let transport = Arc::new(LoopbackTransport::new());
        let api = MockHistoryApi::new();
        let client = ChatClient::new(
            transport.clone(),
            api.clone(),
            current_user,
            LifecycleHooks::new(),
        );
        client
            .connect("test-bearer-token")
            .await
            .expect("loopback connect cannot fail");
        Harness {
            transport,
            api,
            client,
        }
    }

    /// Connected client with `conversation_id` open (empty initial page).
    pub async fn in_conversation(current_user: &str, conversation_id: &str) -> Self {
        let harness = Self::connected(current_user).await;
        harness
            .client
            .open_conversation(conversation_id)
            .await
            .expect("open_conversation over loopback cannot fail");
        harness
    }

    /// Deliver a canonical server echo of a sent message.
    pub fn echo(&self, message: &Message) {
        self.transport.inject(
            chatlink::chat::events::MESSAGE_RECEIVED,
            serde_json::to_value(message).unwrap(),
        );
    }
}
