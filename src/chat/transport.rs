// Transport abstraction for the bidirectional event socket
// The reliability layer only consumes open/close/emit/subscribe primitives;
// the real socket implementation lives with the embedding application.

use anyhow::Result;
use async_trait::async_trait;
use log::debug;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

/// Inbound event handlers run synchronously on the dispatch path. Handlers
/// that need to wait arm their own timers instead of blocking dispatch.
pub type EventHandler = std::sync::Arc<dyn Fn(Value) + Send + Sync>;

/// Token returned by `subscribe`, used to detach exactly that handler.
pub type SubscriptionToken = u64;

#[async_trait]
pub trait EventTransport: Send + Sync {
    /// Open a session authenticated by the opaque credential. Implementations
    /// must drop any previous session first.
    async fn open(&self, credential: &str) -> Result<()>;

    async fn close(&self) -> Result<()>;

    fn is_open(&self) -> bool;

    /// Emit a named event with a JSON payload to the server.
    async fn emit(&self, event: &str, payload: Value) -> Result<()>;

    /// Attach an inbound handler for a named event. Raw capability: only the
    /// SubscriptionRegistry should call this, so teardown can find every
    /// handler again.
    fn subscribe(&self, event: &str, handler: EventHandler) -> SubscriptionToken;

    fn unsubscribe(&self, event: &str, token: SubscriptionToken);
}

/// In-process transport used by the integration tests and demos. Outbound
/// events are recorded instead of hitting the network; inbound events are
/// injected by the test driving the scenario.
pub struct LoopbackTransport {
    open: AtomicBool,
    next_token: AtomicU64,
    handlers: Mutex<HashMap<String, Vec<(SubscriptionToken, EventHandler)>>>,
    sent: Mutex<Vec<(String, Value)>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        LoopbackTransport {
            open: AtomicBool::new(false),
            next_token: AtomicU64::new(1),
            handlers: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Deliver an inbound event to every handler subscribed to it, in
    /// registration order.
    pub fn inject(&self, event: &str, payload: Value) {
        let handlers: Vec<EventHandler> = {
            let map = self.handlers.lock().unwrap();
            match map.get(event) {
                Some(list) => list.iter().map(|(_, h)| h.clone()).collect(),
                None => Vec::new(),
            }
        };
        debug!("Injecting '{}' into {} handler(s)", event, handlers.len());
        for handler in handlers {
            handler(payload.clone());
        }
    }

    /// Everything emitted so far, oldest first.
    pub fn sent_events(&self) -> Vec<(String, Value)> {
        self.sent.lock().unwrap().clone()
    }

    /// How many times a given event name was emitted.
    pub fn sent_count(&self, event: &str) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == event)
            .count()
    }

    /// Number of live handler registrations across all events.
    pub fn handler_count(&self) -> usize {
        self.handlers.lock().unwrap().values().map(Vec::len).sum()
    }

    /// Simulate the socket dropping without a clean close.
    pub fn force_offline(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventTransport for LoopbackTransport {
    async fn open(&self, _credential: &str) -> Result<()> {
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn emit(&self, event: &str, payload: Value) -> Result<()> {
        self.sent.lock().unwrap().push((event.to_string(), payload));
        Ok(())
    }

    fn subscribe(&self, event: &str, handler: EventHandler) -> SubscriptionToken {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        self.handlers
            .lock()
            .unwrap()
            .entry(event.to_string())
            .or_default()
            .push((token, handler));
        token
    }

    fn unsubscribe(&self, event: &str, token: SubscriptionToken) {
        let mut map = self.handlers.lock().unwrap();
        if let Some(list) = map.get_mut(event) {
            list.retain(|(t, _)| *t != token);
            if list.is_empty() {
                map.remove(event);
            }
        }
    }
}
