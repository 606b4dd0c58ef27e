// Subscription registry for inbound transport handlers
// Every listener goes through here so teardown can detach all of them
// atomically. Reconnects rebuild the registry from scratch rather than
// appending to it, which is what keeps handlers from doubling up.

use log::debug;
use std::sync::{Arc, Mutex};

use super::transport::{EventHandler, EventTransport, SubscriptionToken};

pub struct SubscriptionRegistry {
    transport: Arc<dyn EventTransport>,
    active: Mutex<Vec<(String, SubscriptionToken)>>,
}

impl SubscriptionRegistry {
    pub fn new(transport: Arc<dyn EventTransport>) -> Self {
        SubscriptionRegistry {
            transport,
            active: Mutex::new(Vec::new()),
        }
    }

    /// Register a handler and remember its disposal token.
    pub fn subscribe(&self, event: &str, handler: EventHandler) {
        let token = self.transport.subscribe(event, handler);
        self.active.lock().unwrap().push((event.to_string(), token));
        debug!("Subscribed to '{}' (token {})", event, token);
    }

    /// Detach every registered handler exactly once and clear the list.
    /// Safe to call mid-retry or mid-fetch; late timer callbacks find their
    /// records gone and do nothing.
    pub fn teardown(&self) {
        let drained: Vec<(String, SubscriptionToken)> =
            self.active.lock().unwrap().drain(..).collect();
        debug!("Tearing down {} subscription(s)", drained.len());
        for (event, token) in drained {
            self.transport.unsubscribe(&event, token);
        }
    }

    pub fn len(&self) -> usize {
        self.active.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.lock().unwrap().is_empty()
    }
}

impl Drop for SubscriptionRegistry {
    fn drop(&mut self) {
        self.teardown();
    }
}
