// Connection management for the chat transport
// Owns one live session per credential and the publish path to the server.

use anyhow::Result;
use log::{debug, info, warn};
use serde_json::Value;
use std::sync::{Arc, Mutex};

use super::transport::EventTransport;

/// Informational lifecycle callbacks. These never drive reliability logic;
/// the embedding application uses them for connection badges and the like.
#[derive(Clone, Default)]
pub struct LifecycleHooks {
    pub on_connect: Option<Arc<dyn Fn() + Send + Sync>>,
    pub on_disconnect: Option<Arc<dyn Fn() + Send + Sync>>,
    pub on_error: Option<Arc<dyn Fn(&str) + Send + Sync>>,
}

impl LifecycleHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_on_connect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(f));
        self
    }

    pub fn with_on_disconnect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(f));
        self
    }

    pub fn with_on_error(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }
}

pub struct ConnectionManager {
    transport: Arc<dyn EventTransport>,
    credential: Mutex<Option<String>>,
    hooks: LifecycleHooks,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn EventTransport>, hooks: LifecycleHooks) -> Self {
        ConnectionManager {
            transport,
            credential: Mutex::new(None),
            hooks,
        }
    }

    /// Establish a session for the given credential. Any prior session is
    /// fully released first; this is the only path allowed to destroy a
    /// session, so listeners cannot be orphaned on a half-dead socket.
    pub async fn connect(&self, credential: &str) -> Result<()> {
        let had_session = self.credential.lock().unwrap().is_some();
        if had_session {
            info!("Releasing previous transport session before reconnect");
            self.transport.close().await?;
            if let Some(hook) = &self.hooks.on_disconnect {
                hook();
            }
        }

        self.transport.open(credential).await?;
        *self.credential.lock().unwrap() = Some(credential.to_string());
        info!("Transport session established");
        if let Some(hook) = &self.hooks.on_connect {
            hook();
        }
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<()> {
        if self.credential.lock().unwrap().take().is_none() {
            debug!("No active session to disconnect");
            return Ok(());
        }
        self.transport.close().await?;
        info!("Transport session closed");
        if let Some(hook) = &self.hooks.on_disconnect {
            hook();
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_open()
    }

    /// Current credential, if a session was established.
    pub fn credential(&self) -> Option<String> {
        self.credential.lock().unwrap().clone()
    }

    /// Publish an event to the server. Dropped silently when disconnected,
    /// not queued; callers own surfacing "not connected" to the user.
    pub async fn publish(&self, event: &str, payload: Value) -> Result<()> {
        if !self.is_connected() {
            warn!("Dropping '{}' publish while disconnected", event);
            return Ok(());
        }
        debug!("Publishing '{}'", event);
        self.transport.emit(event, payload).await
    }

    /// Raw subscribe capability. Reserved for the SubscriptionRegistry so
    /// every handler registration stays discoverable at teardown.
    pub fn raw_transport(&self) -> Arc<dyn EventTransport> {
        Arc::clone(&self.transport)
    }

    /// Forward a server-reported error to the informational hook.
    pub fn report_error(&self, message: &str) {
        if let Some(hook) = &self.hooks.on_error {
            hook(message);
        }
    }
}
