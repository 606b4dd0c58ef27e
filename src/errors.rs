// Error taxonomy and user-visible notice handling
// Transient notices auto-clear after a short delay, terminal ones persist
// until the next user action acknowledges them.

use log::debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

/// How long a transient user-visible notice stays on screen.
pub const NOTICE_AUTOCLEAR: Duration = Duration::from_secs(3);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("no conversation selected")]
    NoConversation,
    #[error("message is empty")]
    EmptyMessage,
    #[error("message exceeds {limit} characters")]
    MessageTooLong { limit: usize },
    #[error("you are sending messages too quickly")]
    RateLimited,
    #[error("not connected to the chat server")]
    NotConnected,
    #[error("message could not be delivered")]
    DeliveryTimeout,
    #[error("not authorized")]
    Unauthorized,
    #[error("could not load messages: {0}")]
    Fetch(String),
}

impl ChatError {
    /// Terminal errors persist on screen; everything else auto-clears.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatError::DeliveryTimeout | ChatError::Unauthorized)
    }
}

/// The single user-visible error banner. Components post errors here instead
/// of crashing the pipeline; the UI polls `current()` for display.
pub struct NoticeBoard {
    current: Mutex<Option<ChatError>>,
    clear_timer: Mutex<Option<JoinHandle<()>>>,
    // Bumped on every post and acknowledge; a clear task only fires if the
    // notice it was armed for is still the current one.
    epoch: AtomicU64,
}

impl NoticeBoard {
    pub fn new() -> Arc<Self> {
        Arc::new(NoticeBoard {
            current: Mutex::new(None),
            clear_timer: Mutex::new(None),
            epoch: AtomicU64::new(0),
        })
    }

    /// Post an error banner. Transient errors arm a fresh auto-clear timer,
    /// replacing any previous one; terminal errors cancel the timer and stay
    /// until `acknowledge` is called.
    ///
    /// The stale timer is aborted before the new notice is stored, and the
    /// clear task checks the epoch, so an already-running stale task cannot
    /// wipe the notice it was not armed for.
    pub fn post(self: &Arc<Self>, error: ChatError) {
        debug!("Posting user notice: {}", error);
        let terminal = error.is_terminal();
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;

        let mut timer = self.clear_timer.lock().unwrap();
        if let Some(handle) = timer.take() {
            handle.abort();
        }
        *self.current.lock().unwrap() = Some(error);

        if !terminal {
            let board = Arc::clone(self);
            *timer = Some(tokio::spawn(async move {
                tokio::time::sleep(NOTICE_AUTOCLEAR).await;
                if board.epoch.load(Ordering::SeqCst) == epoch {
                    board.current.lock().unwrap().take();
                }
            }));
        }
    }

    /// Clear the banner on the next user action.
    pub fn acknowledge(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.current.lock().unwrap().take();
        if let Some(handle) = self.clear_timer.lock().unwrap().take() {
            handle.abort();
        }
    }

    pub fn current(&self) -> Option<ChatError> {
        self.current.lock().unwrap().clone()
    }
}
