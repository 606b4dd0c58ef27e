// History pagination over the REST collaborator
// Pages are fetched ascending and prepended ahead of the live window.
// One fetch in flight at a time; a short page marks the conversation
// exhausted and stops further requests.

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

use super::window::ConversationWindow;
use crate::errors::{ChatError, NoticeBoard};
use crate::models::Message;

/// Fixed page size for history fetches.
pub const PAGE_SIZE: usize = 50;
/// Retries for the initial page load.
pub const INITIAL_LOAD_RETRIES: u32 = 3;
/// First backoff delay for initial-load retries.
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
/// Backoff ceiling for initial-load retries.
pub const MAX_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum FetchError {
    /// Fails fast, never retried.
    #[error("not authorized")]
    Unauthorized,
    #[error("history request failed: {0}")]
    Transient(String),
}

/// The REST history collaborator: one page of messages at an offset,
/// ordered ascending by creation time. The offset counts back from the
/// newest message; the server slices the ascending sequence accordingly.
#[async_trait]
pub trait HistoryApi: Send + Sync {
    async fn fetch_page(
        &self,
        conversation_id: &str,
        skip: usize,
        take: usize,
    ) -> Result<Vec<Message>, FetchError>;
}

#[derive(Deserialize)]
struct MessagesResponse {
    messages: Vec<Message>,
}

/// `HistoryApi` over HTTP with bearer-token auth.
pub struct RestHistoryApi {
    http: reqwest::Client,
    base_url: String,
    credential: String,
}

impl RestHistoryApi {
    pub fn new(base_url: &str, credential: &str) -> Self {
        RestHistoryApi {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            credential: credential.to_string(),
        }
    }
}

#[async_trait]
impl HistoryApi for RestHistoryApi {
    async fn fetch_page(
        &self,
        conversation_id: &str,
        skip: usize,
        take: usize,
    ) -> Result<Vec<Message>, FetchError> {
        let url = format!(
            "{}/chat/conversations/{}/messages",
            self.base_url, conversation_id
        );
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.credential)
            .query(&[
                ("skip", skip.to_string()),
                ("take", take.to_string()),
                ("orderBy", "asc".to_string()),
            ])
            .send()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;

        match response.status() {
            status if status.is_success() => {
                let body: MessagesResponse = response
                    .json()
                    .await
                    .map_err(|e| FetchError::Transient(e.to_string()))?;
                Ok(body.messages)
            }
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                Err(FetchError::Unauthorized)
            }
            status => Err(FetchError::Transient(format!(
                "unexpected status {}",
                status
            ))),
        }
    }
}

#[derive(Default)]
struct PagerState {
    in_flight: bool,
    exhausted: bool,
}

pub struct HistoryPager {
    api: Arc<dyn HistoryApi>,
    window: Arc<Mutex<ConversationWindow>>,
    notices: Arc<NoticeBoard>,
    state: Mutex<PagerState>,
}

impl HistoryPager {
    pub fn new(
        api: Arc<dyn HistoryApi>,
        window: Arc<Mutex<ConversationWindow>>,
        notices: Arc<NoticeBoard>,
    ) -> Self {
        HistoryPager {
            api,
            window,
            notices,
            state: Mutex::new(PagerState::default()),
        }
    }

    /// Load the newest page into a freshly-selected conversation. Transient
    /// failures retry with exponential backoff; authorization failures fail
    /// immediately and surface to the user.
    ///
    /// Holds the same in-flight guard as `load_older`, so a scroll-triggered
    /// fetch arriving mid-retry cannot request the same page twice.
    pub async fn load_initial(&self, conversation_id: &str) -> Result<(), ChatError> {
        {
            let mut state = self.state.lock().unwrap();
            if state.in_flight {
                debug!("load_initial skipped: fetch already in flight");
                return Ok(());
            }
            state.in_flight = true;
        }

        let result = self.run_initial(conversation_id).await;
        self.state.lock().unwrap().in_flight = false;
        result
    }

    async fn run_initial(&self, conversation_id: &str) -> Result<(), ChatError> {
        let mut backoff = INITIAL_BACKOFF;
        let mut last_error = String::new();

        for attempt in 0..=INITIAL_LOAD_RETRIES {
            match self.fetch_and_merge(conversation_id).await {
                Ok(added) => {
                    info!("Initial load merged {} message(s)", added);
                    return Ok(());
                }
                Err(FetchError::Unauthorized) => {
                    warn!("Initial load rejected: not authorized");
                    self.notices.post(ChatError::Unauthorized);
                    return Err(ChatError::Unauthorized);
                }
                Err(FetchError::Transient(reason)) => {
                    warn!(
                        "Initial load attempt {}/{} failed: {}",
                        attempt + 1,
                        INITIAL_LOAD_RETRIES + 1,
                        reason
                    );
                    last_error = reason;
                }
            }

            if attempt < INITIAL_LOAD_RETRIES {
                let jitter = Duration::from_millis(rand::random::<u64>() % 250);
                tokio::time::sleep(backoff + jitter).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }

        let error = ChatError::Fetch(last_error);
        self.notices.post(error.clone());
        Err(error)
    }

    /// Fetch the next page older than the earliest loaded message. No-op if
    /// a fetch is already in flight or a prior page signalled exhaustion.
    pub async fn load_older(&self, conversation_id: &str) {
        {
            let mut state = self.state.lock().unwrap();
            if state.in_flight {
                debug!("load_older skipped: fetch already in flight");
                return;
            }
            if state.exhausted {
                debug!("load_older skipped: history exhausted");
                return;
            }
            state.in_flight = true;
        }

        let result = self.fetch_and_merge(conversation_id).await;
        self.state.lock().unwrap().in_flight = false;

        match result {
            Ok(added) => debug!("load_older merged {} message(s)", added),
            Err(FetchError::Unauthorized) => self.notices.post(ChatError::Unauthorized),
            Err(FetchError::Transient(reason)) => {
                self.notices.post(ChatError::Fetch(reason));
            }
        }
    }

    /// One fetch-and-merge round. The offset is the currently loaded count
    /// plus one page, so each call walks one page further back from the
    /// newest message. A short page marks the conversation exhausted.
    async fn fetch_and_merge(&self, conversation_id: &str) -> Result<usize, FetchError> {
        let skip = self.window.lock().unwrap().len() + PAGE_SIZE;
        let page = self
            .api
            .fetch_page(conversation_id, skip, PAGE_SIZE)
            .await?;

        if page.len() < PAGE_SIZE {
            debug!(
                "Short page ({} < {}), marking history exhausted",
                page.len(),
                PAGE_SIZE
            );
            self.state.lock().unwrap().exhausted = true;
        }

        Ok(self.window.lock().unwrap().prepend_history(page))
    }

    pub fn is_exhausted(&self) -> bool {
        self.state.lock().unwrap().exhausted
    }

    /// Forget pagination progress; called on conversation switch.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.in_flight = false;
        state.exhausted = false;
    }
}
