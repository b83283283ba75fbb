use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::api::ApiError;
use crate::results::QueryResponse;

#[async_trait]
pub trait QueryBackend {
    async fn submit_query(&self, query: &str) -> Result<QueryResponse, ApiError>;

    async fn fetch_history(&self) -> Result<Vec<String>, ApiError>;
}

#[async_trait]
impl<T> QueryBackend for Arc<T>
where
    T: QueryBackend + Send + Sync,
{
    async fn submit_query(&self, query: &str) -> Result<QueryResponse, ApiError> {
        self.as_ref().submit_query(query).await
    }

    async fn fetch_history(&self) -> Result<Vec<String>, ApiError> {
        self.as_ref().fetch_history().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutorState {
    #[default]
    Idle,
    Submitting,
}

/// Local rejections raised before any network call is made.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuerySubmitError {
    #[error("query text must not be empty")]
    EmptyQuery,
    #[error("no active data source connection")]
    NotConnected,
    #[error("a query is already in flight")]
    Busy,
}

/// Lifecycle of one in-flight query: `Idle → Submitting → Idle`. Submission
/// is serialized per executor: while not idle, new submissions are rejected
/// locally. Entering `Submitting` clears the previous result and error, so
/// the presentation never shows a stale result beside a new outcome.
#[derive(Debug)]
pub struct QueryExecutor<B> {
    backend: B,
    state: ExecutorState,
    last_response: Option<QueryResponse>,
    last_error: Option<String>,
    history: Vec<String>,
}

impl<B: QueryBackend> QueryExecutor<B> {
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            state: ExecutorState::Idle,
            last_response: None,
            last_error: None,
            history: Vec::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> ExecutorState {
        self.state
    }

    #[must_use]
    pub fn can_submit(&self) -> bool {
        self.state == ExecutorState::Idle
    }

    #[must_use]
    pub fn last_response(&self) -> Option<&QueryResponse> {
        self.last_response.as_ref()
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    #[must_use]
    pub fn history(&self) -> &[String] {
        &self.history
    }

    /// Submits one query. Backend failures are not an `Err`: they resolve
    /// the executor back to idle with a user-facing message stored in
    /// `last_error`. `Err` is reserved for local validation.
    pub async fn submit(
        &mut self,
        query_text: &str,
        connected: bool,
    ) -> Result<Option<&QueryResponse>, QuerySubmitError> {
        let query = query_text.trim();
        if query.is_empty() {
            return Err(QuerySubmitError::EmptyQuery);
        }
        if !connected {
            return Err(QuerySubmitError::NotConnected);
        }
        if self.state != ExecutorState::Idle {
            return Err(QuerySubmitError::Busy);
        }

        self.state = ExecutorState::Submitting;
        self.last_response = None;
        self.last_error = None;

        match self.backend.submit_query(query).await {
            Ok(response) => {
                self.last_response = Some(response);
                // Best effort: a failed history read must not disturb the
                // result already stored.
                if let Ok(history) = self.backend.fetch_history().await {
                    self.history = history;
                }
            }
            Err(error) => {
                self.last_error = Some(error.user_message());
            }
        }

        self.state = ExecutorState::Idle;
        Ok(self.last_response.as_ref())
    }
}
