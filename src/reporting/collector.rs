//! Remote error collector client
//!
//! `POST {base}/api/errors` accepts a serialized [`ErrorRecord`];
//! `PATCH {base}/api/errors/{id}/status` accepts `{"status": ...}`.

use futures::future::{BoxFuture, FutureExt};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use super::record::{ErrorRecord, ErrorStatus};
use crate::storage::KeyValueStore;

/// Path of the collector endpoint, relative to the base URL
pub const ERRORS_PATH: &str = "/api/errors";

/// Store key holding the bearer token
pub const TOKEN_KEY: &str = "token";

/// Errors that can occur when talking to the collector
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// HTTP request failed before a response arrived
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The collector answered with a non-2xx status
    #[error("collector rejected request with status {0}")]
    Status(StatusCode),

    /// Shutdown was requested while the request was in flight
    #[error("delivery cancelled by shutdown")]
    Cancelled,
}

/// Destination for error records
pub trait Collector: Send + Sync + fmt::Debug {
    /// Delivers one record
    fn send<'a>(&'a self, record: &'a ErrorRecord) -> BoxFuture<'a, Result<(), DeliveryError>>;

    /// Changes the status of a record already held by the collector
    fn update_status<'a>(
        &'a self,
        id: &'a str,
        status: ErrorStatus,
    ) -> BoxFuture<'a, Result<(), DeliveryError>>;
}

#[derive(Debug, Serialize)]
struct StatusPatch {
    status: ErrorStatus,
}

/// Collector reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpCollector {
    /// HTTP client for making requests
    http_client: Client,
    /// Base URL of the collector (allows override for testing)
    base_url: String,
    /// Fixed bearer token; when unset the token is looked up in `store`
    token: Option<String>,
    store: Option<Arc<dyn KeyValueStore>>,
}

impl HttpCollector {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http_client: Client, base_url: impl Into<String>) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            store: None,
        }
    }

    /// Sends `Authorization: Bearer <token>` on every request
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Reads the bearer token from the store at request time
    pub fn with_token_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn errors_url(&self) -> String {
        format!("{}{}", self.base_url, ERRORS_PATH)
    }

    fn status_url(&self, id: &str) -> String {
        format!("{}{}/{}/status", self.base_url, ERRORS_PATH, id)
    }

    fn current_token(&self) -> Option<String> {
        if self.token.is_some() {
            return self.token.clone();
        }
        let store = self.store.as_ref()?;
        match store.get(TOKEN_KEY) {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(err) => {
                tracing::debug!(error = %err, "bearer token unavailable");
                None
            }
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.current_token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn execute(&self, request: RequestBuilder) -> Result<(), DeliveryError> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Status(status))
        }
    }
}

impl Collector for HttpCollector {
    fn send<'a>(&'a self, record: &'a ErrorRecord) -> BoxFuture<'a, Result<(), DeliveryError>> {
        async move {
            let request = self.http_client.post(self.errors_url()).json(record);
            self.execute(request).await
        }
        .boxed()
    }

    fn update_status<'a>(
        &'a self,
        id: &'a str,
        status: ErrorStatus,
    ) -> BoxFuture<'a, Result<(), DeliveryError>> {
        async move {
            let request = self
                .http_client
                .patch(self.status_url(id))
                .json(&StatusPatch { status });
            self.execute(request).await
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn test_urls_ignore_trailing_slash() {
        let collector = HttpCollector::new("http://localhost:3000/");
        assert_eq!(collector.errors_url(), "http://localhost:3000/api/errors");
        assert_eq!(
            collector.status_url("17-abc"),
            "http://localhost:3000/api/errors/17-abc/status"
        );
    }

    #[test]
    fn test_fixed_token_wins_over_store() {
        let store = Arc::new(MemoryStore::new());
        store.set(TOKEN_KEY, "from-store").unwrap();
        let collector = HttpCollector::new("http://x")
            .with_token_store(store)
            .with_token("fixed");

        assert_eq!(collector.current_token().as_deref(), Some("fixed"));
    }

    #[test]
    fn test_token_read_from_store() {
        let store = Arc::new(MemoryStore::new());
        let collector = HttpCollector::new("http://x").with_token_store(store.clone());
        assert!(collector.current_token().is_none());

        store.set(TOKEN_KEY, "late-login").unwrap();
        assert_eq!(collector.current_token().as_deref(), Some("late-login"));
    }

    #[test]
    fn test_status_patch_body() {
        let body = serde_json::to_string(&StatusPatch {
            status: ErrorStatus::Resolved,
        })
        .unwrap();
        assert_eq!(body, r#"{"status":"resolved"}"#);
    }
}
