//! Transport layer for talking to the remote backend.

use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use super::error::TransportError;
use super::protocol::{PushAck, PushRequest, Snapshot};

/// Network access to the remote backend.
///
/// Abstracted so the sync engine can run against HTTP or an in-memory double.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Fetches the combined snapshot of every collection.
    async fn fetch_snapshot(&self, token: Option<&str>) -> Result<Snapshot, TransportError>;

    /// Submits one batch of logs.
    async fn push_logs(
        &self,
        token: Option<&str>,
        request: &PushRequest,
    ) -> Result<PushAck, TransportError>;
}

/// Source of the bearer credential and the current user.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn bearer_token(&self) -> Option<String>;

    fn user_id(&self) -> Option<String>;
}

/// Credentials fixed at construction, usually from config.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    api_key: Option<String>,
    user_id: Option<String>,
}

impl StaticCredentials {
    pub fn new(api_key: Option<String>, user_id: Option<String>) -> Self {
        Self { api_key, user_id }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn bearer_token(&self) -> Option<String> {
        self.api_key.clone()
    }

    fn user_id(&self) -> Option<String> {
        self.user_id.clone()
    }
}

/// JSON-over-HTTP transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    server_url: String,
    pull_path: String,
    push_path: String,
}

impl HttpTransport {
    pub fn new(
        server_url: impl Into<String>,
        pull_path: impl Into<String>,
        push_path: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            server_url: server_url.into(),
            pull_path: pull_path.into(),
            push_path: push_path.into(),
        }
    }

    /// Returns the server URL.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    fn build_http_url(&self, path: &str) -> String {
        // Convert ws(s) to http(s) if needed
        let base_url = if let Some(rest) = self.server_url.strip_prefix("ws://") {
            format!("http://{}", rest)
        } else if let Some(rest) = self.server_url.strip_prefix("wss://") {
            format!("https://{}", rest)
        } else if !self.server_url.starts_with("http://")
            && !self.server_url.starts_with("https://")
        {
            format!("http://{}", self.server_url)
        } else {
            self.server_url.clone()
        };

        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        format!("{}{}", base_url.trim_end_matches('/'), path)
    }

    fn authorize(
        &self,
        request: reqwest::RequestBuilder,
        token: Option<&str>,
    ) -> reqwest::RequestBuilder {
        match token {
            Some(token) => request.header("Authorization", format!("Bearer {}", token)),
            None => request,
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(TransportError::Unauthorized(format!("{}: {}", status, body)))
            }
            _ => Err(TransportError::Status {
                status: status.as_u16(),
                body,
            }),
        }
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn fetch_snapshot(&self, token: Option<&str>) -> Result<Snapshot, TransportError> {
        let url = self.build_http_url(&self.pull_path);
        debug!("GET {}", url);

        let response = self
            .authorize(self.client.get(&url), token)
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        response
            .json::<Snapshot>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }

    async fn push_logs(
        &self,
        token: Option<&str>,
        request: &PushRequest,
    ) -> Result<PushAck, TransportError> {
        let url = self.build_http_url(&self.push_path);
        debug!("POST {} ({} logs)", url, request.len());

        let response = self
            .authorize(self.client.post(&url), token)
            .json(request)
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(PushAck::default());
        }
        serde_json::from_str(&body).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

/// In-memory transport for tests and offline hosts.
///
/// Serves a configurable snapshot, records every push, and can be switched
/// into a failing state.
#[derive(Debug, Default)]
pub struct MockTransport {
    snapshot: Mutex<Snapshot>,
    fail_with: Mutex<Option<String>>,
    pushes: Mutex<Vec<PushRequest>>,
    tokens: Mutex<Vec<Option<String>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the snapshot served by `fetch_snapshot`.
    pub fn set_snapshot(&self, snapshot: Snapshot) {
        *lock(&self.snapshot) = snapshot;
    }

    /// Makes every call fail with a network error until cleared with `None`.
    pub fn set_failure(&self, message: Option<&str>) {
        *lock(&self.fail_with) = message.map(str::to_string);
    }

    /// Every push request received so far.
    pub fn pushes(&self) -> Vec<PushRequest> {
        lock(&self.pushes).clone()
    }

    /// Bearer tokens seen so far, one per call.
    pub fn tokens(&self) -> Vec<Option<String>> {
        lock(&self.tokens).clone()
    }

    fn check(&self, token: Option<&str>) -> Result<(), TransportError> {
        lock(&self.tokens).push(token.map(str::to_string));
        match lock(&self.fail_with).as_ref() {
            Some(message) => Err(TransportError::Network(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SyncTransport for MockTransport {
    async fn fetch_snapshot(&self, token: Option<&str>) -> Result<Snapshot, TransportError> {
        self.check(token)?;
        Ok(lock(&self.snapshot).clone())
    }

    async fn push_logs(
        &self,
        token: Option<&str>,
        request: &PushRequest,
    ) -> Result<PushAck, TransportError> {
        self.check(token)?;
        lock(&self.pushes).push(request.clone());
        Ok(PushAck {
            processed: Some(request.len()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn transport(url: &str) -> HttpTransport {
        HttpTransport::new(url, "/sync/pull", "sync/push")
    }

    #[test]
    fn test_build_http_url() {
        assert_eq!(
            transport("http://localhost:8080").build_http_url("/sync/pull"),
            "http://localhost:8080/sync/pull"
        );
        assert_eq!(
            transport("wss://fit.example.com/").build_http_url("/sync/pull"),
            "https://fit.example.com/sync/pull"
        );
        assert_eq!(
            transport("ws://localhost:8080").build_http_url("sync/push"),
            "http://localhost:8080/sync/push"
        );
        assert_eq!(
            transport("localhost:8080").build_http_url("/sync/pull"),
            "http://localhost:8080/sync/pull"
        );
    }

    #[tokio::test]
    async fn test_static_credentials() {
        let creds = StaticCredentials::new(Some("key".into()), Some("u1".into()));
        assert_eq!(creds.bearer_token().await.as_deref(), Some("key"));
        assert_eq!(creds.user_id().as_deref(), Some("u1"));

        assert!(StaticCredentials::default().bearer_token().await.is_none());
    }

    #[tokio::test]
    async fn test_mock_transport_records_and_fails() {
        let mock = MockTransport::new();
        mock.set_snapshot(Snapshot::default().with("meals", json!([])));

        let snapshot = mock.fetch_snapshot(Some("t")).await.unwrap();
        assert!(snapshot.collections.contains_key("meals"));

        mock.set_failure(Some("offline"));
        let err = mock
            .push_logs(None, &PushRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Network(ref m) if m == "offline"));
        assert!(mock.pushes().is_empty());
        assert_eq!(mock.tokens(), vec![Some("t".to_string()), None]);
    }
}
