//! JSON-over-HTTP remote client.

use std::time::Duration;

use reqwest::StatusCode;

use super::{PushMode, ReachabilityCache, RemoteClient, RemoteError, RemoteId, RemoteRecord, RemoteResult};
use crate::config::SyncSettings;
use crate::error::{Error, Result};
use crate::util::{compact_text, is_http_url, normalize_text_option};

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, serde::Deserialize)]
struct PushResponse {
    id: RemoteId,
}

/// Remote client speaking the notesync HTTP API
///
/// - `GET  {base}/health`
/// - `GET  {base}/v1/records?since=<cursor>`
/// - `PUT  {base}/v1/records/{id}` (`?force=true` to overwrite)
pub struct HttpRemoteClient {
    base_url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
    reachability: ReachabilityCache,
}

impl std::fmt::Debug for HttpRemoteClient {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemoteClient")
            .field("base_url", &self.base_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl HttpRemoteClient {
    pub fn new(
        base_url: impl Into<String>,
        auth_token: Option<String>,
        request_timeout: Duration,
        reachability_ttl: Duration,
    ) -> Result<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|error| Error::Config(format!("failed to build HTTP client: {error}")))?;

        Ok(Self {
            base_url,
            auth_token: normalize_text_option(auth_token),
            client,
            reachability: ReachabilityCache::new(reachability_ttl),
        })
    }

    /// Build a client from resolved sync settings
    pub fn from_settings(settings: &SyncSettings) -> Result<Self> {
        Self::new(
            settings.api_base_url(),
            settings.auth_token.clone(),
            settings.request_timeout(),
            settings.reachability_ttl(),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth_token.as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn probe(&self) -> bool {
        let result = self
            .client
            .get(format!("{}/health", self.base_url))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await;

        match result {
            Ok(response) => response.status().is_success(),
            Err(error) => {
                tracing::debug!("Reachability probe failed: {error}");
                false
            }
        }
    }

    /// Transport failures mean the cached "reachable" answer is stale
    fn note_failure(&self, error: &RemoteError) {
        if matches!(error, RemoteError::Transport(_)) {
            self.reachability.set(false);
        }
    }

    async fn send_push(&self, record: &RemoteRecord, mode: PushMode) -> RemoteResult<RemoteId> {
        let mut request = self
            .client
            .put(format!("{}/v1/records/{}", self.base_url, record.id))
            .header(reqwest::header::ACCEPT, "application/json")
            .json(record);
        if mode == PushMode::Overwrite {
            request = request.query(&[("force", "true")]);
        }

        let response = self.authorize(request).send().await?;
        let status = response.status();
        if status.is_success() {
            let body = response.json::<PushResponse>().await?;
            return Ok(body.id);
        }

        let body = response.text().await.unwrap_or_default();
        Err(error_from_status(status, &body))
    }

    async fn send_pull(&self, since: i64) -> RemoteResult<Vec<RemoteRecord>> {
        let request = self
            .client
            .get(format!("{}/v1/records", self.base_url))
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&[("since", since)]);

        let response = self.authorize(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<Vec<RemoteRecord>>().await?);
        }

        let body = response.text().await.unwrap_or_default();
        Err(error_from_status(status, &body))
    }
}

impl RemoteClient for HttpRemoteClient {
    async fn is_reachable(&self) -> bool {
        if let Some(cached) = self.reachability.get() {
            return cached;
        }
        let reachable = self.probe().await;
        self.reachability.set(reachable);
        reachable
    }

    async fn push(&self, record: &RemoteRecord, mode: PushMode) -> RemoteResult<RemoteId> {
        let result = self.send_push(record, mode).await;
        if let Err(error) = &result {
            self.note_failure(error);
        }
        result
    }

    async fn pull(&self, since: i64) -> RemoteResult<Vec<RemoteRecord>> {
        let result = self.send_pull(since).await;
        if let Err(error) = &result {
            self.note_failure(error);
        }
        result
    }
}

/// Map a non-success response onto the remote error taxonomy
fn error_from_status(status: StatusCode, body: &str) -> RemoteError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Unauthorized,
        StatusCode::CONFLICT => match serde_json::from_str::<RemoteRecord>(body) {
            Ok(remote) => RemoteError::Conflict {
                remote: Box::new(remote),
            },
            Err(error) => {
                tracing::warn!(
                    "409 without a usable server copy ({error}): {}",
                    compact_text(body)
                );
                RemoteError::ServerError(status.as_u16())
            }
        },
        _ => RemoteError::ServerError(status.as_u16()),
    }
}

fn normalize_base_url(raw: String) -> Result<String> {
    let url = normalize_text_option(Some(raw))
        .ok_or_else(|| Error::Config("remote base URL must not be empty".to_string()))?;
    if is_http_url(&url) {
        Ok(url.trim_end_matches('/').to_string())
    } else {
        Err(Error::Config(
            "remote base URL must include http:// or https://".to_string(),
        ))
    }
}
