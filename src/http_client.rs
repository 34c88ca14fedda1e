use anyhow::{Context, Result};
use bytes::Bytes;
use reqwest::{header, Client, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::auth::TokenManager;
use crate::error::ApiError;
use crate::sanitize::sanitize_body;

/// Default base for the SpareBank 1 personal banking API
pub const DEFAULT_API_BASE: &str = "https://api.sparebank1.no/personal/banking/";

/// Versioned JSON media type expected by the banking API
pub const JSON_ACCEPT: &str = "application/vnd.sparebank1.v1+json; charset=utf-8";

/// Media type for the CSV export
pub const CSV_ACCEPT: &str = "application/csv;charset=UTF-8";

/// Ordered query parameters. Multi-valued parameters are repeated keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pairs: Vec<(String, String)>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one `key=value` pair; empty values are skipped
    pub fn push(mut self, key: &str, value: impl ToString) -> Self {
        let value = value.to_string();
        if !value.is_empty() {
            self.pairs.push((key.to_string(), value));
        }
        self
    }

    /// Add a pair only when a value is present
    pub fn push_opt(self, key: &str, value: Option<impl ToString>) -> Self {
        match value {
            Some(value) => self.push(key, value),
            None => self,
        }
    }

    /// Add the key once per value
    pub fn push_all<I, V>(self, key: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: ToString,
    {
        values
            .into_iter()
            .fold(self, |query, value| query.push(key, value))
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Response body of a successful call
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Binary(Bytes),
}

impl Payload {
    pub fn into_json(self) -> Result<Value, ApiError> {
        match self {
            Payload::Json(value) => Ok(value),
            Payload::Binary(_) => Err(ApiError::Internal(anyhow::anyhow!(
                "Expected JSON payload, got binary"
            ))),
        }
    }

    pub fn into_bytes(self) -> Bytes {
        match self {
            Payload::Binary(bytes) => bytes,
            Payload::Json(value) => Bytes::from(value.to_string()),
        }
    }
}

/// Where the retry protocol is: first try, or the single retry after a forced refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptPhase {
    Attempt,
    Retry,
}

/// Result of one HTTP exchange
enum AttemptOutcome {
    Done(Payload),
    Rejected(StatusCode),
}

/// HTTP client for the banking API with token injection and a single
/// re-authentication retry
pub struct BankHttpClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Token manager
    token_manager: Arc<TokenManager>,

    /// Base URL all paths are appended to
    base_url: String,
}

impl BankHttpClient {
    /// Create a new HTTP client
    pub fn new(
        token_manager: Arc<TokenManager>,
        base_url: &str,
        request_timeout: Duration,
    ) -> Result<Self> {
        Url::parse(base_url).with_context(|| format!("Invalid API base URL: {}", base_url))?;

        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            token_manager,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Join base and path and append the query
    pub fn build_url(&self, path: &str, query: &Query) -> Result<Url, ApiError> {
        let joined = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut url = Url::parse(&joined)
            .map_err(|e| ApiError::ValidationError(format!("Invalid request path {}: {}", path, e)))?;

        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.pairs());
        }

        Ok(url)
    }

    /// GET `path` with the current bearer token.
    ///
    /// A 401/403 triggers exactly one forced token refresh and one retry; a
    /// second rejection surfaces as `Unauthorized`. Timeouts and other
    /// failures are never retried.
    pub async fn request(
        &self,
        path: &str,
        query: &Query,
        accept: &str,
        expect_binary: bool,
    ) -> Result<Payload, ApiError> {
        let url = self.build_url(path, query)?;
        tracing::debug!(url = %url, accept = accept, "Sending banking API request");

        let mut phase = AttemptPhase::Attempt;
        let mut token = self.token_manager.get_access_token().await?;

        loop {
            match self.send_once(&url, &token, accept, expect_binary).await? {
                AttemptOutcome::Done(payload) => return Ok(payload),
                AttemptOutcome::Rejected(status) => match phase {
                    AttemptPhase::Attempt => {
                        tracing::warn!(
                            status = status.as_u16(),
                            url = %url,
                            "Banking API rejected token, forcing refresh and retrying once"
                        );
                        token = self.token_manager.force_refresh().await?;
                        phase = AttemptPhase::Retry;
                    }
                    AttemptPhase::Retry => {
                        tracing::error!(
                            status = status.as_u16(),
                            url = %url,
                            "Banking API rejected freshly refreshed token"
                        );
                        return Err(ApiError::Unauthorized {
                            status: status.as_u16(),
                        });
                    }
                },
            }
        }
    }

    /// Convenience wrapper for JSON endpoints
    pub async fn get_json(&self, path: &str, query: &Query) -> Result<Value, ApiError> {
        self.request(path, query, JSON_ACCEPT, false)
            .await?
            .into_json()
    }

    async fn send_once(
        &self,
        url: &Url,
        token: &str,
        accept: &str,
        expect_binary: bool,
    ) -> Result<AttemptOutcome, ApiError> {
        let response = self
            .client
            .get(url.clone())
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(header::ACCEPT, accept)
            .send()
            .await
            .map_err(|e| classify_transport_error(e, url))?;

        let status = response.status();
        tracing::debug!(status = %status, "Received banking API response");

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Ok(AttemptOutcome::Rejected(status));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| classify_transport_error(e, url))?;

        if !status.is_success() {
            let message = error_message(status, &body);
            tracing::error!(
                status = status.as_u16(),
                url = %url,
                response_body = %sanitize_body(&body),
                "Banking API request failed with error response"
            );
            return Err(ApiError::UpstreamError {
                status: status.as_u16(),
                message,
            });
        }

        if expect_binary {
            return Ok(AttemptOutcome::Done(Payload::Binary(body)));
        }

        let json = serde_json::from_slice(&body).map_err(|e| {
            tracing::error!(
                url = %url,
                response_body = %sanitize_body(&body),
                "Banking API returned a non-JSON body"
            );
            ApiError::Internal(anyhow::anyhow!("Failed to parse banking API response: {}", e))
        })?;

        Ok(AttemptOutcome::Done(Payload::Json(json)))
    }
}

/// Best available human message for an error response
fn error_message(status: StatusCode, body: &[u8]) -> String {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|json| {
            ["message", "error_description", "error"]
                .iter()
                .find_map(|field| json.get(field).and_then(|v| v.as_str()).map(str::to_string))
        })
        .filter(|m| !m.is_empty())
        .or_else(|| status.canonical_reason().map(str::to_string))
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
}

fn classify_transport_error(e: reqwest::Error, url: &Url) -> ApiError {
    // Categorize the error for better debugging
    let error_kind = if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connection_failed"
    } else if e.is_body() {
        "body_error"
    } else if e.is_decode() {
        "decode_error"
    } else {
        "unknown"
    };

    tracing::warn!(
        error_kind = error_kind,
        error = %e,
        url = %url,
        "Banking API request error"
    );

    if e.is_timeout() {
        ApiError::Timeout
    } else {
        ApiError::Transport(format!("{} (kind: {})", e, error_kind))
    }
}
