// Token refresh logic

use chrono::Utc;
use reqwest::Client;

use super::types::{CredentialConfig, RefreshResponse, TokenData};
use crate::error::AuthError;
use crate::sanitize::sanitize_body;

/// Default SpareBank 1 token endpoint
pub const DEFAULT_TOKEN_URL: &str = "https://api.sparebank1.no/oauth/token";

/// Where and how to run the refresh grant
#[derive(Debug, Clone)]
pub struct TokenEndpoint {
    pub url: String,
    /// Registered redirect URI, sent along when the provider insists on it
    pub redirect_uri: Option<String>,
}

impl Default for TokenEndpoint {
    fn default() -> Self {
        Self {
            url: DEFAULT_TOKEN_URL.to_string(),
            redirect_uri: None,
        }
    }
}

/// Result of a refresh including which refresh token was actually accepted
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub data: TokenData,
    pub sent_refresh_token: String,
    pub used_seed_fallback: bool,
}

/// Exchange one refresh token for an access token
pub async fn request_token(
    client: &Client,
    endpoint: &TokenEndpoint,
    creds: &CredentialConfig,
    refresh_token: &str,
) -> Result<TokenData, AuthError> {
    tracing::info!(
        url = %endpoint.url,
        refresh_token_len = refresh_token.len(),
        "Requesting access token via refresh grant"
    );

    let mut form = vec![
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
        ("client_id", creds.client_id.as_str()),
        ("client_secret", creds.client_secret.as_str()),
    ];
    if let Some(redirect_uri) = endpoint.redirect_uri.as_deref() {
        form.push(("redirect_uri", redirect_uri));
    }

    let response = client
        .post(&endpoint.url)
        .header("Content-Type", "application/x-www-form-urlencoded")
        .form(&form)
        .send()
        .await
        .map_err(classify_transport_error)?;

    let status = response.status();
    let body = response.bytes().await.map_err(classify_transport_error)?;
    let payload: Option<RefreshResponse> = serde_json::from_slice(&body).ok();

    tracing::info!(
        status = status.as_u16(),
        has_access_token = payload
            .as_ref()
            .and_then(|p| p.access_token.as_ref())
            .is_some(),
        expires_in = ?payload.as_ref().and_then(|p| p.expires_in.clone()),
        "Token endpoint responded"
    );

    if !status.is_success() {
        let sanitized = sanitize_body(&body);
        tracing::error!(
            status = status.as_u16(),
            body = %sanitized,
            "Refresh grant rejected"
        );

        let payload = payload.unwrap_or_default();
        let message = payload
            .error_description
            .clone()
            .or_else(|| payload.error.clone())
            .filter(|m| !m.is_empty())
            .or_else(|| Some(sanitized).filter(|m| !m.is_empty()))
            .or_else(|| status.canonical_reason().map(str::to_string))
            .unwrap_or_else(|| "unknown error".to_string());

        return Err(AuthError::TokenRequestFailed {
            status: status.as_u16(),
            code: payload
                .error
                .unwrap_or_else(|| "TOKEN_REQUEST_FAILED".to_string()),
            message,
        });
    }

    let payload = payload.ok_or_else(|| {
        AuthError::MalformedResponse("token endpoint returned a non-JSON body".to_string())
    })?;

    let access_token = payload
        .access_token
        .clone()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            AuthError::MalformedResponse("response does not contain access_token".to_string())
        })?;

    let expires_at = payload.expires_at(Utc::now());

    tracing::info!(expires_at = %expires_at.to_rfc3339(), "Access token refreshed");

    Ok(TokenData {
        access_token,
        refresh_token: payload.refresh_token.filter(|t| !t.is_empty()),
        expires_at,
    })
}

/// Refresh with one recovery attempt using the operator-configured seed token.
///
/// Only a client rejection (4xx) of a token that differs from the seed is
/// retried; network, 5xx and malformed responses are surfaced as-is.
pub async fn refresh_with_fallback(
    client: &Client,
    endpoint: &TokenEndpoint,
    creds: &CredentialConfig,
    refresh_token: &str,
) -> Result<RefreshOutcome, AuthError> {
    let err = match request_token(client, endpoint, creds, refresh_token).await {
        Ok(data) => {
            return Ok(RefreshOutcome {
                data,
                sent_refresh_token: refresh_token.to_string(),
                used_seed_fallback: false,
            })
        }
        Err(e) => e,
    };

    let seed = match creds.seed_refresh_token.as_deref() {
        Some(seed) if err.is_client_rejection() && seed != refresh_token => seed,
        _ => return Err(err),
    };

    tracing::warn!(
        error = %err,
        "Refresh token rejected, retrying once with the configured seed refresh token"
    );

    let data = request_token(client, endpoint, creds, seed).await?;
    Ok(RefreshOutcome {
        data,
        sent_refresh_token: seed.to_string(),
        used_seed_fallback: true,
    })
}

fn classify_transport_error(e: reqwest::Error) -> AuthError {
    if e.is_timeout() {
        AuthError::Timeout
    } else {
        AuthError::Transport(e.to_string())
    }
}
