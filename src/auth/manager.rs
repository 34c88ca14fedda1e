use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::Client;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::refresh::{self, TokenEndpoint};
use super::store::TokenStore;
use super::types::{
    is_fresh, CredentialConfig, PersistedToken, TokenRecord, TokenSnapshot, TokenSource,
    TokenState,
};
use crate::error::AuthError;

/// Resolves the credential configuration on first use
pub type CredentialLoader = Box<dyn Fn() -> Result<CredentialConfig, AuthError> + Send + Sync>;

/// Credentials plus the token record, present once initialization succeeded
struct Session {
    credentials: CredentialConfig,
    record: TokenRecord,
}

/// Last known state, readable while a refresh holds the session lock
#[derive(Debug, Clone)]
struct Status {
    state: TokenState,
    source: Option<TokenSource>,
    expires_at: Option<chrono::DateTime<Utc>>,
    has_access_token: bool,
}

/// State shared with the background refresh task
struct Shared {
    /// Diagnostic mirror of the session; never held across an await
    status: RwLock<Status>,

    /// Refresh-token rotations observed by this process
    rotations: AtomicU64,

    /// Durable backing shared with other processes
    store: Arc<dyn TokenStore>,

    /// Token endpoint settings
    endpoint: TokenEndpoint,

    /// HTTP client for refresh requests
    client: Client,
}

/// Token manager
/// Owns the single service-level token pair for this process: lazy
/// initialization from the store, refresh with seed fallback, rotation
/// tracking and write-through persistence.
///
/// A refresh runs on its own task that owns the session lock, so a caller
/// dropped mid-refresh cannot lose a rotated refresh token.
pub struct TokenManager {
    /// Initialized session; `None` until first use
    session: Arc<Mutex<Option<Session>>>,

    shared: Arc<Shared>,

    /// Credential source
    loader: CredentialLoader,
}

impl TokenManager {
    /// Create a new TokenManager. Nothing is loaded until the first token request.
    pub fn new(
        endpoint: TokenEndpoint,
        store: Arc<dyn TokenStore>,
        loader: CredentialLoader,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            session: Arc::new(Mutex::new(None)),
            shared: Arc::new(Shared {
                status: RwLock::new(Status {
                    state: TokenState::Uninitialized,
                    source: None,
                    expires_at: None,
                    has_access_token: false,
                }),
                rotations: AtomicU64::new(0),
                store,
                endpoint,
                client,
            }),
            loader,
        })
    }

    /// Create a TokenManager with fixed credentials and an in-memory store
    #[cfg(any(test, feature = "test-utils"))]
    pub fn new_for_testing(token_url: String, credentials: CredentialConfig) -> Result<Self> {
        Self::new(
            TokenEndpoint {
                url: token_url,
                redirect_uri: None,
            },
            Arc::new(super::store::MemoryTokenStore::new()),
            Box::new(move || -> Result<CredentialConfig, AuthError> { Ok(credentials.clone()) }),
            Duration::from_secs(10),
        )
    }

    /// Get a valid access token, refreshing if the cached one is stale.
    /// Never returns a token within the expiry skew.
    pub async fn get_access_token(&self) -> Result<String, AuthError> {
        let mut slot = self.session.clone().lock_owned().await;
        let session = self.ensure_initialized(&mut slot)?;

        if let Some(token) = session.record.valid_access_token(Utc::now()) {
            return Ok(token.to_string());
        }

        tracing::debug!("Cached access token missing or stale, refreshing");
        self.spawn_refresh(slot).await
    }

    /// Drop the cached access token and refresh unconditionally.
    /// Used after the banking API rejected a token.
    pub async fn force_refresh(&self) -> Result<String, AuthError> {
        let mut slot = self.session.clone().lock_owned().await;
        let session = self.ensure_initialized(&mut slot)?;

        tracing::info!("Forcing access token refresh");
        session.record.access_token = None;
        self.spawn_refresh(slot).await
    }

    /// Current state without touching the network or any secret
    pub fn snapshot(&self) -> TokenSnapshot {
        let status = self
            .shared
            .status
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let state = match (status.state, status.expires_at) {
            (TokenState::Valid, Some(exp)) if !is_fresh(exp, Utc::now()) => TokenState::Stale,
            (state, _) => state,
        };

        TokenSnapshot {
            state,
            source: status.source,
            expires_at: status.expires_at.filter(|_| status.has_access_token),
            has_access_token: status.has_access_token,
            rotations: self.shared.rotations.load(Ordering::Relaxed),
        }
    }

    fn ensure_initialized<'a>(
        &self,
        slot: &'a mut Option<Session>,
    ) -> Result<&'a mut Session, AuthError> {
        if slot.is_none() {
            let session = self.initialize()?;
            self.shared.publish(&session.record, None);
            *slot = Some(session);
        }

        slot.as_mut()
            .ok_or_else(|| AuthError::Config("Token manager is not initialized".to_string()))
    }

    /// Load credentials and adopt whatever the store holds
    fn initialize(&self) -> Result<Session, AuthError> {
        let credentials = (self.loader)()?;
        let now = Utc::now();

        let stored = match self.shared.store.load() {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read token store, treating it as empty");
                None
            }
        };

        let record = match stored.filter(|blob| !blob.refresh_token.is_empty()) {
            Some(blob) => {
                let expires_at = blob.expires_at();
                let access_token = blob
                    .access_token
                    .filter(|t| !t.is_empty())
                    .filter(|_| is_fresh(expires_at, now));

                tracing::info!(
                    adopted_access_token = access_token.is_some(),
                    expires_at = %expires_at.to_rfc3339(),
                    "Loaded token from store"
                );

                TokenRecord {
                    access_token,
                    refresh_token: blob.refresh_token,
                    expires_at,
                    source: TokenSource::Stored,
                }
            }
            None => {
                let seed = credentials.seed_refresh_token.clone().ok_or_else(|| {
                    AuthError::Config(
                        "No stored refresh token and SB1_REFRESH_TOKEN is not set".to_string(),
                    )
                })?;

                tracing::info!("No stored token, starting from configured refresh token");

                TokenRecord {
                    access_token: None,
                    refresh_token: seed,
                    expires_at: now,
                    source: TokenSource::Seed,
                }
            }
        };

        Ok(Session {
            credentials,
            record,
        })
    }

    /// Hand the locked session to a refresh task and wait for it.
    /// Dropping this future leaves the task running until the result is
    /// reconciled and persisted.
    async fn spawn_refresh(
        &self,
        slot: OwnedMutexGuard<Option<Session>>,
    ) -> Result<String, AuthError> {
        let shared = self.shared.clone();
        tokio::spawn(async move { shared.refresh(slot).await })
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Token refresh task did not complete");
                AuthError::Transport(format!("token refresh task failed: {}", e))
            })?
    }
}

impl Shared {
    /// Run the refresh grant and reconcile the result into the session
    async fn refresh(
        &self,
        mut slot: OwnedMutexGuard<Option<Session>>,
    ) -> Result<String, AuthError> {
        let session = slot
            .as_mut()
            .ok_or_else(|| AuthError::Config("Token manager is not initialized".to_string()))?;

        self.set_state(TokenState::Refreshing);

        let refresh_token = if session.record.refresh_token.is_empty() {
            session
                .credentials
                .seed_refresh_token
                .clone()
                .unwrap_or_default()
        } else {
            session.record.refresh_token.clone()
        };

        if refresh_token.is_empty() {
            self.set_state(TokenState::RefreshFailed);
            return Err(AuthError::Config("No refresh token available".to_string()));
        }

        let outcome = match refresh::refresh_with_fallback(
            &self.client,
            &self.endpoint,
            &session.credentials,
            &refresh_token,
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "Token refresh failed");
                self.set_state(TokenState::RefreshFailed);
                return Err(e);
            }
        };

        let sent = outcome.sent_refresh_token;
        let rotated = outcome
            .data
            .refresh_token
            .filter(|returned| *returned != sent);

        let source = match (&rotated, outcome.used_seed_fallback) {
            (Some(_), _) => TokenSource::Rotated,
            (None, true) => TokenSource::Seed,
            (None, false) => session.record.source,
        };

        if let Some(new_refresh_token) = &rotated {
            self.rotations.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                event = "refresh_token_rotated",
                previous_len = sent.len(),
                incoming_len = new_refresh_token.len(),
                "Refresh token rotated by authorization server; persisting the new value. \
                 Update SB1_REFRESH_TOKEN if other deployments share this credential"
            );
        }

        session.record = TokenRecord {
            access_token: Some(outcome.data.access_token.clone()),
            refresh_token: rotated.unwrap_or(sent),
            expires_at: outcome.data.expires_at,
            source,
        };

        let now = Utc::now();
        if let Err(e) = self
            .store
            .save(&PersistedToken::from_record(&session.record, now))
        {
            tracing::error!(
                error = %e,
                "Failed to persist refreshed token; continuing with in-memory token"
            );
        }

        self.publish(&session.record, Some(TokenState::Valid));

        Ok(outcome.data.access_token)
    }

    fn publish(&self, record: &TokenRecord, state: Option<TokenState>) {
        let mut status = self.status.write().unwrap_or_else(PoisonError::into_inner);
        status.state = state.unwrap_or(if record.access_token.is_some() {
            TokenState::Valid
        } else {
            TokenState::Stale
        });
        status.source = Some(record.source);
        status.expires_at = Some(record.expires_at);
        status.has_access_token = record.access_token.is_some();
    }

    fn set_state(&self, state: TokenState) {
        self.status
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .state = state;
    }
}
