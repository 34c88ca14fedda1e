// Authentication types

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Safety margin subtracted from a token's nominal expiry
pub const EXPIRY_SKEW_SECS: i64 = 30;

/// Lifetime assumed when the token endpoint omits `expires_in`
pub const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Longest lifetime accepted from the token endpoint (one year)
pub const MAX_EXPIRES_IN_SECS: i64 = 365 * 24 * 3600;

/// Where the current refresh token came from. Diagnostic only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenSource {
    /// Operator-configured refresh token
    Seed,
    /// Read back from the token store
    Stored,
    /// Issued by the authorization server in place of the one we sent
    Rotated,
}

impl std::fmt::Display for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenSource::Seed => write!(f, "seed"),
            TokenSource::Stored => write!(f, "stored"),
            TokenSource::Rotated => write!(f, "rotated"),
        }
    }
}

/// In-memory token state owned by the token manager
#[derive(Debug, Clone)]
pub struct TokenRecord {
    pub access_token: Option<String>,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub source: TokenSource,
}

impl TokenRecord {
    /// Return the access token if it is usable at `now` (outside the skew window)
    pub fn valid_access_token(&self, now: DateTime<Utc>) -> Option<&str> {
        self.access_token
            .as_deref()
            .filter(|token| !token.is_empty())
            .filter(|_| is_fresh(self.expires_at, now))
    }
}

/// `now < expires_at - SKEW`
pub fn is_fresh(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now < expires_at - Duration::seconds(EXPIRY_SKEW_SECS)
}

/// Client credentials and seed refresh token, immutable per process
#[derive(Clone, PartialEq)]
pub struct CredentialConfig {
    pub client_id: String,
    pub client_secret: String,
    pub seed_refresh_token: Option<String>,
}

impl std::fmt::Debug for CredentialConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field(
                "seed_refresh_token",
                &self.seed_refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Token blob as written to the token store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedToken {
    pub access_token: Option<String>,
    pub refresh_token: String,
    /// Epoch milliseconds
    pub expires_at: i64,
    /// Epoch milliseconds
    pub saved_at: i64,
}

impl PersistedToken {
    pub fn from_record(record: &TokenRecord, saved_at: DateTime<Utc>) -> Self {
        Self {
            access_token: record.access_token.clone(),
            refresh_token: record.refresh_token.clone(),
            expires_at: record.expires_at.timestamp_millis(),
            saved_at: saved_at.timestamp_millis(),
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.expires_at)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Token endpoint response (success and error share one shape)
#[derive(Debug, Default, Deserialize)]
pub struct RefreshResponse {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    /// Usually a number, occasionally a numeric string
    pub expires_in: Option<Value>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl RefreshResponse {
    /// `expires_in` in seconds, defaulting when absent or not numeric.
    /// Zero and negative values are kept; they mean the token is already expired.
    pub fn expires_in_secs(&self) -> i64 {
        let parsed = match &self.expires_in {
            Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
            _ => None,
        };
        parsed
            .map(|secs| secs.min(MAX_EXPIRES_IN_SECS))
            .unwrap_or(DEFAULT_EXPIRES_IN_SECS)
    }

    /// Absolute expiry for a token issued at `now`
    pub fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let secs = self.expires_in_secs().max(0);
        now.checked_add_signed(Duration::seconds(secs))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Token data from a successful refresh
#[derive(Debug, Clone)]
pub struct TokenData {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Observable token manager state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    Uninitialized,
    Valid,
    Stale,
    Refreshing,
    RefreshFailed,
}

/// Secret-free view of the token manager for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct TokenSnapshot {
    pub state: TokenState,
    pub source: Option<TokenSource>,
    pub expires_at: Option<DateTime<Utc>>,
    pub has_access_token: bool,
    pub rotations: u64,
}
