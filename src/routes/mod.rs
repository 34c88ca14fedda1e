use axum::{
    extract::{Path, RawQuery, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::auth::credentials::{self, CLIENT_ID_VARS, CLIENT_SECRET_VARS, REFRESH_TOKEN_VARS};
use crate::auth::TokenManager;
use crate::config::Config;
use crate::error::ApiError;
use crate::http_client::{BankHttpClient, Query, CSV_ACCEPT};
use crate::models::{normalize_accounts, AccountList, TransactionParams};

/// Application version from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub token_manager: Arc<TokenManager>,
    pub http_client: Arc<BankHttpClient>,
    pub config: Arc<Config>,
}

/// Health check routes
pub fn health_routes() -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
}

/// Dashboard API routes
pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/accounts", get(accounts_handler))
        .route("/api/accounts/raw", get(accounts_raw_handler))
        .route("/api/transactions", get(transactions_handler))
        .route(
            "/api/transactions/classified",
            get(classified_transactions_handler),
        )
        .route("/api/transactions/export", get(export_transactions_handler))
        .route(
            "/api/transactions/:id/details",
            get(transaction_details_handler),
        )
        .with_state(state)
}

/// Diagnostic routes. Never expose secret values.
pub fn debug_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/debug/credentials", get(debug_credentials_handler))
        .route("/api/debug/token", get(debug_token_handler))
        .with_state(state)
}

/// GET / - Simple health check
async fn root_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "SpareBank 1 gateway is running",
        "version": VERSION
    }))
}

/// GET /health - Liveness probe
async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": VERSION
    }))
}

/// GET /api/accounts - Accounts in dashboard shape
async fn accounts_handler(State(state): State<AppState>) -> Result<Json<AccountList>, ApiError> {
    let payload = state.http_client.get_json("/accounts", &Query::new()).await?;
    let list = normalize_accounts(&payload);
    tracing::debug!(count = list.accounts.len(), "Normalized accounts");
    Ok(Json(list))
}

/// GET /api/accounts/raw - Upstream accounts payload unmodified
async fn accounts_raw_handler(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let payload = state.http_client.get_json("/accounts", &Query::new()).await?;
    Ok(Json(payload))
}

/// GET /api/transactions
async fn transactions_handler(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
) -> Result<Json<Value>, ApiError> {
    let params = TransactionParams::parse(raw.as_deref());
    let payload = state
        .http_client
        .get_json("/transactions", &params.to_query())
        .await?;
    Ok(Json(payload))
}

/// GET /api/transactions/classified
async fn classified_transactions_handler(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
) -> Result<Json<Value>, ApiError> {
    let params = TransactionParams::parse(raw.as_deref());
    let payload = state
        .http_client
        .get_json("/transactions/classified", &params.to_classified_query())
        .await?;
    Ok(Json(payload))
}

/// GET /api/transactions/:id/details
async fn transaction_details_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if id.trim().is_empty() {
        return Err(ApiError::ValidationError("id is required".to_string()));
    }

    let path = format!("/transactions/{}/details", encode_path_segment(&id));
    let payload = state.http_client.get_json(&path, &Query::new()).await?;
    Ok(Json(payload))
}

/// GET /api/transactions/export - CSV download
async fn export_transactions_handler(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
) -> Result<Response, ApiError> {
    let export = TransactionParams::parse(raw.as_deref()).require_export()?;

    let csv = state
        .http_client
        .request("/transactions/export", &export.to_query(), CSV_ACCEPT, true)
        .await?
        .into_bytes();

    tracing::info!(bytes = csv.len(), "Exported transactions");

    Ok((
        [
            (header::CONTENT_TYPE, CSV_ACCEPT.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", export.filename()),
            ),
        ],
        csv,
    )
        .into_response())
}

/// GET /api/debug/credentials - Which alias is picked, presence and length only
async fn debug_credentials_handler() -> Json<Value> {
    let lookup = |name: &str| std::env::var(name).ok();
    Json(json!({
        "clientId": credentials::describe_aliases(lookup, &CLIENT_ID_VARS),
        "clientSecret": credentials::describe_aliases(lookup, &CLIENT_SECRET_VARS),
        "refreshToken": credentials::describe_aliases(lookup, &REFRESH_TOKEN_VARS),
    }))
}

/// GET /api/debug/token - Token manager state without secrets
async fn debug_token_handler(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.token_manager.snapshot();
    let store = match state.config.token_db_file {
        Some(_) => "sqlite",
        None => "memory",
    };

    Json(json!({
        "token": snapshot,
        "store": store,
    }))
}

/// Percent-encode one path segment, keeping only unreserved characters
fn encode_path_segment(segment: &str) -> String {
    segment
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{:02X}", b),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{CredentialConfig, MemoryTokenStore, PersistedToken, TokenEndpoint};
    use crate::error::AuthError;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use std::time::Duration;
    use tower::util::ServiceExt;

    fn create_test_state(server_url: &str) -> AppState {
        let now = chrono::Utc::now().timestamp_millis();
        let store = MemoryTokenStore::with_token(&PersistedToken {
            access_token: Some("AT1".to_string()),
            refresh_token: "RT1".to_string(),
            expires_at: now + 3_600_000,
            saved_at: now,
        })
        .unwrap();

        let token_manager = Arc::new(
            TokenManager::new(
                TokenEndpoint {
                    url: format!("{}/oauth/token", server_url),
                    redirect_uri: None,
                },
                Arc::new(store),
                Box::new(|| -> Result<CredentialConfig, AuthError> {
                    Ok(CredentialConfig {
                        client_id: "id".to_string(),
                        client_secret: "secret".to_string(),
                        seed_refresh_token: None,
                    })
                }),
                Duration::from_secs(10),
            )
            .unwrap(),
        );

        let http_client = Arc::new(
            BankHttpClient::new(
                token_manager.clone(),
                &format!("{}/personal/banking/", server_url),
                Duration::from_secs(10),
            )
            .unwrap(),
        );

        let config = Arc::new(Config {
            server_host: "127.0.0.1".to_string(),
            server_port: 8000,
            api_base_url: format!("{}/personal/banking/", server_url),
            token_url: format!("{}/oauth/token", server_url),
            redirect_uri: None,
            token_db_file: None,
            http_request_timeout: 10,
            log_level: "info".to_string(),
            log_format: crate::config::LogFormat::Text,
        });

        AppState {
            token_manager,
            http_client,
            config,
        }
    }

    fn app(state: AppState) -> Router {
        Router::new()
            .merge(health_routes())
            .merge(api_routes(state.clone()))
            .merge(debug_routes(state))
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Vec<(String, String)>, Vec<u8>) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, body.to_vec())
    }

    fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
        headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_encode_path_segment() {
        assert_eq!(encode_path_segment("abc-123_X.~"), "abc-123_X.~");
        assert_eq!(encode_path_segment("a/b c"), "a%2Fb%20c");
        assert_eq!(encode_path_segment("ø"), "%C3%B8");
    }

    #[tokio::test]
    async fn test_root_handler() {
        let json = root_handler().await;
        assert_eq!(json.0["status"], "ok");
        assert_eq!(json.0["version"], VERSION);
    }

    #[tokio::test]
    async fn test_health_handler() {
        let json = health_handler().await;
        assert_eq!(json.0["status"], "healthy");
        assert!(json.0["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_accounts_are_normalized() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/personal/banking/accounts")
            .match_header("authorization", "Bearer AT1")
            .with_status(200)
            .with_body(
                json!({"accounts": [{
                    "key": "k1",
                    "name": "Brukskonto",
                    "accountNumber": "12345678901",
                    "balance": 100.5,
                    "currencyCode": "NOK"
                }]})
                .to_string(),
            )
            .create_async()
            .await;

        let (status, _, body) = get(app(create_test_state(&server.url())), "/api/accounts").await;

        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["accounts"][0]["id"], "k1");
        assert_eq!(json["accounts"][0]["accountNumberMasked"], "**** 8901");
        assert_eq!(json["accounts"][0]["balance"], 100.5);
    }

    #[tokio::test]
    async fn test_raw_accounts_pass_through() {
        let mut server = mockito::Server::new_async().await;
        let upstream = json!({"accounts": [{"key": "k1", "extra": {"nested": true}}]});
        server
            .mock("GET", "/personal/banking/accounts")
            .with_status(200)
            .with_body(upstream.to_string())
            .create_async()
            .await;

        let (status, _, body) =
            get(app(create_test_state(&server.url())), "/api/accounts/raw").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_slice::<Value>(&body).unwrap(), upstream);
    }

    #[tokio::test]
    async fn test_transactions_forward_comma_separated_keys() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/personal/banking/transactions")
            .match_query(mockito::Matcher::Regex(
                "^accountKey=a&accountKey=b&fromDate=2024-01-01$".to_string(),
            ))
            .with_status(200)
            .with_body(json!({"transactions": []}).to_string())
            .create_async()
            .await;

        let (status, _, _) = get(
            app(create_test_state(&server.url())),
            "/api/transactions?accountKey=a,b&fromDate=2024-01-01&toDate=",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_classified_forwards_merchant_logo() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/personal/banking/transactions/classified")
            .match_query(mockito::Matcher::Regex(
                "^accountKey=a&enrichWithMerchantLogo=true$".to_string(),
            ))
            .with_status(200)
            .with_body(json!({"transactions": []}).to_string())
            .create_async()
            .await;

        let (status, _, _) = get(
            app(create_test_state(&server.url())),
            "/api/transactions/classified?accountKey=a&enrichWithMerchantLogo=true",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_transaction_details() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/personal/banking/transactions/tx-1/details")
            .with_status(200)
            .with_body(json!({"id": "tx-1"}).to_string())
            .create_async()
            .await;

        let (status, _, body) = get(
            app(create_test_state(&server.url())),
            "/api/transactions/tx-1/details",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_slice::<Value>(&body).unwrap()["id"], "tx-1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_export_requires_params() {
        let server = mockito::Server::new_async().await;
        let (status, _, body) = get(
            app(create_test_state(&server.url())),
            "/api/transactions/export?accountKey=a",
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], true);
        assert_eq!(json["code"], "VALIDATION_ERROR");
        assert_eq!(json["status"], 400);
    }

    #[tokio::test]
    async fn test_export_returns_csv_attachment() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/personal/banking/transactions/export")
            .match_header("accept", CSV_ACCEPT)
            .match_query(mockito::Matcher::Regex(
                "^accountKey=a1&fromDate=2024-01-01&toDate=2024-01-31$".to_string(),
            ))
            .with_status(200)
            .with_body("date;amount\n")
            .create_async()
            .await;

        let (status, headers, body) = get(
            app(create_test_state(&server.url())),
            "/api/transactions/export?accountKey=a1&fromDate=2024-01-01&toDate=2024-01-31",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(header(&headers, "content-type"), Some(CSV_ACCEPT));
        assert_eq!(
            header(&headers, "content-disposition"),
            Some("attachment; filename=\"transactions_a1_2024-01-01_2024-01-31.csv\"")
        );
        assert_eq!(body, b"date;amount\n");
    }

    #[tokio::test]
    async fn test_upstream_error_renders_error_shape() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/personal/banking/accounts")
            .with_status(503)
            .with_body(json!({"message": "maintenance"}).to_string())
            .create_async()
            .await;

        let (status, _, body) = get(app(create_test_state(&server.url())), "/api/accounts").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            json,
            json!({
                "error": true,
                "message": "maintenance",
                "code": "UPSTREAM_ERROR",
                "status": 503
            })
        );
    }

    #[tokio::test]
    async fn test_non_get_is_method_not_allowed() {
        let server = mockito::Server::new_async().await;
        let response = app(create_test_state(&server.url()))
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/accounts")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_debug_token_has_no_secrets() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/personal/banking/accounts")
            .with_status(200)
            .with_body(json!({"accounts": []}).to_string())
            .create_async()
            .await;

        let state = create_test_state(&server.url());
        get(app(state.clone()), "/api/accounts").await;
        let (status, _, body) = get(app(state), "/api/debug/token").await;

        assert_eq!(status, StatusCode::OK);
        let text = String::from_utf8(body).unwrap();
        assert!(!text.contains("AT1"));
        assert!(!text.contains("RT1"));
        let json: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["token"]["state"], "valid");
        assert_eq!(json["token"]["source"], "stored");
        assert_eq!(json["store"], "memory");
    }

    #[tokio::test]
    async fn test_debug_credentials_shape() {
        let server = mockito::Server::new_async().await;
        let (status, _, body) = get(
            app(create_test_state(&server.url())),
            "/api/debug/credentials",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_slice(&body).unwrap();
        for secret in ["clientId", "clientSecret", "refreshToken"] {
            assert!(json[secret]["pick"].is_string());
            assert!(json[secret]["raw"].is_object());
            assert!(json[secret]["cleaned"].is_object());
        }
        assert!(json["refreshToken"]["raw"]["SB1_REFRESH_TOKEN"]["len"].is_u64());
    }
}
