use anyhow::{Context, Result};
use std::sync::Arc;

mod auth;
mod config;
mod error;
mod http_client;
mod middleware;
mod models;
mod routes;
mod sanitize;

use config::{Config, LogFormat};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let config = Config::load()?;
    config.validate()?;

    init_tracing(&config);

    tracing::info!("SpareBank 1 gateway starting...");
    tracing::info!(
        "Server configured: {}:{}",
        config.server_host,
        config.server_port
    );

    // Token store: durable when a path is configured
    let store: Arc<dyn auth::TokenStore> = match &config.token_db_file {
        Some(path) => {
            let store = auth::SqliteTokenStore::new(path).with_context(|| {
                format!("Failed to open token store at {}", path.display())
            })?;
            tracing::info!("Token store: {}", store.path().display());
            Arc::new(store)
        }
        None => {
            tracing::warn!(
                "SB1_TOKEN_DB_FILE is not set; tokens are kept in memory and rotated \
                 refresh tokens are lost on restart"
            );
            Arc::new(auth::MemoryTokenStore::new())
        }
    };

    // Initialize token manager
    let token_manager = Arc::new(auth::TokenManager::new(
        auth::TokenEndpoint {
            url: config.token_url.clone(),
            redirect_uri: config.redirect_uri.clone(),
        },
        store,
        Box::new(auth::credentials::load_from_env),
        config.request_timeout(),
    )?);

    // Test authentication by getting a token
    match token_manager.get_access_token().await {
        Ok(_) => {
            let snapshot = token_manager.snapshot();
            tracing::info!(
                source = ?snapshot.source,
                expires_at = ?snapshot.expires_at,
                "Authentication successful"
            );
        }
        Err(e) => {
            tracing::error!("Authentication failed: {}", e);
            tracing::warn!(
                "Server will start but API requests will fail without valid credentials"
            );
        }
    }

    // Initialize HTTP client
    let http_client = Arc::new(http_client::BankHttpClient::new(
        token_manager.clone(),
        &config.api_base_url,
        config.request_timeout(),
    )?);
    tracing::info!("HTTP client initialized for {}", config.api_base_url);

    let app_state = routes::AppState {
        token_manager,
        http_client,
        config: Arc::new(config.clone()),
    };

    // Build the application with routes and middleware
    let app = build_app(app_state);

    // Bind to configured host and port
    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    // Start server with graceful shutdown
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Initialize logging with the configured level and format. `RUST_LOG` wins.
fn init_tracing(config: &Config) {
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Build the application with all routes and middleware
fn build_app(state: routes::AppState) -> axum::Router {
    use axum::Router;

    Router::new()
        .merge(routes::health_routes())
        .merge(routes::api_routes(state.clone()))
        .merge(routes::debug_routes(state))
        // Outermost first: request log → trace → CORS
        .layer(middleware::cors_layer())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(middleware::request_log_middleware))
}

/// Handle graceful shutdown signal
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown...");
        },
    }
}
