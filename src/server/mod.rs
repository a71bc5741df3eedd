//! HTTP server: shared state, router assembly and the serve loop.

pub mod error;
pub mod routes;

use crate::core::cache::Cache;
use crate::core::config::AppConfig;
use crate::core::price::PriceProvider;
use crate::db::Database;
use crate::providers::yahoo_finance::YahooFinanceProvider;
use crate::security::cors::{CorsGuard, cors_layer, enforce_cors};
use crate::security::headers::apply_security_headers;
use crate::security::rate_limit::{RateLimitGuard, rate_limit};
use crate::security::{AuditLog, CorsPolicy, RateLimiter, SecurityHeaders};
use crate::store::KeyValueStore;
use anyhow::{Context, Result};
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware::from_fn_with_state;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Upload limit for the CSV import route.
pub const IMPORT_BODY_LIMIT: usize = 10 * 1024 * 1024;

// Quotes are cached briefly so repeated refreshes do not hammer the upstream.
const PRICE_CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub config: Arc<AppConfig>,
    pub audit: Arc<AuditLog>,
    pub api_limiter: Arc<RateLimiter>,
    pub import_limiter: Arc<RateLimiter>,
    pub prices: Arc<dyn PriceProvider>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(db: Arc<Database>, config: AppConfig, prices: Arc<dyn PriceProvider>) -> Self {
        let window = Duration::from_secs(config.rate_limit.window_secs);
        AppState {
            api_limiter: Arc::new(RateLimiter::new(
                "api",
                config.rate_limit.max_requests,
                window,
            )),
            import_limiter: Arc::new(RateLimiter::new(
                "import",
                config.rate_limit.import_max_requests,
                window,
            )),
            db,
            config: Arc::new(config),
            audit: Arc::new(AuditLog::default()),
            prices,
            started_at: Instant::now(),
        }
    }

    /// Opens the configured store and wires the Yahoo quote provider.
    pub async fn from_config(config: AppConfig) -> Result<Self> {
        let location = config.storage_location()?;
        let store = KeyValueStore::from_location(&location)?;
        let db = Database::open(Arc::new(store))
            .await
            .context("Failed to open database")?;
        let prices = YahooFinanceProvider::new(
            config.yahoo_base_url(),
            Cache::with_ttl(PRICE_CACHE_TTL),
        )?;
        Ok(AppState::new(Arc::new(db), config, Arc::new(prices)))
    }
}

/// Assembles the application. Layers, outermost first: request tracing, security
/// headers, CORS response headers, CORS enforcement and rate limiting (API routes
/// only), then the import body limit.
pub fn build_router(state: AppState) -> Result<Router> {
    let policy = Arc::new(CorsPolicy::from_config(&state.config));
    let security_headers = Arc::new(SecurityHeaders::from_config(&state.config)?);
    let trust_proxy = state.config.security.trust_proxy;

    let import = routes::import::router()
        .route_layer(from_fn_with_state(
            RateLimitGuard {
                limiter: Arc::clone(&state.import_limiter),
                audit: Arc::clone(&state.audit),
                trust_proxy,
            },
            rate_limit,
        ))
        .layer(DefaultBodyLimit::max(IMPORT_BODY_LIMIT));

    let api = routes::api_router()
        .merge(import)
        .layer(from_fn_with_state(
            RateLimitGuard {
                limiter: Arc::clone(&state.api_limiter),
                audit: Arc::clone(&state.audit),
                trust_proxy,
            },
            rate_limit,
        ))
        .layer(from_fn_with_state(
            CorsGuard {
                policy: Arc::clone(&policy),
                audit: Arc::clone(&state.audit),
                trust_proxy,
            },
            enforce_cors,
        ));

    Ok(Router::new()
        .merge(routes::health::router())
        .merge(api)
        .layer(cors_layer(policy))
        .layer(from_fn_with_state(security_headers, apply_security_headers))
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

pub async fn serve(config: AppConfig) -> Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!(
        "Starting divtrack in {} mode on {}",
        config.environment, addr
    );
    let state = AppState::from_config(config).await?;
    let db = Arc::clone(&state.db);
    let app = build_router(state)?;

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    db.flush()?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
