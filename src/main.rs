//! Pinmap Backend
//!
//! Offline-first backend for the location bookmarking map: a versioned SQLite
//! record store behind a JSON API, plus a caching proxy that keeps the app
//! shell and map tiles usable without a network.

mod api;
mod cache;
mod config;
mod db;
mod errors;
mod fetch;
mod models;
mod router;

use std::future::IntoFuture;
use std::sync::Arc;

use axum::{
    routing::get,
    Router,
};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cache::CacheManager;
use config::{Config, LogFormat};
use db::LocationRepository;
use fetch::{Fetcher, HttpFetcher};
use router::RequestRouter;

/// Application state shared across all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<LocationRepository>,
    pub cache: CacheManager,
}

/// State of the proxy listener.
#[derive(Clone)]
pub struct ProxyState {
    pub router: RequestRouter,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    match config.log_format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }

    tracing::info!("Starting Pinmap Backend");
    tracing::info!("Data directory: {:?}", config.data_dir);
    tracing::info!("App origin: {}", config.app_origin);

    // Open the record store, migrating if the version moved
    let store = db::open_store(
        &config.data_dir,
        &config.store_name,
        config.store_version,
        &config.store_options(),
    )
    .await?;
    let repo = Arc::new(LocationRepository::new(store));

    // Install and activate this build's cache generation
    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(config.fetch_timeout)?);
    let cache = CacheManager::open(&config.data_dir, &config.cache_name()).await?;
    let report = cache.install(fetcher.as_ref(), &config.asset_manifest).await?;
    if !report.failed.is_empty() {
        tracing::warn!(
            "{} of {} assets are not available offline",
            report.failed.len(),
            config.asset_manifest.len()
        );
    }
    let removed = cache.activate().await?;
    if !removed.is_empty() {
        tracing::info!("Removed stale cache generations: {:?}", removed);
    }

    let router = RequestRouter::new(cache.clone(), fetcher, config.route_policy());

    let state = AppState {
        repo: repo.clone(),
        cache: cache.clone(),
    };
    let proxy_state = ProxyState {
        router: router.clone(),
    };

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Shutdown requested");
                    shutdown.cancel();
                }
                Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
            }
        }
    });

    // Start servers
    let api_listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!("API listening on {}", config.bind_addr);
    let proxy_listener = tokio::net::TcpListener::bind(config.proxy_addr).await?;
    tracing::info!("Proxy listening on {}", config.proxy_addr);

    let api = axum::serve(api_listener, create_router(state))
        .with_graceful_shutdown(shutdown.clone().cancelled_owned());
    let proxy = axum::serve(proxy_listener, create_proxy_router(proxy_state))
        .with_graceful_shutdown(shutdown.cancelled_owned());
    tokio::try_join!(api.into_future(), proxy.into_future())?;

    // Let background cache writes land before the pools go away
    router.shutdown().await;
    cache.close().await;
    repo.store().close().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

/// Create the API router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route(
            "/locations",
            get(api::list_locations).post(api::create_location),
        )
        .route("/locations/stats", get(api::location_stats))
        .route("/status", get(api::get_status))
        .route(
            "/locations/{id}",
            get(api::get_location)
                .put(api::update_location)
                .delete(api::delete_location),
        );

    // Health check
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Create the proxy router: every method and path goes to the request router.
pub fn create_proxy_router(state: ProxyState) -> Router {
    Router::new()
        .fallback(api::forward)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}
