//! Facilitator HTTP entrypoint.
//!
//! Launches an Axum server exposing the x402 facilitator interface:
//!
//! - `GET /verify` / `POST /verify` — verification schema and execution
//! - `GET /settle` / `POST /settle` — settlement schema and execution
//! - `GET /supported` — supported payment kinds (version/scheme/network)
//! - `GET /discovery/resources` — catalogued merchant resources
//! - `GET /list` — legacy redirect to the discovery listing
//!
//! The server wires up OpenTelemetry tracing, CORS, the background scheduler
//! loops, and graceful shutdown on SIGTERM/SIGINT. `.env` values are loaded at
//! startup; see [`x402_facilitator::config`] for the variables.

use axum::http::Method;
use axum::routing::{get, post};
use axum::{Extension, Router};
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors;
use tower_http::trace::TraceLayer;

use x402_facilitator::config::Config;
use x402_facilitator::discovery::{DiscoveryRegistry, InMemoryResourceStore};
use x402_facilitator::facilitator_local::FacilitatorLocal;
use x402_facilitator::handlers;
use x402_facilitator::provider_cache::ProviderCache;
use x402_facilitator::scheduler::Scheduler;
use x402_facilitator::sig_down::SigDown;
use x402_facilitator::telemetry::Telemetry;

#[tokio::main]
async fn main() {
    dotenv().ok();
    let _telemetry = Telemetry::init();

    let config = match Config::from_env() {
        Ok(config) => Arc::new(config),
        Err(error) => {
            tracing::error!("Invalid configuration: {error}");
            std::process::exit(1);
        }
    };

    let providers = match ProviderCache::from_config(&config).await {
        Ok(providers) => Arc::new(providers),
        Err(error) => {
            tracing::error!("Failed to initialize chain providers: {error}");
            std::process::exit(1);
        }
    };

    // Process-local store; swap for a database-backed implementation to share
    // the catalog across replicas.
    let discovery = Arc::new(DiscoveryRegistry::new(
        Some(Arc::new(InMemoryResourceStore::default())),
        config.allow_localhost_resources,
    ));

    let facilitator = Arc::new(FacilitatorLocal::new(
        ProviderCache::clone(&providers),
        Arc::clone(&config),
        Arc::clone(&discovery),
    ));

    let sig_down = match SigDown::try_new() {
        Ok(sig_down) => sig_down,
        Err(error) => {
            tracing::error!("Failed to register signal handlers: {error}");
            std::process::exit(1);
        }
    };
    let shutdown = sig_down.cancellation_token();

    let scheduler = Scheduler::new(
        Arc::clone(&providers),
        Arc::clone(&discovery),
        config.wallet_pool.health_check_interval,
        shutdown.clone(),
    );
    let scheduler_tasks = scheduler.spawn();

    let app = Router::new()
        .route("/", get(|| async { "x402 facilitator" }))
        .route("/verify", get(handlers::get_verify_info))
        .route("/verify", post(handlers::post_verify))
        .route("/settle", get(handlers::get_settle_info))
        .route("/settle", post(handlers::post_settle))
        .route("/supported", get(handlers::get_supported))
        .route("/discovery/resources", get(handlers::get_discovery_resources))
        .route("/list", get(handlers::get_list_redirect))
        .layer(Extension(facilitator))
        .layer(Extension(discovery))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    otel.kind = "server",
                    otel.name = %format!("{} {}", request.method(), request.uri()),
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }),
        )
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::from((config.host, config.port));
    tracing::info!("Starting server at http://{addr}");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(error) => {
            tracing::error!("Failed to bind to {addr}: {error}");
            std::process::exit(1);
        }
    };

    let server_shutdown = shutdown.clone();
    let serve = axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_shutdown.cancelled().await });
    if let Err(error) = serve.await {
        tracing::error!("Server error: {error}");
    }

    scheduler_tasks.wait().await;
    tracing::info!("Shutdown complete");
}
