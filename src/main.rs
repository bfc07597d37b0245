use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use http::{Method, header};
use tokio_util::sync::CancellationToken;
use tower_governor::governor::GovernorConfigBuilder;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tableside::config::Config;
use tableside::routes::build_router;
use tableside::services::janitor::SessionJanitor;
use tableside::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    config.warn_missing_secrets();
    tracing::info!("✅ Configuration loaded successfully");

    let state = AppState::new(&config).await?;
    tracing::info!("✅ AppState initialized");

    let shutdown = CancellationToken::new();

    let janitor = SessionJanitor::new(
        Arc::clone(&state.sessions),
        config.sweep_interval,
        config.purge_grace,
        shutdown.child_token(),
    )
    .with_order_index(Arc::clone(&state.orders), config.order_index_retention)
    .spawn();

    let eviction_listener = state
        .router
        .spawn_eviction_listener(state.sessions.subscribe_retirements());

    let cors = CorsLayer::new()
        .allow_origin([
            "http://localhost:3000"
                .parse()
                .context("Invalid CORS origin")?,
            "http://127.0.0.1:3000"
                .parse()
                .context("Invalid CORS origin")?,
        ])
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
        .max_age(Duration::from_secs(86400));

    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(1)
            .burst_size(30)
            .use_headers()
            .finish()
            .context("Invalid rate limiter configuration")?,
    );

    let app = build_router(state.clone())
        .layer(tower_governor::GovernorLayer::new(governor_conf))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default())
                .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
        )
        .layer(cors);

    let addr = config.bind_addr;
    tracing::info!("🚀 Server listening on http://{}", addr);
    tracing::info!("✅ Session janitor runs every {}s", config.sweep_interval.as_secs());
    tracing::info!("✅ All systems operational");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let router = Arc::clone(&state.router);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
        }
        tracing::info!("🛑 Shutdown signal received");
        // Open WebSockets would otherwise hold the drain open.
        router.shutdown();
    })
    .await?;

    shutdown.cancel();
    janitor.stop().await;
    eviction_listener.await.ok();

    tracing::info!("👋 Shutdown complete");
    Ok(())
}
