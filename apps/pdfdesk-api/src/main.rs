//! pdfdesk API server
//!
//! Serves the pdfdesk REST API:
//!
//! - PDF tools (merge, split, compress, convert, info)
//! - OCR with language retry
//! - AI summaries and document chat
//! - Document history, usage and Stripe billing webhooks
//!
//! Configuration comes from flags, the environment and an optional `.env`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tracing::{info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pdfdesk_api::{build_router, config::Config, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    let config = Config::parse();

    // Initialize logging
    let mut filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("pdfdesk_api=info,tower_http=debug"));
    if config.verbose {
        filter = filter.add_directive(Level::DEBUG.into());
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    config.validate()?;

    info!("Starting pdfdesk API on {}:{}", config.host, config.port);

    // Create rate limiter configuration
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(config.rate_limit.max(1).into())
            .burst_size(config.rate_limit.max(1) * 2)
            .finish()
            .context("Invalid rate limiter configuration")?,
    );

    // Create shared state
    let state = Arc::new(AppState::new(&config).await?);

    let app = build_router(state, config.max_upload_bytes()).layer(GovernorLayer {
        config: governor_conf,
    });

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Server listening on http://{}", addr);
    info!("Rate limit: {} requests/second per IP", config.rate_limit);
    info!("Upload limit: {} MB", config.max_upload_mb);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
