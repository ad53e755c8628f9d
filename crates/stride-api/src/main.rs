mod auth;
mod config;
mod error;
mod ingest;
mod routes;
mod store;

use std::sync::Arc;

use config::AppConfig;
use ingest::IngestionEngine;
use routes::{app_router, AppState};
use store::Store;
use stride_core::clock::SystemClock;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses platform-native env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("stride_api=info".parse().expect("valid directive")),
        )
        .init();

    let config = AppConfig::from_env()?;
    tracing::info!("Starting stride-api with config: {:?}", config);

    let store = Arc::new(Store::open(&config.db_path).await?);
    for owner_id in &config.seed_owners {
        store.register_owner(owner_id).await?;
    }
    if !config.seed_owners.is_empty() {
        tracing::info!(count = config.seed_owners.len(), "Registered seed owners");
    }

    let engine = IngestionEngine::new(store, Arc::new(SystemClock), config.max_batch_records);
    let router = app_router(AppState::new(engine, config.api_token.clone()));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("stride-api listening on {}", config.bind_addr);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("stride-api stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {error}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
