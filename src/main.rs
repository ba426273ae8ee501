use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod accumulator;
mod config;
mod db;
mod decoder;
mod error;
mod event;
mod server;
mod session;
mod sse_codec;
mod types;
mod upstream;

use config::Config;
use db::Db;
use server::AppState;
use session::ChatSession;
use upstream::HttpBackend;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let db = Db::new(&config.database_url).await?;
    let history = db.load_conversation(&config.history_key).await?;
    tracing::info!("Restored {} turns from {}", history.len(), config.history_key);

    let backend = HttpBackend::new(config.chat_url.clone(), config.api_key.clone());
    let session = ChatSession::with_history(backend, history).with_model(config.model.clone());
    let state = Arc::new(AppState::new(session, db, config.history_key.clone()));

    let app = server::router(state.clone());

    tracing::info!("listening on {}", config.listen_addr);
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutting down");
            state.cancel_generation();
        })
        .await?;

    Ok(())
}
