mod api;
mod attestation;
mod config;
mod db;
mod errors;
mod models;
mod state;

use crate::config::Config;
use crate::errors::ApiError;
use crate::state::AppState;
use gallows_ledger::quorum::QuorumNetwork;
use rand::rngs::OsRng;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::from_env();
    tracing::info!("\n{}", config.mode.banner());

    // Local state lives under the data dir (ignored by git).
    std::fs::create_dir_all(&config.data_dir).map_err(|_| ApiError::Internal)?;

    let db_path = config.data_dir.join("ledger.sqlite");
    let db_url = format!("sqlite:{}", db_path.to_string_lossy());

    let db = db::connect(&db_url).await?;
    db::init_schema(&db).await?;

    let interrupted = db::fail_interrupted_attestations(&db).await?;
    if interrupted > 0 {
        tracing::warn!(interrupted, "marked unfinished attestations as failed");
    }

    // Node keys are ephemeral: certificates verify only against this process's registry.
    let quorum = QuorumNetwork::generate(config.quorum_threshold, config.quorum_node_ids(), &mut OsRng)?;
    tracing::info!(threshold = quorum.threshold(), nodes = quorum.total_nodes(), "quorum network ready");

    let addr = config.addr.clone();
    let state = AppState::new(db, config, quorum);

    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|_| ApiError::Internal)?;

    tracing::info!(%addr, "backend listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|_| ApiError::Internal)?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("shutdown signal received");
    }
}
