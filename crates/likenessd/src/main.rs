use std::sync::Arc;

use anyhow::{Context, Result};
use likeness_core::{FullFrameDetector, IdentityEngine, PixelEmbedder};
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod metrics;

use config::{BusKind, Config};
use dbus_interface::{LikenessService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("likenessd starting");

    let config = Config::load()?;
    tracing::info!(
        data_dir = %config.data_dir.display(),
        store = ?config.store,
        bus = ?config.bus,
        "configuration loaded"
    );

    let store = config
        .open_store()
        .with_context(|| format!("opening store in {}", config.data_dir.display()))?;
    let embedder = PixelEmbedder::new(config.embedding_size);
    tracing::info!(model = %embedder.model_version(), dim = embedder.dim(), "embedder ready");

    let engine = IdentityEngine::open(store, Box::new(FullFrameDetector), Box::new(embedder), config.matcher)?;
    let service = LikenessService::new(Arc::new(engine), config.store);

    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _connection = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .with_context(|| format!("registering {BUS_NAME} on the D-Bus"))?;

    tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "likenessd ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("likenessd shutting down");

    Ok(())
}
