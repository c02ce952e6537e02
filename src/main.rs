//! RiCPDF - document scanning backend (OCR, enhancement, PDF export).

mod codec;
mod config;
mod enhance;
mod error;
mod handlers;
mod library;
mod ocr;
mod pdf;
mod temp_file;
mod uploads;

use anyhow::Context;
use config::Config;
use handlers::AppState;
use ocr::{tesseract::TesseractFactory, EnginePool};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "ricpdf=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    tokio::fs::create_dir_all(&config.upload_dir)
        .await
        .with_context(|| format!("Failed to create upload dir {:?}", config.upload_dir))?;
    tokio::fs::create_dir_all(&config.temp_dir)
        .await
        .with_context(|| format!("Failed to create temp dir {:?}", config.temp_dir))?;

    // Engines start lazily on first use, then stay pooled
    let factory = Arc::new(TesseractFactory::new(config.tesseract_bin.clone()));
    let pool = EnginePool::new(factory, config.ocr_lang.clone(), config.ocr_pool_size);
    info!(
        "OCR pool ready: lang={}, max {} engine(s)",
        pool.lang(),
        pool.stats().max_size
    );

    if let Some(ttl) = config.upload_retention {
        uploads::spawn_retention_sweep(config.upload_dir.clone(), ttl, config.sweep_interval);
    }

    let addr = format!("0.0.0.0:{}", config.port);
    let mode = config.mode.clone();

    let state = AppState {
        config: Arc::new(config),
        ocr: Arc::new(pool),
    };
    let app = handlers::router(state);

    // Run server
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("RiCPDF backend listening on http://{} (mode: {})", addr, mode);
    axum::serve(listener, app).await?;

    Ok(())
}
