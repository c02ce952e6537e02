//! Server configuration.
//!
//! Read from the environment (with `.env` support via `dotenvy` in `main`).
//! Every setting has a default, so an empty environment yields a working
//! development server.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// 50 MiB, for both JSON bodies and multipart uploads.
pub const BODY_LIMIT_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub mode: String,
    pub upload_dir: PathBuf,
    pub public_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub ocr_lang: String,
    pub tesseract_bin: PathBuf,
    pub ocr_pool_size: usize,
    /// `None` keeps uploads forever.
    pub upload_retention: Option<Duration>,
    pub sweep_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the process environment in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mode = get("NODE_ENV")
            .or_else(|| get("APP_MODE"))
            .unwrap_or_else(|| "development".to_string());

        let temp_dir = get("TEMP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);

        let upload_retention = parse::<u64>(&get, "UPLOAD_RETENTION_SECS")?.map(Duration::from_secs);

        Ok(Self {
            port: parse(&get, "PORT")?.unwrap_or(3000),
            mode,
            upload_dir: get("UPLOAD_DIR").unwrap_or_else(|| "uploads".into()).into(),
            public_dir: get("PUBLIC_DIR").unwrap_or_else(|| "public".into()).into(),
            temp_dir,
            ocr_lang: get("OCR_LANG").unwrap_or_else(|| "ind".to_string()),
            tesseract_bin: get("TESSERACT_BIN").unwrap_or_else(|| "tesseract".into()).into(),
            ocr_pool_size: parse(&get, "OCR_POOL_SIZE")?.unwrap_or(2),
            upload_retention,
            sweep_interval: Duration::from_secs(
                parse(&get, "UPLOAD_SWEEP_INTERVAL_SECS")?.unwrap_or(3600),
            ),
        })
    }
}

fn parse<T>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    get(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("Invalid value for {}: {:?}", key, raw))
        })
        .transpose()
}
