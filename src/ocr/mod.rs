//! OCR engine abstraction.
//!
//! Defines the [`OcrEngine`] / [`EngineFactory`] traits so the Tesseract backend
//! can be swapped out (tests use an in-process fake), and the pooled
//! [`recognize`] entry point used by the handlers.

pub mod pool;
pub mod tesseract;

use serde::Serialize;
use std::path::Path;

use crate::error::{AppError, Result};
pub use pool::EnginePool;

/// Static label returned alongside every recognition; not a computed score.
pub const CONFIDENCE_LABEL: &str = "high";

/// Text recognized in one image.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OcrResult {
    pub text: String,
    pub confidence: &'static str,
}

/// A live recognition engine bound to one language.
#[async_trait::async_trait]
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;
    async fn recognize(&self, path: &Path) -> anyhow::Result<String>;
}

/// Creates engine instances; this is where the startup cost is paid.
#[async_trait::async_trait]
pub trait EngineFactory: Send + Sync {
    async fn create(&self, lang: &str) -> anyhow::Result<Box<dyn OcrEngine>>;
}

/// Run recognition on the image at `path` with an engine borrowed from `pool`.
pub async fn recognize(pool: &EnginePool, path: &Path) -> Result<OcrResult> {
    let engine = pool
        .acquire()
        .await
        .map_err(|e| AppError::Ocr(format!("{:#}", e)))?;

    let outcome = engine.recognize(path).await;
    match outcome {
        Ok(text) => Ok(OcrResult {
            text: text.trim_end_matches('\u{c}').to_string(),
            confidence: CONFIDENCE_LABEL,
        }),
        Err(e) => {
            engine.discard();
            Err(AppError::Ocr(format!("{:#}", e)))
        }
    }
}
