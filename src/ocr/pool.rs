//! Bounded pool of reusable OCR engine instances.
//!
//! ```text
//! acquire() ──► [permit] ──► idle.pop() or factory.create() ──► PooledEngine
//!                                                                   │
//!                        idle.push() ◄── drop() ◄── recognize() ◄───┘
//! ```
//!
//! At most `max_size` engines exist at once. Callers beyond that wait for a
//! permit; engines outlive individual requests so the startup cost is paid
//! once per slot rather than once per call.

use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::debug;

use super::{EngineFactory, OcrEngine};

pub struct EnginePool {
    factory: Arc<dyn EngineFactory>,
    lang: String,
    idle: Mutex<Vec<Box<dyn OcrEngine>>>,
    permits: Semaphore,
    max_size: usize,
    created: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub created: usize,
    pub idle: usize,
    pub max_size: usize,
}

impl EnginePool {
    pub fn new(factory: Arc<dyn EngineFactory>, lang: impl Into<String>, max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            factory,
            lang: lang.into(),
            idle: Mutex::new(Vec::with_capacity(max_size)),
            permits: Semaphore::new(max_size),
            max_size,
            created: AtomicUsize::new(0),
        }
    }

    pub fn lang(&self) -> &str {
        &self.lang
    }

    /// Borrow an engine, creating one if no idle instance is available.
    ///
    /// The returned guard puts the engine back on drop.
    pub async fn acquire(&self) -> anyhow::Result<PooledEngine<'_>> {
        let permit = self.permits.acquire().await?;

        let reused = self.idle.lock().pop();
        let engine = match reused {
            Some(engine) => engine,
            None => {
                let engine = self.factory.create(&self.lang).await?;
                let total = self.created.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(
                    "EnginePool: started {} engine for '{}' ({} created)",
                    engine.name(),
                    self.lang,
                    total
                );
                engine
            }
        };

        Ok(PooledEngine {
            engine: Some(engine),
            pool: self,
            _permit: permit,
        })
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.created.load(Ordering::Relaxed),
            idle: self.idle.lock().len(),
            max_size: self.max_size,
        }
    }

    fn release(&self, engine: Box<dyn OcrEngine>) {
        let mut idle = self.idle.lock();
        if idle.len() < self.max_size {
            idle.push(engine);
        }
    }
}

/// RAII guard for a borrowed engine.
pub struct PooledEngine<'a> {
    engine: Option<Box<dyn OcrEngine>>,
    pool: &'a EnginePool,
    // Dropped after `Drop::drop` has returned the engine.
    _permit: SemaphorePermit<'a>,
}

impl PooledEngine<'_> {
    /// Tear the engine down instead of returning it to the pool.
    pub fn discard(mut self) {
        if let Some(engine) = self.engine.take() {
            debug!("EnginePool: discarding {} engine", engine.name());
        }
    }
}

impl Deref for PooledEngine<'_> {
    type Target = dyn OcrEngine;

    fn deref(&self) -> &Self::Target {
        // Only `discard` and `drop` take the engine, and both consume the guard.
        self.engine.as_deref().expect("engine present while guard is alive")
    }
}

impl Drop for PooledEngine<'_> {
    fn drop(&mut self) {
        if let Some(engine) = self.engine.take() {
            self.pool.release(engine);
        }
    }
}
