//! Scoped temporary files.
//!
//! A [`TempFile`] owns one path for the lifetime of one operation and removes it
//! on drop, so release happens on success, error, panic and future cancellation.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use crate::error::Result;

#[derive(Debug)]
pub struct TempFile {
    path: PathBuf,
}

impl TempFile {
    /// Write `bytes` to a fresh path under `dir`.
    ///
    /// Names look like `{prefix}_{index}_{millis}_{uuid}.jpg`; the index keeps
    /// items of one batch apart, the timestamp and UUID keep concurrent
    /// requests apart.
    pub async fn create(dir: &Path, prefix: &str, index: usize, bytes: &[u8]) -> Result<Self> {
        let path = dir.join(unique_name(prefix, index));
        // Guard first, so a partial write is still cleaned up.
        let file = Self { path };
        tokio::fs::write(&file.path, bytes).await?;
        debug!("TempFile: wrote {} ({} bytes)", file.path.display(), bytes.len());
        Ok(file)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to delete temp file {}: {}", self.path.display(), e),
        }
    }
}

fn unique_name(prefix: &str, index: usize) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!(
        "{}_{}_{}_{}.jpg",
        prefix,
        index,
        millis,
        uuid::Uuid::new_v4().simple()
    )
}

/// Write `bytes` to a temp file, run `f` on its path, then delete the file
/// before handing back whatever `f` returned.
pub async fn with_temp_file<F, Fut, T>(
    dir: &Path,
    prefix: &str,
    index: usize,
    bytes: &[u8],
    f: F,
) -> Result<T>
where
    F: FnOnce(PathBuf) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let file = TempFile::create(dir, prefix, index, bytes).await?;
    let result = f(file.path().to_path_buf()).await;
    drop(file);
    result
}
