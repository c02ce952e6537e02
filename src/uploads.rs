//! Persistent upload directory and its optional retention sweep.

use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Stored file as reported back to the uploader.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UploadRecord {
    pub filename: String,
    pub path: String,
    pub size: u64,
}

/// Save `data` as `<unix-millis><ext>` inside `dir`.
///
/// The extension is taken from the client's filename. If the name is already
/// taken, the timestamp is bumped until a free one is found.
pub async fn save_upload(dir: &Path, original_name: &str, data: &[u8]) -> Result<UploadRecord> {
    tokio::fs::create_dir_all(dir).await?;

    let ext = Path::new(original_name)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut stamp = now_millis();
    let (filename, path, mut file) = loop {
        let filename = format!("{}{}", stamp, ext);
        let path = dir.join(&filename);
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => break (filename, path, file),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => stamp += 1,
            Err(e) => return Err(e.into()),
        }
    };

    file.write_all(data).await?;
    file.flush().await?;

    info!("Stored upload {} ({} bytes)", path.display(), data.len());
    Ok(UploadRecord {
        filename,
        path: path.to_string_lossy().into_owned(),
        size: data.len() as u64,
    })
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

/// Delete regular files in `dir` last modified more than `ttl` before `now`.
///
/// Returns how many files were removed. A missing directory counts as empty.
pub fn sweep_expired(dir: &Path, ttl: Duration, now: SystemTime) -> std::io::Result<usize> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry?;
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }

        let age = now
            .duration_since(meta.modified()?)
            .unwrap_or(Duration::ZERO);
        if age <= ttl {
            continue;
        }

        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                debug!("Retention: removed {}", entry.path().display());
                removed += 1;
            }
            Err(e) => warn!("Retention: failed to remove {}: {}", entry.path().display(), e),
        }
    }

    Ok(removed)
}

/// Run [`sweep_expired`] every `interval` for the life of the process.
pub fn spawn_retention_sweep(dir: PathBuf, ttl: Duration, interval: Duration) {
    info!(
        "Upload retention enabled: ttl={}s, sweep every {}s",
        ttl.as_secs(),
        interval.as_secs()
    );

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let dir = dir.clone();
            let swept =
                tokio::task::spawn_blocking(move || sweep_expired(&dir, ttl, SystemTime::now())).await;
            match swept {
                Ok(Ok(0)) => {}
                Ok(Ok(n)) => info!("Retention: removed {} expired upload(s)", n),
                Ok(Err(e)) => warn!("Retention sweep failed: {}", e),
                Err(e) => warn!("Retention sweep task panicked: {}", e),
            }
        }
    });
}
