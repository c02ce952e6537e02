//! Tesseract CLI engine.

use anyhow::Context;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::info;

use super::{EngineFactory, OcrEngine};

/// Spawns `tesseract` engines for a given binary.
pub struct TesseractFactory {
    binary: PathBuf,
}

impl TesseractFactory {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait::async_trait]
impl EngineFactory for TesseractFactory {
    async fn create(&self, lang: &str) -> anyhow::Result<Box<dyn OcrEngine>> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .with_context(|| format!("Failed to start {}", self.binary.display()))?;

        if !output.status.success() {
            anyhow::bail!(
                "{} --version exited with {}",
                self.binary.display(),
                output.status
            );
        }

        // Tesseract prints its version banner on stdout in 5.x, stderr in 4.x.
        let banner = if output.stdout.is_empty() {
            &output.stderr
        } else {
            &output.stdout
        };
        let version = String::from_utf8_lossy(banner)
            .lines()
            .next()
            .unwrap_or_default()
            .to_string();
        info!("TesseractEngine: {} ready for '{}'", version, lang);

        Ok(Box::new(TesseractEngine {
            binary: self.binary.clone(),
            lang: lang.to_string(),
        }))
    }
}

pub struct TesseractEngine {
    binary: PathBuf,
    lang: String,
}

impl TesseractEngine {
    fn command(&self, path: &Path) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(path)
            .arg("stdout")
            .arg("-l")
            .arg(&self.lang)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait::async_trait]
impl OcrEngine for TesseractEngine {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn recognize(&self, path: &Path) -> anyhow::Result<String> {
        let output = self
            .command(path)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.binary.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Tesseract failed ({}): {}", output.status, stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary_fails_on_create() {
        let factory = TesseractFactory::new("/nonexistent/tesseract-ricpdf");
        let err = factory.create("ind").await.err().unwrap();
        assert!(format!("{:#}", err).contains("Failed to start"));
    }

    #[test]
    fn test_command_arguments() {
        let engine = TesseractEngine {
            binary: PathBuf::from("tesseract"),
            lang: "ind".to_string(),
        };
        let cmd = engine.command(Path::new("/tmp/page.jpg"));
        let args: Vec<_> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args, ["/tmp/page.jpg", "stdout", "-l", "ind"]);
    }
}
