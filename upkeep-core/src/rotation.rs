//! Refreshed-secret hand-off. When a run captures a newer session
//! cookie than the one it started with, the new value is handed to a
//! rotation sink so the next run starts from a fresh credential.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::mask::mask_secret;

#[derive(Debug, Error)]
pub enum RotationError {
    #[error("io error writing {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

#[async_trait]
pub trait RotationSink: Send + Sync {
    async fn rotate(&self, name: &str, value: &str) -> Result<(), RotationError>;
}

/// Writes `name=value` lines to a file an outer scheduler reads back
/// into its secret store. The file is truncated per run; it never
/// accumulates stale values.
pub struct FileRotation {
    path: PathBuf,
}

impl FileRotation {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RotationSink for FileRotation {
    async fn rotate(&self, name: &str, value: &str) -> Result<(), RotationError> {
        let existing = tokio::fs::read_to_string(&self.path).await.unwrap_or_default();
        let prefix = format!("{name}=");
        let mut content = String::new();
        for line in existing.lines() {
            if !line.trim_start().starts_with(&prefix) {
                content.push_str(line);
                content.push('\n');
            }
        }
        content.push_str(&format!("{name}={value}\n"));
        tokio::fs::write(&self.path, content)
            .await
            .map_err(|source| RotationError::Io {
                source,
                path: self.path.clone(),
            })?;
        info!(
            secret = name,
            value = %mask_secret(value),
            path = %self.path.display(),
            "rotated secret"
        );
        Ok(())
    }
}

/// Used when rotation is disabled. Logs the masked value so an operator
/// can rotate by hand.
pub struct NoopRotation;

#[async_trait]
impl RotationSink for NoopRotation {
    async fn rotate(&self, name: &str, value: &str) -> Result<(), RotationError> {
        warn!(
            secret = name,
            value = %mask_secret(value),
            "rotation disabled, refreshed secret discarded"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn rotate_writes_and_replaces() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rotated.env");
        let sink = FileRotation::new(&path);

        sink.rotate("session_id", "old-value").await.unwrap();
        sink.rotate("other", "keep-me").await.unwrap();
        sink.rotate("session_id", "new-value").await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(content.contains("session_id=new-value"));
        assert!(content.contains("other=keep-me"));
        assert!(!content.contains("old-value"));
        assert_eq!(content.matches("session_id=").count(), 1);
    }
}
