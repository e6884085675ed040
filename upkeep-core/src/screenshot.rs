//! Best-effort screenshot capture. A failed capture is logged and
//! ignored; diagnostics never break the run they diagnose.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::warn;

use crate::browser::BrowserContext;

#[derive(Debug, Clone)]
pub struct ScreenshotSink {
    dir: PathBuf,
}

impl ScreenshotSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Captures the current page as `HHMMSS-<stage>.png` under the
    /// sink directory. Returns the path on success, `None` on any
    /// failure.
    pub async fn capture(&self, context: &BrowserContext, stage: &str) -> Option<PathBuf> {
        if let Err(err) = tokio::fs::create_dir_all(&self.dir).await {
            warn!(error = %err, dir = %self.dir.display(), "cannot create screenshot dir");
            return None;
        }
        let bytes = match context.screenshot_bytes().await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = %err, stage, "screenshot capture failed");
                return None;
            }
        };
        let name = format!("{}-{}.png", Utc::now().format("%H%M%S"), sanitize(stage));
        let path = self.dir.join(name);
        match tokio::fs::write(&path, bytes).await {
            Ok(()) => Some(path),
            Err(err) => {
                warn!(error = %err, path = %path.display(), "screenshot write failed");
                None
            }
        }
    }
}

fn sanitize(stage: &str) -> String {
    stage
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_are_filesystem_safe() {
        assert_eq!(sanitize("after-renew"), "after-renew");
        assert_eq!(sanitize("round 3/7"), "round_3_7");
    }
}
