//! Writing rendered pages to disk.
//!
//! Layout: `<root>/<host>/<path segments>/index<query>.html`, where the
//! query is the page's own query string without the `headless` marker.

use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use url::Url;

use crate::error::OutputError;
use crate::job::RenderOutput;
use crate::normalize::{strip_marker, url_host};

/// A rendered page and where it was written.
#[derive(Debug, Clone, Serialize)]
pub struct WrittenSnapshot {
    pub path: PathBuf,
    #[serde(flatten)]
    pub output: RenderOutput,
}

#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    root: PathBuf,
}

impl SnapshotWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Remove anything left from a previous run and recreate the root.
    pub async fn prepare(&self) -> Result<(), OutputError> {
        let exists = tokio::fs::try_exists(&self.root)
            .await
            .map_err(|source| self.io_error(&self.root, source))?;
        if exists {
            debug!(root = %self.root.display(), "clearing previous snapshots");
            tokio::fs::remove_dir_all(&self.root)
                .await
                .map_err(|source| self.io_error(&self.root, source))?;
        }
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| self.io_error(&self.root, source))
    }

    /// File a snapshot of `url` is written to.
    pub fn path_for(&self, url: &str) -> Result<PathBuf, OutputError> {
        let parsed = Url::parse(url).map_err(|source| OutputError::Url {
            url: url.to_string(),
            source,
        })?;
        let host = url_host(&parsed).ok_or_else(|| OutputError::NoHost(url.to_string()))?;

        let mut path = self.root.join(host);
        if let Some(segments) = parsed.path_segments() {
            for segment in segments.filter(|s| !s.is_empty() && *s != "." && *s != "..") {
                path.push(segment);
            }
        }

        let query = strip_marker(&parsed)
            .query()
            .map(|query| format!("?{query}"))
            .unwrap_or_default();
        path.push(format!("index{query}.html"));
        Ok(path)
    }

    pub async fn write(&self, output: RenderOutput) -> Result<WrittenSnapshot, OutputError> {
        let path = self.path_for(&output.url)?;
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| self.io_error(dir, source))?;
        }
        tokio::fs::write(&path, output.html.as_bytes())
            .await
            .map_err(|source| self.io_error(&path, source))?;

        info!(url = %output.url, path = %path.display(), "wrote snapshot");
        Ok(WrittenSnapshot { path, output })
    }

    /// Write a whole batch, in order.
    pub async fn write_all(&self, outputs: Vec<RenderOutput>) -> Result<Vec<WrittenSnapshot>, OutputError> {
        let mut written = Vec::with_capacity(outputs.len());
        for output in outputs {
            written.push(self.write(output).await?);
        }
        Ok(written)
    }

    fn io_error(&self, path: &Path, source: std::io::Error) -> OutputError {
        OutputError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn output(url: &str, html: &str) -> RenderOutput {
        RenderOutput {
            url: url.to_string(),
            html: html.to_string(),
            elapsed: Duration::from_millis(12),
            cached: false,
        }
    }

    #[test]
    fn test_path_layout() {
        let writer = SnapshotWriter::new("/out");

        assert_eq!(
            writer.path_for("https://a.test/?headless=").unwrap(),
            PathBuf::from("/out/a.test/index.html")
        );
        assert_eq!(
            writer.path_for("https://a.test/docs/intro?headless=").unwrap(),
            PathBuf::from("/out/a.test/docs/intro/index.html")
        );
        assert_eq!(
            writer.path_for("https://a.test/list?page=2&headless=").unwrap(),
            PathBuf::from("/out/a.test/list/index?page=2.html")
        );
        assert_eq!(
            writer.path_for("http://localhost:3000/app/?headless=").unwrap(),
            PathBuf::from("/out/localhost:3000/app/index.html")
        );
    }

    #[test]
    fn test_path_rejects_hostless_url() {
        let writer = SnapshotWriter::new("/out");
        assert!(matches!(
            writer.path_for("data:text/html,hi"),
            Err(OutputError::NoHost(_))
        ));
    }

    #[tokio::test]
    async fn test_write_all_creates_files() {
        let dir = tempdir().unwrap();
        let writer = SnapshotWriter::new(dir.path().join("page"));
        writer.prepare().await.unwrap();

        let written = writer
            .write_all(vec![
                output("https://a.test/?headless=", "<p>home</p>"),
                output("https://a.test/about?headless=", "<p>about</p>"),
            ])
            .await
            .unwrap();

        assert_eq!(written.len(), 2);
        assert_eq!(std::fs::read_to_string(&written[0].path).unwrap(), "<p>home</p>");
        assert_eq!(
            written[1].path,
            dir.path().join("page/a.test/about/index.html")
        );
        assert_eq!(std::fs::read_to_string(&written[1].path).unwrap(), "<p>about</p>");
    }

    #[tokio::test]
    async fn test_prepare_clears_previous_run() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("page");
        std::fs::create_dir_all(root.join("stale.test")).unwrap();
        std::fs::write(root.join("stale.test/index.html"), "old").unwrap();

        SnapshotWriter::new(&root).prepare().await.unwrap();

        assert!(root.is_dir());
        assert!(!root.join("stale.test").exists());
    }

    #[tokio::test]
    async fn test_prepare_reports_unusable_root() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("plain-file");
        std::fs::write(&file, "x").unwrap();
        let root = file.join("page");

        let err = SnapshotWriter::new(&root).prepare().await.unwrap_err();

        match err {
            OutputError::Io { path, .. } => assert_eq!(path, root.display().to_string()),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_snapshot_serializes_flat() {
        let snapshot = WrittenSnapshot {
            path: PathBuf::from("/out/a.test/index.html"),
            output: output("https://a.test/?headless=", "<p></p>"),
        };

        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["path"], "/out/a.test/index.html");
        assert_eq!(value["url"], "https://a.test/?headless=");
        assert_eq!(value["elapsed_ms"], 12);
    }
}
