//! File-based metrics exporter.
//!
//! Writes JSON snapshots atomically using `tempfile` + rename to prevent
//! partial reads by monitoring tools.

use std::path::PathBuf;

use async_trait::async_trait;

use super::{MetricsError, MetricsExporter, MetricsSnapshot};

#[derive(Debug, Clone)]
pub struct FileMetricsConfig {
    pub path: PathBuf,
    pub pretty_print: bool,
}

/// Exports metrics snapshots as JSON files using atomic writes.
pub struct FileExporter {
    path: PathBuf,
    pretty_print: bool,
}

impl FileExporter {
    /// Create a new file exporter, ensuring the parent directory exists.
    pub fn new(config: FileMetricsConfig) -> Result<Self, MetricsError> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                MetricsError::ConfigError(format!(
                    "failed to create metrics directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        Ok(Self {
            path: config.path,
            pretty_print: config.pretty_print,
        })
    }
}

#[async_trait]
impl MetricsExporter for FileExporter {
    async fn export(&self, snapshot: &MetricsSnapshot) -> Result<(), MetricsError> {
        let json = if self.pretty_print {
            serde_json::to_string_pretty(snapshot)?
        } else {
            serde_json::to_string(snapshot)?
        };

        let path = self.path.clone();

        tokio::task::spawn_blocking(move || -> Result<(), MetricsError> {
            use std::io::Write;

            let parent = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
            tmp.write_all(json.as_bytes())?;
            tmp.flush()?;
            tmp.persist(&path).map_err(|e| {
                MetricsError::ExportFailed(format!(
                    "failed to persist metrics file {}: {}",
                    path.display(),
                    e
                ))
            })?;
            Ok(())
        })
        .await
        .map_err(|e| MetricsError::ExportFailed(format!("blocking task panicked: {e}")))??;

        tracing::debug!(path = %self.path.display(), "metrics snapshot written");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), MetricsError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_snapshot() -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: "2026-08-01T00:00:00Z".to_string(),
            tools: vec![],
        }
    }

    #[tokio::test]
    async fn write_and_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");

        let exporter = FileExporter::new(FileMetricsConfig {
            path: path.clone(),
            pretty_print: true,
        })
        .unwrap();

        exporter.export(&sample_snapshot()).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let loaded: MetricsSnapshot = serde_json::from_str(&content).unwrap();
        assert_eq!(loaded.timestamp, "2026-08-01T00:00:00Z");
    }

    #[tokio::test]
    async fn creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deep").join("metrics.json");

        let exporter = FileExporter::new(FileMetricsConfig {
            path: path.clone(),
            pretty_print: false,
        })
        .unwrap();

        exporter.export(&sample_snapshot()).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn compact_json_has_no_newlines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compact.json");

        let exporter = FileExporter::new(FileMetricsConfig {
            path: path.clone(),
            pretty_print: false,
        })
        .unwrap();

        exporter.export(&sample_snapshot()).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.trim().contains('\n'));
    }

    #[tokio::test]
    async fn overwrite_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overwrite.json");

        let exporter = FileExporter::new(FileMetricsConfig {
            path: path.clone(),
            pretty_print: false,
        })
        .unwrap();

        exporter.export(&sample_snapshot()).await.unwrap();
        let mut snap = sample_snapshot();
        snap.timestamp = "2026-08-01T01:00:00Z".to_string();
        exporter.export(&snap).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let loaded: MetricsSnapshot = serde_json::from_str(&content).unwrap();
        assert_eq!(loaded.timestamp, "2026-08-01T01:00:00Z");
    }
}
