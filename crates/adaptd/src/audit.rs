//! Audit Logger - Append-only JSONL logging for rejections, dispatches,
//! and delivery failures, plus the per-instance knowledge export stream.

use adapt_common::{AuditRecord, ExportRecord};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs::{create_dir_all, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::info;

const AUDIT_FILE: &str = "audit.jsonl";
const EXPORT_DIR: &str = "export";

/// Audit logger for recording loop decisions and rejections
pub struct AuditLogger {
    log_path: PathBuf,
}

impl AuditLogger {
    /// Create a new audit logger under the daemon data directory
    pub async fn new(data_dir: &Path) -> Result<Self> {
        create_dir_all(data_dir)
            .await
            .context("Failed to create audit log directory")?;

        let log_path = data_dir.join(AUDIT_FILE);

        info!("Audit logger initialized: {}", log_path.display());

        Ok(Self { log_path })
    }

    /// Log an audit record
    pub async fn log(&self, record: &AuditRecord) -> Result<()> {
        let json = serde_json::to_string(record)? + "\n";

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await
            .context("Failed to open audit log")?;

        file.write_all(json.as_bytes())
            .await
            .context("Failed to write audit record")?;

        file.sync_all().await.context("Failed to sync audit log")?;

        Ok(())
    }

    /// Read all audit records (for debugging/reports)
    pub async fn read_all(&self) -> Result<Vec<AuditRecord>> {
        if !self.log_path.exists() {
            return Ok(vec![]);
        }

        let content = tokio::fs::read_to_string(&self.log_path)
            .await
            .context("Failed to read audit log")?;

        let records: Vec<AuditRecord> = content
            .lines()
            .filter(|line| !line.is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();

        Ok(records)
    }

    /// Get the path to the audit log
    pub fn path(&self) -> &Path {
        &self.log_path
    }
}

/// Append-only knowledge export, one JSONL stream per (policy, instance).
///
/// The writer only ever appends; readers open the file independently, so
/// tail-reading never blocks ingestion.
pub struct ExportLog {
    export_dir: PathBuf,
}

impl ExportLog {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        let export_dir = data_dir.join(EXPORT_DIR);
        create_dir_all(&export_dir)
            .await
            .context("Failed to create export directory")?;
        Ok(Self { export_dir })
    }

    fn stream_path(&self, policy_id: &str, instance_id: &str) -> PathBuf {
        self.export_dir
            .join(format!("{}__{}.jsonl", policy_id, instance_id))
    }

    /// Append one export row for an accepted sample
    pub async fn append(
        &self,
        policy_id: &str,
        instance_id: &str,
        record: &ExportRecord,
    ) -> Result<()> {
        let json = serde_json::to_string(record)? + "\n";

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.stream_path(policy_id, instance_id))
            .await
            .context("Failed to open export stream")?;

        file.write_all(json.as_bytes())
            .await
            .context("Failed to write export record")?;

        Ok(())
    }

    /// Read the last `limit` rows of a stream without locking the writer.
    /// `limit = 0` reads the whole stream.
    pub async fn tail(
        &self,
        policy_id: &str,
        instance_id: &str,
        limit: usize,
    ) -> Result<Vec<ExportRecord>> {
        let path = self.stream_path(policy_id, instance_id);
        if !path.exists() {
            return Ok(vec![]);
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .context("Failed to read export stream")?;

        let mut records: Vec<ExportRecord> = content
            .lines()
            .filter(|line| !line.is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();

        if limit > 0 && records.len() > limit {
            records.drain(..records.len() - limit);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adapt_common::AuditKind;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_audit_logging() {
        let temp_dir = TempDir::new().unwrap();
        let logger = AuditLogger::new(temp_dir.path()).await.unwrap();

        let record = AuditRecord::new(AuditKind::TelemetryRejected, "p1")
            .instance("i1")
            .reason("malformed_telemetry");
        logger.log(&record).await.unwrap();

        let records = logger.read_all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].policy_id, "p1");
        assert_eq!(records[0].reason.as_deref(), Some("malformed_telemetry"));
    }

    #[tokio::test]
    async fn test_export_append_and_tail() {
        let temp_dir = TempDir::new().unwrap();
        let export = ExportLog::new(temp_dir.path()).await.unwrap();

        for ts in 0..5 {
            let record = ExportRecord {
                timestamp: ts,
                score: 0.9,
                normalized_energy: 0.3,
                model_used: "lstm".to_string(),
                kl_div: None,
            };
            export.append("p1", "i1", &record).await.unwrap();
        }

        let all = export.tail("p1", "i1", 0).await.unwrap();
        assert_eq!(all.len(), 5);

        let tail = export.tail("p1", "i1", 2).await.unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].timestamp, 3);
        assert_eq!(tail[1].timestamp, 4);
    }

    #[tokio::test]
    async fn test_missing_stream_reads_empty() {
        let temp_dir = TempDir::new().unwrap();
        let export = ExportLog::new(temp_dir.path()).await.unwrap();
        assert!(export.tail("p1", "nope", 10).await.unwrap().is_empty());
    }
}
