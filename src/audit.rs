//! Pipeline audit log
//!
//! Appends one JSONL entry per pipeline transition for compliance and
//! debugging. Writing the audit log never blocks or fails an action; write
//! errors are logged and dropped.

use crate::config::Protocol;
use crate::model::ActionKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Entry in the audit log
#[derive(Debug, Serialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub protocol: Protocol,
    pub kind: ActionKind,
    /// Pipeline stage reached (e.g. "validated", "rejected", "confirmed")
    pub stage: &'static str,
    pub amount_usd: f64,
    pub detail: Option<String>,
}

struct AuditWriter {
    path: PathBuf,
}

impl AuditWriter {
    fn write(&self, entry: &AuditEntry) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let json = serde_json::to_string(entry)?;
        writeln!(file, "{}", json)?;
        Ok(())
    }
}

/// Append-only JSONL log of pipeline events.
pub struct AuditLog {
    writer: Arc<Mutex<AuditWriter>>,
}

impl AuditLog {
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            writer: Arc::new(Mutex::new(AuditWriter {
                path: log_path.into(),
            })),
        }
    }

    pub async fn record(
        &self,
        protocol: Protocol,
        kind: ActionKind,
        stage: &'static str,
        amount_usd: f64,
        detail: Option<String>,
    ) {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            protocol,
            kind,
            stage,
            amount_usd,
            detail,
        };

        let writer = self.writer.lock().await;
        if let Err(e) = writer.write(&entry) {
            tracing::warn!(error = %e, "Failed to write audit log entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn writes_jsonl_entries() {
        let temp_file = NamedTempFile::new().unwrap();
        let log = AuditLog::new(temp_file.path());

        log.record(
            Protocol::AaveV3,
            ActionKind::Supply,
            "validated",
            200.0,
            None,
        )
        .await;
        log.record(
            Protocol::AaveV3,
            ActionKind::Supply,
            "rejected",
            200.0,
            Some("daily cap".to_string()),
        )
        .await;

        let content = std::fs::read_to_string(temp_file.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("validated"));
        assert!(lines[1].contains("daily cap"));
        // Each line parses as standalone JSON
        for line in lines {
            let _: serde_json::Value = serde_json::from_str(line).unwrap();
        }
    }
}
