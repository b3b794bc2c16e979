//! Audit logging for authentication events
//!
//! Every classified event is appended to a JSON-lines file for security
//! review. `emit` only pushes onto a channel; a background task owns the file,
//! so the request path never waits on disk I/O.

use authgate_core::event::{AuthEvent, EventSink};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    #[serde(flatten)]
    pub event: AuthEvent,
    /// Server version
    pub server_version: String,
}

impl AuditEntry {
    pub fn new(event: AuthEvent) -> Self {
        AuditEntry {
            event,
            server_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Entries queued for the writer before new ones are dropped
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Audit logger
///
/// Cloning is cheap; all clones feed the same writer task. The writer exits
/// once every clone has been dropped.
#[derive(Debug, Clone)]
pub struct AuditLogger {
    file_path: PathBuf,
    tx: mpsc::Sender<AuditEntry>,
    dropped: Arc<AtomicU64>,
}

impl AuditLogger {
    /// Open the audit file and start the writer task
    pub async fn spawn(path: impl AsRef<Path>) -> std::io::Result<(Self, JoinHandle<()>)> {
        Self::spawn_with_capacity(path, DEFAULT_QUEUE_CAPACITY).await
    }

    /// Like [`AuditLogger::spawn`] with an explicit queue bound
    pub async fn spawn_with_capacity(
        path: impl AsRef<Path>,
        capacity: usize,
    ) -> std::io::Result<(Self, JoinHandle<()>)> {
        let file_path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)
            .await?;

        let (tx, mut rx) = mpsc::channel::<AuditEntry>(capacity.max(1));
        let writer_path = file_path.clone();

        let handle = tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                let mut line = match serde_json::to_string(&entry) {
                    Ok(json) => json,
                    Err(e) => {
                        error!("Failed to serialize audit entry: {}", e);
                        continue;
                    }
                };
                line.push('\n');

                if let Err(e) = file.write_all(line.as_bytes()).await {
                    error!(path = %writer_path.display(), "Failed to write audit log: {}", e);
                    continue;
                }
                if let Err(e) = file.flush().await {
                    warn!(path = %writer_path.display(), "Failed to flush audit log: {}", e);
                }
            }
            debug!(path = %writer_path.display(), "Audit writer stopped");
        });

        info!(path = %file_path.display(), "Audit logging enabled");
        Ok((
            AuditLogger {
                file_path,
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            handle,
        ))
    }

    /// Queue one entry without waiting
    ///
    /// When the queue is full the entry is dropped and counted.
    pub fn log(&self, entry: AuditEntry) {
        match self.tx.try_send(entry) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                // Warn on the first drop and then every thousandth
                if dropped == 1 || dropped % 1000 == 0 {
                    warn!(dropped, "Audit queue full; entries dropped");
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Audit writer has stopped; entry dropped");
            }
        }
    }

    /// Entries dropped because the writer could not keep up
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Get the audit log file path
    pub fn file_path(&self) -> &Path {
        &self.file_path
    }
}

impl EventSink for AuditLogger {
    fn emit(&self, event: AuthEvent) {
        self.log(AuditEntry::new(event));
    }
}

/// Sink that turns every event into one structured log line
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: AuthEvent) {
        let reason = event.reason.map(|r| r.as_str()).unwrap_or("");
        let subject = event.subject.as_deref().unwrap_or("");
        let method = event.method.as_deref().unwrap_or("");

        if event.is_success() {
            debug!(
                event_type = event.event_type.as_str(),
                result = event.result.as_str(),
                subject,
                method,
                "auth event"
            );
        } else {
            info!(
                event_type = event.event_type.as_str(),
                result = event.result.as_str(),
                reason,
                subject,
                method,
                detail = event.detail.as_deref().unwrap_or(""),
                "auth event"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authgate_core::event::{EventType, Reason};
    use chrono::Utc;
    use std::fs;
    use tempfile::NamedTempFile;

    #[test]
    fn test_audit_entry_serialization() {
        let event = AuthEvent::failure(EventType::AuthAttempt, Reason::CnNotAllowed, Utc::now())
            .with_subject("intruder")
            .with_method("mtls");
        let json = serde_json::to_string(&AuditEntry::new(event)).unwrap();

        assert!(json.contains("\"event_type\":\"auth_attempt\""));
        assert!(json.contains("\"reason\":\"cn_not_allowed\""));
        assert!(json.contains("intruder"));
        assert!(json.contains("server_version"));
    }

    #[tokio::test]
    async fn test_audit_logger_writes_json_lines() {
        let temp_file = NamedTempFile::new().unwrap();
        let (logger, handle) = AuditLogger::spawn(temp_file.path()).await.unwrap();
        assert_eq!(logger.file_path(), temp_file.path());

        logger.emit(
            AuthEvent::success(EventType::SessionIssue, Utc::now()).with_subject("trader-01"),
        );
        logger.emit(AuthEvent::failure(EventType::IdpProbe, Reason::ServerError, Utc::now()));

        // Dropping the last sender lets the writer drain and exit
        drop(logger);
        handle.await.unwrap();

        let contents = fs::read_to_string(temp_file.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event_type"], "session_issue");
        assert_eq!(first["subject"], "trader-01");
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["reason"], "server_error");
    }

    #[tokio::test]
    async fn test_full_queue_drops_and_counts() {
        let temp_file = NamedTempFile::new().unwrap();
        let (logger, handle) = AuditLogger::spawn_with_capacity(temp_file.path(), 2)
            .await
            .unwrap();

        // The writer cannot run before this test yields, so the queue fills
        for _ in 0..5 {
            logger.emit(AuthEvent::success(EventType::IdpProbe, Utc::now()));
        }
        assert_eq!(logger.dropped_count(), 3);

        drop(logger);
        handle.await.unwrap();
        let contents = fs::read_to_string(temp_file.path()).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_audit_logger_bad_path() {
        let result = AuditLogger::spawn("/nonexistent-dir/authgate/audit.log").await;
        assert!(result.is_err());
    }
}
