//! Append-only operator log
//!
//! Every message that crosses a serial link, and every transport failure, is
//! appended to one flat text file:
//!
//! ```text
//! 16.10.2026 14:03:11 > PC->NL: [NL:SAY\PC]
//!
//! 16.10.2026 14:03:11 > NL->PC: [PC:READY\NL]
//!
//! ```
//!
//! Writers hold a `tokio::sync::Mutex` around the file for the whole
//! format-write-flush of one entry. The tokio mutex queues waiters in FIFO
//! order, so no appender is starved and entries never interleave.
//!
//! Each written entry is also broadcast to subscribers (the log viewer).

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, Mutex};

/// Timestamp format of the log file.
pub const TIMESTAMP_FORMAT: &str = "%d.%m.%Y %H:%M:%S";

/// Default file name of the operator log.
pub const LOG_FILE_NAME: &str = "pldcontrol_log_file.aki";

const BROADCAST_CAPACITY: usize = 256;

/// One line of the operator log.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    /// Local time the entry was written
    pub timestamp: DateTime<Local>,
    /// Free text
    pub message: String,
}

impl LogEntry {
    /// Render the entry the way it is stored in the file, blank line included.
    pub fn render(&self) -> String {
        format!(
            "{} > {}\n\n",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.message
        )
    }
}

/// Shared handle to the operator log file.
#[derive(Debug, Clone)]
pub struct LogSink {
    path: Arc<PathBuf>,
    file: Arc<Mutex<File>>,
    entries: broadcast::Sender<LogEntry>,
}

impl LogSink {
    /// Open the log at `path`, creating parent directories, and truncate it.
    ///
    /// An existing file is emptied rather than replaced.
    pub async fn open_truncated(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.set_len(0).await?;

        tracing::debug!(path = %path.display(), "Operator log opened");

        let (entries, _) = broadcast::channel(BROADCAST_CAPACITY);
        Ok(Self {
            path: Arc::new(path),
            file: Arc::new(Mutex::new(file)),
            entries,
        })
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Receive every entry written from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.entries.subscribe()
    }

    /// Append one timestamped entry.
    pub async fn append(&self, message: impl Into<String>) -> std::io::Result<()> {
        let message = message.into();
        let mut file = self.file.lock().await;

        let entry = LogEntry {
            timestamp: Local::now(),
            message,
        };
        file.write_all(entry.render().as_bytes()).await?;
        file.flush().await?;

        // Sent under the lock so viewers see file order. No subscribers is fine.
        let _ = self.entries.send(entry);
        drop(file);
        Ok(())
    }

    /// Append, reporting a failure through diagnostics instead of the caller.
    ///
    /// For the receive paths, which have nowhere to return an error to.
    pub async fn record(&self, message: impl Into<String>) {
        if let Err(err) = self.append(message).await {
            tracing::error!(path = %self.path.display(), %err, "Failed to write operator log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn entry_format_has_blank_line() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::open_truncated(dir.path().join("log.aki")).await.unwrap();
        sink.append("PC->NL: [NL:SAY\\PC]").await.unwrap();

        let content = tokio::fs::read_to_string(sink.path()).await.unwrap();
        assert!(content.ends_with(" > PC->NL: [NL:SAY\\PC]\n\n"));
        // dd.MM.yyyy HH:mm:ss
        let stamp = &content[..19];
        assert!(chrono::NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).is_ok());
    }

    #[tokio::test]
    async fn existing_file_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.aki");
        tokio::fs::write(&path, "old session\n").await.unwrap();

        let sink = LogSink::open_truncated(&path).await.unwrap();
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "");

        sink.append("new session").await.unwrap();
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(!content.contains("old session"));
        assert!(content.contains("new session"));
    }

    #[tokio::test]
    async fn creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("PLDControl").join("Data").join(LOG_FILE_NAME);
        let sink = LogSink::open_truncated(&path).await.unwrap();
        sink.append("hello").await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn subscribers_receive_entries() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::open_truncated(dir.path().join("log.aki")).await.unwrap();
        let mut rx = sink.subscribe();
        sink.append("Device: homed").await.unwrap();
        let entry = rx.recv().await.unwrap();
        assert_eq!(entry.message, "Device: homed");
    }
}
