use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::Value;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{trace, warn};

use crate::models::LogEntry;

/// Append-only JSON-lines sink, one file per stream under `dir`.
#[derive(Clone, Debug)]
pub struct RequestLog {
    dir: PathBuf,
}

impl RequestLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn stream_path(&self, stream: &str) -> PathBuf {
        self.dir.join(format!("{}.log", sanitize_stream_name(stream)))
    }

    /// Writes in the background. Failures are only traced.
    pub fn record(&self, stream: String, payload: Value) {
        let log = self.clone();
        tokio::spawn(async move {
            if let Err(error) = log.append(&stream, payload).await {
                warn!(
                    phase = "request_log_write_failed",
                    stream = %stream,
                    "Failed to append request log entry: {error}"
                );
            }
        });
    }

    pub async fn append(&self, stream: &str, payload: Value) -> io::Result<()> {
        let entry = LogEntry {
            timestamp: Utc::now(),
            payload,
        };
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        fs::create_dir_all(&self.dir).await?;
        let path = self.stream_path(stream);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;

        trace!(
            phase = "request_log_appended",
            path = %path.display(),
            bytes = line.len(),
            "Appended request log entry"
        );
        Ok(())
    }
}

fn sanitize_stream_name(stream: &str) -> String {
    stream
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}
