use chrono::Utc;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::config::AuditConfig;

/// Payload keys that identify a person and never reach the log.
const PII_KEYS: &[&str] = &["userId", "user_id", "email"];

/// Append-only NDJSON log of session lifecycle events.
///
/// `record` only enqueues; a writer on a blocking thread owns the file. When
/// the file grows past `max_bytes` it is moved to `<path>.old` (replacing any
/// previous generation) and a fresh file is started. Failures are logged and
/// swallowed.
#[derive(Clone, Default)]
pub struct AuditLog {
    tx: Option<mpsc::UnboundedSender<Record>>,
}

struct Sink {
    path: PathBuf,
    max_bytes: u64,
}

#[derive(Serialize)]
struct Record {
    timestamp: String,
    session_id: String,
    event: String,
    data: serde_json::Value,
}

impl AuditLog {
    /// Start the writer. Must be called inside a tokio runtime.
    ///
    /// The handle completes once every clone of the log has been dropped and
    /// the queued records are on disk.
    pub fn spawn(path: impl Into<PathBuf>, max_bytes: u64) -> (Self, JoinHandle<()>) {
        let sink = Sink {
            path: path.into(),
            max_bytes,
        };
        let (tx, mut rx) = mpsc::unbounded_channel::<Record>();

        let writer = tokio::task::spawn_blocking(move || {
            while let Some(record) = rx.blocking_recv() {
                if let Err(e) = sink.write(&record) {
                    warn!(
                        session_id = %record.session_id,
                        event = %record.event,
                        "failed to write audit record: {e}"
                    );
                }
            }
        });

        (Self { tx: Some(tx) }, writer)
    }

    /// A sink that drops every record.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn from_config(config: &AuditConfig) -> Self {
        if config.enabled {
            Self::spawn(&config.path, config.max_bytes).0
        } else {
            Self::disabled()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    pub fn record(&self, session_id: &str, event: &str, data: serde_json::Value) {
        let Some(tx) = &self.tx else {
            return;
        };

        let record = Record {
            timestamp: Utc::now().to_rfc3339(),
            session_id: session_id.to_string(),
            event: event.to_string(),
            data: strip_pii(data),
        };

        if tx.send(record).is_err() {
            warn!(session_id, event, "audit writer stopped, dropping record");
        }
    }
}

impl Sink {
    fn write(&self, record: &Record) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        self.rotate_if_needed()?;

        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    fn rotate_if_needed(&self) -> anyhow::Result<()> {
        let size = match std::fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(_) => return Ok(()),
        };
        if size <= self.max_bytes {
            return Ok(());
        }

        let old = rotated_path(&self.path);
        if old.exists() {
            std::fs::remove_file(&old)?;
        }
        std::fs::rename(&self.path, &old)?;
        Ok(())
    }
}

/// `<path>.old`, the single archived generation.
pub fn rotated_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".old");
    PathBuf::from(name)
}

fn strip_pii(data: serde_json::Value) -> serde_json::Value {
    match data {
        serde_json::Value::Object(mut map) => {
            for key in PII_KEYS {
                map.remove(*key);
            }
            serde_json::Value::Object(map)
        }
        other => other,
    }
}
