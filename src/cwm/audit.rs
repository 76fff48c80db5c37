use crate::cwm::paths::CwmPaths;
use crate::cwm::util::now_utc;
use crate::error::{CwmError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

/// One destructive operation, as written to `logs/audit.log`.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent<'a> {
    pub at: DateTime<Utc>,
    pub op: &'a str,
    pub status: &'a str,
    pub message: &'a str,
}

fn log_path(paths: &CwmPaths) -> PathBuf {
    paths.logs_dir.join("audit.log")
}

/// Append `event` as a single JSON line.
pub fn append(paths: &CwmPaths, event: &AuditEvent<'_>) -> Result<()> {
    fs::create_dir_all(&paths.logs_dir).map_err(|err| CwmError::io(&paths.logs_dir, err))?;
    let mut line = serde_json::to_string(event)
        .map_err(|err| CwmError::corrupt(&log_path(paths), err.to_string()))?;
    line.push('\n');

    let path = log_path(paths);
    fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .and_then(|mut file| file.write_all(line.as_bytes()))
        .map_err(|err| CwmError::io(&path, err))
}

/// Best effort: a failed audit append is logged and the operation carries on.
pub fn record(paths: &CwmPaths, op: &str, status: &str, message: &str) {
    let event = AuditEvent {
        at: now_utc(),
        op,
        status,
        message,
    };
    if let Err(err) = append(paths, &event) {
        tracing::warn!(op, "audit log append failed: {err}");
    }
}
