//! Watch sessions: a marked span of shell history between `start` and `stop`.
//!
//! The marker is one process-wide record. Transitions take it as an explicit
//! parameter and leave persistence to the caller, so a failed `stop --save`
//! can keep the session ACTIVE simply by not writing the new state.

use crate::cwm::storage::{self, Record};
use crate::error::{CwmError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WatchSession {
    #[default]
    None,
    Active {
        start_line: u64,
        started_at: DateTime<Utc>,
        history_file: PathBuf,
    },
}

impl Record for WatchSession {
    const KIND: &'static str = "cwm.watch_session";
    const SCHEMA_VERSION: u32 = 1;
}

/// Span `[start_line, end_line)` closed by `stop`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchDelta {
    pub start_line: u64,
    pub end_line: u64,
    pub started_at: DateTime<Utc>,
    pub history_file: PathBuf,
    /// History shrank below `start_line` while the session was open.
    pub truncated: bool,
}

pub fn start(
    session: &mut WatchSession,
    history_file: &Path,
    current_len: u64,
    now: DateTime<Utc>,
) -> Result<()> {
    if let WatchSession::Active { start_line, .. } = session {
        return Err(CwmError::SessionAlreadyActive {
            start_line: *start_line,
        });
    }
    *session = WatchSession::Active {
        start_line: current_len,
        started_at: now,
        history_file: history_file.to_path_buf(),
    };
    Ok(())
}

/// Delta for the open session without closing it.
pub fn peek(session: &WatchSession, current_len: u64) -> Result<WatchDelta> {
    let WatchSession::Active {
        start_line,
        started_at,
        history_file,
    } = session
    else {
        return Err(CwmError::NoActiveSession);
    };
    let truncated = current_len < *start_line;
    Ok(WatchDelta {
        start_line: if truncated { 0 } else { *start_line },
        end_line: current_len,
        started_at: *started_at,
        history_file: history_file.clone(),
        truncated,
    })
}

pub fn stop(session: &mut WatchSession, current_len: u64) -> Result<WatchDelta> {
    let delta = peek(session, current_len)?;
    *session = WatchSession::None;
    Ok(delta)
}

pub fn load(path: &Path) -> Result<WatchSession> {
    storage::load(path)
}

pub fn save(path: &Path, session: &WatchSession) -> Result<()> {
    storage::save(path, session)
}
