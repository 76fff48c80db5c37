use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failures surfaced by the ledger engine.
///
/// `HistoryTruncated` and `NothingToArchive` are not here on purpose: both are
/// successful outcomes and travel as values (`SyncOutcome::truncated`,
/// `ArchiveOutcome::NothingToArchive`).
#[derive(Debug, Error)]
pub enum CwmError {
    #[error("corrupt record {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("name `{0}` already exists")]
    NameConflict(String),
    #[error("name `{0}` not found")]
    NameNotFound(String),
    #[error("invalid name `{0}`: use letters, digits, `_` or `-`")]
    InvalidName(String),
    #[error("no local bank found from {0}; run `cwm init` first")]
    NoBankInitialized(PathBuf),
    #[error("bank already initialized at {0}")]
    BankAlreadyInitialized(PathBuf),
    #[error("a watch session is already active (start line {start_line})")]
    SessionAlreadyActive { start_line: u64 },
    #[error("no active watch session")]
    NoActiveSession,
    #[error("merge conflict on: {}", names.join(", "))]
    MergeConflict { names: Vec<String> },
    #[error("archive #{0} not found")]
    ArchiveNotFound(u64),
    #[error("backup #{0} not found")]
    BackupNotFound(u64),
    #[error("shell history file could not be located; set CWM_HISTORY_FILE")]
    HistoryUnavailable,
    #[error("config invalid: {0}")]
    Config(String),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, CwmError>;

impl CwmError {
    pub fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn corrupt(path: &Path, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> CwmErrorCode {
        match self {
            Self::Corrupt { .. } => CwmErrorCode::E001Corrupt,
            Self::NameConflict(_) => CwmErrorCode::E002NameConflict,
            Self::InvalidName(_) => CwmErrorCode::E003NameInvalid,
            Self::NoBankInitialized(_) | Self::BankAlreadyInitialized(_) => {
                CwmErrorCode::E004Bank
            }
            Self::SessionAlreadyActive { .. } | Self::NoActiveSession => {
                CwmErrorCode::E005Session
            }
            Self::MergeConflict { .. } => CwmErrorCode::E006MergeConflict,
            Self::NameNotFound(_) | Self::ArchiveNotFound(_) | Self::BackupNotFound(_) => {
                CwmErrorCode::E007NotFound
            }
            Self::HistoryUnavailable | Self::Config(_) => CwmErrorCode::E008Config,
            Self::Io { .. } => CwmErrorCode::E009Io,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CwmErrorCode {
    E001Corrupt,
    E002NameConflict,
    E003NameInvalid,
    E004Bank,
    E005Session,
    E006MergeConflict,
    E007NotFound,
    E008Config,
    E009Io,
}

impl CwmErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::E001Corrupt => "E001_CORRUPT",
            Self::E002NameConflict => "E002_NAME_CONFLICT",
            Self::E003NameInvalid => "E003_NAME_INVALID",
            Self::E004Bank => "E004_BANK",
            Self::E005Session => "E005_SESSION",
            Self::E006MergeConflict => "E006_MERGE_CONFLICT",
            Self::E007NotFound => "E007_NOT_FOUND",
            Self::E008Config => "E008_CONFIG",
            Self::E009Io => "E009_IO",
        }
    }
}
