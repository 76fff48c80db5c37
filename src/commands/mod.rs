pub mod archive;
pub mod backup;
pub mod bank;
pub mod clear;
pub mod delete;
pub mod get;
pub mod init;
pub mod save;
pub mod status;
pub mod tag;
pub mod watch;

use anyhow::Result;
use serde::Serialize;
use std::path::PathBuf;

use crate::cwm::bank::{self as cwm_bank, Bank, BankScope};
use crate::cwm::config::{self, CwmConfig};
use crate::cwm::history;
use crate::cwm::paths::CwmPaths;

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    /// Primary payload, printed verbatim (e.g. the command text for `get -s`).
    pub output: Vec<String>,
    pub details: Vec<String>,
    pub issues: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            output: Vec::new(),
            details: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn print(&mut self, text: impl Into<String>) {
        self.output.push(text.into());
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }
}

/// Resolved locations plus the bank scope chosen on the command line.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub paths: CwmPaths,
    pub scope: BankScope,
}

impl CommandContext {
    pub fn new(paths: CwmPaths, scope: BankScope) -> Self {
        Self { paths, scope }
    }

    pub fn bank(&self) -> Result<Bank> {
        Ok(cwm_bank::resolve(&self.paths, self.scope)?)
    }

    pub fn global_bank(&self) -> Bank {
        Bank::global(&self.paths)
    }

    pub fn config(&self) -> Result<CwmConfig> {
        let local = cwm_bank::local_bank(&self.paths);
        config::load_config(&self.paths, local.as_ref())
    }

    pub fn history_file(&self, cfg: &CwmConfig) -> Result<PathBuf> {
        Ok(history::resolve_history_file(cfg)?)
    }
}
