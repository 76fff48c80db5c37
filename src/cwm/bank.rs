use crate::cwm::ledger::{CommandEntry, Ledger};
use crate::cwm::paths::CwmPaths;
use crate::cwm::storage;
use crate::error::{CwmError, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub const LOCAL_BANK_DIR: &str = ".cwm";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BankScope {
    Local,
    Global,
    #[default]
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BankKind {
    Local,
    Global,
}

impl fmt::Display for BankKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Global => write!(f, "global"),
        }
    }
}

/// One namespace of saved commands and the files that back it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bank {
    pub kind: BankKind,
    pub root: PathBuf,
}

impl Bank {
    pub fn global(paths: &CwmPaths) -> Self {
        Self {
            kind: BankKind::Global,
            root: paths.cwm_home.clone(),
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir().join("saved_cmds.json")
    }

    pub fn cache_path(&self) -> PathBuf {
        self.data_dir().join("history.json")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.data_dir().join("backup")
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn load_ledger(&self) -> Result<Ledger> {
        storage::load(&self.ledger_path())
    }

    pub fn save_ledger(&self, ledger: &Ledger) -> Result<()> {
        storage::save(&self.ledger_path(), ledger)
    }
}

/// Nearest ancestor (inclusive) of `start` holding a `.cwm` directory.
pub fn find_local_bank(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(LOCAL_BANK_DIR))
        .find(|candidate| candidate.is_dir())
}

fn discover_local(paths: &CwmPaths) -> Option<Bank> {
    let root = find_local_bank(&paths.cwd)?;
    // A global home that happens to be named `.cwm` is still the global bank.
    if root == paths.cwm_home {
        return None;
    }
    Some(Bank {
        kind: BankKind::Local,
        root,
    })
}

pub fn resolve(paths: &CwmPaths, scope: BankScope) -> Result<Bank> {
    match scope {
        BankScope::Global => Ok(Bank::global(paths)),
        BankScope::Local => {
            discover_local(paths).ok_or_else(|| CwmError::NoBankInitialized(paths.cwd.clone()))
        }
        BankScope::Auto => Ok(discover_local(paths).unwrap_or_else(|| Bank::global(paths))),
    }
}

pub fn local_bank(paths: &CwmPaths) -> Option<Bank> {
    discover_local(paths)
}

/// Create `.cwm/data` in the working directory with an empty ledger.
pub fn init_local(paths: &CwmPaths) -> Result<Bank> {
    let root = paths.cwd.join(LOCAL_BANK_DIR);
    if root.join("data").is_dir() {
        return Err(CwmError::BankAlreadyInitialized(root));
    }
    let bank = Bank {
        kind: BankKind::Local,
        root,
    };
    fs::create_dir_all(bank.backup_dir()).map_err(|err| CwmError::io(&bank.backup_dir(), err))?;
    bank.save_ledger(&Ledger::default())?;
    Ok(bank)
}

#[derive(Debug, Clone, Serialize)]
pub struct ScopedEntry {
    pub provenance: BankKind,
    pub shadowed: bool,
    pub entry: CommandEntry,
}

/// Local and Global entries side by side; Local wins name lookups.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MergedView {
    pub entries: Vec<ScopedEntry>,
}

pub fn merge(local: Option<&Ledger>, global: &Ledger) -> MergedView {
    let mut entries = Vec::new();
    let mut local_names = BTreeSet::new();
    if let Some(local) = local {
        for entry in &local.commands {
            local_names.insert(entry.name.as_str());
            entries.push(ScopedEntry {
                provenance: BankKind::Local,
                shadowed: false,
                entry: entry.clone(),
            });
        }
    }
    for entry in &global.commands {
        entries.push(ScopedEntry {
            provenance: BankKind::Global,
            shadowed: local_names.contains(entry.name.as_str()),
            entry: entry.clone(),
        });
    }
    MergedView { entries }
}

impl MergedView {
    pub fn lookup(&self, name: &str) -> Option<&ScopedEntry> {
        self.entries
            .iter()
            .find(|scoped| !scoped.shadowed && scoped.entry.name == name)
    }

    /// Keep entries carrying `tag` (if any) whose name or command matches
    /// every filter and none of the exclusions.
    pub fn filtered(&self, tag: Option<&str>, filters: &[String], excludes: &[String]) -> Vec<&ScopedEntry> {
        self.entries
            .iter()
            .filter(|scoped| tag.is_none_or(|t| scoped.entry.tags.contains(t)))
            .filter(|scoped| {
                !excludes
                    .iter()
                    .any(|ex| scoped.entry.command.contains(ex.as_str()))
            })
            .filter(|scoped| {
                filters.iter().all(|f| {
                    scoped.entry.command.contains(f.as_str()) || scoped.entry.name.contains(f.as_str())
                })
            })
            .collect()
    }
}

/// Load Local (if any) and Global ledgers as one view.
pub fn load_merged(paths: &CwmPaths, scope: BankScope) -> Result<MergedView> {
    let global = Bank::global(paths).load_ledger()?;
    match scope {
        BankScope::Global => Ok(merge(None, &global)),
        BankScope::Local => {
            let bank = resolve(paths, BankScope::Local)?;
            Ok(merge(Some(&bank.load_ledger()?), &Ledger::default()))
        }
        BankScope::Auto => {
            let local = match local_bank(paths) {
                Some(bank) => Some(bank.load_ledger()?),
                None => None,
            };
            Ok(merge(local.as_ref(), &global))
        }
    }
}
