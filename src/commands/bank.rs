use anyhow::{Context, Result};
use std::fs;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;

use crate::commands::{CommandContext, CommandReport};
use crate::cwm::audit;
use crate::cwm::backup::BackupStore;
use crate::cwm::bank::{self, Bank, BankKind};
use crate::cwm::util::now_utc;
use crate::error::CwmError;

pub fn info(ctx: &CommandContext) -> Result<CommandReport> {
    let mut report = CommandReport::new("bank-info");
    let global = ctx.global_bank();
    report.detail(format!("global={}", global.root.display()));
    match bank::local_bank(&ctx.paths) {
        Some(local) => report.detail(format!("local={}", local.root.display())),
        None => report.detail("local=none"),
    }
    let active = ctx.bank()?;
    report.detail(format!("active={}", active.kind));
    Ok(report)
}

fn confirm(prompt: &str) -> Result<bool> {
    let mut stderr = io::stderr();
    write!(stderr, "{prompt} [y/N] ")?;
    stderr.flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

/// Remove everything under the bank's `data/` except `keep` (the backup and
/// archive stores).
fn remove_data_except(bank: &Bank, keep: &[PathBuf]) -> Result<usize> {
    let data_dir = bank.data_dir();
    let entries = match fs::read_dir(&data_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(CwmError::io(&data_dir, err).into()),
    };

    let mut removed = 0usize;
    for entry in entries {
        let path = entry
            .with_context(|| format!("failed to read {}", data_dir.display()))?
            .path();
        if keep.contains(&path) {
            continue;
        }
        let result = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        result.with_context(|| format!("failed to remove {}", path.display()))?;
        removed += 1;
    }
    Ok(removed)
}

pub fn delete(ctx: &CommandContext, kind: BankKind, yes: bool) -> Result<CommandReport> {
    let mut report = CommandReport::new("bank-delete");
    let target = match kind {
        BankKind::Local => bank::local_bank(&ctx.paths)
            .ok_or_else(|| CwmError::NoBankInitialized(ctx.paths.cwd.clone()))?,
        BankKind::Global => ctx.global_bank(),
    };

    if !yes {
        if !io::stdin().is_terminal() {
            report.issue("refusing to delete without --yes on a non-interactive terminal");
            return Ok(report);
        }
        if !confirm(&format!("delete {} bank at {}?", target.kind, target.root.display()))? {
            report.detail("aborted");
            return Ok(report);
        }
    }

    // The final state always lands in the Global backup store, which survives
    // both kinds of delete.
    let ledger = target.load_ledger()?;
    let origin = match kind {
        BankKind::Local => format!("deleted-local:{}", target.root.display()),
        BankKind::Global => "deleted-global".to_string(),
    };
    let store = BackupStore::for_bank(&ctx.global_bank());
    let snapshot = store.snapshot_ledger(&ledger, Some(&origin), now_utc())?;
    report.detail(format!(
        "final snapshot #{} ({} command(s)) in {}",
        snapshot.sequence,
        snapshot.command_count,
        store.dir().display()
    ));

    match kind {
        BankKind::Local => {
            fs::remove_dir_all(&target.root)
                .with_context(|| format!("failed to remove {}", target.root.display()))?;
            report.detail(format!("removed {}", target.root.display()));
        }
        BankKind::Global => {
            let keep = [target.backup_dir(), ctx.paths.archives_dir.clone()];
            let removed = remove_data_except(&target, &keep)?;
            report.detail(format!(
                "removed {removed} item(s) from {}; backups and archives kept",
                target.data_dir().display()
            ));
        }
    }

    audit::record(&ctx.paths, "bank-delete", "ok", &origin);
    Ok(report)
}
