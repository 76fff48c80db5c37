use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::io::{self, BufRead, IsTerminal, Write};

use crate::commands::{CommandContext, CommandReport};
use crate::cwm::audit;
use crate::cwm::bank::Bank;
use crate::cwm::backup::{
    self, BackupStore, ConflictResolver, LedgerTransaction, MergeConflict, MergeStrategy,
    Resolution, suggest_rename,
};
use crate::cwm::ledger::Ledger;
use crate::cwm::util::{now_utc, truncate_with_ellipsis};
use crate::error::{CwmError, Result as CwmResult};

#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub sequences: Vec<u64>,
    pub chain: bool,
    pub dry_run: bool,
}

/// Asks on the terminal how to settle each conflicting name.
struct PromptResolver<R: BufRead, W: Write> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> PromptResolver<R, W> {
    fn ask(&mut self, prompt: &str) -> CwmResult<String> {
        let stdin_path = std::path::Path::new("<stdin>");
        write!(self.output, "{prompt}").map_err(|err| CwmError::io(stdin_path, err))?;
        self.output.flush().map_err(|err| CwmError::io(stdin_path, err))?;
        let mut line = String::new();
        self.input
            .read_line(&mut line)
            .map_err(|err| CwmError::io(stdin_path, err))?;
        Ok(line.trim().to_string())
    }
}

impl<R: BufRead, W: Write> ConflictResolver for PromptResolver<R, W> {
    fn resolve(&mut self, conflict: &MergeConflict, taken: &BTreeSet<String>) -> CwmResult<Resolution> {
        let prompt = format!(
            "conflict on `{}`\n  a) {}\n  b) {}\nkeep [a]/b/r(ename b)? ",
            conflict.name, conflict.a.command, conflict.b.command
        );
        loop {
            match self.ask(&prompt)?.as_str() {
                "" | "a" | "A" => return Ok(Resolution::KeepA),
                "b" | "B" => return Ok(Resolution::KeepB),
                "r" | "R" => {
                    let suggested = suggest_rename(&conflict.name, taken);
                    let answer = self.ask(&format!("new name for b [{suggested}]: "))?;
                    let renamed_b = if answer.is_empty() { suggested } else { answer };
                    return Ok(Resolution::KeepBoth { renamed_b });
                }
                _ => continue,
            }
        }
    }
}

fn open_store(ctx: &CommandContext) -> Result<(Bank, BackupStore)> {
    let bank = ctx.bank()?;
    let store = BackupStore::for_bank(&bank);
    Ok((bank, store))
}

pub fn list(ctx: &CommandContext) -> Result<CommandReport> {
    let mut report = CommandReport::new("backup-list");
    let (bank, store) = open_store(ctx)?;
    let snapshots = store.list()?;
    report.detail(format!("bank={} snapshots={}", bank.kind, snapshots.len()));
    for snap in &snapshots {
        let preview = match store.load_snapshot(snap) {
            Ok(ledger) => {
                let names: Vec<&str> = ledger.commands.iter().map(|e| e.name.as_str()).collect();
                truncate_with_ellipsis(&names.join(", "), 60)
            }
            Err(err) => {
                report.issue(format!("#{}: {err}", snap.sequence));
                "<unreadable>".to_string()
            }
        };
        let origin = snap
            .origin
            .as_deref()
            .map(|o| format!(" origin={o}"))
            .unwrap_or_default();
        report.print(format!(
            "#{} {} {} command(s){origin} [{preview}]",
            snap.sequence,
            snap.created_at.format("%Y-%m-%d %H:%M:%S"),
            snap.command_count
        ));
    }
    Ok(report)
}

pub fn show(ctx: &CommandContext, sequence: Option<u64>) -> Result<CommandReport> {
    let mut report = CommandReport::new("backup-show");
    let (_, store) = open_store(ctx)?;
    let snap = match sequence {
        Some(seq) => store.find(seq)?,
        None => match store.latest()? {
            Some(snap) => snap,
            None => {
                report.detail("no backups yet");
                return Ok(report);
            }
        },
    };
    let ledger = store.load_snapshot(&snap)?;
    report.detail(format!(
        "backup #{} created {} ({} command(s))",
        snap.sequence,
        snap.created_at.to_rfc3339(),
        snap.command_count
    ));
    for entry in &ledger.commands {
        report.print(format!("[{}] {} -- {}", entry.id, entry.name, entry.command));
    }
    Ok(report)
}

fn run_merge(a: &Ledger, b: &Ledger, chain: bool) -> CwmResult<backup::MergeOutcome> {
    if chain {
        return backup::merge(a, b, MergeStrategy::Chain);
    }
    if io::stdin().is_terminal() {
        let mut resolver = PromptResolver {
            input: io::stdin().lock(),
            output: io::stderr(),
        };
        return backup::merge(a, b, MergeStrategy::Interactive(&mut resolver));
    }
    backup::merge(a, b, MergeStrategy::Surface)
}

/// One sequence merges that snapshot into the current ledger; several fold
/// left to right starting from the first snapshot.
pub fn merge(ctx: &CommandContext, opts: &MergeOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("backup-merge");
    let (bank, store) = open_store(ctx)?;
    let Some((first, rest)) = opts.sequences.split_first() else {
        report.issue("merge needs at least one backup sequence");
        return Ok(report);
    };

    let first_ledger = store.load_snapshot(&store.find(*first)?)?;
    let (mut merged, others) = if rest.is_empty() {
        (bank.load_ledger()?, vec![first_ledger])
    } else {
        let mut others = Vec::with_capacity(rest.len());
        for seq in rest {
            others.push(store.load_snapshot(&store.find(*seq)?)?);
        }
        (first_ledger, others)
    };

    for other in &others {
        let outcome = run_merge(&merged, other, opts.chain)?;
        let r = &outcome.report;
        report.detail(format!(
            "added={} duplicates={} conflicts={} replaced={} renamed={}",
            r.added.len(),
            r.duplicates,
            r.conflicts.len(),
            r.replaced.len(),
            r.renamed.len()
        ));
        for (from, to) in &r.renamed {
            report.detail(format!("renamed {from} --> {to}"));
        }
        merged = outcome.ledger;
    }

    report.detail(format!("result.commands={}", merged.commands.len()));
    if opts.dry_run {
        report.detail("dry run: ledger not modified");
        for entry in &merged.commands {
            report.print(format!("[{}] {} -- {}", entry.id, entry.name, entry.command));
        }
        return Ok(report);
    }

    let mut tx = LedgerTransaction::begin(&bank, now_utc())?;
    tx.replace(merged);
    let snapshot = tx.commit()?;
    report.detail(format!("backup.sequence={}", snapshot.sequence));
    audit::record(
        &ctx.paths,
        "backup-merge",
        "ok",
        &format!("{:?} into {} bank", opts.sequences, bank.kind),
    );
    Ok(report)
}

pub fn prune(ctx: &CommandContext, keep: usize) -> Result<CommandReport> {
    let mut report = CommandReport::new("backup-prune");
    let (bank, store) = open_store(ctx)?;
    let removed = store.prune(keep)?;
    report.detail(format!("bank={} pruned={} keep={keep}", bank.kind, removed.len()));
    if !removed.is_empty() {
        let seqs: Vec<String> = removed.iter().map(|s| s.sequence.to_string()).collect();
        audit::record(
            &ctx.paths,
            "backup-prune",
            "ok",
            &format!("removed #{}", seqs.join(", #")),
        );
    }
    Ok(report)
}

pub fn restore(ctx: &CommandContext, sequence: u64) -> Result<CommandReport> {
    let mut report = CommandReport::new("backup-restore");
    let (bank, store) = open_store(ctx)?;
    let snap = store.find(sequence)?;
    let restored = store
        .load_snapshot(&snap)
        .with_context(|| format!("backup #{sequence} cannot be restored"))?;

    let mut tx = LedgerTransaction::begin(&bank, now_utc())?;
    let before = tx.snapshot().sequence;
    tx.replace(restored);
    tx.commit()?;
    report.detail(format!(
        "restored backup #{sequence} ({} command(s)); previous ledger kept as #{before}",
        snap.command_count
    ));
    audit::record(
        &ctx.paths,
        "backup-restore",
        "ok",
        &format!("#{sequence} into {} bank", bank.kind),
    );
    Ok(report)
}
