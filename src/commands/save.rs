use anyhow::{Context, Result};
use std::collections::BTreeSet;

use crate::commands::archive::{self, ArchiveCreateOptions, ArchiveSource};
use crate::commands::{CommandContext, CommandReport};
use crate::cwm::backup::LedgerTransaction;
use crate::cwm::history::{self, HistoryCache};
use crate::cwm::ledger::{parse_assignment, validate_name};
use crate::cwm::storage;
use crate::cwm::util::now_utc;
use crate::cwm::warn::{self, WarnEvent};

#[derive(Debug, Clone)]
pub enum SaveMode {
    Add { payload: String, tags: Vec<String> },
    Edit { payload: String },
    Rename { old: String, new: String },
    FromHistory { name: String },
    List,
    SyncHistory { count: Option<usize> },
    Archive,
}

fn parse_payload(payload: &str) -> Result<(String, String)> {
    if let Some((name, _)) = payload.split_once('=') {
        validate_name(name.trim())?;
    }
    parse_assignment(payload)
        .with_context(|| format!("expected NAME=COMMAND, got `{payload}`"))
}

pub fn run(ctx: &CommandContext, mode: &SaveMode) -> Result<CommandReport> {
    match mode {
        SaveMode::Add { payload, tags } => add(ctx, payload, tags),
        SaveMode::Edit { payload } => edit(ctx, payload),
        SaveMode::Rename { old, new } => rename(ctx, old, new),
        SaveMode::FromHistory { name } => from_history(ctx, name),
        SaveMode::List => list(ctx),
        SaveMode::SyncHistory { count } => sync_history(ctx, *count),
        SaveMode::Archive => archive::create(
            ctx,
            &ArchiveCreateOptions {
                source: ArchiveSource::Live,
                clear_cache: false,
            },
        ),
    }
}

fn add(ctx: &CommandContext, payload: &str, tags: &[String]) -> Result<CommandReport> {
    let mut report = CommandReport::new("save");
    let (name, command) = parse_payload(payload)?;
    let bank = ctx.bank()?;
    let mut ledger = bank.load_ledger()?;
    let tags: BTreeSet<String> = tags.iter().cloned().collect();
    let entry = ledger.add(&name, &command, tags, now_utc())?;
    report.detail(format!("saved [{}] {} --> {}", entry.id, entry.name, entry.command));
    bank.save_ledger(&ledger)?;
    report.detail(format!("bank={}", bank.kind));
    Ok(report)
}

fn edit(ctx: &CommandContext, payload: &str) -> Result<CommandReport> {
    let mut report = CommandReport::new("save-edit");
    let (name, command) = parse_payload(payload)?;
    let bank = ctx.bank()?;
    let mut tx = LedgerTransaction::begin(&bank, now_utc())?;
    let previous = tx.ledger_mut().edit(&name, &command, now_utc())?;
    let snapshot = tx.commit()?;
    report.detail(format!("updated {name}: {previous} --> {command}"));
    report.detail(format!("backup.sequence={}", snapshot.sequence));
    Ok(report)
}

fn rename(ctx: &CommandContext, old: &str, new: &str) -> Result<CommandReport> {
    let mut report = CommandReport::new("save-rename");
    let bank = ctx.bank()?;
    let mut tx = LedgerTransaction::begin(&bank, now_utc())?;
    tx.ledger_mut().rename(old, new, now_utc())?;
    let snapshot = tx.commit()?;
    report.detail(format!("renamed {old} --> {new}"));
    report.detail(format!("backup.sequence={}", snapshot.sequence));
    Ok(report)
}

fn from_history(ctx: &CommandContext, name: &str) -> Result<CommandReport> {
    let mut report = CommandReport::new("save-from-history");
    let cfg = ctx.config()?;
    let history_file = ctx.history_file(&cfg)?;
    let Some(command) = history::last_command(&history_file)? else {
        report.issue(format!(
            "no usable command found in {}",
            history_file.display()
        ));
        return Ok(report);
    };

    let bank = ctx.bank()?;
    let mut ledger = bank.load_ledger()?;
    let entry = ledger.add(name, &command, BTreeSet::new(), now_utc())?;
    report.detail(format!("saved [{}] {} --> {}", entry.id, entry.name, entry.command));
    bank.save_ledger(&ledger)?;
    Ok(report)
}

fn list(ctx: &CommandContext) -> Result<CommandReport> {
    let mut report = CommandReport::new("save-list");
    let bank = ctx.bank()?;
    let ledger = bank.load_ledger()?;
    report.detail(format!(
        "bank={} total={} last_id={}",
        bank.kind,
        ledger.commands.len(),
        ledger.last_saved_id
    ));
    if ledger.commands.is_empty() {
        report.detail("no saved commands");
    }
    for entry in &ledger.commands {
        report.print(format!("[{}] {} -- {}", entry.id, entry.name, entry.command));
    }
    Ok(report)
}

fn sync_history(ctx: &CommandContext, count: Option<usize>) -> Result<CommandReport> {
    let mut report = CommandReport::new("save-hist");
    let cfg = ctx.config()?;
    let history_file = ctx.history_file(&cfg)?;
    let bank = ctx.bank()?;
    let cache_path = bank.cache_path();
    let mut cache: HistoryCache = storage::load(&cache_path)?;

    let before = cache.entries.len();
    let outcome = cache.import_from(&history_file, now_utc())?;
    if outcome.truncated {
        warn::emit(WarnEvent {
            code: "HISTORY_TRUNCATED",
            stage: "history-sync",
            action: "resync-from-zero",
            bank: &bank.kind.to_string(),
            source: &history_file.display().to_string(),
            reason: "history file shorter than recorded offset",
            err: "",
        });
        report.detail("history.truncated=true");
    }

    // `-n N` keeps only the newest N imported lines; the offset still advances.
    if let Some(limit) = count {
        let imported = cache.entries.len() - before;
        if imported > limit {
            cache.entries.drain(before..before + (imported - limit));
        }
    }

    let added = cache.entries.len() - before;
    report.detail(format!("history_file={}", history_file.display()));
    report.detail(format!("history.offset={}", cache.last_offset));
    if added == 0 && !outcome.truncated && outcome.new_lines.is_empty() {
        report.detail("history cache already up to date");
    } else {
        report.detail(format!("history.imported={added}"));
    }
    storage::save(&cache_path, &cache)?;
    Ok(report)
}
