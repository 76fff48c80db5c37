use anyhow::Result;
use std::collections::HashSet;

use crate::commands::{CommandContext, CommandReport};
use crate::cwm::bank;
use crate::cwm::config::CwmConfig;
use crate::cwm::history::{self, HistoryCache};
use crate::cwm::storage;
use crate::cwm::util::is_cwm_call;
use crate::cwm::warn::{self, WarnEvent};
use crate::cwm::watch;
use crate::error::CwmError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistorySource {
    Live,
    Cached,
    /// Lines appended since `watch start`.
    Active,
}

#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub filters: Vec<String>,
    pub excludes: Vec<String>,
    pub count: Option<usize>,
}

#[derive(Debug, Clone)]
pub enum GetMode {
    Name { name: String, raw: bool },
    Id { id: u64, raw: bool },
    List { tag: Option<String>, selection: Selection },
    History { source: HistorySource, selection: Selection },
}

pub fn run(ctx: &CommandContext, mode: &GetMode) -> Result<CommandReport> {
    match mode {
        GetMode::Name { name, raw } => by_name(ctx, name, *raw),
        GetMode::Id { id, raw } => by_id(ctx, *id, *raw),
        GetMode::List { tag, selection } => list(ctx, tag.as_deref(), selection),
        GetMode::History { source, selection } => history_view(ctx, *source, selection),
    }
}

fn by_name(ctx: &CommandContext, name: &str, raw: bool) -> Result<CommandReport> {
    let mut report = CommandReport::new("get");
    let view = bank::load_merged(&ctx.paths, ctx.scope)?;
    let hit = view
        .lookup(name)
        .ok_or_else(|| CwmError::NameNotFound(name.to_string()))?;
    if raw {
        report.print(hit.entry.command.clone());
    } else {
        report.print(format!("[{}] {} -- {}", hit.entry.id, hit.entry.name, hit.entry.command));
        report.detail(format!("bank={}", hit.provenance));
        if !hit.entry.tags.is_empty() {
            let tags: Vec<&str> = hit.entry.tags.iter().map(String::as_str).collect();
            report.detail(format!("tags={}", tags.join(",")));
        }
    }
    Ok(report)
}

fn by_id(ctx: &CommandContext, id: u64, raw: bool) -> Result<CommandReport> {
    let mut report = CommandReport::new("get-id");
    let bank = ctx.bank()?;
    let ledger = bank.load_ledger()?;
    let Some(entry) = ledger.get_by_id(id) else {
        report.issue(format!("no saved command with id {id} in {} bank", bank.kind));
        return Ok(report);
    };
    if raw {
        report.print(entry.command.clone());
    } else {
        report.print(format!("[{}] {} -- {}", entry.id, entry.name, entry.command));
    }
    Ok(report)
}

fn list(ctx: &CommandContext, tag: Option<&str>, selection: &Selection) -> Result<CommandReport> {
    let mut report = CommandReport::new("get-list");
    let view = bank::load_merged(&ctx.paths, ctx.scope)?;
    let hits = view.filtered(tag, &selection.filters, &selection.excludes);
    let skip = selection
        .count
        .map_or(0, |count| hits.len().saturating_sub(count));

    report.detail(format!("matched={}", hits.len()));
    for scoped in hits.iter().skip(skip) {
        let marker = if scoped.shadowed { " (shadowed)" } else { "" };
        report.print(format!(
            "[{}] {} -- {} [{}]{marker}",
            scoped.entry.id, scoped.entry.name, scoped.entry.command, scoped.provenance
        ));
    }
    Ok(report)
}

/// Normalize, drop self-calls, keep the latest copy of each command, then
/// apply filters. Order follows the last occurrence.
pub fn select_history(lines: &[String], cfg: &CwmConfig, selection: &Selection) -> Vec<String> {
    let wants_self = selection.filters.iter().any(|f| f.contains("cwm"));
    let normalized: Vec<String> = lines
        .iter()
        .filter_map(|line| history::normalize_line(line))
        .filter(|cmd| wants_self || !cfg.ignore_self_calls || !is_cwm_call(cmd))
        .collect();

    let mut seen = HashSet::new();
    let mut latest_first: Vec<String> = normalized
        .into_iter()
        .rev()
        .filter(|cmd| seen.insert(cmd.clone()))
        .filter(|cmd| selection.filters.iter().all(|f| cmd.contains(f.as_str())))
        .filter(|cmd| !selection.excludes.iter().any(|x| cmd.contains(x.as_str())))
        .collect();

    let count = selection.count.unwrap_or(cfg.list_count);
    latest_first.truncate(count);
    latest_first.reverse();
    latest_first
}

fn history_view(
    ctx: &CommandContext,
    source: HistorySource,
    selection: &Selection,
) -> Result<CommandReport> {
    let mut report = CommandReport::new("get-hist");
    let cfg = ctx.config()?;

    let lines = match source {
        HistorySource::Live => {
            let history_file = ctx.history_file(&cfg)?;
            report.detail(format!("source={}", history_file.display()));
            history::read_lines(&history_file)?
        }
        HistorySource::Cached => {
            let bank = ctx.bank()?;
            let cache: HistoryCache = storage::load(&bank.cache_path())?;
            report.detail(format!("source={} cache", bank.kind));
            cache.entries.into_iter().map(|entry| entry.command).collect()
        }
        HistorySource::Active => {
            let session = watch::load(&ctx.paths.watch_session_file)?;
            let history_file = match &session {
                watch::WatchSession::Active { history_file, .. } => history_file.clone(),
                watch::WatchSession::None => return Err(CwmError::NoActiveSession.into()),
            };
            let delta = watch::peek(&session, history::line_count(&history_file)?)?;
            if delta.truncated {
                warn::emit(WarnEvent {
                    code: "HISTORY_TRUNCATED",
                    stage: "watch-peek",
                    action: "read-from-zero",
                    bank: "global",
                    source: &history_file.display().to_string(),
                    reason: "history shrank below session start",
                    err: "",
                });
            }
            report.detail(format!(
                "source=watch session lines {}..{}",
                delta.start_line, delta.end_line
            ));
            history::read_range(&history_file, delta.start_line, delta.end_line)?
        }
    };

    let selected = select_history(&lines, &cfg, selection);
    if selected.is_empty() {
        report.detail("no matching history entries");
    }
    for (idx, command) in selected.iter().enumerate() {
        report.print(format!("{:>4}  {command}", idx + 1));
    }
    Ok(report)
}
