use anyhow::Result;

use crate::commands::{CommandContext, CommandReport};
use crate::cwm::audit;
use crate::cwm::backup::LedgerTransaction;
use crate::cwm::history::HistoryCache;
use crate::cwm::storage;
use crate::cwm::util::now_utc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearTarget {
    Saved,
    History,
}

#[derive(Debug, Clone)]
pub struct ClearOptions {
    pub target: ClearTarget,
    pub oldest: usize,
    pub filter: Option<String>,
    pub all: bool,
}

pub fn run(ctx: &CommandContext, opts: &ClearOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("clear");
    if !opts.all && opts.oldest == 0 && opts.filter.as_deref().is_none_or(str::is_empty) {
        report.issue("nothing selected: pass -n N, -f FILTER or --all");
        return Ok(report);
    }

    let bank = ctx.bank()?;
    let filter = opts.filter.as_deref();
    match opts.target {
        ClearTarget::Saved => {
            let mut tx = LedgerTransaction::begin(&bank, now_utc())?;
            let removed = tx.ledger_mut().clear(opts.oldest, filter, opts.all);
            let remaining = tx.ledger().commands.len();
            let snapshot = tx.commit()?;
            report.detail(format!("saved commands removed={removed} remaining={remaining}"));
            report.detail(format!("backup.sequence={}", snapshot.sequence));
            audit::record(
                &ctx.paths,
                "clear-saved",
                "ok",
                &format!("{removed} removed from {} bank", bank.kind),
            );
        }
        ClearTarget::History => {
            let path = bank.cache_path();
            let mut cache: HistoryCache = storage::load(&path)?;
            let removed = cache.clear(opts.oldest, filter, opts.all);
            storage::save(&path, &cache)?;
            report.detail(format!(
                "history cache removed={removed} remaining={}",
                cache.entries.len()
            ));
            audit::record(
                &ctx.paths,
                "clear-history",
                "ok",
                &format!("{removed} removed from {} cache", bank.kind),
            );
        }
    }
    Ok(report)
}
