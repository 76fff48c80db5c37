use anyhow::Result;

use crate::commands::{CommandContext, CommandReport};
use crate::cwm::archive::{Archive, ArchiveOutcome, ArchiveStore};
use crate::cwm::audit;
use crate::cwm::history::{self, HistoryCache};
use crate::cwm::storage;
use crate::cwm::util::now_utc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveSource {
    /// Every line of the resolved history file.
    Live,
    /// The bank's imported history cache.
    Cached,
}

#[derive(Debug, Clone)]
pub struct ArchiveCreateOptions {
    pub source: ArchiveSource,
    pub clear_cache: bool,
}

pub fn store(ctx: &CommandContext) -> ArchiveStore {
    ArchiveStore::new(&ctx.paths.archives_dir)
}

/// Archive `candidates` and describe the outcome on `report`.
pub fn commit_candidates(
    ctx: &CommandContext,
    report: &mut CommandReport,
    candidates: &[String],
    origin: &str,
) -> Result<Option<Archive>> {
    let global = ctx.global_bank().load_ledger()?;
    match store(ctx).archive(&global, candidates, origin, now_utc())? {
        ArchiveOutcome::Created(archive) => {
            report.detail(format!(
                "archive #{} created with {} command(s)",
                archive.id,
                archive.commands.len()
            ));
            audit::record(
                &ctx.paths,
                "archive",
                "ok",
                &format!("archive #{} from {origin}", archive.id),
            );
            Ok(Some(archive))
        }
        ArchiveOutcome::NothingToArchive { candidates } => {
            report.detail(format!(
                "nothing to archive ({candidates} candidate(s) already known)"
            ));
            Ok(None)
        }
    }
}

pub fn create(ctx: &CommandContext, opts: &ArchiveCreateOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("archive-create");
    if opts.clear_cache && opts.source != ArchiveSource::Cached {
        report.issue("--clear-cache requires --cached; nothing archived or cleared");
        return Ok(report);
    }
    let cfg = ctx.config()?;

    let (lines, origin, cache) = match opts.source {
        ArchiveSource::Live => {
            let history_file = ctx.history_file(&cfg)?;
            let lines = history::read_lines(&history_file)?;
            (lines, format!("history:{}", history_file.display()), None)
        }
        ArchiveSource::Cached => {
            let bank = ctx.bank()?;
            let cache: HistoryCache = storage::load(&bank.cache_path())?;
            let lines = cache.entries.iter().map(|e| e.command.clone()).collect();
            (lines, format!("cache:{}", bank.kind), Some((bank, cache)))
        }
    };

    let candidates = history::candidates(lines.iter().map(String::as_str), &cfg);
    report.detail(format!("candidates={}", candidates.len()));
    commit_candidates(ctx, &mut report, &candidates, &origin)?;

    if let (true, Some((bank, mut cache))) = (opts.clear_cache, cache) {
        let removed = cache.clear(0, None, true);
        storage::save(&bank.cache_path(), &cache)?;
        report.detail(format!("history cache cleared ({removed} entries)"));
    }
    Ok(report)
}

pub fn list(ctx: &CommandContext) -> Result<CommandReport> {
    let mut report = CommandReport::new("archive-list");
    let store = store(ctx);
    let index = store.load_index()?;
    report.detail(format!(
        "dir={} archives={} last_id={}",
        store.dir().display(),
        index.archives.len(),
        index.last_archive_id
    ));
    for meta in &index.archives {
        report.print(format!(
            "#{} {} {} command(s) from {}",
            meta.id,
            meta.created_at.format("%Y-%m-%d %H:%M:%S"),
            meta.count,
            meta.origin
        ));
    }
    Ok(report)
}

pub fn show(ctx: &CommandContext, id: u64) -> Result<CommandReport> {
    let mut report = CommandReport::new("archive-show");
    let archive = store(ctx).load(id)?;
    report.detail(format!(
        "archive #{} created {} from {}",
        archive.id,
        archive.created_at.to_rfc3339(),
        archive.origin
    ));
    for (idx, command) in archive.commands.iter().enumerate() {
        report.print(format!("{:>4}  {command}", idx + 1));
    }
    Ok(report)
}

pub fn delete(ctx: &CommandContext, id: u64) -> Result<CommandReport> {
    let mut report = CommandReport::new("archive-delete");
    let meta = store(ctx).delete(id)?;
    report.detail(format!("deleted archive #{} ({} command(s))", meta.id, meta.count));
    audit::record(&ctx.paths, "archive-delete", "ok", &format!("archive #{id}"));
    Ok(report)
}
