use anyhow::Result;

use crate::commands::archive;
use crate::commands::{CommandContext, CommandReport};
use crate::cwm::backup::BackupStore;
use crate::cwm::bank::{self, Bank};
use crate::cwm::history::HistoryCache;
use crate::cwm::storage;
use crate::cwm::watch::{self, WatchSession};

fn describe_bank(report: &mut CommandReport, bank: &Bank) {
    match bank.load_ledger() {
        Ok(ledger) => report.detail(format!(
            "{}.commands={} last_id={}",
            bank.kind,
            ledger.commands.len(),
            ledger.last_saved_id
        )),
        Err(err) => report.issue(format!("{} ledger: {err}", bank.kind)),
    }
    match storage::load::<HistoryCache>(&bank.cache_path()) {
        Ok(cache) => report.detail(format!(
            "{}.history_cache={} offset={}",
            bank.kind,
            cache.entries.len(),
            cache.last_offset
        )),
        Err(err) => report.issue(format!("{} history cache: {err}", bank.kind)),
    }
    match BackupStore::for_bank(bank).load_index() {
        Ok(index) => report.detail(format!(
            "{}.backups={} last_sequence={}",
            bank.kind,
            index.snapshots.len(),
            index.last_sequence
        )),
        Err(err) => report.issue(format!("{} backup index: {err}", bank.kind)),
    }
}

pub fn run(ctx: &CommandContext) -> Result<CommandReport> {
    let mut report = CommandReport::new("status");
    let paths = &ctx.paths;

    report.detail(format!("cwm_home={}", paths.cwm_home.display()));
    report.detail(format!("data_dir={}", paths.global_data_dir.display()));
    report.detail(format!("archives_dir={}", paths.archives_dir.display()));
    report.detail(format!("logs_dir={}", paths.logs_dir.display()));

    match ctx.bank() {
        Ok(active) => report.detail(format!("active_bank={} ({})", active.kind, active.root.display())),
        Err(err) => report.issue(format!("active bank: {err:#}")),
    }

    let global = ctx.global_bank();
    describe_bank(&mut report, &global);
    if let Some(local) = bank::local_bank(paths) {
        describe_bank(&mut report, &local);
    }

    match archive::store(ctx).load_index() {
        Ok(index) => report.detail(format!(
            "archives={} last_archive_id={}",
            index.archives.len(),
            index.last_archive_id
        )),
        Err(err) => report.issue(format!("archive index: {err}")),
    }

    match watch::load(&paths.watch_session_file) {
        Ok(WatchSession::Active { start_line, .. }) => {
            report.detail(format!("watch=active start_line={start_line}"))
        }
        Ok(WatchSession::None) => report.detail("watch=none"),
        Err(err) => report.issue(format!("watch session: {err}")),
    }

    match ctx.config() {
        Ok(cfg) => {
            report.detail(format!("list_count={}", cfg.list_count));
            match ctx.history_file(&cfg) {
                Ok(path) => report.detail(format!("history_file={}", path.display())),
                Err(err) => report.detail(format!("history_file=unavailable ({err})")),
            }
        }
        Err(err) => report.issue(format!("config: {err:#}")),
    }

    Ok(report)
}
