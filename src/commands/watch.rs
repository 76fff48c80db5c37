use anyhow::Result;

use crate::commands::archive::commit_candidates;
use crate::commands::{CommandContext, CommandReport};
use crate::cwm::history;
use crate::cwm::util::now_utc;
use crate::cwm::warn::{self, WarnEvent};
use crate::cwm::watch::{self, WatchDelta, WatchSession};

fn warn_if_truncated(delta: &WatchDelta, stage: &str) {
    if delta.truncated {
        warn::emit(WarnEvent {
            code: "HISTORY_TRUNCATED",
            stage,
            action: "read-from-zero",
            bank: "global",
            source: &delta.history_file.display().to_string(),
            reason: "history shrank below session start",
            err: "",
        });
    }
}

fn active_history_file(session: &WatchSession) -> Option<&std::path::Path> {
    match session {
        WatchSession::Active { history_file, .. } => Some(history_file.as_path()),
        WatchSession::None => None,
    }
}

pub fn start(ctx: &CommandContext) -> Result<CommandReport> {
    let mut report = CommandReport::new("watch-start");
    let cfg = ctx.config()?;
    let history_file = ctx.history_file(&cfg)?;
    let path = &ctx.paths.watch_session_file;

    let mut session = watch::load(path)?;
    let current_len = history::line_count(&history_file)?;
    watch::start(&mut session, &history_file, current_len, now_utc())?;
    watch::save(path, &session)?;

    report.detail(format!("watching {} from line {current_len}", history_file.display()));
    Ok(report)
}

pub fn stop(ctx: &CommandContext, save: bool) -> Result<CommandReport> {
    let mut report = CommandReport::new("watch-stop");
    let path = &ctx.paths.watch_session_file;
    let mut session = watch::load(path)?;
    let current_len = match active_history_file(&session) {
        Some(history_file) => history::line_count(history_file)?,
        None => 0,
    };

    // Archive against the still-open session; the marker is only cleared once
    // that has succeeded.
    let delta = watch::peek(&session, current_len)?;
    warn_if_truncated(&delta, "watch-stop");
    let lines = history::read_range(&delta.history_file, delta.start_line, delta.end_line)?;
    report.detail(format!(
        "session lines {}..{} ({} line(s))",
        delta.start_line,
        delta.end_line,
        lines.len()
    ));

    if save {
        let cfg = ctx.config()?;
        let candidates = history::candidates(lines.iter().map(String::as_str), &cfg);
        let origin = format!("watch:{}", delta.started_at.to_rfc3339());
        commit_candidates(ctx, &mut report, &candidates, &origin)?;
    } else {
        for line in &lines {
            report.print(line.clone());
        }
    }

    watch::stop(&mut session, current_len)?;
    watch::save(path, &session)?;
    report.detail("watch session closed");
    Ok(report)
}

pub fn status(ctx: &CommandContext) -> Result<CommandReport> {
    let mut report = CommandReport::new("watch-status");
    let session = watch::load(&ctx.paths.watch_session_file)?;
    let Some(history_file) = active_history_file(&session) else {
        report.detail("state=none");
        return Ok(report);
    };
    let delta = watch::peek(&session, history::line_count(history_file)?)?;
    warn_if_truncated(&delta, "watch-status");
    report.detail("state=active");
    report.detail(format!("history_file={}", delta.history_file.display()));
    report.detail(format!("started_at={}", delta.started_at.to_rfc3339()));
    report.detail(format!(
        "recorded_lines={}",
        delta.end_line.saturating_sub(delta.start_line)
    ));
    Ok(report)
}
