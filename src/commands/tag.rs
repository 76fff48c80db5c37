use anyhow::Result;

use crate::commands::{CommandContext, CommandReport};
use crate::cwm::util::now_utc;

pub fn run(ctx: &CommandContext, name: &str, tags: &[String], remove: bool) -> Result<CommandReport> {
    let mut report = CommandReport::new(if remove { "untag" } else { "tag" });
    let bank = ctx.bank()?;
    let mut ledger = bank.load_ledger()?;
    let changed = ledger.tag(name, tags, remove, now_utc())?;
    if changed == 0 {
        report.detail(format!("{name}: tags already up to date"));
        return Ok(report);
    }
    bank.save_ledger(&ledger)?;

    let current: Vec<&str> = ledger
        .get(name)
        .map(|entry| entry.tags.iter().map(String::as_str).collect())
        .unwrap_or_default();
    report.detail(format!("{name}: {changed} tag(s) {}", if remove { "removed" } else { "added" }));
    report.detail(format!("tags={}", current.join(",")));
    Ok(report)
}
