use anyhow::Result;

use crate::commands::{CommandContext, CommandReport};
use crate::cwm::audit;
use crate::cwm::bank;

pub fn run(ctx: &CommandContext) -> Result<CommandReport> {
    let mut report = CommandReport::new("init");
    let bank = bank::init_local(&ctx.paths)?;
    report.detail(format!("local_bank={}", bank.root.display()));
    report.detail(format!("ledger={}", bank.ledger_path().display()));
    audit::record(
        &ctx.paths,
        "init",
        "ok",
        &format!("local bank created at {}", bank.root.display()),
    );
    Ok(report)
}
