use anyhow::Result;

use crate::commands::{CommandContext, CommandReport};
use crate::cwm::audit;
use crate::cwm::backup::LedgerTransaction;
use crate::cwm::util::now_utc;

pub fn run(ctx: &CommandContext, name: &str) -> Result<CommandReport> {
    let mut report = CommandReport::new("delete");
    let bank = ctx.bank()?;
    let mut tx = LedgerTransaction::begin(&bank, now_utc())?;
    let removed = tx.ledger_mut().remove(name)?;
    let snapshot = tx.commit()?;

    report.detail(format!("deleted [{}] {} -- {}", removed.id, removed.name, removed.command));
    report.detail(format!("bank={} backup.sequence={}", bank.kind, snapshot.sequence));
    audit::record(
        &ctx.paths,
        "delete",
        "ok",
        &format!("{name} from {} bank (backup #{})", bank.kind, snapshot.sequence),
    );
    Ok(report)
}
