use anyhow::{Result, anyhow};
use clap::{ArgGroup, Args, Parser, Subcommand};

use crate::commands::archive::{ArchiveCreateOptions, ArchiveSource};
use crate::commands::backup::MergeOptions;
use crate::commands::clear::{ClearOptions, ClearTarget};
use crate::commands::get::{GetMode, HistorySource, Selection};
use crate::commands::save::SaveMode;
use crate::commands::{self, CommandContext, CommandReport};
use crate::cwm::bank::{BankKind, BankScope};
use crate::cwm::paths::resolve_paths;
use crate::cwm::util::split_csv;

#[derive(Debug, Parser)]
#[command(
    name = "cwm",
    version,
    about = "Save, tag, archive and replay shell commands"
)]
pub struct Cli {
    /// Use the Global bank even inside a project
    #[arg(long, global = true, conflicts_with = "local")]
    global: bool,
    /// Require the nearest Local (.cwm) bank
    #[arg(long, global = true)]
    local: bool,
    /// Print the report as JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a Local bank (.cwm) in the current directory
    Init,
    /// Save, edit, rename or list saved commands
    Save(SaveArgs),
    /// Retrieve saved commands or history
    Get(GetArgs),
    /// Delete a saved command
    Delete { name: String },
    /// Add or remove tags on a saved command
    Tag {
        name: String,
        #[arg(required = true)]
        tags: Vec<String>,
        #[arg(long)]
        remove: bool,
    },
    /// Remove saved commands or cached history
    Clear(ClearArgs),
    /// Manage archives of already-seen history
    Archive {
        #[command(subcommand)]
        command: ArchiveCommand,
    },
    /// Mark a span of shell history
    Watch {
        #[command(subcommand)]
        command: WatchCommand,
    },
    /// Inspect, merge and restore ledger snapshots
    Backup {
        #[command(subcommand)]
        command: BackupCommand,
    },
    /// Show or delete banks
    Bank {
        #[command(subcommand)]
        command: BankCommand,
    },
    /// Show resolved paths and state
    Status,
}

#[derive(Debug, Args)]
#[command(group(
    ArgGroup::new("mode")
        .required(true)
        .args(["payload", "edit", "rename", "from_history", "list", "hist", "archive"])
))]
struct SaveArgs {
    /// NAME=COMMAND
    payload: Option<String>,
    /// Tag for the new command (repeatable)
    #[arg(short = 't', long = "tag", requires = "payload")]
    tags: Vec<String>,
    /// Replace the command text of an existing name
    #[arg(short = 'e', long, value_name = "NAME=COMMAND")]
    edit: Option<String>,
    /// Rename OLD to NEW
    #[arg(long = "ev", num_args = 2, value_names = ["OLD", "NEW"])]
    rename: Option<Vec<String>>,
    /// Save the last history command under NAME
    #[arg(short = 'b', long = "from-history", value_name = "NAME")]
    from_history: Option<String>,
    /// List the bank's saved commands
    #[arg(short = 'l', long)]
    list: bool,
    /// Import new history lines into the cache
    #[arg(long)]
    hist: bool,
    /// Keep only the newest N imported lines
    #[arg(short = 'n', long = "count", requires = "hist")]
    count: Option<usize>,
    /// Archive live history
    #[arg(long)]
    archive: bool,
}

impl SaveArgs {
    fn into_mode(self) -> Result<SaveMode> {
        if let Some(payload) = self.edit {
            return Ok(SaveMode::Edit { payload });
        }
        if let Some(pair) = self.rename {
            let [old, new]: [String; 2] = pair
                .try_into()
                .map_err(|_| anyhow!("--ev takes exactly OLD and NEW"))?;
            return Ok(SaveMode::Rename { old, new });
        }
        if let Some(name) = self.from_history {
            return Ok(SaveMode::FromHistory { name });
        }
        if self.list {
            return Ok(SaveMode::List);
        }
        if self.hist {
            return Ok(SaveMode::SyncHistory { count: self.count });
        }
        if self.archive {
            return Ok(SaveMode::Archive);
        }
        let payload = self
            .payload
            .ok_or_else(|| anyhow!("expected NAME=COMMAND"))?;
        Ok(SaveMode::Add {
            payload,
            tags: self.tags,
        })
    }
}

#[derive(Debug, Args)]
#[command(group(
    ArgGroup::new("mode")
        .required(true)
        .args(["name", "id", "list", "hist"])
))]
struct GetArgs {
    name: Option<String>,
    /// Print only the command text
    #[arg(short = 's', long = "show")]
    raw: bool,
    #[arg(long)]
    id: Option<u64>,
    /// List saved commands across banks
    #[arg(short = 'l', long)]
    list: bool,
    /// Show shell history
    #[arg(long)]
    hist: bool,
    /// Read the history cache instead of the live file
    #[arg(long, requires = "hist", conflicts_with = "active")]
    cached: bool,
    /// Only lines recorded by the active watch session
    #[arg(long, requires = "hist")]
    active: bool,
    #[arg(short = 't', long, requires = "list")]
    tag: Option<String>,
    /// Comma-separated substrings that must all match
    #[arg(short = 'f', long)]
    filter: Option<String>,
    /// Comma-separated substrings that exclude a match
    #[arg(short = 'x', long)]
    exclude: Option<String>,
    #[arg(short = 'n', long)]
    count: Option<usize>,
}

impl GetArgs {
    fn into_mode(self) -> GetMode {
        let selection = Selection {
            filters: split_csv(self.filter.as_deref()),
            excludes: split_csv(self.exclude.as_deref()),
            count: self.count,
        };
        if let Some(id) = self.id {
            return GetMode::Id { id, raw: self.raw };
        }
        if self.list {
            return GetMode::List {
                tag: self.tag,
                selection,
            };
        }
        if self.hist {
            let source = if self.cached {
                HistorySource::Cached
            } else if self.active {
                HistorySource::Active
            } else {
                HistorySource::Live
            };
            return GetMode::History { source, selection };
        }
        GetMode::Name {
            name: self.name.unwrap_or_default(),
            raw: self.raw,
        }
    }
}

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("target").required(true).args(["saved", "hist"])))]
#[command(group(ArgGroup::new("selector").required(true).multiple(true).args(["oldest", "filter", "all"])))]
struct ClearArgs {
    #[arg(long)]
    saved: bool,
    #[arg(long)]
    hist: bool,
    /// Drop the oldest N entries
    #[arg(short = 'n', long = "count")]
    oldest: Option<usize>,
    /// Drop entries containing FILTER
    #[arg(short = 'f', long)]
    filter: Option<String>,
    #[arg(long, conflicts_with_all = ["oldest", "filter"])]
    all: bool,
}

#[derive(Debug, Subcommand)]
enum ArchiveCommand {
    /// Archive history lines not already saved or archived
    Create {
        #[arg(long)]
        cached: bool,
        /// Empty the history cache after a successful archive of it
        #[arg(long, requires = "cached")]
        clear_cache: bool,
    },
    List,
    Show { id: u64 },
    Delete { id: u64 },
}

#[derive(Debug, Subcommand)]
enum WatchCommand {
    Start,
    Stop {
        /// Archive the recorded lines before closing
        #[arg(long)]
        save: bool,
    },
    Status,
}

#[derive(Debug, Subcommand)]
enum BackupCommand {
    List,
    /// Show a snapshot (latest if omitted)
    Show { sequence: Option<u64> },
    /// Merge snapshot A into the ledger, or fold A and B
    Merge {
        #[arg(required = true, num_args = 1..)]
        sequences: Vec<u64>,
        /// Keep the most recently created entry on conflicts
        #[arg(long)]
        chain: bool,
        #[arg(long)]
        dry_run: bool,
    },
    Prune {
        #[arg(long)]
        keep: usize,
    },
    Restore { sequence: u64 },
}

#[derive(Debug, Subcommand)]
enum BankCommand {
    Info,
    /// Delete the bank selected with --local or --global
    Delete {
        #[arg(long)]
        yes: bool,
    },
}

impl Cli {
    fn scope(&self) -> BankScope {
        if self.global {
            BankScope::Global
        } else if self.local {
            BankScope::Local
        } else {
            BankScope::Auto
        }
    }
}

fn dispatch(ctx: &CommandContext, command: Command) -> Result<CommandReport> {
    match command {
        Command::Init => commands::init::run(ctx),
        Command::Save(args) => commands::save::run(ctx, &args.into_mode()?),
        Command::Get(args) => commands::get::run(ctx, &args.into_mode()),
        Command::Delete { name } => commands::delete::run(ctx, &name),
        Command::Tag { name, tags, remove } => commands::tag::run(ctx, &name, &tags, remove),
        Command::Clear(args) => commands::clear::run(
            ctx,
            &ClearOptions {
                target: if args.saved {
                    ClearTarget::Saved
                } else {
                    ClearTarget::History
                },
                oldest: args.oldest.unwrap_or(0),
                filter: args.filter,
                all: args.all,
            },
        ),
        Command::Archive { command } => match command {
            ArchiveCommand::Create {
                cached,
                clear_cache,
            } => commands::archive::create(
                ctx,
                &ArchiveCreateOptions {
                    source: if cached {
                        ArchiveSource::Cached
                    } else {
                        ArchiveSource::Live
                    },
                    clear_cache,
                },
            ),
            ArchiveCommand::List => commands::archive::list(ctx),
            ArchiveCommand::Show { id } => commands::archive::show(ctx, id),
            ArchiveCommand::Delete { id } => commands::archive::delete(ctx, id),
        },
        Command::Watch { command } => match command {
            WatchCommand::Start => commands::watch::start(ctx),
            WatchCommand::Stop { save } => commands::watch::stop(ctx, save),
            WatchCommand::Status => commands::watch::status(ctx),
        },
        Command::Backup { command } => match command {
            BackupCommand::List => commands::backup::list(ctx),
            BackupCommand::Show { sequence } => commands::backup::show(ctx, sequence),
            BackupCommand::Merge {
                sequences,
                chain,
                dry_run,
            } => commands::backup::merge(
                ctx,
                &MergeOptions {
                    sequences,
                    chain,
                    dry_run,
                },
            ),
            BackupCommand::Prune { keep } => commands::backup::prune(ctx, keep),
            BackupCommand::Restore { sequence } => commands::backup::restore(ctx, sequence),
        },
        Command::Bank { command } => match command {
            BankCommand::Info => commands::bank::info(ctx),
            BankCommand::Delete { yes } => {
                let kind = match ctx.scope {
                    BankScope::Local => BankKind::Local,
                    BankScope::Global => BankKind::Global,
                    BankScope::Auto => {
                        return Err(anyhow!("bank delete needs --local or --global"));
                    }
                };
                commands::bank::delete(ctx, kind, yes)
            }
        },
        Command::Status => commands::status::run(ctx),
    }
}

fn render(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    for line in &report.output {
        println!("{line}");
    }
    for line in &report.details {
        println!("{line}");
    }
    for issue in &report.issues {
        eprintln!("issue: {issue}");
    }
    Ok(())
}

/// Parse arguments, run one command, print its report. Returns the process
/// exit code for a command that ran to completion.
pub fn run() -> Result<i32> {
    let cli = Cli::parse();
    let paths = resolve_paths()?;
    let ctx = CommandContext::new(paths, cli.scope());
    tracing::debug!(scope = ?ctx.scope, home = %ctx.paths.cwm_home.display(), "resolved context");

    let json = cli.json;
    let report = dispatch(&ctx, cli.command)?;
    render(&report, json)?;
    Ok(if report.ok { 0 } else { 2 })
}
