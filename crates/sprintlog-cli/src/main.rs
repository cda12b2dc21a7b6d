#![forbid(unsafe_code)]

mod cmd;
mod context;
mod github;
mod output;

use clap::{Parser, Subcommand};
use context::Context;
use output::{CliError, render_error};
use sprintlog_core::config::OutputMode;
use std::env;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "sprintlog: event-sourced sprint and task tracker",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Project id or name (overrides SPRINTLOG_PROJECT).
    #[arg(long, global = true, value_name = "PROJECT")]
    project: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Setup",
        about = "Manage projects",
        long_about = "Create projects, list them and link them to a GitHub repository.",
        after_help = "EXAMPLES:\n    # Create the store and a first project\n    sprintlog project create Webshop\n\n    # Link a repository for two-way sync\n    sprintlog project github acme/webshop --sync-mode bidirectional"
    )]
    Project(cmd::project::ProjectArgs),

    #[command(
        next_help_heading = "Work",
        about = "Create, edit and move tasks",
        long_about = "Create tasks, change their status, link commits and issues, and show the board.",
        after_help = "EXAMPLES:\n    # Create a bug with an estimate\n    sprintlog task create \"Checkout times out\" --type bug --points 3\n\n    # Start work on task #4\n    sprintlog task status 4 in_progress\n\n    # Show the board for the active sprint\n    sprintlog task board --sprint"
    )]
    Task(cmd::task::TaskArgs),

    #[command(
        next_help_heading = "Work",
        about = "Plan and run sprints",
        long_about = "Create sprints, move tasks in and out, start and complete them.",
        after_help = "EXAMPLES:\n    # Plan a two-week sprint\n    sprintlog sprint create \"Sprint 1\" --start 2026-03-02 --end 2026-03-13\n\n    # Pull tasks in and start\n    sprintlog sprint add \"Sprint 1\" 3 4 7\n    sprintlog sprint start \"Sprint 1\""
    )]
    Sprint(cmd::sprint::SprintArgs),

    #[command(
        next_help_heading = "Read",
        about = "Velocity and burndown reports",
        after_help = "EXAMPLES:\n    # Average over the last five completed sprints\n    sprintlog report velocity --window 5\n\n    # Burndown for the active sprint\n    sprintlog report burndown"
    )]
    Report(cmd::report::ReportArgs),

    #[command(
        next_help_heading = "Integrations",
        about = "Link commits to tasks",
        long_about = "Parse a commit message for magic words (fixes #3, refs #7) and apply the links and status changes they imply.",
        after_help = "EXAMPLES:\n    # From a post-commit hook\n    sprintlog commit process \"$(git rev-parse HEAD)\" --message \"$(git log -1 --format=%B)\"\n\n    # Preview without writing\n    sprintlog commit process abc123 --message \"fix: crash, fixes #3\" --dry-run"
    )]
    Commit(cmd::commit::CommitArgs),

    #[command(
        next_help_heading = "Integrations",
        about = "Synchronize tasks with GitHub issues",
        after_help = "EXAMPLES:\n    # Reconcile the linked repository\n    sprintlog sync pull\n\n    # Open an issue for task #5\n    sprintlog sync push 5 --create\n\n    # Retry queued pushes\n    sprintlog sync queue"
    )]
    Sync(cmd::sync::SyncArgs),

    #[command(
        next_help_heading = "Maintenance",
        about = "Rebuild projections from the event log",
        long_about = "Replay every event and rewrite the project, sprint and task tables."
    )]
    Rebuild,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("SPRINTLOG_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "sprintlog=debug,info"
        } else {
            "sprintlog=info,warn"
        })
    });

    let format = env::var("SPRINTLOG_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn run(cli: Cli, ctx: &Context) -> anyhow::Result<()> {
    match cli.command {
        Commands::Project(args) => cmd::project::run_project(&args, ctx),
        Commands::Task(args) => cmd::task::run_task(&args, ctx),
        Commands::Sprint(args) => cmd::sprint::run_sprint(&args, ctx),
        Commands::Report(args) => cmd::report::run_report(&args, ctx),
        Commands::Commit(args) => cmd::commit::run_commit(&args, ctx),
        Commands::Sync(args) => cmd::sync::run_sync(&args, ctx),
        Commands::Rebuild => cmd::rebuild::run_rebuild(ctx),
    }
}

fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    if cli.verbose {
        info!("Verbose mode enabled");
    }
    let fallback = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };

    let result = env::current_dir()
        .map_err(anyhow::Error::from)
        .and_then(|root| Context::new(&root, cli.json, cli.project.clone()));
    let ctx = match result {
        Ok(ctx) => ctx,
        Err(err) => {
            // Output mode is unknown until config resolves; best effort.
            let _ = render_error(fallback, &CliError::from(&err));
            return ExitCode::FAILURE;
        }
    };

    let mode = ctx.output();
    match run(cli, &ctx) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::debug!(error = ?err, "command failed");
            let _ = render_error(mode, &CliError::from(&err));
            ExitCode::FAILURE
        }
    }
}
