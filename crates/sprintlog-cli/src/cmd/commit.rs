//! `sprintlog commit`: link commits to the tasks their messages reference.

use clap::{Args, Subcommand};
use sprintlog_core::service::{CommitActionKind, CommitInput, CommitReport};
use std::io::{self, Write};

use crate::context::Context;
use crate::output::{or_dash, pretty_kv, pretty_section, render_mode};

#[derive(Args, Debug)]
pub struct CommitArgs {
    #[command(subcommand)]
    pub command: CommitCommand,
}

#[derive(Subcommand, Debug)]
pub enum CommitCommand {
    #[command(
        about = "Apply a commit's magic words to tasks",
        after_help = "MAGIC WORDS:\n    fixes/closes/resolves #N, done #N   -> done\n    wip #N                              -> in_progress\n    review #N                           -> in_review\n    refs/relates/blocks/depends #N      -> link only\n\n#N is a task number in the selected project."
    )]
    Process(CommitProcessArgs),
}

#[derive(Args, Debug)]
pub struct CommitProcessArgs {
    /// Commit sha.
    pub sha: String,

    /// Full commit message.
    #[arg(long, short)]
    pub message: String,

    /// Branch the commit was made on.
    #[arg(long, short)]
    pub branch: Option<String>,

    /// Report what would change without writing.
    #[arg(long)]
    pub dry_run: bool,
}

pub fn run_commit(args: &CommitArgs, ctx: &Context) -> anyhow::Result<()> {
    match &args.command {
        CommitCommand::Process(process) => run_process(process, ctx),
    }
}

fn run_process(args: &CommitProcessArgs, ctx: &Context) -> anyhow::Result<()> {
    let conn = ctx.open_store()?;
    let _lock = if args.dry_run {
        None
    } else {
        Some(ctx.lock()?)
    };
    let service = ctx.service(&conn);
    let project_id = ctx.project_id(&service)?;

    let report = service.process_commit(&CommitInput {
        project_id: &project_id,
        sha: &args.sha,
        message: &args.message,
        branch: args.branch.as_deref(),
        dry_run: args.dry_run,
    })?;
    render_mode(ctx.output(), &report, report_text, report_pretty)
}

fn describe(kind: CommitActionKind, to_status: Option<&str>) -> String {
    match kind {
        CommitActionKind::LinkCommit => "link".to_string(),
        CommitActionKind::StatusChange => format!("status -> {}", or_dash(to_status)),
    }
}

fn report_text(report: &CommitReport, w: &mut dyn Write) -> io::Result<()> {
    for action in &report.actions {
        writeln!(
            w,
            "#{}\t{}\t{}",
            action.seq,
            describe(action.kind, action.to_status.as_deref()),
            if action.applied { "applied" } else { "dry-run" }
        )?;
    }
    for seq in &report.unmatched {
        writeln!(w, "#{seq}\tunmatched")?;
    }
    Ok(())
}

fn report_pretty(report: &CommitReport, w: &mut dyn Write) -> io::Result<()> {
    let short = report.sha.get(..7).unwrap_or(&report.sha);
    let heading = if report.dry_run {
        format!("Commit {short} (dry run)")
    } else {
        format!("Commit {short}")
    };
    pretty_section(w, &heading)?;
    pretty_kv(w, "Type", or_dash(report.commit.commit_type.as_deref()))?;
    pretty_kv(w, "Scope", or_dash(report.commit.scope.as_deref()))?;
    pretty_kv(w, "Summary", &report.commit.description)?;
    if report.commit.breaking {
        pretty_kv(w, "Breaking", "yes")?;
    }
    if report.actions.is_empty() && report.unmatched.is_empty() {
        return writeln!(w, "(no task references)");
    }
    writeln!(w)?;
    for action in &report.actions {
        let verb = describe(action.kind, action.to_status.as_deref());
        let from = action
            .from_status
            .as_deref()
            .map(|from| format!(" (was {from})"))
            .unwrap_or_default();
        writeln!(w, "  #{:<5} {verb}{from}  {}", action.seq, action.title)?;
    }
    for seq in &report.unmatched {
        writeln!(w, "  #{seq:<5} no such task")?;
    }
    Ok(())
}
