//! `sprintlog sync`: reconcile tasks with GitHub issues and drain the retry
//! queue.

use clap::{Args, Subcommand};
use serde::Serialize;
use sprintlog_core::service::{QueueRunReport, SyncPullReport, SyncPushReport};
use sprintlog_core::sync::{ConflictReason, PushAction, QueueStats, SyncQueueItem};
use std::io::{self, Write};

use crate::context::Context;
use crate::output::{or_dash, pretty_kv, pretty_section, render_mode, when};

#[derive(Args, Debug)]
pub struct SyncArgs {
    #[command(subcommand)]
    pub command: SyncCommand,
}

#[derive(Subcommand, Debug)]
pub enum SyncCommand {
    #[command(
        about = "Pull issues and reconcile them with tasks",
        long_about = "Import new issues as tasks, apply remote-only changes, push local-only changes \
                      when the sync mode allows it, and report conflicts without resolving them."
    )]
    Pull(SyncPullArgs),

    #[command(
        about = "Create or update the issue for one task",
        after_help = "EXAMPLES:\n    # Open an issue for task #5\n    sprintlog sync push 5 --create\n\n    # Refresh the linked issue\n    sprintlog sync push 5"
    )]
    Push(SyncPushArgs),

    #[command(about = "Retry queued pushes, or show queue counts")]
    Queue(SyncQueueArgs),

    #[command(about = "Requeue a failed item")]
    Retry(SyncRetryArgs),

    #[command(about = "Delete completed items older than a number of days")]
    Clear(SyncClearArgs),
}

#[derive(Args, Debug)]
pub struct SyncPullArgs {
    /// Classify without writing anything.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct SyncPushArgs {
    /// Task id or number.
    pub task: String,

    /// Open a new issue instead of updating the linked one.
    #[arg(long)]
    pub create: bool,
}

#[derive(Args, Debug)]
pub struct SyncQueueArgs {
    /// Items to process (default from config).
    #[arg(long, short)]
    pub limit: Option<u32>,

    /// Only print item counts per status.
    #[arg(long, conflicts_with = "limit")]
    pub stats: bool,
}

#[derive(Args, Debug)]
pub struct SyncRetryArgs {
    /// Queue item id.
    pub id: i64,
}

#[derive(Args, Debug)]
pub struct SyncClearArgs {
    /// Age threshold in days (default from config).
    #[arg(long)]
    pub days: Option<u32>,
}

#[derive(Debug, Serialize)]
struct RetryOutput {
    id: i64,
    requeued: bool,
}

#[derive(Debug, Serialize)]
struct ClearOutput {
    days: u32,
    removed: usize,
}

pub fn run_sync(args: &SyncArgs, ctx: &Context) -> anyhow::Result<()> {
    match &args.command {
        SyncCommand::Pull(pull) => run_pull(pull, ctx),
        SyncCommand::Push(push) => run_push(push, ctx),
        SyncCommand::Queue(queue) => run_queue(queue, ctx),
        SyncCommand::Retry(retry) => run_retry(retry, ctx),
        SyncCommand::Clear(clear) => run_clear(clear, ctx),
    }
}

fn run_pull(args: &SyncPullArgs, ctx: &Context) -> anyhow::Result<()> {
    let conn = ctx.open_store()?;
    let _lock = if args.dry_run {
        None
    } else {
        Some(ctx.lock()?)
    };
    let service = ctx.service(&conn);
    let project_id = ctx.project_id(&service)?;
    let tracker = ctx.github(&service, &project_id)?;

    let report = service.sync_pull(&project_id, &tracker, args.dry_run)?;
    render_mode(ctx.output(), &report, pull_text, pull_pretty)?;
    if !report.result.success {
        anyhow::bail!("sync pull failed: {}", report.result.errors.join("; "));
    }
    Ok(())
}

fn run_push(args: &SyncPushArgs, ctx: &Context) -> anyhow::Result<()> {
    let conn = ctx.open_store()?;
    let _lock = ctx.lock()?;
    let service = ctx.service(&conn);
    let task = ctx.task(&service, &args.task)?;
    let tracker = ctx.github(&service, &task.state.project_id)?;
    let action = if args.create {
        PushAction::Create
    } else {
        PushAction::Update
    };

    let report = service.sync_push(task.id(), action, &tracker)?;
    render_mode(ctx.output(), &report, push_text, push_pretty)
}

fn run_queue(args: &SyncQueueArgs, ctx: &Context) -> anyhow::Result<()> {
    let conn = ctx.open_store()?;
    let service = ctx.service(&conn);
    if args.stats {
        let stats = service.queue().stats()?;
        return render_mode(ctx.output(), &stats, stats_text, stats_pretty);
    }

    let _lock = ctx.lock()?;
    let limit = args.limit.unwrap_or(ctx.config.project.sync.batch_size);
    let project_id = ctx.project_id(&service)?;
    let tracker = ctx.github(&service, &project_id)?;
    let report = service.process_queue(&tracker, limit)?;
    render_mode(ctx.output(), &report, queue_text, queue_pretty)
}

fn run_retry(args: &SyncRetryArgs, ctx: &Context) -> anyhow::Result<()> {
    let conn = ctx.open_store()?;
    let _lock = ctx.lock()?;
    let service = ctx.service(&conn);
    let requeued = service.queue().retry(args.id)?;
    if !requeued {
        anyhow::bail!("queue item {} is not a failed item", args.id);
    }
    let out = RetryOutput {
        id: args.id,
        requeued,
    };
    render_mode(
        ctx.output(),
        &out,
        |out, w| writeln!(w, "requeued\t{}", out.id),
        |out, w| writeln!(w, "Requeued item {}", out.id),
    )
}

fn run_clear(args: &SyncClearArgs, ctx: &Context) -> anyhow::Result<()> {
    let conn = ctx.open_store()?;
    let _lock = ctx.lock()?;
    let service = ctx.service(&conn);
    let days = args.days.unwrap_or(ctx.config.project.sync.retention_days);
    let removed = service.queue().clear_old(days)?;
    let out = ClearOutput { days, removed };
    render_mode(
        ctx.output(),
        &out,
        |out, w| writeln!(w, "removed\t{}", out.removed),
        |out, w| {
            writeln!(
                w,
                "Removed {} completed items older than {} days",
                out.removed, out.days
            )
        },
    )
}

const fn reason_label(reason: ConflictReason) -> &'static str {
    match reason {
        ConflictReason::NoSyncMarker => "no sync marker",
        ConflictReason::BothChanged => "changed on both sides",
        ConflictReason::Diverged => "diverged",
    }
}

fn pull_text(report: &SyncPullReport, w: &mut dyn Write) -> io::Result<()> {
    let result = &report.result;
    writeln!(
        w,
        "synced\t{}\tcreated\t{}\tupdated\t{}\tconflicts\t{}",
        result.synced.len(),
        result.created.len(),
        result.updated.len(),
        result.conflicts.len()
    )?;
    for conflict in &result.conflicts {
        writeln!(
            w,
            "conflict\t#{}\tissue#{}\t{}",
            conflict.local.seq,
            conflict.issue_number,
            reason_label(conflict.reason)
        )?;
    }
    for error in &result.errors {
        writeln!(w, "error\t{error}")?;
    }
    Ok(())
}

fn pull_pretty(report: &SyncPullReport, w: &mut dyn Write) -> io::Result<()> {
    let result = &report.result;
    let heading = if report.dry_run {
        "Sync pull (dry run)"
    } else {
        "Sync pull"
    };
    pretty_section(w, heading)?;
    pretty_kv(w, "In sync", result.synced.len().to_string())?;
    pretty_kv(w, "New issues", result.created.len().to_string())?;
    if !result.linked.is_empty() {
        pretty_kv(w, "Also linked", result.linked.len().to_string())?;
    }
    pretty_kv(w, "Updated", result.updated.len().to_string())?;
    if !report.dry_run {
        pretty_kv(w, "Imported", seq_list(&report.tasks_created))?;
        pretty_kv(w, "Overwritten", seq_list(&report.tasks_updated))?;
        let pushed: Vec<String> = report
            .issues_pushed
            .iter()
            .map(|n| format!("issue #{n}"))
            .collect();
        pretty_kv(w, "Pushed", or_dash(Some(pushed.join(", ").as_str())))?;
        if !report.queued.is_empty() {
            pretty_kv(w, "Queued", format!("{} pushes", report.queued.len()))?;
        }
    }
    if !result.conflicts.is_empty() {
        writeln!(w)?;
        writeln!(w, "Conflicts ({}), resolve by hand:", result.conflicts.len())?;
        for conflict in &result.conflicts {
            writeln!(
                w,
                "  #{:<5} issue #{:<5} {}: local \"{}\" / remote \"{}\"",
                conflict.local.seq,
                conflict.issue_number,
                reason_label(conflict.reason),
                conflict.local.title,
                conflict.remote.title
            )?;
        }
    }
    for error in &result.errors {
        writeln!(w, "error: {error}")?;
    }
    Ok(())
}

fn push_text(report: &SyncPushReport, w: &mut dyn Write) -> io::Result<()> {
    match (&report.result.issue_number, &report.queued_item) {
        (Some(number), _) if report.result.success => {
            writeln!(w, "#{}\tissue#{number}\t{}", report.seq, or_dash(report.result.url.as_deref()))
        }
        (_, Some(item)) => writeln!(w, "#{}\tqueued\t{}", report.seq, item.id),
        _ => writeln!(w, "#{}\tfailed", report.seq),
    }
}

fn push_pretty(report: &SyncPushReport, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, &format!("Push #{} ({})", report.seq, report.action.as_str()))?;
    if report.result.success {
        let issue = report
            .result
            .issue_number
            .map_or_else(|| "-".to_string(), |n| format!("#{n}"));
        pretty_kv(w, "Issue", issue)?;
        pretty_kv(w, "URL", or_dash(report.result.url.as_deref()))?;
        return Ok(());
    }
    pretty_kv(w, "Error", or_dash(report.result.error.as_deref()))?;
    if let Some(item) = &report.queued_item {
        pretty_kv(w, "Queued", format!("item {} (run `sprintlog sync queue`)", item.id))?;
    }
    Ok(())
}

fn stats_text(stats: &QueueStats, w: &mut dyn Write) -> io::Result<()> {
    writeln!(
        w,
        "pending\t{}\tprocessing\t{}\tcompleted\t{}\tfailed\t{}",
        stats.pending, stats.processing, stats.completed, stats.failed
    )
}

fn stats_pretty(stats: &QueueStats, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, "Sync queue")?;
    pretty_kv(w, "Pending", stats.pending.to_string())?;
    pretty_kv(w, "Processing", stats.processing.to_string())?;
    pretty_kv(w, "Completed", stats.completed.to_string())?;
    pretty_kv(w, "Failed", stats.failed.to_string())?;
    pretty_kv(w, "Total", stats.total().to_string())
}

fn queue_text(report: &QueueRunReport, w: &mut dyn Write) -> io::Result<()> {
    for item in &report.items {
        queue_item_line(w, item)?;
    }
    Ok(())
}

fn queue_pretty(report: &QueueRunReport, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, "Sync queue run")?;
    if report.processed == 0 {
        return writeln!(w, "(nothing pending)");
    }
    pretty_kv(w, "Processed", report.processed.to_string())?;
    pretty_kv(w, "Completed", report.completed.to_string())?;
    pretty_kv(w, "Failed", report.failed.to_string())?;
    writeln!(w)?;
    for item in &report.items {
        write!(w, "  ")?;
        queue_item_line(w, item)?;
    }
    Ok(())
}

fn queue_item_line(w: &mut dyn Write, item: &SyncQueueItem) -> io::Result<()> {
    writeln!(
        w,
        "{}\t{}\t{}\t{}\t{}\t{}",
        item.id,
        item.action.as_str(),
        item.status.as_str(),
        item.retry_count,
        when(item.processed_at_us),
        or_dash(item.error_message.as_deref())
    )
}

fn seq_list(seqs: &[i64]) -> String {
    if seqs.is_empty() {
        return "-".to_string();
    }
    seqs.iter()
        .map(|seq| format!("#{seq}"))
        .collect::<Vec<_>>()
        .join(", ")
}
