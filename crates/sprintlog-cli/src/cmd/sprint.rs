//! `sprintlog sprint`: plan, start and complete sprints.

use clap::{Args, Subcommand};
use sprintlog_core::projection::{SprintStatusReport, Task};
use sprintlog_core::reduce::SprintState;
use sprintlog_core::reduce::sprint::SprintCreated;
use std::io::{self, Write};

use crate::cmd::{task_table_header, task_table_row, task_text_line};
use crate::context::Context;
use crate::output::{or_dash, pretty_kv, pretty_rule, pretty_section, render_mode, when};

const PROGRESS_BAR_WIDTH: usize = 30;

#[derive(Args, Debug)]
pub struct SprintArgs {
    #[command(subcommand)]
    pub command: SprintCommand,
}

#[derive(Subcommand, Debug)]
pub enum SprintCommand {
    #[command(
        about = "Plan a new sprint",
        after_help = "EXAMPLES:\n    sprintlog sprint create \"Sprint 1\" --start 2026-03-02 --end 2026-03-13 --goal \"Checkout v2\""
    )]
    Create(SprintCreateArgs),

    #[command(about = "List sprints, newest first")]
    List,

    #[command(about = "Start a planning sprint")]
    Start(SprintRefArgs),

    #[command(about = "Complete a sprint and record its velocity")]
    Complete(SprintRefArgs),

    #[command(about = "Progress of a sprint (default: the active one)")]
    Status(SprintRefArgs),

    #[command(
        about = "Add tasks to a sprint",
        after_help = "EXAMPLES:\n    sprintlog sprint add \"Sprint 1\" 3 4 7"
    )]
    Add(SprintAddArgs),

    #[command(about = "Take tasks out of their sprint")]
    Remove(SprintRemoveArgs),
}

#[derive(Args, Debug)]
pub struct SprintCreateArgs {
    /// Sprint name.
    pub name: String,

    /// First day (YYYY-MM-DD).
    #[arg(long)]
    pub start: String,

    /// Last day (YYYY-MM-DD).
    #[arg(long)]
    pub end: String,

    /// What the sprint should achieve.
    #[arg(long, short)]
    pub goal: Option<String>,
}

#[derive(Args, Debug)]
pub struct SprintRefArgs {
    /// Sprint id or name; omitted means the active sprint.
    pub sprint: Option<String>,
}

#[derive(Args, Debug)]
pub struct SprintAddArgs {
    /// Sprint id or name.
    pub sprint: String,

    /// Task ids or numbers.
    #[arg(required = true)]
    pub tasks: Vec<String>,
}

#[derive(Args, Debug)]
pub struct SprintRemoveArgs {
    /// Task ids or numbers.
    #[arg(required = true)]
    pub tasks: Vec<String>,
}

pub fn run_sprint(args: &SprintArgs, ctx: &Context) -> anyhow::Result<()> {
    match &args.command {
        SprintCommand::Create(create) => run_create(create, ctx),
        SprintCommand::List => run_list(ctx),
        SprintCommand::Start(start) => run_start(start, ctx),
        SprintCommand::Complete(complete) => run_complete(complete, ctx),
        SprintCommand::Status(status) => run_status(status, ctx),
        SprintCommand::Add(add) => run_add(add, ctx),
        SprintCommand::Remove(remove) => run_remove(remove, ctx),
    }
}

fn run_create(args: &SprintCreateArgs, ctx: &Context) -> anyhow::Result<()> {
    let conn = ctx.open_store()?;
    let _lock = ctx.lock()?;
    let service = ctx.service(&conn);
    let project_id = ctx.project_id(&service)?;

    let sprint = service.create_sprint(&SprintCreated {
        project_id,
        name: args.name.clone(),
        start_date: args.start.clone(),
        end_date: args.end.clone(),
        goal: args.goal.clone(),
    })?;
    render_sprint(ctx, &sprint)
}

fn run_list(ctx: &Context) -> anyhow::Result<()> {
    let conn = ctx.open_store()?;
    let service = ctx.service(&conn);
    let project_id = ctx.project_id(&service)?;
    let sprints = service.sprints().list(&project_id)?;

    render_mode(
        ctx.output(),
        &sprints,
        |sprints, w| {
            for sprint in sprints {
                sprint_text_line(w, sprint)?;
            }
            Ok(())
        },
        |sprints, w| {
            if sprints.is_empty() {
                return writeln!(w, "(no sprints)");
            }
            writeln!(
                w,
                "{:<20} {:<10} {:<10} {:<10} {:>9}",
                "NAME", "STATUS", "START", "END", "VELOCITY"
            )?;
            writeln!(w, "{}", "-".repeat(72))?;
            for sprint in sprints {
                writeln!(
                    w,
                    "{:<20} {:<10} {:<10} {:<10} {:>4}/{:<4}",
                    sprint.name,
                    sprint.status,
                    sprint.start_date,
                    sprint.end_date,
                    sprint.velocity_completed,
                    sprint.velocity_committed
                )?;
            }
            Ok(())
        },
    )
}

fn run_start(args: &SprintRefArgs, ctx: &Context) -> anyhow::Result<()> {
    let conn = ctx.open_store()?;
    let _lock = ctx.lock()?;
    let service = ctx.service(&conn);
    let sprint = planning_sprint(ctx, &service, args.sprint.as_deref())?;
    let started = service.start_sprint(&sprint.sprint_id)?;
    render_sprint(ctx, &started)
}

fn run_complete(args: &SprintRefArgs, ctx: &Context) -> anyhow::Result<()> {
    let conn = ctx.open_store()?;
    let _lock = ctx.lock()?;
    let service = ctx.service(&conn);
    let sprint = ctx.sprint(&service, args.sprint.as_deref())?;
    let report = service.complete_sprint(&sprint.sprint_id)?;
    render_mode(ctx.output(), &report, report_text, report_pretty)
}

fn run_status(args: &SprintRefArgs, ctx: &Context) -> anyhow::Result<()> {
    let conn = ctx.open_store()?;
    let service = ctx.service(&conn);
    let sprint = ctx.sprint(&service, args.sprint.as_deref())?;
    let report = service
        .sprints()
        .status(&sprint.sprint_id)?
        .ok_or_else(|| anyhow::anyhow!("sprint {} disappeared", sprint.sprint_id))?;
    render_mode(ctx.output(), &report, report_text, report_pretty)
}

fn run_add(args: &SprintAddArgs, ctx: &Context) -> anyhow::Result<()> {
    let conn = ctx.open_store()?;
    let _lock = ctx.lock()?;
    let service = ctx.service(&conn);
    let sprint = ctx.sprint(&service, Some(&args.sprint))?;
    let task_ids = args
        .tasks
        .iter()
        .map(|reference| ctx.task(&service, reference).map(|t| t.state.task_id))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let refs: Vec<&str> = task_ids.iter().map(String::as_str).collect();

    let tasks = service.add_tasks_to_sprint(&sprint.sprint_id, &refs)?;
    render_tasks(ctx, &tasks)
}

fn run_remove(args: &SprintRemoveArgs, ctx: &Context) -> anyhow::Result<()> {
    let conn = ctx.open_store()?;
    let _lock = ctx.lock()?;
    let service = ctx.service(&conn);
    let mut removed = Vec::with_capacity(args.tasks.len());
    for reference in &args.tasks {
        let task = ctx.task(&service, reference)?;
        removed.push(service.remove_task_from_sprint(task.id())?);
    }
    render_tasks(ctx, &removed)
}

/// Without a reference there is no active sprint to start, so fall back to
/// the only planning sprint.
fn planning_sprint(
    ctx: &Context,
    service: &sprintlog_core::PmService<'_>,
    reference: Option<&str>,
) -> anyhow::Result<SprintState> {
    if reference.is_some() {
        return ctx.sprint(service, reference);
    }
    let project_id = ctx.project_id(service)?;
    let mut planning: Vec<SprintState> = service
        .sprints()
        .list(&project_id)?
        .into_iter()
        .filter(|sprint| sprint.status == "planning")
        .collect();
    match planning.len() {
        1 => Ok(planning.remove(0)),
        0 => anyhow::bail!("no planning sprint to start"),
        n => anyhow::bail!("{n} sprints are planning; name the one to start"),
    }
}

fn render_sprint(ctx: &Context, sprint: &SprintState) -> anyhow::Result<()> {
    render_mode(
        ctx.output(),
        sprint,
        |sprint, w| sprint_text_line(w, sprint),
        |sprint, w| {
            pretty_section(w, &format!("Sprint: {}", sprint.name))?;
            sprint_pretty_fields(w, sprint)
        },
    )
}

fn render_tasks(ctx: &Context, tasks: &[Task]) -> anyhow::Result<()> {
    render_mode(
        ctx.output(),
        tasks,
        |tasks, w| {
            for task in tasks {
                task_text_line(w, task)?;
            }
            Ok(())
        },
        |tasks, w| {
            task_table_header(w)?;
            for task in tasks {
                task_table_row(w, task)?;
            }
            Ok(())
        },
    )
}

fn sprint_text_line(w: &mut dyn Write, sprint: &SprintState) -> io::Result<()> {
    writeln!(
        w,
        "{}\t{}\t{}\t{}\t{}",
        sprint.sprint_id, sprint.name, sprint.status, sprint.start_date, sprint.end_date
    )
}

fn sprint_pretty_fields(w: &mut dyn Write, sprint: &SprintState) -> io::Result<()> {
    pretty_kv(w, "ID", &sprint.sprint_id)?;
    pretty_kv(w, "Status", &sprint.status)?;
    pretty_kv(w, "Dates", format!("{} .. {}", sprint.start_date, sprint.end_date))?;
    pretty_kv(w, "Goal", or_dash(sprint.goal.as_deref()))?;
    if sprint.started_at_us.is_some() {
        pretty_kv(w, "Started", when(sprint.started_at_us))?;
    }
    if sprint.completed_at_us.is_some() {
        pretty_kv(w, "Completed", when(sprint.completed_at_us))?;
        pretty_kv(
            w,
            "Velocity",
            format!(
                "{} of {} points",
                sprint.velocity_completed, sprint.velocity_committed
            ),
        )?;
    }
    Ok(())
}

fn report_text(report: &SprintStatusReport, w: &mut dyn Write) -> io::Result<()> {
    sprint_text_line(w, &report.sprint)?;
    writeln!(
        w,
        "progress\t{}/{}\t{}%",
        report.completed_points, report.total_points, report.progress_pct
    )?;
    for task in &report.tasks {
        task_text_line(w, task)?;
    }
    Ok(())
}

fn report_pretty(report: &SprintStatusReport, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, &format!("Sprint: {}", report.sprint.name))?;
    sprint_pretty_fields(w, &report.sprint)?;
    pretty_kv(
        w,
        "Progress",
        format!(
            "{} {}% ({} of {} points)",
            progress_bar(report.progress_pct),
            report.progress_pct,
            report.completed_points,
            report.total_points
        ),
    )?;
    let counts: Vec<String> = report
        .status_counts
        .iter()
        .map(|(status, count)| format!("{status} {count}"))
        .collect();
    pretty_kv(w, "Tasks", or_dash(Some(counts.join(", ").as_str())))?;
    if report.tasks.is_empty() {
        return Ok(());
    }
    writeln!(w)?;
    task_table_header(w)?;
    for task in &report.tasks {
        task_table_row(w, task)?;
    }
    pretty_rule(w)
}

fn progress_bar(pct: i64) -> String {
    let pct = usize::try_from(pct.clamp(0, 100)).unwrap_or(0);
    let filled = PROGRESS_BAR_WIDTH * pct / 100;
    format!(
        "[{}{}]",
        "#".repeat(filled),
        ".".repeat(PROGRESS_BAR_WIDTH - filled)
    )
}
