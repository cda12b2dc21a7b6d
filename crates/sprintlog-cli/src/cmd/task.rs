//! `sprintlog task`: create, edit and move tasks; link commits and issues;
//! show the board.

use clap::{ArgGroup, Args, Subcommand};
use serde::Serialize;
use sprintlog_core::model::{Priority, TaskStatus, TaskType};
use sprintlog_core::projection::{Board, Task, TaskFilter};
use sprintlog_core::reduce::task::{TaskCreated, TaskEstimated, TaskUpdated};
use std::io::{self, Write};

use crate::cmd::{task_table_header, task_table_row, task_text_line};
use crate::context::Context;
use crate::output::{or_dash, pretty_kv, pretty_rule, pretty_section, render_mode, when};

#[derive(Args, Debug)]
pub struct TaskArgs {
    #[command(subcommand)]
    pub command: TaskCommand,
}

#[derive(Subcommand, Debug)]
pub enum TaskCommand {
    #[command(
        about = "Create a task",
        after_help = "EXAMPLES:\n    sprintlog task create \"Checkout times out\" --type bug --priority high --points 3\n    sprintlog task create \"Payment page\" --labels frontend,payments --sprint \"Sprint 1\""
    )]
    Create(TaskCreateArgs),

    #[command(about = "List tasks, most urgent first")]
    List(TaskListArgs),

    #[command(about = "Show one task")]
    Show(TaskRefArgs),

    #[command(
        about = "Change a task's status",
        after_help = "EXAMPLES:\n    sprintlog task status 4 in_progress\n    sprintlog task status 4 blocked --reason \"waiting on API keys\""
    )]
    Status(TaskStatusArgs),

    #[command(about = "Edit task fields and estimates")]
    Update(TaskUpdateArgs),

    #[command(
        about = "Show tasks grouped by status",
        after_help = "EXAMPLES:\n    # Whole project\n    sprintlog task board\n\n    # Active sprint only\n    sprintlog task board --sprint"
    )]
    Board(TaskBoardArgs),

    #[command(about = "Delete a task (its number is never reused)")]
    Delete(TaskRefArgs),

    #[command(
        about = "Print a branch name for a task",
        after_help = "EXAMPLES:\n    git switch -c \"$(sprintlog task branch 4 --type fix)\""
    )]
    Branch(TaskBranchArgs),

    #[command(
        about = "Link a commit or a GitHub issue",
        after_help = "EXAMPLES:\n    sprintlog task link 4 --commit 9fceb02 --message \"fix checkout timeout\"\n    sprintlog task link 4 --issue 118"
    )]
    Link(TaskLinkArgs),
}

#[derive(Args, Debug)]
pub struct TaskCreateArgs {
    /// Task title.
    pub title: String,

    #[arg(long, short)]
    pub description: Option<String>,

    /// epic, story, task, bug or subtask.
    #[arg(long = "type", short = 't', value_name = "TYPE")]
    pub task_type: Option<TaskType>,

    /// critical, high, medium or low.
    #[arg(long, short)]
    pub priority: Option<Priority>,

    /// Initial status (default todo).
    #[arg(long)]
    pub status: Option<TaskStatus>,

    /// Story points.
    #[arg(long)]
    pub points: Option<i64>,

    #[arg(long, short)]
    pub assignee: Option<String>,

    /// Comma-separated labels.
    #[arg(long, value_delimiter = ',')]
    pub labels: Vec<String>,

    /// Due date (YYYY-MM-DD).
    #[arg(long)]
    pub due: Option<String>,

    /// Parent task (id or number).
    #[arg(long)]
    pub parent: Option<String>,

    /// Sprint (id or name) to plan the task into.
    #[arg(long)]
    pub sprint: Option<String>,

    /// Working branch name.
    #[arg(long)]
    pub branch: Option<String>,
}

#[derive(Args, Debug)]
pub struct TaskListArgs {
    #[arg(long)]
    pub status: Option<TaskStatus>,

    /// Sprint id or name.
    #[arg(long)]
    pub sprint: Option<String>,

    #[arg(long)]
    pub assignee: Option<String>,

    #[arg(long = "type", value_name = "TYPE")]
    pub task_type: Option<TaskType>,

    #[arg(long)]
    pub priority: Option<Priority>,

    /// Maximum number of tasks to list.
    #[arg(long, short)]
    pub limit: Option<u32>,

    /// Offset for pagination.
    #[arg(long)]
    pub offset: Option<u32>,
}

#[derive(Args, Debug)]
pub struct TaskRefArgs {
    /// Task id or number (`4`, `#4`).
    pub task: String,
}

#[derive(Args, Debug)]
pub struct TaskStatusArgs {
    /// Task id or number.
    pub task: String,

    /// todo, in_progress, in_review, done or blocked.
    pub status: TaskStatus,

    /// Why the status changed.
    #[arg(long)]
    pub reason: Option<String>,
}

#[derive(Args, Debug)]
pub struct TaskUpdateArgs {
    /// Task id or number.
    pub task: String,

    #[arg(long)]
    pub title: Option<String>,

    #[arg(long, short)]
    pub description: Option<String>,

    #[arg(long, short)]
    pub priority: Option<Priority>,

    #[arg(long = "type", short = 't', value_name = "TYPE")]
    pub task_type: Option<TaskType>,

    #[arg(long, short)]
    pub assignee: Option<String>,

    /// Replace labels (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub labels: Option<Vec<String>>,

    /// Due date (YYYY-MM-DD).
    #[arg(long)]
    pub due: Option<String>,

    /// Parent task (id or number).
    #[arg(long)]
    pub parent: Option<String>,

    /// What the task is waiting on.
    #[arg(long)]
    pub blocked_by: Option<String>,

    #[arg(long)]
    pub branch: Option<String>,

    /// Hours actually spent.
    #[arg(long)]
    pub actual_hours: Option<f64>,

    /// New story point estimate.
    #[arg(long)]
    pub points: Option<i64>,

    /// New hour estimate.
    #[arg(long)]
    pub hours: Option<f64>,
}

#[derive(Args, Debug)]
pub struct TaskBoardArgs {
    /// Limit to a sprint; without a value, the active sprint.
    #[arg(long, num_args = 0..=1, value_name = "SPRINT")]
    pub sprint: Option<Option<String>>,
}

#[derive(Args, Debug)]
pub struct TaskBranchArgs {
    /// Task id or number.
    pub task: String,

    /// Branch type prefix (feature, fix, chore, ...).
    #[arg(long = "type", short = 't', default_value = "feature")]
    pub branch_type: String,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("target").required(true).args(["commit", "issue"])))]
pub struct TaskLinkArgs {
    /// Task id or number.
    pub task: String,

    /// Commit sha to link.
    #[arg(long)]
    pub commit: Option<String>,

    /// Commit message (with --commit).
    #[arg(long, requires = "commit")]
    pub message: Option<String>,

    /// Branch the commit was made on (with --commit).
    #[arg(long, requires = "commit")]
    pub branch: Option<String>,

    /// GitHub issue number to link.
    #[arg(long)]
    pub issue: Option<i64>,

    /// Issue URL (with --issue).
    #[arg(long, requires = "issue")]
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
struct BranchOutput {
    task_id: String,
    seq: i64,
    branch: String,
}

pub fn run_task(args: &TaskArgs, ctx: &Context) -> anyhow::Result<()> {
    match &args.command {
        TaskCommand::Create(create) => run_create(create, ctx),
        TaskCommand::List(list) => run_list(list, ctx),
        TaskCommand::Show(show) => run_show(show, ctx),
        TaskCommand::Status(status) => run_status(status, ctx),
        TaskCommand::Update(update) => run_update(update, ctx),
        TaskCommand::Board(board) => run_board(board, ctx),
        TaskCommand::Delete(delete) => run_delete(delete, ctx),
        TaskCommand::Branch(branch) => run_branch(branch, ctx),
        TaskCommand::Link(link) => run_link(link, ctx),
    }
}

fn run_create(args: &TaskCreateArgs, ctx: &Context) -> anyhow::Result<()> {
    let conn = ctx.open_store()?;
    let _lock = ctx.lock()?;
    let service = ctx.service(&conn);
    let project_id = ctx.project_id(&service)?;

    let parent_id = args
        .parent
        .as_deref()
        .map(|parent| ctx.task(&service, parent).map(|task| task.state.task_id))
        .transpose()?;
    let sprint_id = args
        .sprint
        .as_deref()
        .map(|sprint| ctx.sprint(&service, Some(sprint)).map(|s| s.sprint_id))
        .transpose()?;

    let created = TaskCreated {
        project_id,
        title: args.title.clone(),
        description: args.description.clone(),
        task_type: args.task_type.map(|t| t.as_str().to_string()),
        priority: args.priority.map(|p| p.as_str().to_string()),
        status: args.status.map(|s| s.as_str().to_string()),
        parent_id,
        sprint_id,
        assignee: args.assignee.clone(),
        labels: (!args.labels.is_empty()).then(|| args.labels.clone()),
        due_date: args.due.clone(),
        estimate_points: args.points,
        branch_name: args.branch.clone(),
    };
    let task = service.create_task(&created)?;
    render_task(ctx, &task)
}

fn run_list(args: &TaskListArgs, ctx: &Context) -> anyhow::Result<()> {
    let conn = ctx.open_store()?;
    let service = ctx.service(&conn);
    let project_id = ctx.project_id(&service)?;
    let sprint_id = args
        .sprint
        .as_deref()
        .map(|sprint| ctx.sprint(&service, Some(sprint)).map(|s| s.sprint_id))
        .transpose()?;

    let filter = TaskFilter {
        sprint_id,
        status: args.status.map(|s| s.as_str().to_string()),
        assignee: args.assignee.clone(),
        task_type: args.task_type.map(|t| t.as_str().to_string()),
        priority: args.priority.map(|p| p.as_str().to_string()),
        limit: args.limit,
        offset: args.offset,
        ..TaskFilter::for_project(&project_id)
    };
    let tasks = service.tasks().list(&filter)?;

    render_mode(
        ctx.output(),
        &tasks,
        |tasks, w| {
            for task in tasks {
                task_text_line(w, task)?;
            }
            Ok(())
        },
        |tasks, w| {
            if tasks.is_empty() {
                return writeln!(w, "(no tasks)");
            }
            task_table_header(w)?;
            for task in tasks {
                task_table_row(w, task)?;
            }
            Ok(())
        },
    )
}

fn run_show(args: &TaskRefArgs, ctx: &Context) -> anyhow::Result<()> {
    let conn = ctx.open_store()?;
    let service = ctx.service(&conn);
    let task = ctx.task(&service, &args.task)?;
    render_task(ctx, &task)
}

fn run_status(args: &TaskStatusArgs, ctx: &Context) -> anyhow::Result<()> {
    let conn = ctx.open_store()?;
    let _lock = ctx.lock()?;
    let service = ctx.service(&conn);
    let task = ctx.task(&service, &args.task)?;
    let task = service.change_status(task.id(), args.status.as_str(), args.reason.as_deref())?;
    render_task(ctx, &task)
}

fn run_update(args: &TaskUpdateArgs, ctx: &Context) -> anyhow::Result<()> {
    let conn = ctx.open_store()?;
    let _lock = ctx.lock()?;
    let service = ctx.service(&conn);
    let task = ctx.task(&service, &args.task)?;

    let parent_id = args
        .parent
        .as_deref()
        .map(|parent| ctx.task(&service, parent).map(|t| t.state.task_id))
        .transpose()?;
    let update = TaskUpdated {
        title: args.title.clone(),
        description: args.description.clone(),
        priority: args.priority.map(|p| p.as_str().to_string()),
        task_type: args.task_type.map(|t| t.as_str().to_string()),
        assignee: args.assignee.clone(),
        labels: args.labels.clone(),
        due_date: args.due.clone(),
        parent_id,
        blocked_by: args.blocked_by.clone(),
        branch_name: args.branch.clone(),
        actual_hours: args.actual_hours,
    };
    let estimate = TaskEstimated {
        points: args.points,
        hours: args.hours,
    };
    let task = service.update_task(task.id(), &update, Some(&estimate))?;
    render_task(ctx, &task)
}

fn run_board(args: &TaskBoardArgs, ctx: &Context) -> anyhow::Result<()> {
    let conn = ctx.open_store()?;
    let service = ctx.service(&conn);
    let project_id = ctx.project_id(&service)?;
    let sprint_id = match &args.sprint {
        Some(reference) => Some(ctx.sprint(&service, reference.as_deref())?.sprint_id),
        None => None,
    };
    let board = service
        .tasks()
        .get_by_status(&project_id, sprint_id.as_deref())?;

    render_mode(ctx.output(), &board, board_text, board_pretty)
}

fn run_delete(args: &TaskRefArgs, ctx: &Context) -> anyhow::Result<()> {
    let conn = ctx.open_store()?;
    let _lock = ctx.lock()?;
    let service = ctx.service(&conn);
    let task = ctx.task(&service, &args.task)?;
    let deleted = service.delete_task(task.id())?;

    render_mode(
        ctx.output(),
        &deleted,
        |task, w| writeln!(w, "deleted\t{}\t{}", task.display_ref(), task.state.task_id),
        |task, w| writeln!(w, "Deleted {} {}", task.display_ref(), task.state.title),
    )
}

fn run_branch(args: &TaskBranchArgs, ctx: &Context) -> anyhow::Result<()> {
    let conn = ctx.open_store()?;
    let service = ctx.service(&conn);
    let task = ctx.task(&service, &args.task)?;
    let branch = service.branch_name_for(task.id(), &args.branch_type)?;
    let out = BranchOutput {
        task_id: task.state.task_id.clone(),
        seq: task.seq,
        branch,
    };
    render_mode(
        ctx.output(),
        &out,
        |out, w| writeln!(w, "{}", out.branch),
        |out, w| writeln!(w, "{}", out.branch),
    )
}

fn run_link(args: &TaskLinkArgs, ctx: &Context) -> anyhow::Result<()> {
    let conn = ctx.open_store()?;
    let _lock = ctx.lock()?;
    let service = ctx.service(&conn);
    let mut task = ctx.task(&service, &args.task)?;

    if let Some(sha) = &args.commit {
        task = service.link_commit(
            task.id(),
            sha,
            args.message.as_deref(),
            args.branch.as_deref(),
        )?;
    }
    if let Some(number) = args.issue {
        task = service.link_issue(task.id(), number, args.url.as_deref())?;
    }
    render_task(ctx, &task)
}

fn render_task(ctx: &Context, task: &Task) -> anyhow::Result<()> {
    render_mode(
        ctx.output(),
        task,
        |task, w| task_text_line(w, task),
        task_pretty,
    )
}

fn task_pretty(task: &Task, w: &mut dyn Write) -> io::Result<()> {
    let state = &task.state;
    pretty_section(w, &format!("{} {}", task.display_ref(), state.title))?;
    pretty_kv(w, "ID", &state.task_id)?;
    pretty_kv(w, "Status", &state.status)?;
    pretty_kv(w, "Type", &state.task_type)?;
    pretty_kv(w, "Priority", &state.priority)?;
    pretty_kv(w, "Assignee", or_dash(state.assignee.as_deref()))?;
    pretty_kv(w, "Sprint", or_dash(state.sprint_id.as_deref()))?;
    pretty_kv(w, "Parent", or_dash(state.parent_id.as_deref()))?;
    let points = state
        .estimate_points
        .map_or_else(|| "-".to_string(), |p| p.to_string());
    pretty_kv(w, "Points", points)?;
    if let Some(hours) = state.estimate_hours {
        pretty_kv(w, "Estimate", format!("{hours}h"))?;
    }
    if let Some(hours) = state.actual_hours {
        pretty_kv(w, "Actual", format!("{hours}h"))?;
    }
    if !state.labels.is_empty() {
        pretty_kv(w, "Labels", state.labels.join(", "))?;
    }
    pretty_kv(w, "Due", or_dash(state.due_date.as_deref()))?;
    if let Some(blocked_by) = &state.blocked_by {
        pretty_kv(w, "Blocked by", blocked_by)?;
    }
    if let Some(branch) = &state.branch_name {
        pretty_kv(w, "Branch", branch)?;
    }
    pretty_kv(w, "Created", when(Some(state.created_at_us)))?;
    pretty_kv(w, "Updated", when(Some(state.updated_at_us)))?;
    if state.started_at_us.is_some() {
        pretty_kv(w, "Started", when(state.started_at_us))?;
    }
    if state.completed_at_us.is_some() {
        pretty_kv(w, "Completed", when(state.completed_at_us))?;
    }
    if !state.linked_commits.is_empty() {
        let short: Vec<&str> = state
            .linked_commits
            .iter()
            .map(|sha| sha.get(..7).unwrap_or(sha))
            .collect();
        pretty_kv(w, "Commits", short.join(", "))?;
    }
    if !state.linked_issues.is_empty() {
        let issues: Vec<String> = state.linked_issues.iter().map(|n| format!("#{n}")).collect();
        pretty_kv(w, "Issues", issues.join(", "))?;
    }
    if let Some(description) = &state.description {
        writeln!(w)?;
        writeln!(w, "{description}")?;
    }
    Ok(())
}

fn board_text(board: &Board, w: &mut dyn Write) -> io::Result<()> {
    for (column, tasks) in board.columns() {
        for task in tasks {
            writeln!(w, "{column}\t{}\t{}", task.display_ref(), task.state.title)?;
        }
    }
    Ok(())
}

fn board_pretty(board: &Board, w: &mut dyn Write) -> io::Result<()> {
    if board.is_empty() {
        return writeln!(w, "(no tasks)");
    }
    for (column, tasks) in board.columns() {
        if tasks.is_empty() && column == "other" {
            continue;
        }
        writeln!(w, "{} ({})", column.to_uppercase(), tasks.len())?;
        for task in tasks {
            writeln!(
                w,
                "  {:<6} {:<9} {}",
                task.display_ref(),
                task.state.priority,
                task.state.title
            )?;
        }
    }
    pretty_rule(w)?;
    writeln!(w, "{} tasks", board.len())
}
