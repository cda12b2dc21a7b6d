//! `sprintlog project`: create, list, edit and link projects.

use clap::{Args, Subcommand};
use serde::Serialize;
use sprintlog_core::PmService;
use sprintlog_core::model::SyncMode;
use sprintlog_core::projection::ProjectConfig;
use sprintlog_core::reduce::ProjectState;
use sprintlog_core::reduce::project::ProjectUpdated;
use std::io::{self, Write};

use crate::context::Context;
use crate::output::{or_dash, pretty_kv, pretty_section, render_mode, when};

#[derive(Args, Debug)]
pub struct ProjectArgs {
    #[command(subcommand)]
    pub command: ProjectCommand,
}

#[derive(Subcommand, Debug)]
pub enum ProjectCommand {
    #[command(
        about = "Create a project (and the store, if missing)",
        after_help = "EXAMPLES:\n    sprintlog project create Webshop --description \"Customer storefront\"\n    sprintlog project create Webshop --github acme/webshop"
    )]
    Create(ProjectCreateArgs),

    #[command(about = "List active projects")]
    List,

    #[command(about = "Show the selected project and its sync settings")]
    Show,

    #[command(about = "Rename or re-describe the selected project")]
    Update(ProjectUpdateArgs),

    #[command(
        about = "Link, relink or unlink a GitHub repository",
        after_help = "EXAMPLES:\n    sprintlog project github acme/webshop\n    sprintlog project github --sync-mode bidirectional\n    sprintlog project github --disable"
    )]
    Github(ProjectGithubArgs),
}

#[derive(Args, Debug)]
pub struct ProjectCreateArgs {
    /// Project name.
    pub name: String,

    /// Free-form description.
    #[arg(long, short)]
    pub description: Option<String>,

    /// GitHub repository to link, as owner/repo.
    #[arg(long, value_name = "OWNER/REPO")]
    pub github: Option<String>,

    /// Sync mode: read_only, bidirectional or push_only.
    #[arg(long, value_name = "MODE")]
    pub sync_mode: Option<SyncMode>,
}

#[derive(Args, Debug)]
pub struct ProjectUpdateArgs {
    /// New name.
    #[arg(long)]
    pub name: Option<String>,

    /// New description.
    #[arg(long, short)]
    pub description: Option<String>,
}

#[derive(Args, Debug)]
pub struct ProjectGithubArgs {
    /// Repository to link, as owner/repo.
    #[arg(value_name = "OWNER/REPO", conflicts_with = "disable")]
    pub repo: Option<String>,

    /// Turn GitHub sync off for the project.
    #[arg(long)]
    pub disable: bool,

    /// Sync mode: read_only, bidirectional or push_only.
    #[arg(long, value_name = "MODE")]
    pub sync_mode: Option<SyncMode>,
}

#[derive(Debug, Serialize)]
struct ProjectView {
    #[serde(flatten)]
    project: ProjectState,
    sync: Option<ProjectConfig>,
}

impl ProjectView {
    fn load(service: &PmService<'_>, project: ProjectState) -> anyhow::Result<Self> {
        let sync = service.configs().get(&project.project_id)?;
        Ok(Self { project, sync })
    }
}

pub fn run_project(args: &ProjectArgs, ctx: &Context) -> anyhow::Result<()> {
    match &args.command {
        ProjectCommand::Create(create) => run_create(create, ctx),
        ProjectCommand::List => run_list(ctx),
        ProjectCommand::Show => run_show(ctx),
        ProjectCommand::Update(update) => run_update(update, ctx),
        ProjectCommand::Github(github) => run_github(github, ctx),
    }
}

fn run_create(args: &ProjectCreateArgs, ctx: &Context) -> anyhow::Result<()> {
    let conn = ctx.create_store()?;
    let _lock = ctx.lock()?;
    let service = ctx.service(&conn);

    let project = service.create_project(&args.name, args.description.as_deref())?;
    if let Some(repo) = &args.github {
        service.enable_github(&project.project_id, repo)?;
    }
    if let Some(mode) = args.sync_mode {
        service.set_sync_mode(&project.project_id, mode)?;
    }

    let view = ProjectView::load(&service, project)?;
    render_mode(ctx.output(), &view, project_text, project_pretty)
}

fn run_list(ctx: &Context) -> anyhow::Result<()> {
    let conn = ctx.open_store()?;
    let service = ctx.service(&conn);
    let views = service
        .projects()
        .list()?
        .into_iter()
        .map(|project| ProjectView::load(&service, project))
        .collect::<anyhow::Result<Vec<_>>>()?;

    render_mode(
        ctx.output(),
        &views,
        |views, w| {
            for view in views {
                writeln!(
                    w,
                    "{}\t{}\t{}",
                    view.project.project_id,
                    view.project.name,
                    or_dash(linked_repo(view))
                )?;
            }
            Ok(())
        },
        |views, w| {
            if views.is_empty() {
                return writeln!(w, "(no projects)");
            }
            writeln!(w, "{:<38} {:<24} GITHUB", "ID", "NAME")?;
            writeln!(w, "{}", "-".repeat(72))?;
            for view in views {
                writeln!(
                    w,
                    "{:<38} {:<24} {}",
                    view.project.project_id,
                    view.project.name,
                    or_dash(linked_repo(view))
                )?;
            }
            Ok(())
        },
    )
}

fn run_show(ctx: &Context) -> anyhow::Result<()> {
    let conn = ctx.open_store()?;
    let service = ctx.service(&conn);
    let project_id = ctx.project_id(&service)?;
    let project = service
        .projects()
        .get_by_id(&project_id)?
        .ok_or_else(|| anyhow::anyhow!("project {project_id} disappeared"))?;
    let view = ProjectView::load(&service, project)?;
    render_mode(ctx.output(), &view, project_text, project_pretty)
}

fn run_update(args: &ProjectUpdateArgs, ctx: &Context) -> anyhow::Result<()> {
    let conn = ctx.open_store()?;
    let _lock = ctx.lock()?;
    let service = ctx.service(&conn);
    let project_id = ctx.project_id(&service)?;

    let patch = ProjectUpdated {
        name: args.name.clone(),
        description: args.description.clone(),
        settings: None,
    };
    let project = service.update_project(&project_id, &patch)?;
    let view = ProjectView::load(&service, project)?;
    render_mode(ctx.output(), &view, project_text, project_pretty)
}

fn run_github(args: &ProjectGithubArgs, ctx: &Context) -> anyhow::Result<()> {
    if args.repo.is_none() && !args.disable && args.sync_mode.is_none() {
        anyhow::bail!("nothing to change: pass a repository, --disable or --sync-mode");
    }
    let conn = ctx.open_store()?;
    let _lock = ctx.lock()?;
    let service = ctx.service(&conn);
    let project_id = ctx.project_id(&service)?;

    if let Some(repo) = &args.repo {
        crate::github::RepoSlug::parse(repo)?;
        service.enable_github(&project_id, repo)?;
    }
    if args.disable {
        service.disable_github(&project_id)?;
    }
    if let Some(mode) = args.sync_mode {
        service.set_sync_mode(&project_id, mode)?;
    }

    let project = service
        .projects()
        .get_by_id(&project_id)?
        .ok_or_else(|| anyhow::anyhow!("project {project_id} disappeared"))?;
    let view = ProjectView::load(&service, project)?;
    render_mode(ctx.output(), &view, project_text, project_pretty)
}

fn linked_repo(view: &ProjectView) -> Option<&str> {
    view.sync
        .as_ref()
        .filter(|config| config.github_enabled)
        .and_then(|config| config.github_repo.as_deref())
}

fn project_text(view: &ProjectView, w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "{}\t{}", view.project.project_id, view.project.name)?;
    if let Some(config) = &view.sync {
        writeln!(
            w,
            "github\t{}\t{}",
            or_dash(linked_repo(view)),
            config.sync_mode
        )?;
    }
    Ok(())
}

fn project_pretty(view: &ProjectView, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, &format!("Project: {}", view.project.name))?;
    pretty_kv(w, "ID", &view.project.project_id)?;
    pretty_kv(w, "Description", or_dash(view.project.description.as_deref()))?;
    pretty_kv(w, "Status", &view.project.status)?;
    pretty_kv(w, "Created", when(Some(view.project.created_at_us)))?;
    if let Some(config) = &view.sync {
        pretty_kv(w, "GitHub", or_dash(linked_repo(view)))?;
        pretty_kv(w, "Sync mode", config.sync_mode.as_str())?;
        pretty_kv(w, "Last sync", when(config.last_sync_at_us))?;
    }
    Ok(())
}
