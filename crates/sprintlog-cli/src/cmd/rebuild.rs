
use crate::context::Context;
use crate::output::{pretty_kv, pretty_section, render_mode};

/// Run `sprintlog rebuild`: replay the event log into every projection.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or locked, or if replay
/// fails (nothing is committed in that case).
pub fn run_rebuild(ctx: &Context) -> anyhow::Result<()> {
    let conn = ctx.open_store()?;
    let _lock = ctx.lock()?;
    let report = ctx.service(&conn).rebuild_projections()?;

    render_mode(
        ctx.output(),
        &report,
        |r, w| {
            writeln!(
                w,
                "rebuild: projects={} sprints={} tasks={}",
                r.projects, r.sprints, r.tasks
            )
        },
        |r, w| {
            pretty_section(w, "Rebuilt projections")?;
            pretty_kv(w, "Projects", r.projects.to_string())?;
            pretty_kv(w, "Sprints", r.sprints.to_string())?;
            pretty_kv(w, "Tasks", r.tasks.to_string())
        },
    )
}
