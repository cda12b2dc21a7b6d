//! `sprintlog report`: velocity and burndown.

use clap::{Args, Subcommand};
use serde::Serialize;
use sprintlog_core::projection::{AnalyticsRepository, BurndownPoint, Velocity};
use std::io::{self, Write};

use crate::context::Context;
use crate::output::{pretty_kv, pretty_section, render_mode};

const CHART_WIDTH: i64 = 40;

#[derive(Args, Debug)]
pub struct ReportArgs {
    #[command(subcommand)]
    pub command: ReportCommand,
}

#[derive(Subcommand, Debug)]
pub enum ReportCommand {
    #[command(about = "Average completed points over recent sprints")]
    Velocity(VelocityArgs),

    #[command(about = "Remaining versus ideal points per sprint day")]
    Burndown(BurndownArgs),
}

#[derive(Args, Debug)]
pub struct VelocityArgs {
    /// Number of completed sprints to average (default from config).
    #[arg(long, short)]
    pub window: Option<u32>,
}

#[derive(Args, Debug)]
pub struct BurndownArgs {
    /// Sprint id or name; omitted means the active sprint.
    pub sprint: Option<String>,
}

#[derive(Debug, Serialize)]
struct BurndownOutput {
    sprint_id: String,
    sprint_name: String,
    points: Vec<BurndownPoint>,
}

pub fn run_report(args: &ReportArgs, ctx: &Context) -> anyhow::Result<()> {
    match &args.command {
        ReportCommand::Velocity(velocity) => run_velocity(velocity, ctx),
        ReportCommand::Burndown(burndown) => run_burndown(burndown, ctx),
    }
}

fn run_velocity(args: &VelocityArgs, ctx: &Context) -> anyhow::Result<()> {
    let window = args
        .window
        .unwrap_or(ctx.config.project.analytics.velocity_window);
    if window == 0 {
        anyhow::bail!("--window must be at least 1");
    }
    let conn = ctx.open_store()?;
    let service = ctx.service(&conn);
    let project_id = ctx.project_id(&service)?;
    let velocity = AnalyticsRepository::new(&conn).velocity(&project_id, window)?;

    render_mode(ctx.output(), &velocity, velocity_text, velocity_pretty)
}

fn run_burndown(args: &BurndownArgs, ctx: &Context) -> anyhow::Result<()> {
    let conn = ctx.open_store()?;
    let service = ctx.service(&conn);
    let sprint = ctx.sprint(&service, args.sprint.as_deref())?;
    let points = AnalyticsRepository::new(&conn).burndown(&sprint.sprint_id)?;
    let out = BurndownOutput {
        sprint_id: sprint.sprint_id,
        sprint_name: sprint.name,
        points,
    };

    render_mode(ctx.output(), &out, burndown_text, burndown_pretty)
}

fn velocity_text(velocity: &Velocity, w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "average\t{}\tstd_dev\t{}", velocity.average, velocity.std_dev)?;
    for record in &velocity.trend {
        writeln!(
            w,
            "{}\t{}\t{}\t{:.2}",
            record.sprint_name,
            record.committed_points,
            record.completed_points,
            record.completion_rate
        )?;
    }
    Ok(())
}

fn velocity_pretty(velocity: &Velocity, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, "Velocity")?;
    if velocity.trend.is_empty() {
        return writeln!(w, "(no completed sprints yet)");
    }
    pretty_kv(w, "Average", format!("{} points", velocity.average))?;
    pretty_kv(w, "Std dev", velocity.std_dev.to_string())?;
    writeln!(w)?;
    writeln!(
        w,
        "{:<24} {:>9} {:>9} {:>7}",
        "SPRINT", "COMMITTED", "COMPLETED", "RATE"
    )?;
    for record in &velocity.trend {
        writeln!(
            w,
            "{:<24} {:>9} {:>9} {:>6.0}%",
            record.sprint_name,
            record.committed_points,
            record.completed_points,
            record.completion_rate * 100.0
        )?;
    }
    Ok(())
}

fn burndown_text(out: &BurndownOutput, w: &mut dyn Write) -> io::Result<()> {
    for point in &out.points {
        writeln!(
            w,
            "{}\t{}\t{}",
            point.date, point.remaining_points, point.ideal_points
        )?;
    }
    Ok(())
}

fn burndown_pretty(out: &BurndownOutput, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, &format!("Burndown: {}", out.sprint_name))?;
    let scale = out
        .points
        .first()
        .map_or(0, |p| p.remaining_points.max(p.ideal_points));
    writeln!(w, "{:<10} {:>9} {:>6}", "DATE", "REMAINING", "IDEAL")?;
    for point in &out.points {
        writeln!(
            w,
            "{:<10} {:>9} {:>6}  {}",
            point.date.to_string(),
            point.remaining_points,
            point.ideal_points,
            bar(point.remaining_points, scale)
        )?;
    }
    Ok(())
}

fn bar(value: i64, scale: i64) -> String {
    if scale <= 0 {
        return String::new();
    }
    let len = (value.clamp(0, scale) * CHART_WIDTH) / scale;
    "#".repeat(usize::try_from(len).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        args: ReportArgs,
    }

    #[test]
    fn velocity_window_is_optional() {
        let w = Wrapper::parse_from(["test", "velocity"]);
        assert!(matches!(w.args.command, ReportCommand::Velocity(ref v) if v.window.is_none()));
        let w = Wrapper::parse_from(["test", "velocity", "--window", "5"]);
        assert!(matches!(w.args.command, ReportCommand::Velocity(ref v) if v.window == Some(5)));
    }

    #[test]
    fn bar_scales_to_chart_width() {
        assert_eq!(bar(10, 10).len(), 40);
        assert_eq!(bar(5, 10).len(), 20);
        assert_eq!(bar(0, 10), "");
        assert_eq!(bar(3, 0), "");
    }
}
