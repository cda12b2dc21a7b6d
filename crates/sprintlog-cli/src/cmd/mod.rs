pub mod commit;
pub mod project;
pub mod rebuild;
pub mod report;
pub mod sprint;
pub mod sync;
pub mod task;

use sprintlog_core::projection::Task;
use std::io::{self, Write};

use crate::output::or_dash;

/// Tab-separated task line: `#seq status priority points title`.
pub(crate) fn task_text_line(w: &mut dyn Write, task: &Task) -> io::Result<()> {
    let points = task
        .state
        .estimate_points
        .map_or_else(|| "-".to_string(), |p| p.to_string());
    writeln!(
        w,
        "{}\t{}\t{}\t{}\t{}",
        task.display_ref(),
        task.state.status,
        task.state.priority,
        points,
        task.state.title
    )
}

pub(crate) fn task_table_header(w: &mut dyn Write) -> io::Result<()> {
    writeln!(
        w,
        "{:<6} {:<12} {:<9} {:>4}  {:<12} TITLE",
        "ID", "STATUS", "PRIORITY", "PTS", "ASSIGNEE"
    )?;
    writeln!(w, "{}", "-".repeat(72))
}

pub(crate) fn task_table_row(w: &mut dyn Write, task: &Task) -> io::Result<()> {
    let points = task
        .state
        .estimate_points
        .map_or_else(|| "-".to_string(), |p| p.to_string());
    writeln!(
        w,
        "{:<6} {:<12} {:<9} {:>4}  {:<12} {}",
        task.display_ref(),
        task.state.status,
        task.state.priority,
        points,
        or_dash(task.state.assignee.as_deref()),
        task.state.title
    )
}
