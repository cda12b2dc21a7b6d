//! Velocity and burndown views over the projections.

use chrono::{Duration, NaiveDate};
use rusqlite::{Connection, params};
use serde::Serialize;

use super::sprint::SprintRepository;
use super::task::TaskRepository;
use crate::error::{EntityKind, Error, Result};
use crate::timestamp::{parse_date, utc_date};

/// Number of completed sprints averaged by default.
pub const DEFAULT_VELOCITY_WINDOW: u32 = 3;

/// One completed sprint's velocity fact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VelocityRecord {
    pub sprint_id: String,
    pub sprint_name: String,
    pub committed_points: i64,
    pub completed_points: i64,
    pub completion_rate: f64,
    pub recorded_at_us: i64,
}

/// Rolling velocity over the most recent completed sprints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Velocity {
    /// Mean completed points, one decimal place.
    pub average: f64,
    /// Population standard deviation of completed points, one decimal place.
    pub std_dev: f64,
    /// Newest first.
    pub trend: Vec<VelocityRecord>,
}

/// One day of a sprint burndown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BurndownPoint {
    pub date: NaiveDate,
    pub remaining_points: i64,
    pub ideal_points: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct AnalyticsRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> AnalyticsRepository<'conn> {
    #[must_use]
    pub const fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Velocity over the last `window` velocity facts for a project.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn velocity(&self, project_id: &str, window: u32) -> Result<Velocity> {
        let mut stmt = self.conn.prepare(
            "SELECT vh.sprint_id, COALESCE(s.name, vh.sprint_id), vh.committed_points,
                    vh.completed_points, vh.completion_rate, vh.recorded_at_us
             FROM velocity_history vh
             LEFT JOIN sprints s ON s.sprint_id = vh.sprint_id
             WHERE vh.project_id = ?1
             ORDER BY vh.recorded_at_us DESC, vh.id DESC
             LIMIT ?2",
        )?;
        let trend = stmt
            .query_map(params![project_id, window], |row| {
                Ok(VelocityRecord {
                    sprint_id: row.get(0)?,
                    sprint_name: row.get(1)?,
                    committed_points: row.get(2)?,
                    completed_points: row.get(3)?,
                    completion_rate: row.get(4)?,
                    recorded_at_us: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let (average, std_dev) = mean_and_std_dev(trend.iter().map(|r| r.completed_points));
        Ok(Velocity {
            average: round_one_decimal(average),
            std_dev: round_one_decimal(std_dev),
            trend,
        })
    }

    /// Day-by-day burndown from the sprint's start date to its end date,
    /// inclusive.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown sprint; [`Error::Validation`] if
    /// the sprint dates do not parse.
    pub fn burndown(&self, sprint_id: &str) -> Result<Vec<BurndownPoint>> {
        let sprint = SprintRepository::new(self.conn)
            .get_by_id(sprint_id)?
            .ok_or_else(|| Error::not_found(EntityKind::Sprint, sprint_id))?;
        let start = parse_date(&sprint.start_date).ok_or_else(|| {
            Error::Validation(format!("sprint start date '{}' is not a date", sprint.start_date))
        })?;
        let end = parse_date(&sprint.end_date).ok_or_else(|| {
            Error::Validation(format!("sprint end date '{}' is not a date", sprint.end_date))
        })?;

        let tasks = TaskRepository::new(self.conn).list_for_sprint(sprint_id)?;
        let total_points: i64 = tasks.iter().filter_map(|t| t.state.estimate_points).sum();
        let completions: Vec<(NaiveDate, i64)> = tasks
            .iter()
            .filter(|t| t.state.status == "done")
            .filter_map(|t| {
                let day = t.state.completed_at_us.and_then(utc_date)?;
                Some((day, t.state.estimate_points.unwrap_or(0)))
            })
            .collect();

        Ok(burndown_series(start, end, total_points, &completions))
    }
}

/// Build the burndown series.
///
/// `remaining` drops by the points of every task completed on that UTC day
/// and never goes below zero. The ideal line falls linearly from the total on
/// day 0 to zero on the last day; a zero-length sprint yields a single point
/// whose ideal equals the total.
#[must_use]
pub fn burndown_series(
    start: NaiveDate,
    end: NaiveDate,
    total_points: i64,
    completions: &[(NaiveDate, i64)],
) -> Vec<BurndownPoint> {
    let total_days = (end - start).num_days().max(0);
    let mut remaining = total_points;
    let mut points = Vec::new();

    for day in 0..=total_days {
        let date = start + Duration::days(day);
        remaining -= completions
            .iter()
            .filter(|(completed_on, _)| *completed_on == date)
            .map(|(_, p)| p)
            .sum::<i64>();
        points.push(BurndownPoint {
            date,
            remaining_points: remaining.max(0),
            ideal_points: ideal_points(total_points, day, total_days),
        });
    }
    points
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn ideal_points(total: i64, day: i64, total_days: i64) -> i64 {
    if total_days == 0 {
        return total;
    }
    let ideal = total as f64 * (1.0 - day as f64 / total_days as f64);
    ideal.round() as i64
}

#[allow(clippy::cast_precision_loss)]
fn mean_and_std_dev(values: impl Iterator<Item = i64>) -> (f64, f64) {
    let values: Vec<f64> = values.map(|v| v as f64).collect();
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
