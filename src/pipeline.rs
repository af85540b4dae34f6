use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;

use crate::aggregate::{self, ReportingWindow};
use crate::config::DepartmentMappings;
use crate::db::RecordSource;
use crate::mailer::{Mailer, OutgoingEmail};
use crate::models::StudentMonthAggregate;
use crate::workbook;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub as_of: NaiveDate,
    pub out_dir: PathBuf,
    pub min_late_days: usize,
    pub remove_consolidated: bool,
}

/// Where the report mail goes. `None` in [`run`] means a dry run.
pub struct Delivery<'a, M> {
    pub mailer: &'a M,
    pub all_mail: &'a str,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub month: String,
    pub fetched: usize,
    pub rejected: usize,
    pub in_window: usize,
    pub qualifying_students: usize,
    pub files_written: usize,
    pub emails_sent: usize,
    pub files_deleted: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    NoRecords,
    NoRecordsInMonth { month: String },
    NoRepeatLatecomers { month: String, min_late_days: usize },
    Completed(RunSummary),
}

impl RunOutcome {
    pub fn message(&self) -> String {
        match self {
            RunOutcome::NoRecords => "No data found. Skipping process.".to_string(),
            RunOutcome::NoRecordsInMonth { .. } => {
                "No records found for the last month. Skipping process.".to_string()
            }
            RunOutcome::NoRepeatLatecomers { min_late_days, .. } => format!(
                "No students were late on {min_late_days} or more unique days. Skipping process."
            ),
            RunOutcome::Completed(summary) => {
                format!("Monthly latecomers report for {} complete.", summary.month)
            }
        }
    }
}

/// Result of the fetch and aggregate stages, shared by `run` and `preview`.
#[derive(Debug, Clone)]
pub enum Collected {
    Halted(RunOutcome),
    Students {
        window: ReportingWindow,
        students: Vec<StudentMonthAggregate>,
        summary: RunSummary,
    },
}

pub async fn collect<S>(
    source: &S,
    as_of: NaiveDate,
    min_late_days: usize,
) -> anyhow::Result<Collected>
where
    S: RecordSource + Sync + ?Sized,
{
    let window = ReportingWindow::previous_month(as_of);
    let month = window.label();

    let fetched = source.fetch_all().await?;
    tracing::info!(
        documents = fetched.total,
        rejected = fetched.rejected,
        "fetched latecomer records"
    );
    if fetched.total == 0 {
        return Ok(Collected::Halted(RunOutcome::NoRecords));
    }

    let in_window = aggregate::records_in_window(&fetched.records, &window);
    if in_window.is_empty() {
        return Ok(Collected::Halted(RunOutcome::NoRecordsInMonth { month }));
    }

    let students =
        aggregate::repeat_latecomers(aggregate::aggregate_students(&in_window), min_late_days);
    if students.is_empty() {
        return Ok(Collected::Halted(RunOutcome::NoRepeatLatecomers {
            month,
            min_late_days,
        }));
    }
    tracing::info!(month = %month, students = students.len(), "students over late-day threshold");

    let summary = RunSummary {
        month,
        fetched: fetched.total,
        rejected: fetched.rejected,
        in_window: in_window.len(),
        qualifying_students: students.len(),
        ..RunSummary::default()
    };

    Ok(Collected::Students {
        window,
        students,
        summary,
    })
}

/// Fetch, aggregate, write and mail in one sequential pass.
///
/// Department files are removed after their email goes out; the consolidated
/// file is kept unless `remove_consolidated` is set.
pub async fn run<S, M>(
    source: &S,
    mappings: &DepartmentMappings,
    delivery: Option<Delivery<'_, M>>,
    options: &RunOptions,
) -> anyhow::Result<RunOutcome>
where
    S: RecordSource + Sync + ?Sized,
    M: Mailer + Sync,
{
    let (window, students, mut summary) =
        match collect(source, options.as_of, options.min_late_days).await? {
            Collected::Halted(outcome) => return Ok(outcome),
            Collected::Students {
                window,
                students,
                summary,
            } => (window, students, summary),
        };

    let files = workbook::write_reports(&students, mappings, &window, &options.out_dir)?;
    summary.files_written = files.departments.len() + 1;

    let Some(delivery) = delivery else {
        tracing::info!("dry run: skipping email delivery");
        return Ok(RunOutcome::Completed(summary));
    };

    for route in mappings.routes() {
        let (Some(email), Some(report)) = (&route.email, files.for_department(&route.department))
        else {
            continue;
        };

        let outgoing = OutgoingEmail::department(
            &route.department,
            email,
            &summary.month,
            report.path.clone(),
        );
        tracing::debug!(department = %route.department, rows = report.rows, "sending department report");
        delivery.mailer.send(&outgoing).await?;
        summary.emails_sent += 1;

        remove_report(&report.path)?;
        summary.files_deleted += 1;
    }

    let outgoing =
        OutgoingEmail::consolidated(delivery.all_mail, &summary.month, files.consolidated.clone());
    delivery.mailer.send(&outgoing).await?;
    summary.emails_sent += 1;

    if options.remove_consolidated {
        remove_report(&files.consolidated)?;
        summary.files_deleted += 1;
    }

    Ok(RunOutcome::Completed(summary))
}

fn remove_report(path: &std::path::Path) -> anyhow::Result<()> {
    std::fs::remove_file(path).with_context(|| format!("failed to delete {}", path.display()))?;
    tracing::info!(file = %path.display(), "deleted");
    Ok(())
}
