use std::collections::BTreeSet;
use std::fmt::Write;

use crate::aggregate::ReportingWindow;
use crate::config::DepartmentMappings;
use crate::models::StudentMonthAggregate;

/// Plain-text overview of what a run would send, grouped by department.
pub fn build_preview(
    window: &ReportingWindow,
    students: &[StudentMonthAggregate],
    mappings: &DepartmentMappings,
    limit: usize,
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Monthly Latecomers Preview");
    let _ = writeln!(
        output,
        "Reporting month {} ({} to {})",
        window.label(),
        window.first_day,
        window.last_day
    );

    for route in mappings.routes() {
        let subset: Vec<&StudentMonthAggregate> = students
            .iter()
            .filter(|student| student.department == route.department)
            .collect();

        let _ = writeln!(output);
        let recipient = route.email.as_deref().unwrap_or("no recipient, file only");
        let _ = writeln!(output, "## {} -> {}", route.department, recipient);

        if subset.is_empty() {
            let _ = writeln!(output, "No qualifying students.");
            continue;
        }

        for student in subset.iter().take(limit) {
            let _ = writeln!(
                output,
                "- {} {} late on {} days: {}",
                student.pin, student.name, student.late_count, student.repeated_dates
            );
        }
        if subset.len() > limit {
            let _ = writeln!(output, "... and {} more", subset.len() - limit);
        }
    }

    let unmapped: BTreeSet<&str> = students
        .iter()
        .map(|student| student.department.as_str())
        .filter(|department| {
            !mappings
                .routes()
                .iter()
                .any(|route| route.department == *department)
        })
        .collect();

    if !unmapped.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Not in DEPT_MAPPINGS (not reported)");
        for department in unmapped {
            let count = students
                .iter()
                .filter(|student| student.department == department)
                .count();
            let _ = writeln!(output, "- {department}: {count} students");
        }
    }

    output
}
