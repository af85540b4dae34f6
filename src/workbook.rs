use std::path::Path;

use anyhow::Context;
use rust_xlsxwriter::{Format, Workbook, Worksheet};

use crate::aggregate::ReportingWindow;
use crate::config::DepartmentMappings;
use crate::models::{DepartmentReport, ReportFiles, StudentMonthAggregate};

pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

const COLUMNS: [&str; 5] = ["pin", "name", "department", "late_count", "repeated_dates"];

pub fn consolidated_file_name(window: &ReportingWindow) -> String {
    format!("Monthly_Latecomers_{}.xlsx", window.label())
}

pub fn department_file_name(department: &str, window: &ReportingWindow) -> String {
    format!("{department}_monthly_latecomers_{}.xlsx", window.label())
}

/// Department names become both a sheet name and part of a file name, so
/// they must satisfy Excel's sheet rules and stay inside the output directory.
pub fn check_department_name(department: &str) -> anyhow::Result<()> {
    if department.is_empty() || department.chars().count() > 31 {
        anyhow::bail!("department '{department}' must be 1 to 31 characters long");
    }
    if department.contains("..") {
        anyhow::bail!("department '{department}' must not contain '..'");
    }
    if let Some(bad) = department
        .chars()
        .find(|c| matches!(c, '/' | '\\' | '[' | ']' | ':' | '*' | '?') || c.is_control())
    {
        anyhow::bail!("department '{department}' contains forbidden character {bad:?}");
    }
    if department.starts_with('\'') || department.ends_with('\'') {
        anyhow::bail!("department '{department}' must not start or end with an apostrophe");
    }
    Ok(())
}

fn fill_sheet(
    worksheet: &mut Worksheet,
    department: &str,
    students: &[&StudentMonthAggregate],
) -> anyhow::Result<()> {
    let header = Format::new().set_bold();

    worksheet
        .set_name(department)
        .with_context(|| format!("'{department}' is not a valid sheet name"))?;

    for (col, title) in (0u16..).zip(COLUMNS) {
        worksheet.write_string_with_format(0, col, title, &header)?;
    }

    for (row, student) in (1u32..).zip(students) {
        worksheet.write_string(row, 0, &student.pin)?;
        worksheet.write_string(row, 1, &student.name)?;
        worksheet.write_string(row, 2, &student.department)?;
        worksheet.write_number(row, 3, student.late_count as f64)?;
        worksheet.write_string(row, 4, &student.repeated_dates)?;
    }

    worksheet.autofit();
    Ok(())
}

/// Writes the consolidated workbook plus one workbook per mapped department
/// that has qualifying students. Unmapped departments are left out entirely.
pub fn write_reports(
    students: &[StudentMonthAggregate],
    mappings: &DepartmentMappings,
    window: &ReportingWindow,
    out_dir: &Path,
) -> anyhow::Result<ReportFiles> {
    let mut qualifying: Vec<(&str, Vec<&StudentMonthAggregate>)> = Vec::new();
    for route in mappings.routes() {
        let subset: Vec<&StudentMonthAggregate> = students
            .iter()
            .filter(|student| student.department == route.department)
            .collect();
        if subset.is_empty() {
            tracing::debug!(department = %route.department, "no qualifying students");
            continue;
        }
        check_department_name(&route.department)?;
        qualifying.push((route.department.as_str(), subset));
    }

    let consolidated_path = out_dir.join(consolidated_file_name(window));
    let mut consolidated = Workbook::new();
    let mut departments = Vec::new();

    for (department, subset) in qualifying {
        fill_sheet(consolidated.add_worksheet(), department, &subset)?;

        let path = out_dir.join(department_file_name(department, window));
        let mut workbook = Workbook::new();
        fill_sheet(workbook.add_worksheet(), department, &subset)?;
        workbook
            .save(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        tracing::info!(file = %path.display(), rows = subset.len(), "saved department report");

        departments.push(DepartmentReport {
            department: department.to_string(),
            path,
            rows: subset.len(),
        });
    }

    if departments.is_empty() {
        tracing::warn!("no mapped department has qualifying students; consolidated report is empty");
        consolidated.add_worksheet();
    }

    consolidated
        .save(&consolidated_path)
        .with_context(|| format!("failed to write {}", consolidated_path.display()))?;
    tracing::info!(file = %consolidated_path.display(), "consolidated report saved");

    Ok(ReportFiles {
        consolidated: consolidated_path,
        departments,
    })
}

/// Every sheet in a written workbook as `(name, rows)`, cells rendered as text.
#[cfg(test)]
pub(crate) fn read_sheets(path: &Path) -> Vec<(String, Vec<Vec<String>>)> {
    use calamine::{open_workbook, Reader, Xlsx};

    let mut workbook: Xlsx<_> = open_workbook(path).expect("workbook opens");
    workbook
        .sheet_names()
        .into_iter()
        .map(|name| {
            let range = workbook.worksheet_range(&name).expect("sheet reads");
            let rows = range
                .rows()
                .map(|row| row.iter().map(|cell| cell.to_string()).collect())
                .collect();
            (name, rows)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DepartmentRoute;
    use chrono::NaiveDate;

    fn window() -> ReportingWindow {
        ReportingWindow::previous_month(NaiveDate::from_ymd_opt(2024, 7, 15).unwrap())
    }

    fn student(pin: &str, department: &str) -> StudentMonthAggregate {
        StudentMonthAggregate {
            pin: pin.to_string(),
            name: format!("Student {pin}"),
            department: department.to_string(),
            late_count: 5,
            repeated_dates: "03/06/24, 10/06/24, 17/06/24, 24/06/24, 30/06/24".to_string(),
        }
    }

    fn route(department: &str, email: Option<&str>) -> DepartmentRoute {
        DepartmentRoute {
            department: department.to_string(),
            email: email.map(str::to_string),
        }
    }

    #[test]
    fn file_names_embed_reporting_month() {
        assert_eq!(
            consolidated_file_name(&window()),
            "Monthly_Latecomers_June-2024.xlsx"
        );
        assert_eq!(
            department_file_name("engineering", &window()),
            "engineering_monthly_latecomers_June-2024.xlsx"
        );
    }

    #[test]
    fn writes_only_mapped_departments_with_students() {
        let dir = tempfile::tempdir().unwrap();
        let students = vec![student("P001", "CS"), student("P002", "CS"), student("P003", "ME")];
        let mappings = DepartmentMappings::new(vec![
            route("CS", Some("cs@example.com")),
            route("EE", Some("ee@example.com")),
        ]);

        let files = write_reports(&students, &mappings, &window(), dir.path()).unwrap();

        assert!(files.consolidated.exists());
        assert_eq!(files.departments.len(), 1);
        let cs = files.for_department("CS").unwrap();
        assert_eq!(cs.rows, 2);
        assert!(cs.path.ends_with("CS_monthly_latecomers_June-2024.xlsx"));
        assert!(cs.path.exists());
        assert!(!dir
            .path()
            .join("EE_monthly_latecomers_June-2024.xlsx")
            .exists());
        assert!(!dir
            .path()
            .join("ME_monthly_latecomers_June-2024.xlsx")
            .exists());
    }

    #[test]
    fn consolidated_report_is_written_when_nothing_maps() {
        let dir = tempfile::tempdir().unwrap();
        let students = vec![student("P001", "ME")];
        let mappings = DepartmentMappings::new(vec![route("CS", Some("cs@example.com"))]);

        let files = write_reports(&students, &mappings, &window(), dir.path()).unwrap();

        assert!(files.departments.is_empty());
        assert!(files.consolidated.exists());
    }

    #[test]
    fn invalid_sheet_name_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let students = vec![student("P001", "R[&]D")];
        let mappings = DepartmentMappings::new(vec![route("R[&]D", None)]);

        assert!(write_reports(&students, &mappings, &window(), dir.path()).is_err());
    }

    #[test]
    fn sheets_hold_header_and_student_rows() {
        let dir = tempfile::tempdir().unwrap();
        let students = vec![student("P001", "CS"), student("P002", "EE")];
        let mappings = DepartmentMappings::new(vec![
            route("EE", Some("ee@example.com")),
            route("CS", Some("cs@example.com")),
        ]);

        let files = write_reports(&students, &mappings, &window(), dir.path()).unwrap();

        let consolidated = read_sheets(&files.consolidated);
        let names: Vec<&str> = consolidated.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["EE", "CS"]);
        let (_, cs_rows) = &consolidated[1];
        assert_eq!(
            cs_rows,
            &vec![
                vec!["pin", "name", "department", "late_count", "repeated_dates"],
                vec![
                    "P001",
                    "Student P001",
                    "CS",
                    "5",
                    "03/06/24, 10/06/24, 17/06/24, 24/06/24, 30/06/24"
                ],
            ]
        );

        let department = read_sheets(&files.for_department("CS").unwrap().path);
        assert_eq!(department.len(), 1);
        assert_eq!(department[0].0, "CS");
        assert_eq!(&department[0].1, cs_rows);
    }

    #[test]
    fn path_like_department_writes_nothing() {
        let root = tempfile::tempdir().unwrap();
        let out_dir = root.path().join("reports");
        std::fs::create_dir(&out_dir).unwrap();

        for department in ["../CS", "CS/AI", "..", ""] {
            let students = vec![student("P001", department)];
            let mappings = DepartmentMappings::new(vec![route(department, None)]);

            assert!(write_reports(&students, &mappings, &window(), &out_dir).is_err());
        }

        assert_eq!(std::fs::read_dir(&out_dir).unwrap().count(), 0);
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 1);
    }

    #[test]
    fn department_names_follow_sheet_rules() {
        assert!(check_department_name("Computer Science").is_ok());
        assert!(check_department_name("CS ").is_ok());
        assert!(check_department_name("a-very-long-department-name-over-31").is_err());
        assert!(check_department_name("'CS").is_err());
        assert!(check_department_name("R&D?").is_err());
        assert!(check_department_name(r"CS\AI").is_err());
    }
}
