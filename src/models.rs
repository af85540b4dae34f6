use chrono::NaiveDate;

/// A single tardy event as stored in the `latecomers` collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LateRecord {
    pub pin: String,
    pub name: String,
    pub department: String,
    pub date: NaiveDate,
}

/// One student's lateness over the reporting month.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentMonthAggregate {
    pub pin: String,
    pub name: String,
    pub department: String,
    pub late_count: usize,
    pub repeated_dates: String,
}

/// Department name and the address its report goes to. An empty address
/// means the department gets a file but no email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepartmentRoute {
    pub department: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DepartmentReport {
    pub department: String,
    pub path: std::path::PathBuf,
    pub rows: usize,
}

#[derive(Debug, Clone)]
pub struct ReportFiles {
    pub consolidated: std::path::PathBuf,
    pub departments: Vec<DepartmentReport>,
}

impl ReportFiles {
    pub fn for_department(&self, department: &str) -> Option<&DepartmentReport> {
        self.departments
            .iter()
            .find(|report| report.department == department)
    }
}
