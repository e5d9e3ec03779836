//! Markdown rendering of the digest.

use itertools::Itertools;

use crate::models::{Report, ReportRow};

/// Make a multi-line value fit in one table cell.
fn cell(text: &str) -> String {
    text.trim_end_matches('\n')
        .replace('|', "\\|")
        .replace('\n', "<br>")
}

fn row_cells(row: &ReportRow) -> Vec<String> {
    let mut cells = vec![
        cell(&row.code),
        cell(&row.name),
        cell(&row.recent_section),
        cell(&row.items),
    ];
    if let Some(deadlines) = &row.deadlines {
        cells.push(cell(deadlines));
    }
    cells
}

/// Render `report` as a heading, a summary line and one table.
pub fn report_to_markdown(report: &Report) -> String {
    let columns = report.columns();
    let mut md = String::from("# Course digest\n\n");

    if let Some(today) = &report.today {
        md.push_str(&format!("_{}_\n\n", today));
    }
    md.push_str(&format!(
        "{} of {} courses extracted ({} dropped), generated {}.\n\n",
        report.rows.len(),
        report.courses_attempted,
        report.courses_dropped,
        report.generated_at
    ));

    md.push_str(&format!("| {} |\n", columns.iter().join(" | ")));
    md.push_str(&format!("|{}|\n", columns.iter().map(|_| "---").join("|")));
    for row in &report.rows {
        md.push_str(&format!("| {} |\n", row_cells(row).iter().join(" | ")));
    }
    md
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(include_deadlines: bool) -> Report {
        Report {
            generated_at: "2024-05-01T08:00:00+07:00".to_string(),
            today: None,
            include_deadlines,
            courses_attempted: 3,
            courses_dropped: 2,
            rows: vec![ReportRow {
                code: "IF101".to_string(),
                name: "Algorithms | Class A".to_string(),
                recent_section: "Pertemuan 2".to_string(),
                items: "Homework\nhttps://lms.test/a/2\n".to_string(),
                deadlines: include_deadlines.then(|| "SUBMITTED\n\n".to_string()),
            }],
        }
    }

    #[test]
    fn test_markdown_with_deadlines() {
        let md = report_to_markdown(&report(true));
        assert!(md.contains("| ID | Course Name | Recent Section | Section Items | Deadline |"));
        assert!(md.contains("|---|---|---|---|---|"));
        assert!(md.contains(
            "| IF101 | Algorithms \\| Class A | Pertemuan 2 | Homework<br>https://lms.test/a/2 | SUBMITTED |"
        ));
        assert!(md.contains("1 of 3 courses extracted (2 dropped)"));
    }

    #[test]
    fn test_markdown_without_deadlines() {
        let md = report_to_markdown(&report(false));
        assert!(md.contains("| ID | Course Name | Recent Section | Section Items |\n"));
        assert!(!md.contains("Deadline"));
    }
}
