//! Folding harvested courses into digest rows.
//!
//! One row per course, built from the course's most recent section (the last
//! one inserted into its [`SectionMap`]). Rows keep the order the courses
//! arrived in; nothing here depends on fetch completion order.

use chrono::Local;
use tracing::{debug, instrument};

use crate::harvest::Harvest;
use crate::models::{Course, Report, ReportRow};
use crate::normalize::{normalize_item, normalize_section};

/// Build the digest row for one course.
///
/// Item cells are `"{name}\n{url}\n"` blocks and deadline cells are
/// `"{status}\n\n"` blocks, each list joined by a blank line so that the
/// k-th deadline sits on the same line as the k-th item name.
pub fn report_row(course: &Course, include_deadlines: bool) -> ReportRow {
    let (recent_section, items) = match course.sections.last() {
        Some(section) => {
            let normalized = normalize_section(&section.name);
            if !normalized.is_formatted() {
                debug!(code = %course.code, section = %section.name, "Section name kept verbatim");
            }
            (normalized.into_string(), section.items.as_slice())
        }
        None => (String::new(), &[][..]),
    };

    let descriptions: Vec<String> = items
        .iter()
        .map(|item| format!("{}\n{}\n", normalize_item(&item.name).as_str(), item.url))
        .collect();
    let deadlines = include_deadlines.then(|| {
        items
            .iter()
            .map(|item| format!("{}\n\n", item.status))
            .collect::<Vec<_>>()
            .join("\n")
    });

    ReportRow {
        code: course.code.clone(),
        name: course.name.clone(),
        recent_section,
        items: descriptions.join("\n"),
        deadlines,
    }
}

/// Assemble the full report from a harvest.
#[instrument(level = "info", skip_all, fields(courses = harvest.courses.len()))]
pub fn build_report(harvest: &Harvest, today: Option<String>, include_deadlines: bool) -> Report {
    let rows: Vec<ReportRow> = harvest
        .courses
        .iter()
        .map(|course| report_row(course, include_deadlines))
        .collect();
    debug!(rows = rows.len(), "Built report rows");

    Report {
        generated_at: Local::now().to_rfc3339(),
        today,
        include_deadlines,
        courses_attempted: harvest.attempted,
        courses_dropped: harvest.dropped,
        rows,
    }
}
