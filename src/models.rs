//! Data models for courses, their items and the final digest.
//!
//! This module defines the records that flow through the pipeline:
//! - [`Credentials`]: Login input, consumed by the session client
//! - [`RawItem`]: An activity link exactly as the extractor found it
//! - [`Item`]: A classified activity with its deadline status
//! - [`SectionMap`]: Ordered section name -> items mapping
//! - [`Course`]: One fully extracted course page
//! - [`ReportRow`] / [`Report`]: The aggregated digest

use serde::Serialize;
use std::fmt;
use url::Url;

/// Login input. Dropped as soon as the login protocol finishes.
#[derive(Clone)]
pub struct Credentials {
    pub login_url: Url,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login_url", &self.login_url.as_str())
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Course identity derived from the course page title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseIdentity {
    /// The `<title>` text as found on the page.
    pub title: String,
    /// Second whitespace token of the first title segment.
    pub code: String,
    /// Second and last title segments joined as `"middle - last"`.
    pub name: String,
}

/// An activity link as it appears under a section, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawItem {
    pub name: String,
    pub url: String,
    /// Last whitespace token of the link text (e.g. `"Assignment"`, `"File"`).
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Assignment,
    Other,
}

impl ItemKind {
    pub fn from_label(label: &str) -> Self {
        if label.to_lowercase() == "assignment" {
            ItemKind::Assignment
        } else {
            ItemKind::Other
        }
    }
}

/// Where an item stands with respect to its deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "text", rename_all = "snake_case")]
pub enum DeadlineStatus {
    /// Raw deadline cell text, verbatim.
    Due(String),
    Submitted,
    NotAssignment,
    /// The deadline page could not be fetched or parsed.
    Unresolved,
    /// Deadline resolution was switched off for this run.
    NotChecked,
}

impl fmt::Display for DeadlineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeadlineStatus::Due(text) => f.write_str(text),
            DeadlineStatus::Submitted => f.write_str("SUBMITTED"),
            DeadlineStatus::NotAssignment => f.write_str("NOT an assignment"),
            DeadlineStatus::Unresolved => f.write_str("UNRESOLVED"),
            DeadlineStatus::NotChecked => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Item {
    pub name: String,
    pub url: String,
    pub kind: ItemKind,
    pub status: DeadlineStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Section<T> {
    pub name: String,
    pub items: Vec<T>,
}

/// Section name -> items, iterated in insertion order.
///
/// A section is created when its first item is pushed; pushing to a name that
/// already exists appends to it without moving it. Insertion order therefore
/// equals document order when items are pushed while walking the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SectionMap<T> {
    sections: Vec<Section<T>>,
}

impl<T> Default for SectionMap<T> {
    fn default() -> Self {
        Self {
            sections: Vec::new(),
        }
    }
}

impl<T> SectionMap<T> {
    pub fn push(&mut self, section: &str, item: T) {
        match self.sections.iter_mut().find(|s| s.name == section) {
            Some(existing) => existing.items.push(item),
            None => self.sections.push(Section {
                name: section.to_string(),
                items: vec![item],
            }),
        }
    }

    #[cfg(test)]
    pub fn get(&self, section: &str) -> Option<&[T]> {
        self.sections
            .iter()
            .find(|s| s.name == section)
            .map(|s| s.items.as_slice())
    }

    /// The most recently inserted section.
    pub fn last(&self) -> Option<&Section<T>> {
        self.sections.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Section<T>> {
        self.sections.iter()
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn item_count(&self) -> usize {
        self.iter().map(|s| s.items.len()).sum()
    }

    /// Flatten into `(section name, item)` pairs, preserving order.
    pub fn into_pairs(self) -> impl Iterator<Item = (String, T)> {
        self.sections.into_iter().flat_map(|section| {
            let name = section.name;
            section
                .items
                .into_iter()
                .map(move |item| (name.clone(), item))
        })
    }
}

impl<T> FromIterator<(String, T)> for SectionMap<T> {
    fn from_iter<I: IntoIterator<Item = (String, T)>>(iter: I) -> Self {
        let mut map = SectionMap::default();
        for (section, item) in iter {
            map.push(&section, item);
        }
        map
    }
}

/// A fully processed course page.
#[derive(Debug, Clone, Serialize)]
pub struct Course {
    pub title: String,
    pub code: String,
    pub name: String,
    pub sections: SectionMap<Item>,
}

impl Course {
    pub fn new(identity: CourseIdentity, sections: SectionMap<Item>) -> Self {
        Self {
            title: identity.title,
            code: identity.code,
            name: identity.name,
            sections,
        }
    }

    /// `"[code] middle - last"`.
    pub fn display_name(&self) -> String {
        format!("[{}] {}", self.code, self.name)
    }
}

/// One digest line per course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportRow {
    pub code: String,
    pub name: String,
    pub recent_section: String,
    pub items: String,
    /// `None` when deadline resolution was switched off.
    pub deadlines: Option<String>,
}

/// The aggregated digest handed to the renderers.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    /// Local time the report was assembled, RFC 3339.
    pub generated_at: String,
    /// The dashboard calendar's label for today, if the page had one.
    pub today: Option<String>,
    pub include_deadlines: bool,
    pub courses_attempted: usize,
    pub courses_dropped: usize,
    pub rows: Vec<ReportRow>,
}

impl Report {
    pub fn columns(&self) -> &'static [&'static str] {
        if self.include_deadlines {
            &["ID", "Course Name", "Recent Section", "Section Items", "Deadline"]
        } else {
            &["ID", "Course Name", "Recent Section", "Section Items"]
        }
    }
}
