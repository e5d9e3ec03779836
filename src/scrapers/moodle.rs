//! Moodle page template extractor.
//!
//! Pure functions from a parsed [`Html`] document to domain records. Every
//! selector here is tied to one fixed Moodle theme; when a page does not
//! match, the function returns an [`ExtractionError`] (or skips the
//! malformed row) and leaves the decision to abort or degrade to the caller.
//!
//! `Html` is not `Send`, so the `parse_*_page` helpers take a body, parse it,
//! extract and drop the document without crossing an `.await`.

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};
use url::Url;

use crate::error::ExtractionError;
use crate::models::{CourseIdentity, DeadlineStatus, RawItem, SectionMap};

const TITLE_CSS: &str = "title";
const LINK_CSS: &str = "a[href]";
const LOGIN_TOKEN_CSS: &str = r#"#login input[name="logintoken"]"#;
const SECTION_CSS: &str = ".content > .sectionname > span > a";
const DEADLINE_CSS: &str =
    ".submissionstatustable > div:nth-child(2) > table > tbody > tr:nth-child(4) > td";
const LOGOUT_CSS: &str = "a.menu-action:nth-child(8)";
const TODAY_CSS: &str = "td.today a";

static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse(TITLE_CSS).unwrap());
static LINK: Lazy<Selector> = Lazy::new(|| Selector::parse(LINK_CSS).unwrap());
static LOGIN_TOKEN: Lazy<Selector> = Lazy::new(|| Selector::parse(LOGIN_TOKEN_CSS).unwrap());
static SECTION: Lazy<Selector> = Lazy::new(|| Selector::parse(SECTION_CSS).unwrap());
static DEADLINE: Lazy<Selector> = Lazy::new(|| Selector::parse(DEADLINE_CSS).unwrap());
static LOGOUT: Lazy<Selector> = Lazy::new(|| Selector::parse(LOGOUT_CSS).unwrap());
static TODAY: Lazy<Selector> = Lazy::new(|| Selector::parse(TODAY_CSS).unwrap());

/// Items of section `index` sit at a fixed depth under `#section-{index}`.
fn item_css(index: usize) -> String {
    format!(
        "#section-{index} > div:nth-child(3) > ul:nth-child(4) > li > div > div > div:nth-child(2) > div > a"
    )
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect()
}

/// Text of the page `<title>`, trimmed.
pub fn page_title(document: &Html) -> Option<String> {
    document
        .select(&TITLE)
        .next()
        .map(|t| text_of(t).trim().to_string())
}

/// The anti-forgery token from the login form.
pub fn extract_login_token(document: &Html) -> Option<String> {
    document
        .select(&LOGIN_TOKEN)
        .next()
        .and_then(|input| input.value().attr("value"))
        .map(str::to_string)
}

/// Every hyperlink whose path contains a `course` segment, in document order.
///
/// Relative links are resolved against `base`. Duplicates are kept.
pub fn extract_course_urls(document: &Html, base: &Url) -> Vec<String> {
    document
        .select(&LINK)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| base.join(href).ok())
        .filter(|url| {
            url.path_segments()
                .is_some_and(|mut segments| segments.any(|s| s == "course"))
        })
        .map(String::from)
        .collect()
}

/// Split a course page title into code and display name.
///
/// `"Course: IF101 Algorithms - Class A - 2024/2025"` gives code `IF101` and
/// name `"Class A - 2024/2025"`.
pub fn extract_course(document: &Html) -> Result<CourseIdentity, ExtractionError> {
    let title = document
        .select(&TITLE)
        .next()
        .map(text_of)
        .ok_or(ExtractionError::MissingTitle)?;
    course_identity(&title)
}

fn course_identity(title: &str) -> Result<CourseIdentity, ExtractionError> {
    let segments: Vec<&str> = title.split('-').map(str::trim).collect();
    if segments.len() < 2 {
        return Err(ExtractionError::TooFewSegments(title.to_string()));
    }
    let code = segments[0]
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| ExtractionError::MissingCourseCode(title.to_string()))?;
    let last = segments[segments.len() - 1];

    Ok(CourseIdentity {
        title: title.to_string(),
        code: code.to_string(),
        name: format!("{} - {}", segments[1], last),
    })
}

/// Section heading texts in document order.
pub fn extract_sections(document: &Html) -> Vec<String> {
    document
        .select(&SECTION)
        .map(|a| text_of(a).trim().to_string())
        .collect()
}

/// Activity links under the section at `section_index`.
///
/// The link text's last token is the activity label, the rest is the name.
/// Links with fewer than two tokens or without an `href` are skipped.
pub fn extract_items(document: &Html, section_index: usize) -> Vec<RawItem> {
    let css = item_css(section_index);
    let selector = match Selector::parse(&css) {
        Ok(s) => s,
        Err(e) => {
            warn!(section_index, error = ?e, "Item selector did not compile");
            return Vec::new();
        }
    };

    document
        .select(&selector)
        .filter_map(|a| {
            let text = text_of(a);
            let tokens: Vec<&str> = text.split_whitespace().collect();
            let href = a.value().attr("href");
            match (tokens.split_last(), href) {
                (Some((label, name)), Some(href)) if !name.is_empty() => Some(RawItem {
                    name: name.join(" "),
                    url: href.to_string(),
                    label: label.to_string(),
                }),
                _ => {
                    debug!(section_index, %text, "Skipping malformed item link");
                    None
                }
            }
        })
        .collect()
}

/// Deadline status from an assignment page's submission table.
///
/// A cell mentioning `submitted` collapses to [`DeadlineStatus::Submitted`];
/// anything else is kept verbatim.
pub fn extract_deadline(document: &Html) -> Result<DeadlineStatus, ExtractionError> {
    let cell = document
        .select(&DEADLINE)
        .next()
        .map(text_of)
        .ok_or(ExtractionError::MissingElement(DEADLINE_CSS))?;

    if cell.contains("submitted") {
        Ok(DeadlineStatus::Submitted)
    } else {
        Ok(DeadlineStatus::Due(cell))
    }
}

/// The logout link from the user menu, resolved against `base`.
pub fn extract_logout_url(document: &Html, base: &Url) -> Option<Url> {
    document
        .select(&LOGOUT)
        .next()
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| base.join(href).ok())
}

/// The dashboard calendar's label for the current day.
pub fn extract_today(document: &Html) -> Option<String> {
    document
        .select(&TODAY)
        .next()
        .and_then(|a| a.value().attr("aria-label"))
        .map(str::to_string)
}

/// A course page reduced to what the orchestrator needs.
#[derive(Debug)]
pub struct ParsedCourse {
    pub identity: CourseIdentity,
    pub items: SectionMap<RawItem>,
}

/// Parse a course page body into its identity and per-section raw items.
pub fn parse_course_page(body: &str) -> Result<ParsedCourse, ExtractionError> {
    let document = Html::parse_document(body);
    let identity = extract_course(&document)?;

    let mut items = SectionMap::default();
    for (index, section) in extract_sections(&document).iter().enumerate() {
        for item in extract_items(&document, index) {
            items.push(section, item);
        }
    }

    Ok(ParsedCourse { identity, items })
}

/// Parse an assignment page body into its deadline status.
pub fn parse_deadline_page(body: &str) -> Result<DeadlineStatus, ExtractionError> {
    extract_deadline(&Html::parse_document(body))
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Minimal pages shaped like the Moodle theme the selectors target.

    fn item_block(index: usize, section: &str, links: &[(&str, &str)]) -> String {
        let anchors: String = links
            .iter()
            .map(|(text, href)| {
                format!(
                    r#"<li><div><div><div>icon</div><div><div><a href="{href}">{text}</a></div></div></div></div></li>"#
                )
            })
            .collect();
        format!(
            r##"<li id="section-{index}">
                 <div class="left"></div>
                 <div class="right"></div>
                 <div class="content">
                   <h3 class="sectionname"><span><a href="#s{index}">{section}</a></span></h3>
                   <div class="summary"></div>
                   <p>spacer</p>
                   <ul class="section">{anchors}</ul>
                 </div>
               </li>"##
        )
    }

    pub fn course_page(title: &str, sections: &[(&str, Vec<(&str, &str)>)]) -> String {
        let body: String = sections
            .iter()
            .enumerate()
            .map(|(i, (name, links))| item_block(i, name, links))
            .collect();
        format!(
            "<html><head><title>{title}</title></head><body><ul class=\"topics\">{body}</ul></body></html>"
        )
    }

    pub fn deadline_page(cell: &str) -> String {
        format!(
            r#"<html><body><div class="submissionstatustable">
                 <h3>Submission status</h3>
                 <div class="box"><table><tbody>
                   <tr><th>Attempt</th><td>1</td></tr>
                   <tr><th>Status</th><td>x</td></tr>
                   <tr><th>Grading</th><td>Not graded</td></tr>
                   <tr><th>Due date</th><td>{cell}</td></tr>
                 </tbody></table></div>
               </div></body></html>"#
        )
    }
}
