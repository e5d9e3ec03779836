//! Concurrent course and deadline fetching.
//!
//! [`Harvester`] runs every request through one [`BoundedSource`], so the
//! course-level fan-out and each course's nested deadline fan-out share a
//! single ceiling of [`MAX_IN_FLIGHT`] requests.
//!
//! # Failure policy
//!
//! - Connectivity failures abort the whole harvest.
//! - A course whose page fails, returns a non-success status or does not
//!   match the template is dropped; its siblings carry on.
//! - An assignment whose deadline page fails keeps its place in the course
//!   with [`DeadlineStatus::Unresolved`].

use futures::stream::{self, StreamExt, TryStreamExt};
use itertools::Itertools;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::error::{ItemResolutionError, ProtocolError, ScrapeError};
use crate::fetch::{BoundedSource, PageSource};
use crate::models::{Course, DeadlineStatus, Item, ItemKind, RawItem, SectionMap};
use crate::scrapers::moodle;
use crate::session::LandingPage;

/// Hard ceiling on requests in flight at any instant, across all levels.
pub const MAX_IN_FLIGHT: usize = 50;

/// Result of URL discovery on the landing page.
#[derive(Debug, Clone)]
pub struct Discovery {
    pub landing: LandingPage,
    pub course_urls: Vec<String>,
    pub today: Option<String>,
}

/// Courses that made it through, plus how many did not.
#[derive(Debug, Clone)]
pub struct Harvest {
    /// In completion order, not discovery order.
    pub courses: Vec<Course>,
    pub attempted: usize,
    pub dropped: usize,
}

#[derive(Debug)]
pub struct Harvester<S> {
    source: BoundedSource<S>,
    resolve_deadlines: bool,
}

impl<S> Harvester<S>
where
    S: PageSource,
{
    pub fn new(source: S, resolve_deadlines: bool) -> Self {
        Self {
            source: BoundedSource::new(source, MAX_IN_FLIGHT),
            resolve_deadlines,
        }
    }

    #[cfg(test)]
    pub fn source(&self) -> &S {
        self.source.inner()
    }

    /// Fetch the landing page once and collect the course links on it.
    #[instrument(level = "info", skip(self), fields(url = %landing_url))]
    pub async fn discover(&self, landing_url: &Url) -> Result<Discovery, ScrapeError> {
        let page = self.source.get(landing_url.as_str()).await?;
        if !page.status.is_success() {
            return Err(ProtocolError::LandingPage {
                status: page.status,
            }
            .into());
        }

        let landing = LandingPage {
            url: landing_url.clone(),
            body: page.body,
        };
        let course_urls = landing.course_urls();
        let today = landing.today();

        let duplicates = course_urls.iter().duplicates().count();
        info!(
            count = course_urls.len(),
            duplicates,
            today = today.as_deref().unwrap_or("-"),
            "Discovered course URLs"
        );
        debug!(urls = ?course_urls, "Course URLs");

        Ok(Discovery {
            landing,
            course_urls,
            today,
        })
    }

    /// Fetch and extract every course in `urls` concurrently.
    #[instrument(level = "info", skip_all, fields(count = urls.len()))]
    pub async fn fetch_all_courses(&self, urls: Vec<String>) -> Result<Harvest, ScrapeError> {
        let attempted = urls.len();
        debug!(limit = self.source.limit(), "Fetching courses");
        let outcomes: Vec<Option<Course>> = stream::iter(urls)
            .map(|url| async move { self.fetch_course(&url).await })
            .buffer_unordered(MAX_IN_FLIGHT)
            .try_collect()
            .await?;

        let courses: Vec<Course> = outcomes.into_iter().flatten().collect();
        let dropped = attempted - courses.len();
        info!(
            attempted,
            extracted = courses.len(),
            dropped,
            "Completed course harvest"
        );

        Ok(Harvest {
            courses,
            attempted,
            dropped,
        })
    }

    /// `Ok(None)` means the course was dropped.
    #[instrument(level = "info", skip(self))]
    async fn fetch_course(&self, url: &str) -> Result<Option<Course>, ScrapeError> {
        let page = match self.source.get(url).await {
            Ok(page) => page,
            Err(e) if e.is_connectivity() => return Err(ScrapeError::Connectivity(e)),
            Err(e) => {
                warn!(error = %e, "Course fetch failed; dropping course");
                return Ok(None);
            }
        };
        if !page.status.is_success() {
            warn!(status = %page.status, "Course page not available; dropping course");
            return Ok(None);
        }

        let parsed = match moodle::parse_course_page(&page.body) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "Course page did not match template; dropping course");
                return Ok(None);
            }
        };

        let raw_count = parsed.items.item_count();
        let sections: SectionMap<Item> = stream::iter(parsed.items.into_pairs())
            .map(|(section, raw)| async move {
                let item = self.resolve_item(raw).await?;
                Ok::<_, ScrapeError>((section, item))
            })
            .buffered(MAX_IN_FLIGHT)
            .try_collect::<Vec<_>>()
            .await?
            .into_iter()
            .collect();

        let course = Course::new(parsed.identity, sections);
        if course.sections.is_empty() {
            debug!(course = %course.display_name(), "Course has no items in any section");
        }
        info!(
            course = %course.display_name(),
            sections = course.sections.len(),
            items = raw_count,
            "Extracted course"
        );
        Ok(Some(course))
    }

    async fn resolve_item(&self, raw: RawItem) -> Result<Item, ScrapeError> {
        let kind = ItemKind::from_label(&raw.label);
        let status = match kind {
            ItemKind::Other => DeadlineStatus::NotAssignment,
            ItemKind::Assignment if !self.resolve_deadlines => DeadlineStatus::NotChecked,
            ItemKind::Assignment => match self.fetch_deadline(&raw.url).await {
                Ok(status) => status,
                Err(ItemResolutionError::Fetch(e)) if e.is_connectivity() => {
                    return Err(ScrapeError::Connectivity(e));
                }
                Err(e) => {
                    warn!(item = %raw.name, url = %raw.url, error = %e, "Deadline unresolved");
                    DeadlineStatus::Unresolved
                }
            },
        };
        debug!(item = %raw.name, ?kind, %status, "Resolved item");

        Ok(Item {
            name: raw.name,
            url: raw.url,
            kind,
            status,
        })
    }

    async fn fetch_deadline(&self, url: &str) -> Result<DeadlineStatus, ItemResolutionError> {
        let page = self
            .source
            .get(url)
            .await
            .map_err(ItemResolutionError::Fetch)?;
        if !page.status.is_success() {
            return Err(ItemResolutionError::Status(page.status));
        }
        Ok(moodle::parse_deadline_page(&page.body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::fetch::Page;
    use crate::scrapers::moodle::fixtures::{course_page, deadline_page};
    use reqwest::StatusCode;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Clone, Copy)]
    enum Failure {
        /// Nothing listens on the other end.
        Unreachable,
        /// The request never forms a valid URL.
        Malformed,
    }

    impl Failure {
        async fn error(self, url: &str) -> FetchError {
            let target = match self {
                Failure::Unreachable => "http://127.0.0.1:1/",
                Failure::Malformed => "not a url",
            };
            let source = reqwest::get(target).await.unwrap_err();
            FetchError::from_reqwest(url, source)
        }
    }

    /// In-memory portal that records every request and the peak concurrency.
    #[derive(Default)]
    struct FakePortal {
        pages: HashMap<String, (StatusCode, String)>,
        failures: HashMap<String, Failure>,
        requests: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl FakePortal {
        fn page(mut self, url: &str, status: StatusCode, body: String) -> Self {
            self.pages.insert(url.to_string(), (status, body));
            self
        }

        fn failing(mut self, url: &str, failure: Failure) -> Self {
            self.failures.insert(url.to_string(), failure);
            self
        }

        fn requested(&self, url: &str) -> usize {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter(|u| u.as_str() == url)
                .count()
        }

        fn peak(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }
    }

    impl PageSource for FakePortal {
        async fn get(&self, url: &str) -> Result<Page, FetchError> {
            self.requests.lock().unwrap().push(url.to_string());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(1)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if let Some(failure) = self.failures.get(url) {
                return Err(failure.error(url).await);
            }
            let (status, body) = self
                .pages
                .get(url)
                .cloned()
                .unwrap_or((StatusCode::NOT_FOUND, String::new()));
            Ok(Page {
                url: url.to_string(),
                status,
                body,
            })
        }
    }

    fn three_item_course() -> String {
        course_page(
            "Course: IF101 Algo - Algorithms - Class A",
            &[
                ("General", vec![("Announcements Forum", "https://lms.test/f/1")]),
                (
                    "1. Sorting",
                    vec![
                        ("Homework 1 Assignment", "https://lms.test/a/1"),
                        ("Weekly check Quiz", "https://lms.test/q/1"),
                        ("Homework 2 Assignment", "https://lms.test/a/2"),
                    ],
                ),
            ],
        )
    }

    #[tokio::test]
    async fn test_only_assignments_fetch_deadlines() {
        let portal = FakePortal::default()
            .page("https://lms.test/c/1", StatusCode::OK, three_item_course())
            .page(
                "https://lms.test/a/1",
                StatusCode::OK,
                deadline_page("Status: submitted on time"),
            )
            .page(
                "https://lms.test/a/2",
                StatusCode::OK,
                deadline_page("Due: 5 May 2024"),
            );
        let harvester = Harvester::new(portal, true);

        let harvest = harvester
            .fetch_all_courses(vec!["https://lms.test/c/1".to_string()])
            .await
            .unwrap();
        assert_eq!(harvest.courses.len(), 1);

        let portal = harvester.source();
        assert_eq!(portal.requested("https://lms.test/a/1"), 1);
        assert_eq!(portal.requested("https://lms.test/a/2"), 1);
        assert_eq!(portal.requested("https://lms.test/q/1"), 0);
        assert_eq!(portal.requested("https://lms.test/f/1"), 0);

        let course = &harvest.courses[0];
        let items = course.sections.get("1. Sorting").unwrap();
        let statuses: Vec<String> = items.iter().map(|i| i.status.to_string()).collect();
        assert_eq!(
            statuses,
            vec!["SUBMITTED", "NOT an assignment", "Due: 5 May 2024"]
        );
        assert_eq!(items[1].kind, ItemKind::Other);
        assert_eq!(
            course.sections.last().map(|s| s.name.as_str()),
            Some("1. Sorting")
        );
    }

    #[tokio::test]
    async fn test_deadline_failures_degrade_items() {
        let portal = FakePortal::default()
            .page("https://lms.test/c/1", StatusCode::OK, three_item_course())
            .page(
                "https://lms.test/a/1",
                StatusCode::OK,
                "<html><body>no table</body></html>".to_string(),
            )
            .page(
                "https://lms.test/a/2",
                StatusCode::INTERNAL_SERVER_ERROR,
                String::new(),
            );
        let harvester = Harvester::new(portal, true);

        let harvest = harvester
            .fetch_all_courses(vec!["https://lms.test/c/1".to_string()])
            .await
            .unwrap();
        assert_eq!(harvest.dropped, 0);

        let items = harvest.courses[0].sections.get("1. Sorting").unwrap();
        assert_eq!(items[0].status, DeadlineStatus::Unresolved);
        assert_eq!(items[2].status, DeadlineStatus::Unresolved);
        assert_eq!(items[0].kind, ItemKind::Assignment);
    }

    #[tokio::test]
    async fn test_unreachable_course_aborts_harvest() {
        let portal = FakePortal::default()
            .page("https://lms.test/c/1", StatusCode::OK, three_item_course())
            .failing("https://lms.test/c/dead", Failure::Unreachable);
        let harvester = Harvester::new(portal, false);

        let err = harvester
            .fetch_all_courses(vec![
                "https://lms.test/c/1".to_string(),
                "https://lms.test/c/dead".to_string(),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::Connectivity(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_unreachable_assignment_aborts_harvest() {
        let portal = FakePortal::default()
            .page("https://lms.test/c/1", StatusCode::OK, three_item_course())
            .page(
                "https://lms.test/a/1",
                StatusCode::OK,
                deadline_page("Due: 5 May 2024"),
            )
            .failing("https://lms.test/a/2", Failure::Unreachable);
        let harvester = Harvester::new(portal, true);

        let err = harvester
            .fetch_all_courses(vec!["https://lms.test/c/1".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::Connectivity(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_request_errors_drop_or_degrade() {
        let portal = FakePortal::default()
            .page("https://lms.test/c/1", StatusCode::OK, three_item_course())
            .page(
                "https://lms.test/a/1",
                StatusCode::OK,
                deadline_page("Due: 5 May 2024"),
            )
            .failing("https://lms.test/a/2", Failure::Malformed)
            .failing("https://lms.test/c/broken", Failure::Malformed);
        let harvester = Harvester::new(portal, true);

        let harvest = harvester
            .fetch_all_courses(vec![
                "https://lms.test/c/1".to_string(),
                "https://lms.test/c/broken".to_string(),
            ])
            .await
            .unwrap();
        assert_eq!(harvest.attempted, 2);
        assert_eq!(harvest.dropped, 1);
        assert_eq!(harvest.courses[0].code, "IF101");

        let items = harvest.courses[0].sections.get("1. Sorting").unwrap();
        assert_eq!(items[0].status, DeadlineStatus::Due("Due: 5 May 2024".to_string()));
        assert_eq!(items[2].status, DeadlineStatus::Unresolved);
    }

    #[tokio::test]
    async fn test_deadlines_can_be_skipped() {
        let portal =
            FakePortal::default().page("https://lms.test/c/1", StatusCode::OK, three_item_course());
        let harvester = Harvester::new(portal, false);

        let harvest = harvester
            .fetch_all_courses(vec!["https://lms.test/c/1".to_string()])
            .await
            .unwrap();
        assert_eq!(harvester.source().requested("https://lms.test/a/1"), 0);

        let items = harvest.courses[0].sections.get("1. Sorting").unwrap();
        assert_eq!(items[0].status, DeadlineStatus::NotChecked);
        assert_eq!(items[1].status, DeadlineStatus::NotAssignment);
    }

    #[tokio::test]
    async fn test_failed_courses_are_dropped() {
        let mut portal = FakePortal::default();
        let mut urls = Vec::new();
        for i in 0..10 {
            let url = format!("https://lms.test/c/{i}");
            let status = if i % 3 == 0 {
                StatusCode::FORBIDDEN
            } else {
                StatusCode::OK
            };
            let body = course_page(
                &format!("Course: C{i} x - Course {i} - Term"),
                &[("1. Start", vec![("Notes File", "https://lms.test/r/1")])],
            );
            portal = portal.page(&url, status, body);
            urls.push(url);
        }
        // A page that is reachable but is not a course page.
        portal = portal.page(
            "https://lms.test/course/index.php",
            StatusCode::OK,
            "<html><head><title>Courses</title></head></html>".to_string(),
        );
        urls.push("https://lms.test/course/index.php".to_string());

        let harvester = Harvester::new(portal, true);
        let harvest = harvester.fetch_all_courses(urls).await.unwrap();

        assert_eq!(harvest.attempted, 11);
        assert_eq!(harvest.courses.len(), 6);
        assert_eq!(harvest.dropped, 5);
        let mut codes: Vec<&str> = harvest.courses.iter().map(|c| c.code.as_str()).collect();
        codes.sort();
        assert_eq!(codes, vec!["C1", "C2", "C4", "C5", "C7", "C8"]);
    }

    #[tokio::test]
    async fn test_in_flight_requests_never_exceed_cap() {
        let mut portal = FakePortal::default();
        let mut urls = Vec::new();
        for c in 0..120 {
            let url = format!("https://lms.test/c/{c}");
            let links: Vec<(String, String)> = (0..4)
                .map(|a| {
                    let item_url = format!("https://lms.test/a/{c}/{a}");
                    (format!("Task {a} Assignment"), item_url)
                })
                .collect();
            for (_, item_url) in &links {
                portal = portal.page(item_url, StatusCode::OK, deadline_page("Due: soon"));
            }
            let borrowed: Vec<(&str, &str)> = links
                .iter()
                .map(|(t, u)| (t.as_str(), u.as_str()))
                .collect();
            let body = course_page(
                &format!("Course: K{c} x - Course {c} - Term"),
                &[("1. Start", borrowed)],
            );
            portal = portal.page(&url, StatusCode::OK, body);
            urls.push(url);
        }

        let harvester = Harvester::new(portal, true);
        let harvest = harvester.fetch_all_courses(urls).await.unwrap();

        assert_eq!(harvest.courses.len(), 120);
        let peak = harvester.source().peak();
        assert!(peak <= MAX_IN_FLIGHT, "peak {peak} exceeded cap");
        assert!(peak > 1, "requests were never concurrent");
        assert_eq!(harvester.source().requests.lock().unwrap().len(), 120 * 5);
    }

    #[tokio::test]
    async fn test_discover_reads_landing_page() {
        let landing = r#"<html><head><title>Dashboard</title></head><body>
            <a href="/course/view.php?id=1">A</a><a href="/user/profile.php">me</a>
            <a href="/course/view.php?id=2">B</a></body></html>"#;
        let portal =
            FakePortal::default().page("https://lms.test/my/", StatusCode::OK, landing.to_string());
        let harvester = Harvester::new(portal, true);

        let discovery = harvester
            .discover(&Url::parse("https://lms.test/my/").unwrap())
            .await
            .unwrap();
        assert_eq!(
            discovery.course_urls,
            vec![
                "https://lms.test/course/view.php?id=1",
                "https://lms.test/course/view.php?id=2",
            ]
        );
        assert_eq!(discovery.today, None);
        assert_eq!(harvester.source().requested("https://lms.test/my/"), 1);
    }

    #[tokio::test]
    async fn test_discover_rejects_failed_landing_page() {
        let harvester = Harvester::new(FakePortal::default(), true);
        let err = harvester
            .discover(&Url::parse("https://lms.test/my/").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ScrapeError::Protocol(ProtocolError::LandingPage { .. })
        ));
    }
}
