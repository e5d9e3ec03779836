//! Error taxonomy for the digest run.
//!
//! Only [`ScrapeError`] ever reaches `main`. The narrower types are recovered
//! close to where they happen:
//!
//! | Type | Raised by | Recovery |
//! |------|-----------|----------|
//! | [`FetchError`] | any single request | connectivity aborts, the rest degrade |
//! | [`ProtocolError`] | login/logout protocol | fatal before any course fetch |
//! | [`ExtractionError`] | course/deadline markup | drop the course or degrade the item |
//! | [`ItemResolutionError`] | deadline lookup | item status becomes unresolved |

use reqwest::StatusCode;
use thiserror::Error;

use crate::session::SessionState;

/// A single HTTP request failed.
#[derive(Debug, Error)]
pub enum FetchError {
    /// DNS failure, refused connection or connect timeout.
    #[error("could not reach {url}: {source}")]
    Connectivity {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request limiter closed")]
    LimiterClosed,
}

impl FetchError {
    /// Classify a reqwest failure for `url`.
    pub fn from_reqwest(url: impl Into<String>, source: reqwest::Error) -> Self {
        let url = url.into();
        if source.is_connect() {
            FetchError::Connectivity { url, source }
        } else {
            FetchError::Request { url, source }
        }
    }

    pub fn is_connectivity(&self) -> bool {
        matches!(self, FetchError::Connectivity { .. })
    }
}

/// The login/logout conversation with the portal went wrong.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("session is {actual:?}, expected {expected:?}")]
    InvalidState {
        expected: SessionState,
        actual: SessionState,
    },

    #[error("login form has no logintoken field")]
    MissingLoginToken,

    #[error("server did not issue a MoodleSession cookie")]
    MissingSessionCookie,

    #[error("session cookie is not a valid header value")]
    InvalidCookie,

    #[error("login rejected (HTTP {status}, page title {title:?})")]
    LoginRejected {
        status: StatusCode,
        title: Option<String>,
    },

    #[error("too many redirects starting at {url}")]
    TooManyRedirects { url: String },

    #[error("redirect to unparseable location {location:?}")]
    BadRedirect { location: String },

    #[error("landing page returned HTTP {status}")]
    LandingPage { status: StatusCode },

    #[error(transparent)]
    Request(FetchError),
}

/// Markup did not match the page template.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("page has no <title>")]
    MissingTitle,

    #[error("course title {0:?} has fewer than two '-' separated segments")]
    TooFewSegments(String),

    #[error("course title {0:?} has no course code token")]
    MissingCourseCode(String),

    #[error("no element matches `{0}`")]
    MissingElement(&'static str),
}

/// Resolving one assignment's deadline failed.
#[derive(Debug, Error)]
pub enum ItemResolutionError {
    #[error(transparent)]
    Fetch(FetchError),

    #[error("item page returned HTTP {0}")]
    Status(StatusCode),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),
}

/// Fatal errors that end the run.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("connection failed: {0}")]
    Connectivity(#[source] FetchError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("interrupted")]
    Interrupted,

    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),

    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<FetchError> for ScrapeError {
    fn from(e: FetchError) -> Self {
        if e.is_connectivity() {
            ScrapeError::Connectivity(e)
        } else {
            ScrapeError::Protocol(ProtocolError::Request(e))
        }
    }
}

impl ScrapeError {
    /// Lines shown to the user before the process exits.
    pub fn user_messages(&self) -> Vec<String> {
        match self {
            ScrapeError::Connectivity(_) => vec![
                "A connection error occurred! It might be your slow bandwidth.".to_string(),
                "Fix your connection and try again!".to_string(),
            ],
            ScrapeError::Interrupted => vec!["Program was interrupted!".to_string()],
            other => vec![other.to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_message() {
        assert_eq!(
            ScrapeError::Interrupted.user_messages(),
            vec!["Program was interrupted!".to_string()]
        );
    }

    #[test]
    fn test_protocol_message_carries_status() {
        let err = ScrapeError::from(ProtocolError::LoginRejected {
            status: StatusCode::OK,
            title: Some("Log in to the site".to_string()),
        });
        let lines = err.user_messages();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("200"));
        assert!(lines[0].contains("Log in to the site"));
    }

    #[test]
    fn test_extraction_error_display() {
        let e = ExtractionError::TooFewSegments("Dashboard".to_string());
        assert_eq!(
            e.to_string(),
            "course title \"Dashboard\" has fewer than two '-' separated segments"
        );
    }
}
