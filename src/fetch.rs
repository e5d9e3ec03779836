//! Page fetching abstraction with a hard cap on in-flight requests.
//!
//! # Architecture
//!
//! - [`PageSource`]: Core trait, "GET this URL and hand me the body"
//! - [`BoundedSource`]: Decorator that admits at most `limit` concurrent
//!   requests into any [`PageSource`]
//!
//! The authenticated session snapshot implements [`PageSource`]; the
//! orchestrator only ever sees it through [`BoundedSource`], so every request
//! it issues, course page or nested deadline page, competes for the same
//! permits.

use reqwest::StatusCode;
use std::fmt;
use tokio::sync::Semaphore;
use tracing::{debug, instrument};

use crate::error::FetchError;

/// A fully read HTTP response.
#[derive(Debug, Clone)]
pub struct Page {
    /// Final URL after redirects.
    pub url: String,
    pub status: StatusCode,
    pub body: String,
}

/// Anything that can GET a page.
pub trait PageSource {
    /// Issue a GET for `url` and read the whole body.
    ///
    /// A non-success status is not an error; callers inspect [`Page::status`].
    async fn get(&self, url: &str) -> Result<Page, FetchError>;
}

/// Admits at most `limit` requests into `inner` at any instant.
///
/// A permit is held from request issuance until the body has been read, and
/// released before the caller parses it. Callers never hold a permit while
/// waiting on another request, so nested fan-out cannot deadlock.
pub struct BoundedSource<S> {
    inner: S,
    permits: Semaphore,
    limit: usize,
}

impl<S> BoundedSource<S> {
    pub fn new(inner: S, limit: usize) -> Self {
        Self {
            inner,
            permits: Semaphore::new(limit),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    #[cfg(test)]
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S> fmt::Debug for BoundedSource<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedSource")
            .field("limit", &self.limit)
            .field("available", &self.permits.available_permits())
            .finish()
    }
}

impl<S> PageSource for BoundedSource<S>
where
    S: PageSource,
{
    #[instrument(level = "debug", skip(self))]
    async fn get(&self, url: &str) -> Result<Page, FetchError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| FetchError::LimiterClosed)?;
        let page = self.inner.get(url).await?;
        debug!(status = %page.status, bytes = page.body.len(), "Fetched page");
        Ok(page)
    }
}
