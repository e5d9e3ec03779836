//! Authenticated session lifecycle against the portal.
//!
//! [`SessionClient`] walks the login protocol one step at a time:
//!
//! ```text
//! Anonymous --begin_login--> TokenObtained --submit_login--> Authenticated --logout--> LoggedOut
//!     \__________________________\_______________________________\____________> Failed
//! ```
//!
//! Redirects during login are followed by hand so that every `Set-Cookie`
//! along the chain is seen; the session identity is then frozen into a
//! [`SessionSnapshot`], an HTTP client whose default headers carry the
//! authenticated cookie. Concurrent fetches only ever go through snapshots,
//! so nothing they do can change the session.

use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder, Response, redirect};
use scraper::Html;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::error::{FetchError, ProtocolError, ScrapeError};
use crate::fetch::{Page, PageSource};
use crate::models::Credentials;
use crate::scrapers::moodle;
use crate::utils::truncate_for_log;

/// Name of the cookie that binds requests to a portal session.
pub const SESSION_COOKIE: &str = "MoodleSession";

/// Title of the page a successful login lands on.
pub const DASHBOARD_TITLE: &str = "Dashboard";

const MAX_REDIRECTS: usize = 10;

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:68.0) Gecko/20100101 Firefox/68.0";
const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.5";

/// Headers sent with every request.
///
/// `Accept-Encoding: gzip, deflate` is added by reqwest itself, which also
/// decodes the body.
pub fn static_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
    headers.insert(header::ACCEPT, HeaderValue::from_static(ACCEPT));
    headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static(ACCEPT_LANGUAGE));
    headers.insert(header::DNT, HeaderValue::from_static("1"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
    headers
}

/// Transport settings shared by every client the session builds.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    /// Skip TLS certificate validation. Only for portals with self-signed or
    /// expired certificates, and only when the user asked for it.
    pub accept_invalid_certs: bool,
    pub timeout: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            accept_invalid_certs: false,
            timeout: Duration::from_secs(30),
        }
    }
}

impl HttpSettings {
    fn builder(&self) -> reqwest::ClientBuilder {
        let builder = Client::builder().timeout(self.timeout);
        if self.accept_invalid_certs {
            builder.danger_accept_invalid_certs(true)
        } else {
            builder
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    TokenObtained,
    Authenticated,
    LoggedOut,
    Failed,
}

/// Anti-forgery token from the login form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginToken(pub String);

/// How the logout attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogoutOutcome {
    /// The server redirected away from the logout URL.
    Confirmed,
    /// The request went through but the server did not redirect, or there was
    /// no logout link to follow.
    Inconclusive(String),
}

/// The authenticated landing page, fetched once and shared read-only.
#[derive(Debug, Clone)]
pub struct LandingPage {
    pub url: Url,
    pub body: String,
}

impl LandingPage {
    pub fn course_urls(&self) -> Vec<String> {
        moodle::extract_course_urls(&Html::parse_document(&self.body), &self.url)
    }

    pub fn logout_url(&self) -> Option<Url> {
        moodle::extract_logout_url(&Html::parse_document(&self.body), &self.url)
    }

    pub fn today(&self) -> Option<String> {
        moodle::extract_today(&Html::parse_document(&self.body))
    }
}

/// Read-only view of an authenticated session.
///
/// Cloning is cheap; the header set is baked into the client and cannot be
/// changed after construction.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    client: Client,
}

impl PageSource for SessionSnapshot {
    #[instrument(level = "debug", skip(self))]
    async fn get(&self, url: &str) -> Result<Page, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;
        let status = response.status();
        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;
        Ok(Page {
            url: final_url,
            status,
            body,
        })
    }
}

/// Owner of the session identity and the login/logout protocol.
#[derive(Debug)]
pub struct SessionClient {
    client: Client,
    settings: HttpSettings,
    headers: HeaderMap,
    state: SessionState,
    landing_url: Option<Url>,
}

impl SessionClient {
    pub fn new(settings: HttpSettings) -> Result<Self, ScrapeError> {
        if settings.accept_invalid_certs {
            warn!("TLS certificate validation is DISABLED for this run (--accept-invalid-certs)");
        }
        let client = settings
            .builder()
            .redirect(redirect::Policy::none())
            .build()
            .map_err(ScrapeError::Client)?;

        Ok(Self {
            client,
            settings,
            headers: static_headers(),
            state: SessionState::Anonymous,
            landing_url: None,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn expect_state(&self, expected: SessionState) -> Result<(), ProtocolError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ProtocolError::InvalidState {
                expected,
                actual: self.state,
            })
        }
    }

    /// Any failure during login is terminal.
    fn settle<T>(&mut self, result: Result<T, ScrapeError>) -> Result<T, ScrapeError> {
        if result.is_err() {
            self.state = SessionState::Failed;
        }
        result
    }

    fn set_cookie(&mut self, value: &str) -> Result<(), ProtocolError> {
        let cookie = HeaderValue::from_str(&format!("{SESSION_COOKIE}={value}"))
            .map_err(|_| ProtocolError::InvalidCookie)?;
        self.headers.insert(header::COOKIE, cookie);
        Ok(())
    }

    /// Adopt the session cookie if `response` sets one. Returns whether it did.
    fn absorb_cookie(&mut self, response: &Response) -> Result<bool, ProtocolError> {
        let value = response
            .cookies()
            .find(|c| c.name() == SESSION_COOKIE)
            .map(|c| c.value().to_string());
        match value {
            Some(value) => {
                self.set_cookie(&value)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Send `request`, following redirects by hand and adopting every session
    /// cookie seen on the way. Returns the final page and whether any hop set
    /// a session cookie.
    async fn send_tracking(
        &mut self,
        request: RequestBuilder,
        url: &Url,
    ) -> Result<(Page, bool), ScrapeError> {
        let mut response = request
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url.as_str(), e))?;
        let mut cookie_seen = false;
        let mut hops = 0;

        loop {
            cookie_seen |= self.absorb_cookie(&response)?;
            if !response.status().is_redirection() {
                break;
            }
            let Some(location) = response
                .headers()
                .get(header::LOCATION)
                .and_then(|v| v.to_str().ok())
            else {
                break;
            };
            let next = response
                .url()
                .join(location)
                .map_err(|_| ProtocolError::BadRedirect {
                    location: location.to_string(),
                })?;

            hops += 1;
            if hops > MAX_REDIRECTS {
                return Err(ProtocolError::TooManyRedirects {
                    url: url.to_string(),
                }
                .into());
            }
            debug!(hop = hops, %next, "Following redirect");
            response = self
                .client
                .get(next.clone())
                .headers(self.headers.clone())
                .send()
                .await
                .map_err(|e| FetchError::from_reqwest(next.as_str(), e))?;
        }

        let status = response.status();
        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(final_url.as_str(), e))?;
        Ok((
            Page {
                url: final_url,
                status,
                body,
            },
            cookie_seen,
        ))
    }

    /// GET the login form; keep its pre-auth cookie and return its token.
    #[instrument(level = "info", skip_all, fields(url = %url))]
    pub async fn begin_login(&mut self, url: &Url) -> Result<LoginToken, ScrapeError> {
        let result = self.begin_login_inner(url).await;
        self.settle(result)
    }

    async fn begin_login_inner(&mut self, url: &Url) -> Result<LoginToken, ScrapeError> {
        self.expect_state(SessionState::Anonymous)?;
        let request = self.client.get(url.clone()).headers(self.headers.clone());
        let (page, cookie_seen) = self.send_tracking(request, url).await?;

        let token = moodle::extract_login_token(&Html::parse_document(&page.body))
            .ok_or(ProtocolError::MissingLoginToken)?;
        if !cookie_seen {
            return Err(ProtocolError::MissingSessionCookie.into());
        }

        debug!(status = %page.status, "Obtained login token and pre-auth cookie");
        self.state = SessionState::TokenObtained;
        Ok(LoginToken(token))
    }

    /// POST the login form. Succeeds only if the chain ends on the dashboard
    /// and hands out a fresh session cookie.
    #[instrument(level = "info", skip_all, fields(url = %url, username = %username))]
    pub async fn submit_login(
        &mut self,
        url: &Url,
        token: &LoginToken,
        username: &str,
        password: &str,
    ) -> Result<(), ScrapeError> {
        let result = self.submit_login_inner(url, token, username, password).await;
        self.settle(result)
    }

    async fn submit_login_inner(
        &mut self,
        url: &Url,
        token: &LoginToken,
        username: &str,
        password: &str,
    ) -> Result<(), ScrapeError> {
        self.expect_state(SessionState::TokenObtained)?;
        let form = [
            ("anchor", ""),
            ("logintoken", token.0.as_str()),
            ("username", username),
            ("password", password),
        ];
        let request = self
            .client
            .post(url.clone())
            .headers(self.headers.clone())
            .form(&form);
        let (page, cookie_seen) = self.send_tracking(request, url).await?;

        let title = moodle::page_title(&Html::parse_document(&page.body));
        if title.as_deref() != Some(DASHBOARD_TITLE) {
            debug!(body = %truncate_for_log(&page.body, 300), "Login response preview");
            return Err(ProtocolError::LoginRejected {
                status: page.status,
                title,
            }
            .into());
        }
        if !cookie_seen {
            return Err(ProtocolError::MissingSessionCookie.into());
        }

        let landing = Url::parse(&page.url).map_err(|_| ProtocolError::BadRedirect {
            location: page.url.clone(),
        })?;
        info!(landing = %landing, "Login successful");
        self.landing_url = Some(landing);
        self.state = SessionState::Authenticated;
        Ok(())
    }

    /// Run the whole login protocol. The credentials are dropped on return.
    pub async fn login(&mut self, credentials: Credentials) -> Result<Url, ScrapeError> {
        let Credentials {
            login_url,
            username,
            password,
        } = credentials;
        let token = self.begin_login(&login_url).await?;
        self.submit_login(&login_url, &token, &username, &password)
            .await?;
        self.landing_url
            .clone()
            .ok_or_else(|| ProtocolError::MissingSessionCookie.into())
    }

    /// Freeze the authenticated identity into a client for concurrent fetching.
    pub fn snapshot(&self) -> Result<SessionSnapshot, ScrapeError> {
        self.expect_state(SessionState::Authenticated)?;
        let client = self
            .settings
            .builder()
            .default_headers(self.headers.clone())
            .build()
            .map_err(ScrapeError::Client)?;
        Ok(SessionSnapshot { client })
    }

    /// One GET with the authenticated identity.
    pub async fn fetch(&self, url: &str) -> Result<Page, ScrapeError> {
        Ok(self.snapshot()?.get(url).await?)
    }

    /// Follow the landing page's logout link.
    ///
    /// Must only be called once every fetch made through a snapshot is done.
    /// A failed logout request leaves the session `Failed`; a missing link
    /// leaves it `Authenticated`, since nothing was sent.
    #[instrument(level = "info", skip_all)]
    pub async fn logout(&mut self, landing: &LandingPage) -> Result<LogoutOutcome, ScrapeError> {
        self.expect_state(SessionState::Authenticated)?;
        let Some(logout_url) = landing.logout_url() else {
            warn!("No logout link on the landing page");
            return Ok(LogoutOutcome::Inconclusive(
                "no logout link on the landing page".to_string(),
            ));
        };

        let result = self.fetch(logout_url.as_str()).await;
        let page = self.settle(result)?;
        self.state = SessionState::LoggedOut;

        let redirected = Url::parse(&page.url).map_or(true, |landed| landed != logout_url);
        if redirected {
            info!(landed = %page.url, "Logout successful");
            Ok(LogoutOutcome::Confirmed)
        } else {
            warn!(status = %page.status, "Logout did not redirect; session may still be live");
            Ok(LogoutOutcome::Inconclusive(format!(
                "logout returned HTTP {} without redirecting",
                page.status
            )))
        }
    }
}
