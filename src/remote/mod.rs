//! Remote browser session, the only part of the crate that talks to
//! Zendesk. The export pipeline depends on the [`RemoteSession`] trait;
//! [`zendesk::ZendeskSession`] implements it on top of a W3C WebDriver
//! client driving Chrome.

pub mod chromedriver;
pub mod endpoints;
pub mod error;
#[cfg(test)]
pub mod fake;
pub mod webdriver;
pub mod zendesk;

use async_trait::async_trait;
use url::Url;

use crate::credentials::Credentials;
use crate::retry::{self, RetryAction, RetryConfig};
use crate::types::AssessorCode;
use crate::wait::{Deadline, WaitConfig};

pub use self::endpoints::Endpoints;
pub use self::error::RemoteError;
pub use self::zendesk::{BrowserConfig, ZendeskSessionFactory};

/// Opaque handle to a clickable element on the current page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control(pub String);

/// One visible row of the ticket listing.
#[derive(Debug, Clone, Default)]
pub struct ListingRow {
    /// `href` values of the row's ticket links.
    pub links: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PageButton {
    pub number: u32,
    pub control: Control,
    pub active: bool,
}

/// Pagination footer of the listing as currently rendered.
#[derive(Debug, Clone, Default)]
pub struct PaginationControls {
    pub first: Option<Control>,
    pub prev: Option<Control>,
    pub next: Option<Control>,
    pub last: Option<Control>,
    pub pages: Vec<PageButton>,
}

impl PaginationControls {
    /// Highest page number shown, at least 1.
    pub fn max_page(&self) -> u32 {
        self.pages.iter().map(|p| p.number).max().unwrap_or(1).max(1)
    }

    pub fn current(&self) -> Option<u32> {
        self.pages.iter().find(|p| p.active).map(|p| p.number)
    }

    pub fn page(&self, number: u32) -> Option<&Control> {
        self.pages
            .iter()
            .find(|p| p.number == number)
            .map(|p| &p.control)
    }
}

/// What a pagination `<li>` represents, judged from its label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    First,
    Prev,
    Next,
    Last,
    Page(u32),
    Other,
}

pub fn classify_control(label: &str) -> ControlKind {
    match label.trim() {
        "«" | "<<" => ControlKind::First,
        "‹" | "<" => ControlKind::Prev,
        "›" | ">" => ControlKind::Next,
        "»" | ">>" => ControlKind::Last,
        s if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) => {
            s.parse().map(ControlKind::Page).unwrap_or(ControlKind::Other)
        }
        _ => ControlKind::Other,
    }
}

/// Outcome of looking a client up by code. Both non-`Opened` outcomes end the
/// code, but they are reported separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientLookup {
    /// The search returned no client.
    NotFound,
    /// A client matched but its profile page could not be opened.
    ProfileUnavailable,
    /// The client's ticket listing is open.
    Opened,
}

/// One authenticated browser session.
///
/// Expected outcomes (no client, no pagination, click had no effect) are
/// values; `Err` is reserved for failures, and `RemoteError::is_session_lost`
/// tells the caller to recreate the session.
#[async_trait]
pub trait RemoteSession: Send {
    /// Single navigation attempt; see [`navigate`] for the retrying version.
    async fn goto(&mut self, url: &Url) -> Result<(), RemoteError>;

    /// Whether the current document has finished loading.
    async fn page_ready(&mut self) -> Result<bool, RemoteError>;

    /// `false` only when the session itself is gone, not for a slow page.
    async fn is_alive(&mut self) -> bool;

    /// Search for the client and open its ticket listing.
    async fn open_client(&mut self, code: &AssessorCode) -> Result<ClientLookup, RemoteError>;

    async fn listing_rows(&mut self) -> Result<Vec<ListingRow>, RemoteError>;

    /// Text of the first listing row, used to notice page changes.
    async fn first_row_text(&mut self) -> Result<Option<String>, RemoteError>;

    /// `None` when the listing has no pagination footer (single page).
    async fn pagination(&mut self) -> Result<Option<PaginationControls>, RemoteError>;

    /// Returns `false` when the control could not be clicked.
    async fn click(&mut self, control: &Control) -> Result<bool, RemoteError>;

    /// Open a fresh tab for an export so the listing tab keeps its state.
    async fn open_isolated_tab(&mut self) -> Result<(), RemoteError>;

    /// Close the export tab and return to the listing tab.
    async fn close_isolated_tab(&mut self) -> Result<(), RemoteError>;

    /// Render the current page as PDF bytes.
    async fn render_pdf(&mut self) -> Result<Vec<u8>, RemoteError>;

    /// Tear the session down. Never fails; errors are logged.
    async fn close(&mut self);
}

/// Creates authenticated sessions. Each call yields a brand-new browser.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self, credentials: &Credentials) -> Result<Box<dyn RemoteSession>, RemoteError>;
}

/// Open a session, retrying creation failures. Login failures abort at once.
pub async fn open_session(
    factory: &dyn SessionFactory,
    credentials: &Credentials,
    retry_config: &RetryConfig,
) -> Result<Box<dyn RemoteSession>, RemoteError> {
    retry::retry_with_backoff(
        retry_config,
        |e: &RemoteError| {
            if e.is_auth() {
                RetryAction::Abort
            } else {
                RetryAction::Retry
            }
        },
        || factory.open(credentials),
    )
    .await
}

/// Navigate with retries and increasing backoff.
///
/// Returns `Ok(false)` once the attempts are exhausted; only a lost session
/// is an error.
pub async fn navigate(
    session: &mut dyn RemoteSession,
    url: &Url,
    retry_config: &RetryConfig,
) -> Result<bool, RemoteError> {
    let attempts = retry_config.max_retries + 1;
    for attempt in 0..attempts {
        match session.goto(url).await {
            Ok(()) => return Ok(true),
            Err(e) if e.is_session_lost() => return Err(e),
            Err(e) => {
                tracing::debug!(%url, attempt = attempt + 1, "Navigation failed: {}", e);
                if attempt + 1 < attempts {
                    tokio::time::sleep(retry_config.delay_for_retry(attempt)).await;
                }
            }
        }
    }
    tracing::warn!(%url, "Navigation gave up after {} attempts", attempts);
    Ok(false)
}

/// Wait until the document reports ready. `Ok(false)` on timeout.
pub async fn wait_page_ready(
    session: &mut dyn RemoteSession,
    wait: &WaitConfig,
) -> Result<bool, RemoteError> {
    let deadline = Deadline::after(wait.document_ready, wait.poll);
    loop {
        match session.page_ready().await {
            Ok(true) => return Ok(true),
            Ok(false) => {}
            Err(e) if e.is_session_lost() => return Err(e),
            Err(e) => tracing::debug!("readyState check failed: {}", e),
        }
        if !deadline.tick().await {
            return Ok(false);
        }
    }
}
