//! [`RemoteSession`] over a real Chrome driven through WebDriver, speaking the
//! Zendesk agent interface.
//!
//! Page structure lives here and nowhere else: each lookup is an ordered list
//! of selector strategies tried in turn, each with its own bounded wait.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use super::chromedriver::{self, ChromeDriver};
use super::webdriver::{keys, ElementId, Locator, WebDriverClient};
use super::{
    classify_control, ClientLookup, Control, ControlKind, Endpoints, ListingRow, PageButton,
    PaginationControls, RemoteError, RemoteSession, SessionFactory,
};
use crate::credentials::Credentials;
use crate::retry::RetryConfig;
use crate::types::AssessorCode;
use crate::wait::Deadline;

const POLL: Duration = Duration::from_millis(200);
const HTTP_TIMEOUT: Duration = Duration::from_secs(90);

const EMAIL_FIELDS: &[Locator<'static>] = &[
    Locator::Css("input[name='email']"),
    Locator::Css("#user_email"),
    Locator::Css("input[type='email']"),
];
const PASSWORD_FIELDS: &[Locator<'static>] = &[
    Locator::Css("input[name='password']"),
    Locator::Css("#user_password"),
    Locator::Css("input[type='password']"),
];
const SUBMIT_BUTTONS: &[Locator<'static>] = &[
    Locator::Css("button[type='submit']"),
    Locator::Css("button[name='commit']"),
    Locator::Css("button[data-testid='sign-in-submit']"),
];

const NAV: Locator<'static> = Locator::Css("nav");
const PEOPLE_BUTTON: Locator<'static> = Locator::Css("nav ul:nth-of-type(1) li:nth-of-type(3) button");
const NAV_CANDIDATES: Locator<'static> = Locator::Css("nav button, nav a[role='button'], nav a");
const CUSTOMER_SEARCH: Locator<'static> = Locator::Css("input[data-test-id='customer-lists-search-box']");
const SEARCH_FIELDS: &[Locator<'static>] = &[
    CUSTOMER_SEARCH,
    Locator::XPath(
        "//input[@type='text' and (contains(@placeholder,'Pesquisar') or contains(@placeholder,'Search'))]",
    ),
];
const NO_RESULTS: Locator<'static> = Locator::XPath(
    "//*[contains(.,'Nenhum') or contains(.,'No results') or contains(.,'sem resultados')]",
);

const TABLE_BODY: Locator<'static> = Locator::XPath("//table//tbody");
const ROWS: Locator<'static> = Locator::XPath("//table//tbody//tr");
const CLIENT_LINKS: &[Locator<'static>] = &[
    Locator::Css("td[data-test-id='customer-row-cell-name'] a[href*='/users/']"),
    Locator::XPath("//a[contains(@href,'/agent/users/')]"),
];
const TICKETS_TABS: &[Locator<'static>] = &[
    Locator::XPath("//a[contains(.,'Tickets')]"),
    Locator::XPath("//button[contains(.,'Tickets')]"),
    Locator::XPath("//a[contains(.,'Solicitações') or contains(.,'Requests')]"),
    Locator::XPath("//button[contains(.,'Solicitações') or contains(.,'Requests')]"),
];
const TICKET_LINKS: Locator<'static> = Locator::XPath(".//a[contains(@href,'/tickets/')]");
const PAGINATION: Locator<'static> = Locator::XPath("//table//tfoot//ul | //tfoot//ul[descendant::li]");
const PAGINATION_ITEMS: Locator<'static> = Locator::XPath("./li");
const PAGINATION_TARGET: Locator<'static> = Locator::XPath(".//a|.//button");

const CLICK_SCRIPT: &str = "arguments[0].scrollIntoView({block:'center'}); arguments[0].click();";
const CLEAR_SCRIPT: &str = "const el = arguments[0]; el.value = ''; \
     el.dispatchEvent(new Event('input', {bubbles:true})); \
     el.dispatchEvent(new Event('change', {bubbles:true}));";

/// Keep going past an ordinary command failure, but never past a lost session.
fn tolerate<T>(result: Result<T, RemoteError>) -> Result<Option<T>, RemoteError> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_session_lost() => Err(e),
        Err(e) => {
            tracing::trace!("Ignoring WebDriver failure: {}", e);
            Ok(None)
        }
    }
}

/// Browser launch settings shared by every session the factory creates.
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    pub chromedriver_path: PathBuf,
    pub headless: bool,
    /// Parent of the per-attempt profile directories.
    pub profile_root: PathBuf,
}

pub struct ZendeskSessionFactory {
    browser: BrowserConfig,
    endpoints: Endpoints,
    nav_retry: RetryConfig,
}

impl ZendeskSessionFactory {
    pub fn new(browser: BrowserConfig, endpoints: Endpoints, nav_retry: RetryConfig) -> Self {
        Self {
            browser,
            endpoints,
            nav_retry,
        }
    }
}

#[async_trait]
impl SessionFactory for ZendeskSessionFactory {
    async fn open(&self, credentials: &Credentials) -> Result<Box<dyn RemoteSession>, RemoteError> {
        let profile = chromedriver::allocate_profile_dir(&self.browser.profile_root)?;
        tracing::debug!(profile = %profile.display(), "Starting browser");
        let driver = ChromeDriver::spawn(&self.browser.chromedriver_path).await?;
        let capabilities = chromedriver::chrome_capabilities(&profile, self.browser.headless);
        let client = match WebDriverClient::connect(driver.base_url().clone(), capabilities, HTTP_TIMEOUT).await {
            Ok(c) => c,
            Err(e) => {
                driver.shutdown().await;
                return Err(e);
            }
        };

        let mut session = ZendeskSession {
            client,
            driver: Some(driver),
            endpoints: self.endpoints.clone(),
            nav_retry: self.nav_retry,
            listing_handle: None,
        };
        if let Err(e) = session.login(credentials).await {
            session.close().await;
            return Err(e);
        }
        tracing::info!("Logged in to Zendesk as {}", credentials.email());
        Ok(Box::new(session))
    }
}

pub struct ZendeskSession {
    client: WebDriverClient,
    driver: Option<ChromeDriver>,
    endpoints: Endpoints,
    nav_retry: RetryConfig,
    /// Tab holding the ticket listing while an export tab is open.
    listing_handle: Option<String>,
}

impl ZendeskSession {
    /// First displayed match of `locator` within `timeout`.
    async fn wait_visible(
        &self,
        locator: Locator<'_>,
        timeout: Duration,
    ) -> Result<Option<ElementId>, RemoteError> {
        let deadline = Deadline::after(timeout, POLL);
        loop {
            if let Some(found) = tolerate(self.client.find_all(locator).await)? {
                for el in found {
                    if tolerate(self.client.is_displayed(&el).await)? == Some(true) {
                        return Ok(Some(el));
                    }
                }
            }
            if !deadline.tick().await {
                return Ok(None);
            }
        }
    }

    /// Try each strategy in order, each with its own `timeout`.
    async fn first_visible(
        &self,
        strategies: &[Locator<'_>],
        timeout: Duration,
    ) -> Result<Option<ElementId>, RemoteError> {
        for locator in strategies {
            if let Some(el) = self.wait_visible(*locator, timeout).await? {
                return Ok(Some(el));
            }
            tracing::trace!(%locator, "No visible match");
        }
        Ok(None)
    }

    async fn wait_present(&self, locator: Locator<'_>, timeout: Duration) -> Result<bool, RemoteError> {
        let deadline = Deadline::after(timeout, POLL);
        loop {
            if let Some(found) = tolerate(self.client.find_all(locator).await)? {
                if !found.is_empty() {
                    return Ok(true);
                }
            }
            if !deadline.tick().await {
                return Ok(false);
            }
        }
    }

    async fn wait_url_contains(&self, needle: &str, timeout: Duration) -> Result<bool, RemoteError> {
        let deadline = Deadline::after(timeout, POLL);
        loop {
            if let Some(url) = tolerate(self.client.current_url().await)? {
                if url.contains(needle) {
                    return Ok(true);
                }
            }
            if !deadline.tick().await {
                return Ok(false);
            }
        }
    }

    async fn js_click(&self, element: &ElementId) -> Result<(), RemoteError> {
        self.client
            .execute(CLICK_SCRIPT, vec![WebDriverClient::element_ref(element)])
            .await?;
        Ok(())
    }

    /// Select-all + backspace, then blank the value through script so
    /// framework-bound inputs notice.
    async fn clear_hard(&self, element: &ElementId) -> Result<(), RemoteError> {
        tolerate(self.client.click(element).await)?;
        let chord = format!("{}a{}{}", keys::CONTROL, keys::NULL, keys::BACKSPACE);
        tolerate(self.client.send_keys(element, &chord).await)?;
        tokio::time::sleep(Duration::from_millis(120)).await;
        tolerate(
            self.client
                .execute(CLEAR_SCRIPT, vec![WebDriverClient::element_ref(element)])
                .await,
        )?;
        Ok(())
    }

    async fn login(&mut self, credentials: &Credentials) -> Result<(), RemoteError> {
        self.client
            .set_timeouts(Duration::from_secs(10), Duration::from_secs(60))
            .await?;
        let url = self.endpoints.login();
        let retry = self.nav_retry;
        if !super::navigate(self, &url, &retry).await? {
            return Err(RemoteError::Driver(format!("login page unreachable: {}", url)));
        }
        tokio::time::sleep(Duration::from_secs(1)).await;

        let field_wait = Duration::from_secs(8);
        let email = self
            .first_visible(EMAIL_FIELDS, field_wait)
            .await?
            .ok_or_else(|| RemoteError::Auth("e-mail field not found (SSO or MFA may be required)".into()))?;
        self.client.clear(&email).await?;
        self.client.send_keys(&email, credentials.email()).await?;

        let password = self
            .first_visible(PASSWORD_FIELDS, field_wait)
            .await?
            .ok_or_else(|| RemoteError::Auth("password field not found (SSO or MFA may be required)".into()))?;
        self.client.clear(&password).await?;
        self.client.send_keys(&password, credentials.password()).await?;

        let submit = self
            .first_visible(SUBMIT_BUTTONS, field_wait)
            .await?
            .ok_or_else(|| RemoteError::Auth("sign-in button not found".into()))?;
        self.client.click(&submit).await?;
        tokio::time::sleep(Duration::from_secs(2)).await;

        if !self.wait_present(NAV, Duration::from_secs(20)).await? {
            return Err(RemoteError::Auth(
                "agent interface did not load after signing in".into(),
            ));
        }
        Ok(())
    }

    async fn open_people(&self) -> Result<(), RemoteError> {
        if !self.wait_present(NAV, Duration::from_secs(20)).await? {
            return Err(RemoteError::ElementMissing("navigation bar".into()));
        }
        let loaded = Duration::from_secs(6);

        if let Some(button) = self.wait_visible(PEOPLE_BUTTON, Duration::from_secs(5)).await? {
            if tolerate(self.js_click(&button).await)?.is_some()
                && self.wait_present(CUSTOMER_SEARCH, loaded).await?
            {
                tokio::time::sleep(Duration::from_millis(800)).await;
                return Ok(());
            }
        }

        let candidates = tolerate(self.client.find_all(NAV_CANDIDATES).await)?.unwrap_or_default();
        for candidate in candidates {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if tolerate(self.js_click(&candidate).await)?.is_none() {
                continue;
            }
            if self.wait_present(CUSTOMER_SEARCH, loaded).await? {
                tokio::time::sleep(Duration::from_millis(800)).await;
                return Ok(());
            }
        }
        Err(RemoteError::ElementMissing("customers (People) screen".into()))
    }

    /// Type the code into the customer search. `false` when the page says
    /// there are no results; an ambiguous page counts as results.
    async fn search_client(&self, code: &AssessorCode) -> Result<bool, RemoteError> {
        let field = self
            .first_visible(SEARCH_FIELDS, Duration::from_secs(8))
            .await?
            .ok_or_else(|| RemoteError::ElementMissing("customer search field".into()))?;
        self.clear_hard(&field).await?;
        self.client
            .send_keys(&field, &format!("{}{}", code, keys::ENTER))
            .await?;

        let deadline = Deadline::after(Duration::from_secs(10), POLL);
        loop {
            let rows = tolerate(self.client.find_all(ROWS).await)?.unwrap_or_default();
            if !rows.is_empty() {
                return Ok(true);
            }
            let empties = tolerate(self.client.find_all(NO_RESULTS).await)?.unwrap_or_default();
            for el in empties {
                if tolerate(self.client.is_displayed(&el).await)? == Some(true) {
                    return Ok(false);
                }
            }
            if !deadline.tick().await {
                return Ok(true);
            }
        }
    }

    async fn open_first_client(&self) -> Result<bool, RemoteError> {
        if !self.wait_present(TABLE_BODY, Duration::from_secs(15)).await? {
            return Ok(false);
        }
        for locator in CLIENT_LINKS {
            let Some(link) = self.wait_visible(*locator, Duration::from_secs(6)).await? else {
                continue;
            };
            if tolerate(self.js_click(&link).await)?.is_none() {
                continue;
            }
            if self.wait_url_contains("/agent/users/", Duration::from_secs(10)).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Best effort: some profiles open on the tickets view already.
    async fn open_tickets_tab(&self) -> Result<(), RemoteError> {
        if let Some(tab) = self.first_visible(TICKETS_TABS, Duration::from_secs(6)).await? {
            tolerate(self.js_click(&tab).await)?;
            tokio::time::sleep(Duration::from_millis(600)).await;
        }
        Ok(())
    }

    async fn pagination_list(&self) -> Result<Option<ElementId>, RemoteError> {
        let lists = tolerate(self.client.find_all(PAGINATION).await)?.unwrap_or_default();
        for ul in lists {
            if tolerate(self.client.is_displayed(&ul).await)? == Some(true) {
                return Ok(Some(ul));
            }
        }
        Ok(None)
    }

    async fn read_row(&self, row: &ElementId) -> Result<Option<ListingRow>, RemoteError> {
        if tolerate(self.client.is_displayed(row).await)? != Some(true) {
            return Ok(None);
        }
        let anchors = tolerate(self.client.find_all_from(row, TICKET_LINKS).await)?.unwrap_or_default();
        let mut links = Vec::with_capacity(anchors.len());
        for a in anchors {
            if let Some(Some(href)) = tolerate(self.client.attribute(&a, "href").await)? {
                links.push(href);
            }
        }
        Ok(Some(ListingRow { links }))
    }
}

#[async_trait]
impl RemoteSession for ZendeskSession {
    async fn goto(&mut self, url: &Url) -> Result<(), RemoteError> {
        self.client.navigate(url).await
    }

    async fn page_ready(&mut self) -> Result<bool, RemoteError> {
        let state = self
            .client
            .execute("return document.readyState", Vec::new())
            .await?;
        Ok(state.as_str() == Some("complete"))
    }

    async fn is_alive(&mut self) -> bool {
        match self.client.title().await {
            Ok(_) => true,
            Err(e) => !e.is_session_lost(),
        }
    }

    async fn open_client(&mut self, code: &AssessorCode) -> Result<ClientLookup, RemoteError> {
        self.open_people().await?;
        if !self.search_client(code).await? {
            return Ok(ClientLookup::NotFound);
        }
        if !self.open_first_client().await? {
            return Ok(ClientLookup::ProfileUnavailable);
        }
        self.open_tickets_tab().await?;
        Ok(ClientLookup::Opened)
    }

    async fn listing_rows(&mut self) -> Result<Vec<ListingRow>, RemoteError> {
        let rows = self.client.find_all(ROWS).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(parsed) = self.read_row(row).await? {
                out.push(parsed);
            }
        }
        Ok(out)
    }

    async fn first_row_text(&mut self) -> Result<Option<String>, RemoteError> {
        let rows = tolerate(self.client.find_all(ROWS).await)?.unwrap_or_default();
        let Some(first) = rows.first() else {
            return Ok(None);
        };
        Ok(tolerate(self.client.text(first).await)?
            .map(|t| t.chars().take(80).collect()))
    }

    async fn pagination(&mut self) -> Result<Option<PaginationControls>, RemoteError> {
        let Some(ul) = self.pagination_list().await? else {
            return Ok(None);
        };
        let items = tolerate(self.client.find_all_from(&ul, PAGINATION_ITEMS).await)?.unwrap_or_default();

        let mut controls = PaginationControls::default();
        for li in items {
            if tolerate(self.client.is_displayed(&li).await)? != Some(true) {
                continue;
            }
            let Some(label) = tolerate(self.client.text(&li).await)? else {
                continue;
            };
            let target = tolerate(self.client.find_all_from(&li, PAGINATION_TARGET).await)?
                .and_then(|found| found.into_iter().next())
                .unwrap_or_else(|| li.clone());
            let control = Control(target.0);

            match classify_control(&label) {
                ControlKind::First => controls.first = Some(control),
                ControlKind::Prev => controls.prev = Some(control),
                ControlKind::Next => controls.next = Some(control),
                ControlKind::Last => controls.last = Some(control),
                ControlKind::Page(number) => {
                    let class = tolerate(self.client.attribute(&li, "class").await)?
                        .flatten()
                        .unwrap_or_default();
                    let aria = tolerate(self.client.attribute(&li, "aria-current").await)?
                        .flatten()
                        .unwrap_or_default();
                    let active = class.contains("active") || class.contains("current") || aria == "page";
                    controls.pages.push(PageButton {
                        number,
                        control,
                        active,
                    });
                }
                ControlKind::Other => {}
            }
        }
        Ok(Some(controls))
    }

    async fn click(&mut self, control: &Control) -> Result<bool, RemoteError> {
        let element = ElementId(control.0.clone());
        Ok(tolerate(self.js_click(&element).await)?.is_some())
    }

    async fn open_isolated_tab(&mut self) -> Result<(), RemoteError> {
        let mut handles = self.client.window_handles().await?;
        while handles.len() > 1 {
            if let Some(extra) = handles.last() {
                self.client.switch_to_window(extra).await?;
            }
            handles = self.client.close_window().await?;
        }
        let listing = handles
            .first()
            .cloned()
            .ok_or_else(|| RemoteError::Protocol("browser has no open window".into()))?;
        self.client.switch_to_window(&listing).await?;
        self.listing_handle = Some(listing);

        let tab = self.client.new_tab().await?;
        self.client.switch_to_window(&tab).await?;
        Ok(())
    }

    async fn close_isolated_tab(&mut self) -> Result<(), RemoteError> {
        let remaining = self.client.close_window().await?;
        let target = self
            .listing_handle
            .take()
            .or_else(|| remaining.first().cloned())
            .ok_or_else(|| RemoteError::Protocol("no window left after closing the export tab".into()))?;
        self.client.switch_to_window(&target).await
    }

    async fn render_pdf(&mut self) -> Result<Vec<u8>, RemoteError> {
        self.client.print_pdf().await
    }

    async fn close(&mut self) {
        if let Err(e) = self.client.quit().await {
            tracing::debug!("Failed to end browser session: {}", e);
        }
        if let Some(driver) = self.driver.take() {
            driver.shutdown().await;
        }
    }
}

impl ZendeskSession {
    #[cfg(test)]
    fn attached(client: WebDriverClient, endpoints: Endpoints) -> Self {
        Self {
            client,
            driver: None,
            endpoints,
            nav_retry: RetryConfig::default().with_retries(0),
            listing_handle: None,
        }
    }
}
