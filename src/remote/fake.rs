//! Scripted in-memory [`RemoteSession`] for tests.
//!
//! All sessions created from one [`FakeBackend`] share its state, so a test
//! can kill a session, let the orchestrator open a new one, and inspect what
//! every session did afterwards.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use url::Url;

use super::{
    ClientLookup, Control, ListingRow, PageButton, PaginationControls, RemoteError,
    RemoteSession, SessionFactory,
};
use crate::credentials::Credentials;
use crate::types::AssessorCode;

#[derive(Debug, Clone)]
pub enum FakeClient {
    ProfileUnavailable,
    /// Ticket ids per listing page.
    Listing(Vec<Vec<u64>>),
    /// Opening the client fails with a non-session error.
    Broken(String),
}

#[derive(Debug, Default)]
pub struct BackendState {
    pub clients: HashMap<String, FakeClient>,
    pub failing_gotos: u32,
    pub goto_calls: u32,
    pub failing_opens: u32,
    pub open_calls: u32,
    pub reject_login: bool,
    pub page_never_ready: bool,
    /// Tickets whose rendering always fails with a WebDriver error.
    pub render_failures: HashSet<u64>,
    /// Ticket -> number of times rendering it kills the session.
    pub invalidate_on_render: HashMap<u64, u32>,
    /// Number of upcoming `open_client` calls that kill the session.
    pub invalidate_on_open_client: u32,
    /// Tickets that render to something that is not a PDF.
    pub invalid_pdf: HashSet<u64>,
    pub rendered: Vec<u64>,
    pub remote_calls: u32,
    pub pages_scraped: u32,
    /// Clicking "next" on this 0-based page leaves the rows unchanged.
    pub frozen_on_page: Option<usize>,
    pub hide_last_control: bool,
    /// Checkpoint file to read whenever a ticket is rendered.
    pub checkpoint_path: Option<PathBuf>,
    /// Ticket -> checkpoint file contents at the time it was rendered.
    pub checkpoint_on_render: Vec<(u64, Option<String>)>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeBackend(Arc<Mutex<BackendState>>);

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut BackendState) -> R) -> R {
        let mut state = self.0.lock().unwrap();
        f(&mut state)
    }

    pub fn add_listing(&self, code: &str, pages: Vec<Vec<u64>>) {
        self.with(|b| {
            b.clients
                .insert(code.to_uppercase(), FakeClient::Listing(pages))
        });
    }

    pub fn add_client(&self, code: &str, client: FakeClient) {
        self.with(|b| b.clients.insert(code.to_uppercase(), client));
    }

    pub fn session(&self) -> FakeRemote {
        FakeRemote {
            backend: self.clone(),
            alive: true,
            listing: None,
            page: 0,
            url: None,
            in_tab: false,
        }
    }
}

/// Bytes that pass artifact validation.
pub fn pdf_bytes(id: u64) -> Vec<u8> {
    let mut bytes = format!("%PDF-1.4\n% ticket {}\n", id).into_bytes();
    bytes.resize(4096, b' ');
    bytes
}

pub struct FakeRemote {
    backend: FakeBackend,
    alive: bool,
    listing: Option<Vec<Vec<u64>>>,
    page: usize,
    url: Option<Url>,
    in_tab: bool,
}

impl FakeRemote {
    pub fn kill(&mut self) {
        self.alive = false;
    }

    fn touch(&mut self) -> Result<(), RemoteError> {
        self.backend.with(|b| b.remote_calls += 1);
        if self.alive {
            Ok(())
        } else {
            Err(RemoteError::SessionInvalidated("invalid session id".into()))
        }
    }

    fn current_rows(&self) -> Vec<u64> {
        self.listing
            .as_ref()
            .and_then(|pages| pages.get(self.page).cloned())
            .unwrap_or_default()
    }

    fn current_ticket(&self) -> Option<u64> {
        let url = self.url.as_ref()?;
        let mut segments = url.path_segments()?;
        while let Some(seg) = segments.next() {
            if seg == "tickets" {
                return segments.next()?.parse().ok();
            }
        }
        None
    }
}

#[async_trait]
impl RemoteSession for FakeRemote {
    async fn goto(&mut self, url: &Url) -> Result<(), RemoteError> {
        self.touch()?;
        let fail = self.backend.with(|b| {
            b.goto_calls += 1;
            if b.failing_gotos > 0 {
                b.failing_gotos -= 1;
                true
            } else {
                false
            }
        });
        if fail {
            return Err(RemoteError::from_webdriver("timeout", "page load timed out"));
        }
        self.url = Some(url.clone());
        Ok(())
    }

    async fn page_ready(&mut self) -> Result<bool, RemoteError> {
        self.touch()?;
        Ok(!self.backend.with(|b| b.page_never_ready))
    }

    async fn is_alive(&mut self) -> bool {
        self.alive
    }

    async fn open_client(&mut self, code: &AssessorCode) -> Result<ClientLookup, RemoteError> {
        self.touch()?;
        let kill = self.backend.with(|b| {
            if b.invalidate_on_open_client > 0 {
                b.invalidate_on_open_client -= 1;
                true
            } else {
                false
            }
        });
        if kill {
            self.alive = false;
            return Err(RemoteError::SessionInvalidated("invalid session id".into()));
        }
        let client = self.backend.with(|b| b.clients.get(code.as_str()).cloned());
        match client {
            None => Ok(ClientLookup::NotFound),
            Some(FakeClient::ProfileUnavailable) => Ok(ClientLookup::ProfileUnavailable),
            Some(FakeClient::Broken(msg)) => Err(RemoteError::ElementMissing(msg)),
            Some(FakeClient::Listing(pages)) => {
                self.listing = Some(pages);
                self.page = 0;
                Ok(ClientLookup::Opened)
            }
        }
    }

    async fn listing_rows(&mut self) -> Result<Vec<ListingRow>, RemoteError> {
        self.touch()?;
        self.backend.with(|b| b.pages_scraped += 1);
        Ok(self
            .current_rows()
            .into_iter()
            .map(|id| ListingRow {
                links: vec![format!("https://acme.zendesk.com/agent/tickets/{}", id)],
            })
            .collect())
    }

    async fn first_row_text(&mut self) -> Result<Option<String>, RemoteError> {
        self.touch()?;
        Ok(self
            .current_rows()
            .first()
            .map(|id| format!("#{} Ticket subject {}", id, id)))
    }

    async fn pagination(&mut self) -> Result<Option<PaginationControls>, RemoteError> {
        self.touch()?;
        let total = match &self.listing {
            Some(pages) if pages.len() > 1 => pages.len(),
            _ => return Ok(None),
        };
        let hide_last = self.backend.with(|b| b.hide_last_control);
        let current = self.page + 1;
        let lo = current.saturating_sub(2).max(1);
        let hi = (current + 2).min(total);
        Ok(Some(PaginationControls {
            first: Some(Control("first".into())),
            prev: (current > 1).then(|| Control("prev".into())),
            next: (current < total).then(|| Control("next".into())),
            last: (!hide_last).then(|| Control("last".into())),
            pages: (lo..=hi)
                .map(|n| PageButton {
                    number: n as u32,
                    control: Control(format!("page:{}", n)),
                    active: n == current,
                })
                .collect(),
        }))
    }

    async fn click(&mut self, control: &Control) -> Result<bool, RemoteError> {
        self.touch()?;
        let total = self.listing.as_ref().map(Vec::len).unwrap_or(0);
        if total == 0 {
            return Ok(false);
        }
        match control.0.as_str() {
            "first" => self.page = 0,
            "prev" => self.page = self.page.saturating_sub(1),
            "next" => {
                let frozen = self.backend.with(|b| b.frozen_on_page);
                if frozen != Some(self.page) {
                    self.page = (self.page + 1).min(total - 1);
                }
            }
            "last" => self.page = total - 1,
            other => match other.strip_prefix("page:").and_then(|n| n.parse::<usize>().ok()) {
                Some(n) if n >= 1 && n <= total => self.page = n - 1,
                _ => return Ok(false),
            },
        }
        Ok(true)
    }

    async fn open_isolated_tab(&mut self) -> Result<(), RemoteError> {
        self.touch()?;
        self.in_tab = true;
        Ok(())
    }

    async fn close_isolated_tab(&mut self) -> Result<(), RemoteError> {
        self.touch()?;
        self.in_tab = false;
        Ok(())
    }

    async fn render_pdf(&mut self) -> Result<Vec<u8>, RemoteError> {
        self.touch()?;
        if !self.in_tab {
            return Err(RemoteError::Protocol(
                "export rendered from the listing tab".into(),
            ));
        }
        let id = self
            .current_ticket()
            .ok_or_else(|| RemoteError::Protocol("no ticket page loaded".into()))?;
        enum Outcome {
            Kill,
            Fail,
            Garbage,
            Pdf,
        }
        let outcome = self.backend.with(|b| {
            if let Some(path) = &b.checkpoint_path {
                let snapshot = std::fs::read_to_string(path).ok();
                b.checkpoint_on_render.push((id, snapshot));
            }
            if let Some(n) = b.invalidate_on_render.get_mut(&id) {
                if *n > 0 {
                    *n -= 1;
                    return Outcome::Kill;
                }
            }
            if b.render_failures.contains(&id) {
                return Outcome::Fail;
            }
            b.rendered.push(id);
            if b.invalid_pdf.contains(&id) {
                Outcome::Garbage
            } else {
                Outcome::Pdf
            }
        });
        match outcome {
            Outcome::Kill => {
                self.alive = false;
                Err(RemoteError::SessionInvalidated("invalid session id".into()))
            }
            Outcome::Fail => Err(RemoteError::from_webdriver(
                "unknown error",
                "printing is not available",
            )),
            Outcome::Garbage => Ok(b"<html>Sign in</html>".to_vec()),
            Outcome::Pdf => Ok(pdf_bytes(id)),
        }
    }

    async fn close(&mut self) {
        self.alive = false;
    }
}

pub struct FakeFactory {
    backend: FakeBackend,
}

impl FakeFactory {
    pub fn new(backend: FakeBackend) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl SessionFactory for FakeFactory {
    async fn open(&self, _credentials: &Credentials) -> Result<Box<dyn RemoteSession>, RemoteError> {
        enum Outcome {
            DriverDown,
            BadLogin,
            Ok,
        }
        let outcome = self.backend.with(|b| {
            b.open_calls += 1;
            if b.failing_opens > 0 {
                b.failing_opens -= 1;
                Outcome::DriverDown
            } else if b.reject_login {
                Outcome::BadLogin
            } else {
                Outcome::Ok
            }
        });
        match outcome {
            Outcome::DriverDown => Err(RemoteError::Driver("chromedriver exited".into())),
            Outcome::BadLogin => Err(RemoteError::Auth("email field not found".into())),
            Outcome::Ok => Ok(Box::new(self.backend.session())),
        }
    }
}
