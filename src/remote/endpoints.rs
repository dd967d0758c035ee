//! URLs of the Zendesk agent interface for one subdomain.

use url::Url;

use crate::types::TicketId;

#[derive(Debug, Clone)]
pub struct Endpoints {
    base: Url,
}

impl Endpoints {
    /// Endpoints for `https://<subdomain>.zendesk.com/`.
    pub fn for_subdomain(subdomain: &str) -> anyhow::Result<Self> {
        let subdomain = subdomain.trim();
        if subdomain.is_empty() || !subdomain.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            anyhow::bail!("Invalid Zendesk subdomain '{}'", subdomain);
        }
        Ok(Self {
            base: Url::parse(&format!("https://{}.zendesk.com/", subdomain))?,
        })
    }

    /// Endpoints rooted at an arbitrary base (must end with `/`).
    #[cfg(test)]
    pub fn with_base(base: Url) -> Self {
        Self { base }
    }

    pub fn login(&self) -> Url {
        self.join("auth/v2/login/signin")
    }

    pub fn ticket_print(&self, id: TicketId) -> Url {
        self.join(&format!("tickets/{}/print", id))
    }

    pub fn ticket_view(&self, id: TicketId) -> Url {
        self.join(&format!("agent/tickets/{}", id))
    }

    fn join(&self, path: &str) -> Url {
        // Paths are fixed ASCII segments; joining onto a valid base cannot fail.
        self.base.join(path).unwrap_or_else(|_| self.base.clone())
    }
}
