//! Ticket discovery: walk a client's paginated ticket listing once and
//! collect every ticket id it shows.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::remote::{Control, ListingRow, RemoteError, RemoteSession};
use crate::types::TicketId;
use crate::wait::{Deadline, WaitConfig};

static TICKET_HREF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/tickets/(\d+)").expect("valid regex"));

#[derive(Debug, Clone, Copy)]
pub struct DiscoveryLimits {
    /// Never visit more listing pages than this.
    pub max_pages: u32,
    /// Stop once this many distinct tickets are known.
    pub max_items: Option<usize>,
}

impl Default for DiscoveryLimits {
    fn default() -> Self {
        Self {
            max_pages: 5000,
            max_items: None,
        }
    }
}

pub fn ticket_id_from_href(href: &str) -> Option<TicketId> {
    TICKET_HREF
        .captures(href)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
        .and_then(TicketId::new)
}

/// First ticket link of the row, if any.
fn row_ticket(row: &ListingRow) -> Option<TicketId> {
    row.links.iter().find_map(|href| ticket_id_from_href(href))
}

/// Click a pagination control and wait for the first row to change.
///
/// Returns `false` when the click failed or the listing did not change
/// before the deadline.
async fn click_and_wait(
    session: &mut dyn RemoteSession,
    control: &Control,
    wait: &WaitConfig,
) -> Result<bool, RemoteError> {
    let before = session.first_row_text().await?.unwrap_or_default();
    if !session.click(control).await? {
        return Ok(false);
    }
    let deadline = Deadline::after(wait.page_change, wait.poll);
    loop {
        if let Some(after) = session.first_row_text().await? {
            if !after.is_empty() && after != before {
                return Ok(true);
            }
        }
        if !deadline.tick().await {
            return Ok(false);
        }
    }
}

/// Learn the page count and leave the listing on page 1.
async fn goto_first_and_count_pages(
    session: &mut dyn RemoteSession,
    wait: &WaitConfig,
) -> Result<u32, RemoteError> {
    let Some(mut controls) = session.pagination().await? else {
        return Ok(1);
    };

    if let Some(last) = controls.last.clone() {
        click_and_wait(session, &last, wait).await?;
        if let Some(refreshed) = session.pagination().await? {
            controls = refreshed;
        }
    }
    let total = controls.max_page();

    let back = controls.first.clone().or_else(|| controls.page(1).cloned());
    if let Some(back) = back {
        // Already on page 1 when the listing had no "last" jump; the wait
        // then simply runs out.
        if controls.current() != Some(1) {
            click_and_wait(session, &back, wait).await?;
        }
    }
    Ok(total)
}

/// Collect the ticket ids of the currently opened listing.
///
/// The result is ascending, deduplicated, and holds at most
/// `limits.max_items` ids. At most `min(total_pages, limits.max_pages)`
/// pages are scraped.
pub async fn discover(
    session: &mut dyn RemoteSession,
    limits: &DiscoveryLimits,
    wait: &WaitConfig,
) -> Result<Vec<TicketId>, RemoteError> {
    let mut ids = BTreeSet::new();
    let total_pages = goto_first_and_count_pages(session, wait).await?;
    tracing::debug!(total_pages, "Listing pagination");

    let mut page = 1u32;
    while page <= total_pages && page <= limits.max_pages {
        if limits.max_items.is_some_and(|max| ids.len() >= max) {
            break;
        }

        for row in session.listing_rows().await? {
            if let Some(id) = row_ticket(&row) {
                ids.insert(id);
            }
        }

        if page == total_pages || page == limits.max_pages {
            break;
        }
        let Some(next) = session.pagination().await?.and_then(|c| c.next) else {
            tracing::debug!(page, "No 'next' control; stopping");
            break;
        };
        if !click_and_wait(session, &next, wait).await? {
            tracing::debug!(page, "Listing did not advance; stopping");
            break;
        }
        page += 1;
    }

    let mut out: Vec<TicketId> = ids.into_iter().collect();
    if let Some(max) = limits.max_items {
        out.truncate(max);
    }
    Ok(out)
}
