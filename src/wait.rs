//! Bounded polling. Every "wait until X" loop in the crate goes through
//! [`Deadline`] so nothing can block forever.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    end: Instant,
    poll: Duration,
}

impl Deadline {
    pub fn after(timeout: Duration, poll: Duration) -> Self {
        Self {
            end: Instant::now() + timeout,
            poll,
        }
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.end
    }

    /// Sleep one poll interval, clamped to the deadline. Returns `false` once
    /// the deadline has passed so callers can write
    /// `loop { if ready { .. } if !deadline.tick().await { break } }`.
    pub async fn tick(&self) -> bool {
        let now = Instant::now();
        if now >= self.end {
            return false;
        }
        let remaining = self.end - now;
        tokio::time::sleep(self.poll.min(remaining)).await;
        true
    }
}

/// Timeouts and poll intervals for the waits the remote flows perform.
#[derive(Debug, Clone, Copy)]
pub struct WaitConfig {
    /// Waiting for a listing page to change after clicking a pagination control.
    pub page_change: Duration,
    /// Waiting for `document.readyState == "complete"`.
    pub document_ready: Duration,
    pub poll: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            page_change: Duration::from_secs(15),
            document_ready: Duration::from_secs(22),
            poll: Duration::from_millis(200),
        }
    }
}
