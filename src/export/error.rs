use std::path::PathBuf;

use thiserror::Error;

use crate::remote::RemoteError;

/// Why one ticket could not be exported.
///
/// `is_session_lost()` is the only distinction the orchestrator acts on:
/// a lost session is recovered and the ticket retried, everything else is
/// recorded as a failed ticket.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("Could not load ticket {ticket} (print and agent views both failed)")]
    Navigation { ticket: u64 },

    #[error("Invalid PDF: {path}")]
    InvalidArtifact { path: PathBuf },

    #[error("Disk error: {0}")]
    Disk(#[from] std::io::Error),
}

impl ExportError {
    pub fn is_session_lost(&self) -> bool {
        matches!(self, ExportError::Remote(e) if e.is_session_lost())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_lost_only_for_invalidated_remote() {
        let lost = ExportError::from(RemoteError::SessionInvalidated("gone".into()));
        assert!(lost.is_session_lost());

        let other = ExportError::from(RemoteError::from_webdriver("timeout", "slow"));
        assert!(!other.is_session_lost());

        assert!(!ExportError::Navigation { ticket: 7 }.is_session_lost());
        assert!(!ExportError::Disk(std::io::Error::other("disk full")).is_session_lost());
    }

    #[test]
    fn test_invalid_artifact_message_names_file() {
        let e = ExportError::InvalidArtifact {
            path: PathBuf::from("out/assessor_A1/ticket_9.pdf"),
        };
        assert!(e.to_string().contains("ticket_9.pdf"));
    }
}
