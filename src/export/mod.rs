//! Export one ticket to `<output>/assessor_<code>/ticket_<id>.pdf`.

mod error;

pub use error::ExportError;

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::AsyncReadExt;

use crate::remote::{self, Endpoints, RemoteSession};
use crate::retry::RetryConfig;
use crate::types::{AssessorCode, DelayRange, TicketId};
use crate::wait::WaitConfig;

/// Smallest file accepted as a rendered ticket.
pub const MIN_PDF_BYTES: u64 = 2048;
const PDF_MAGIC: &[u8] = b"%PDF-";

#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub output_dir: PathBuf,
    pub endpoints: Endpoints,
    /// Pause after each rendered PDF.
    pub after_print: DelayRange,
    pub wait: WaitConfig,
    /// Backoff shape for page loads; the attempt counts are fixed per step.
    pub nav_retry: RetryConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub size: u64,
    /// The file was already on disk and valid; nothing was rendered.
    pub reused: bool,
}

pub fn assessor_dir(output_dir: &Path, code: &AssessorCode) -> PathBuf {
    output_dir.join(format!("assessor_{}", code))
}

pub fn artifact_path(output_dir: &Path, code: &AssessorCode, id: TicketId) -> PathBuf {
    assessor_dir(output_dir, code).join(format!("ticket_{}.pdf", id))
}

/// Size of the file if it looks like a complete PDF, `None` otherwise
/// (missing, too small, wrong header, unreadable).
pub async fn valid_pdf_size(path: &Path) -> Option<u64> {
    let size = tokio::fs::metadata(path).await.ok()?.len();
    if size < MIN_PDF_BYTES {
        return None;
    }
    let mut file = tokio::fs::File::open(path).await.ok()?;
    let mut magic = [0u8; 5];
    file.read_exact(&mut magic).await.ok()?;
    (magic == PDF_MAGIC).then_some(size)
}

/// Write through a `.part` sibling so a crash never leaves a truncated PDF
/// under the final name.
async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let part_path = path.with_extension("pdf.part");
    tokio::fs::write(&part_path, bytes).await?;
    tokio::fs::rename(&part_path, path).await
}

/// Load the ticket in the current tab: print view first, then the agent
/// view followed by the print view again.
async fn load_ticket(
    session: &mut dyn RemoteSession,
    config: &ExportConfig,
    id: TicketId,
) -> Result<(), ExportError> {
    let print = config.endpoints.ticket_print(id);
    if remote::navigate(session, &print, &config.nav_retry.with_retries(1)).await? {
        return Ok(());
    }
    tracing::debug!(ticket = id.get(), "Print view failed, going through the agent view");
    let view = config.endpoints.ticket_view(id);
    remote::navigate(session, &view, &config.nav_retry.with_retries(2)).await?;
    if remote::navigate(session, &print, &config.nav_retry.with_retries(2)).await? {
        return Ok(());
    }
    Err(ExportError::Navigation { ticket: id.get() })
}

async fn render_in_tab(
    session: &mut dyn RemoteSession,
    config: &ExportConfig,
    id: TicketId,
) -> Result<Vec<u8>, ExportError> {
    load_ticket(session, config, id).await?;
    if !remote::wait_page_ready(session, &config.wait).await? {
        tracing::debug!(ticket = id.get(), "Page not ready in time, printing anyway");
    }
    tokio::time::sleep(Duration::from_millis(200).min(config.wait.document_ready)).await;
    Ok(session.render_pdf().await?)
}

/// Produce the PDF for one ticket.
///
/// A valid file already on disk is returned as-is without touching the
/// session. Otherwise the ticket is rendered in a separate tab, written
/// atomically, and re-validated; an invalid result is deleted.
pub async fn export(
    session: &mut dyn RemoteSession,
    config: &ExportConfig,
    code: &AssessorCode,
    id: TicketId,
) -> Result<Artifact, ExportError> {
    let path = artifact_path(&config.output_dir, code, id);
    if let Some(size) = valid_pdf_size(&path).await {
        tracing::debug!(ticket = id.get(), "Already exported: {}", path.display());
        return Ok(Artifact {
            path,
            size,
            reused: true,
        });
    }
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    session.open_isolated_tab().await?;
    let rendered = render_in_tab(session, config, id).await;
    let closed = session.close_isolated_tab().await;
    let bytes = rendered?;
    if let Err(e) = closed {
        if e.is_session_lost() {
            return Err(e.into());
        }
        tracing::warn!(ticket = id.get(), "Failed to close export tab: {}", e);
    }

    write_atomic(&path, &bytes).await?;
    config.after_print.sleep().await;

    match valid_pdf_size(&path).await {
        Some(size) => Ok(Artifact {
            path,
            size,
            reused: false,
        }),
        None => {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                tracing::warn!("Failed to remove invalid PDF {}: {}", path.display(), e);
            }
            Err(ExportError::InvalidArtifact { path })
        }
    }
}
