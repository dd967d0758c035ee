use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::error::CheckpointError;
use crate::types::{AssessorCode, TicketId};

pub const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Completed codes and exported tickets. Both sets only grow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointState {
    #[serde(rename = "done_assessors", default)]
    done_codes: BTreeSet<AssessorCode>,
    #[serde(rename = "processed_tickets", default)]
    processed_items: BTreeSet<TicketId>,
}

impl CheckpointState {
    pub fn is_code_done(&self, code: &AssessorCode) -> bool {
        self.done_codes.contains(code)
    }

    pub fn is_processed(&self, id: TicketId) -> bool {
        self.processed_items.contains(&id)
    }

    /// Returns `true` if the code was not already done.
    pub fn mark_code_done(&mut self, code: AssessorCode) -> bool {
        self.done_codes.insert(code)
    }

    /// Returns `true` if the ticket was not already processed.
    pub fn mark_processed(&mut self, id: TicketId) -> bool {
        self.processed_items.insert(id)
    }

    pub fn done_count(&self) -> usize {
        self.done_codes.len()
    }

    pub fn processed_count(&self) -> usize {
        self.processed_items.len()
    }

    /// Whether every code and ticket in `earlier` is still present.
    #[cfg(test)]
    pub fn contains_all(&self, earlier: &CheckpointState) -> bool {
        self.done_codes.is_superset(&earlier.done_codes)
            && self.processed_items.is_superset(&earlier.processed_items)
    }
}

/// JSON file holding a [`CheckpointState`], replaced atomically on save.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn in_dir(output_dir: &Path) -> Self {
        Self::new(output_dir.join(CHECKPOINT_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the saved state. `reset` ignores whatever is on disk.
    ///
    /// A missing file is an empty state; an unparseable one is an error.
    pub async fn load(&self, reset: bool) -> Result<CheckpointState, CheckpointError> {
        if reset {
            tracing::info!("Ignoring existing checkpoint (reset requested)");
            return Ok(CheckpointState::default());
        }
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CheckpointState::default());
            }
            Err(source) => {
                return Err(CheckpointError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        serde_json::from_slice(&raw).map_err(|source| CheckpointError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    /// Write the full state to a temporary sibling and rename it into place.
    pub async fn save(&self, state: &CheckpointState) -> Result<(), CheckpointError> {
        let write_err = |source: std::io::Error| CheckpointError::Write {
            path: self.path.clone(),
            source,
        };
        let json = serde_json::to_vec_pretty(state)
            .map_err(|e| write_err(std::io::Error::other(e)))?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await.map_err(write_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(write_err)?;
        tracing::trace!(
            codes = state.done_count(),
            tickets = state.processed_count(),
            "Checkpoint saved"
        );
        Ok(())
    }

    /// Delete the checkpoint. Returns `false` if there was none.
    pub async fn remove(&self) -> std::io::Result<bool> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}
