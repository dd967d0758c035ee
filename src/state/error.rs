//! Error types for checkpoint persistence.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CheckpointError {
    /// The checkpoint exists but is not valid JSON of the expected shape.
    #[error("Checkpoint {path} is corrupt ({source}); fix or delete it, or run with --reset-checkpoint")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to read checkpoint {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write checkpoint {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}
