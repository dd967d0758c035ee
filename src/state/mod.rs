//! Resumable progress: which codes are finished and which tickets have been
//! exported. This is the only state carried from one run to the next.

mod checkpoint;
mod error;

pub use checkpoint::{CheckpointState, CheckpointStore};
