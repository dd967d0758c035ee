//! Append-only CSV result streams and the end-of-run summary.
//!
//! Every record is appended and flushed on its own, so a crash loses at most
//! the record being written. Headers are written only when a file is new.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::export::Artifact;
use crate::types::{AssessorCode, TicketId};

pub const SUCCESS_FILE: &str = "success.csv";
pub const FAILED_FILE: &str = "failed.csv";
pub const INVENTORY_FILE: &str = "all_tickets.csv";
pub const SUMMARY_FILE: &str = "summary.json";

/// Longest error text kept in a failure record.
pub const MAX_ERROR_CHARS: usize = 1000;

/// `ticket_id` of a failure that concerns a whole code.
pub const WHOLE_CODE: i64 = -1;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Failed to open {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write or parse {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },

    #[error("Failed to encode run summary: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessRecord {
    pub assessor: String,
    pub ticket_id: u64,
    pub file_path: String,
    pub byte_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub assessor: String,
    pub ticket_id: i64,
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InventoryStatus {
    Exported,
    AlreadyPresent,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub assessor: String,
    pub ticket_id: u64,
    pub file_path: String,
    pub byte_size: Option<u64>,
    pub status: InventoryStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_assessors: usize,
    pub total_expected_tickets: usize,
    pub generated_at: String,
}

impl RunSummary {
    /// Summary stamped with the current local time.
    pub fn now(total_assessors: usize, total_expected_tickets: usize) -> Self {
        Self {
            total_assessors,
            total_expected_tickets,
            generated_at: chrono::Local::now()
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
        }
    }
}

/// Cut `error` to [`MAX_ERROR_CHARS`] characters.
pub fn truncate_error(error: &str) -> String {
    error.chars().take(MAX_ERROR_CHARS).collect()
}

/// Writer for the three result streams and the summary of one output dir.
#[derive(Debug, Clone)]
pub struct ResultSink {
    dir: PathBuf,
}

impl ResultSink {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    fn append<T: Serialize>(&self, file: &str, record: &T) -> Result<(), RecordError> {
        let path = self.path(file);
        let handle = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| RecordError::Io {
                path: path.clone(),
                source,
            })?;
        let is_new = handle
            .metadata()
            .map(|m| m.len() == 0)
            .unwrap_or(true);
        let mut writer = csv::WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(handle);
        let csv_err = |source: csv::Error| RecordError::Csv {
            path: path.clone(),
            source,
        };
        writer.serialize(record).map_err(csv_err)?;
        writer.flush().map_err(|e| csv_err(e.into()))?;
        Ok(())
    }

    pub fn record_success(&self, code: &AssessorCode, id: TicketId, artifact: &Artifact) -> Result<(), RecordError> {
        self.append(
            SUCCESS_FILE,
            &SuccessRecord {
                assessor: code.to_string(),
                ticket_id: id.get(),
                file_path: artifact.path.display().to_string(),
                byte_size: artifact.size,
            },
        )
    }

    /// `id = None` records a failure of the whole code.
    pub fn record_failure(&self, code: &AssessorCode, id: Option<TicketId>, error: &str) -> Result<(), RecordError> {
        self.append(
            FAILED_FILE,
            &FailureRecord {
                assessor: code.to_string(),
                ticket_id: id.map_or(WHOLE_CODE, |t| t.get() as i64),
                error: truncate_error(error),
            },
        )
    }

    pub fn record_inventory(
        &self,
        code: &AssessorCode,
        id: TicketId,
        file_path: &Path,
        byte_size: Option<u64>,
        status: InventoryStatus,
    ) -> Result<(), RecordError> {
        self.append(
            INVENTORY_FILE,
            &InventoryRecord {
                assessor: code.to_string(),
                ticket_id: id.get(),
                file_path: file_path.display().to_string(),
                byte_size,
                status,
            },
        )
    }

    pub fn write_summary(&self, summary: &RunSummary) -> Result<(), RecordError> {
        let path = self.path(SUMMARY_FILE);
        let tmp = path.with_extension("json.tmp");
        let io_err = |source: std::io::Error| RecordError::Io {
            path: path.clone(),
            source,
        };
        std::fs::write(&tmp, serde_json::to_vec_pretty(summary)?).map_err(io_err)?;
        std::fs::rename(&tmp, &path).map_err(io_err)?;
        Ok(())
    }

    /// Read the summary, `None` if no full pass has finished yet.
    pub fn read_summary(&self) -> Result<Option<RunSummary>, RecordError> {
        let path = self.path(SUMMARY_FILE);
        match std::fs::read(&path) {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(RecordError::Io { path, source }),
        }
    }

    fn read_all<T: DeserializeOwned>(&self, file: &str) -> Result<Vec<T>, RecordError> {
        let path = self.path(file);
        let mut reader = match csv::Reader::from_path(&path) {
            Ok(r) => r,
            Err(e) if matches!(e.kind(), csv::ErrorKind::Io(io) if io.kind() == std::io::ErrorKind::NotFound) => {
                return Ok(Vec::new());
            }
            Err(source) => return Err(RecordError::Csv { path, source }),
        };
        reader
            .deserialize()
            .collect::<Result<Vec<T>, _>>()
            .map_err(|source| RecordError::Csv { path, source })
    }

    pub fn successes(&self) -> Result<Vec<SuccessRecord>, RecordError> {
        self.read_all(SUCCESS_FILE)
    }

    pub fn failures(&self) -> Result<Vec<FailureRecord>, RecordError> {
        self.read_all(FAILED_FILE)
    }

    pub fn inventory(&self) -> Result<Vec<InventoryRecord>, RecordError> {
        self.read_all(INVENTORY_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("zendesk_export_records_tests")
            .join(name);
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn tid(id: u64) -> TicketId {
        TicketId::new(id).unwrap()
    }

    #[test]
    fn test_header_written_once() {
        let dir = test_dir("header_once");
        let sink = ResultSink::new(&dir);
        let code = AssessorCode::new("A1");
        let artifact = Artifact {
            path: dir.join("assessor_A1/ticket_1.pdf"),
            size: 4096,
            reused: false,
        };
        sink.record_success(&code, tid(1), &artifact).unwrap();
        sink.record_success(&code, tid(2), &artifact).unwrap();

        let text = std::fs::read_to_string(sink.path(SUCCESS_FILE)).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "assessor,ticket_id,file_path,byte_size");
        assert_eq!(lines.len(), 3);
        assert_eq!(sink.successes().unwrap().len(), 2);
    }

    #[test]
    fn test_whole_code_failure_and_truncation() {
        let dir = test_dir("failure");
        let sink = ResultSink::new(&dir);
        let code = AssessorCode::new("B2");
        let long = "x".repeat(5000);
        sink.record_failure(&code, None, "no client found").unwrap();
        sink.record_failure(&code, Some(tid(77)), &long).unwrap();

        let failures = sink.failures().unwrap();
        assert_eq!(failures[0].ticket_id, WHOLE_CODE);
        assert_eq!(failures[0].error, "no client found");
        assert_eq!(failures[1].ticket_id, 77);
        assert_eq!(failures[1].error.chars().count(), MAX_ERROR_CHARS);
    }

    #[test]
    fn test_truncate_counts_characters() {
        let s = "é".repeat(1200);
        let t = truncate_error(&s);
        assert_eq!(t.chars().count(), 1000);
        assert_eq!(truncate_error("short"), "short");
    }

    #[test]
    fn test_inventory_status_column() {
        let dir = test_dir("inventory");
        let sink = ResultSink::new(&dir);
        let code = AssessorCode::new("C3");
        sink.record_inventory(&code, tid(5), Path::new("p.pdf"), Some(3000), InventoryStatus::AlreadyPresent)
            .unwrap();
        sink.record_inventory(&code, tid(6), Path::new("q.pdf"), None, InventoryStatus::Failed)
            .unwrap();
        let text = std::fs::read_to_string(sink.path(INVENTORY_FILE)).unwrap();
        assert!(text.starts_with("assessor,ticket_id,file_path,byte_size,status\n"));
        assert!(text.contains("C3,5,p.pdf,3000,already_present"));
        assert!(text.contains("C3,6,q.pdf,,failed"));
        assert_eq!(sink.inventory().unwrap()[1].byte_size, None);
    }

    #[test]
    fn test_missing_streams_read_empty() {
        let sink = ResultSink::new(&test_dir("missing"));
        assert!(sink.successes().unwrap().is_empty());
        assert!(sink.failures().unwrap().is_empty());
        assert!(sink.read_summary().unwrap().is_none());
    }

    #[test]
    fn test_summary_roundtrip_format() {
        let sink = ResultSink::new(&test_dir("summary"));
        let summary = RunSummary::now(4, 17);
        sink.write_summary(&summary).unwrap();
        let read = sink.read_summary().unwrap().unwrap();
        assert_eq!(read, summary);
        assert!(chrono::NaiveDateTime::parse_from_str(&read.generated_at, "%Y-%m-%d %H:%M:%S").is_ok());
    }
}
