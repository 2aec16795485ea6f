use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::logging::EventLog;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Unable to open download record '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to write download record row: {0}")]
    Write(#[from] csv::Error),
}

pub const LEDGER_HEADER: [&str; 10] = [
    "timestamp",
    "message_id",
    "sender",
    "sender_email",
    "subject",
    "attachment_name",
    "original_filename",
    "file_size",
    "file_type",
    "download_path",
];

/// One audit row per successfully stored attachment.
#[derive(Debug, Clone)]
pub struct LedgerRow {
    pub timestamp: String,
    pub message_id: String,
    pub sender: String,
    pub sender_email: String,
    pub subject: String,
    pub attachment_name: String,
    pub original_filename: String,
    pub file_size: u64,
    pub file_type: String,
    pub download_path: String,
}

/// Append-only CSV record of every downloaded attachment.
///
/// The file is opened and closed per append, so no handle outlives a
/// single `record` call. When disabled, both operations are no-ops and
/// no file is ever created; the pipeline still calls them unconditionally
/// so its control flow is identical in both configurations.
pub struct DownloadLedger {
    path: Option<PathBuf>,
    log: Arc<dyn EventLog>,
}

impl DownloadLedger {
    pub fn new(path: impl Into<PathBuf>, log: Arc<dyn EventLog>) -> Self {
        DownloadLedger {
            path: Some(path.into()),
            log,
        }
    }

    pub fn disabled(log: Arc<dyn EventLog>) -> Self {
        DownloadLedger { path: None, log }
    }

    /// Creates the record file with its header row if it does not exist.
    /// Idempotent; a no-op on an existing file or a disabled ledger.
    pub fn ensure_initialized(&self) -> Result<(), LedgerError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if path.exists() {
            return Ok(());
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(path)
            .map_err(|source| LedgerError::Open {
                path: path.clone(),
                source,
            })?;

        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(LEDGER_HEADER)?;
        writer.flush().map_err(csv::Error::from)?;

        self.log
            .info(&format!("Created download record file {:?}", path));
        Ok(())
    }

    /// Appends one row. Prior rows are never rewritten or reordered.
    pub fn record(&self, row: &LedgerRow) -> Result<(), LedgerError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        self.ensure_initialized()?;

        let file = OpenOptions::new()
            .append(true)
            .open(path)
            .map_err(|source| LedgerError::Open {
                path: path.clone(),
                source,
            })?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer.write_record([
            row.timestamp.as_str(),
            row.message_id.as_str(),
            row.sender.as_str(),
            row.sender_email.as_str(),
            row.subject.as_str(),
            row.attachment_name.as_str(),
            row.original_filename.as_str(),
            &row.file_size.to_string(),
            row.file_type.as_str(),
            row.download_path.as_str(),
        ])?;
        writer.flush().map_err(csv::Error::from)?;

        Ok(())
    }
}
