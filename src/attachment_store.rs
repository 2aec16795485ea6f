use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Local};
use thiserror::Error;

use crate::logging::EventLog;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Unable to create download directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to write attachment '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// On-disk result record for one persisted attachment.
#[derive(Debug, Clone)]
pub struct StoredAttachment {
    pub stored_filename: String,
    pub timestamp: DateTime<Local>,
    pub size: u64,
    pub path: PathBuf,
}

/// Decides where attachments land and writes them.
///
/// With per-sender organization enabled each sender gets a sanitized
/// subdirectory under the base directory; disabled, everything lands
/// directly in the base directory (cross-sender name collisions are
/// accepted in that mode).
pub struct AttachmentStore {
    base_dir: PathBuf,
    organize_by_sender: bool,
    log: Arc<dyn EventLog>,
}

impl AttachmentStore {
    pub fn new(base_dir: impl Into<PathBuf>, organize_by_sender: bool, log: Arc<dyn EventLog>) -> Self {
        AttachmentStore {
            base_dir: base_dir.into(),
            organize_by_sender,
            log,
        }
    }

    /// Destination directory for a sender, created if absent.
    pub fn destination_directory(&self, sender_name: &str) -> Result<PathBuf, StoreError> {
        let directory = if self.organize_by_sender {
            self.base_dir.join(sanitize_sender_name(sender_name))
        } else {
            self.base_dir.clone()
        };

        fs::create_dir_all(&directory).map_err(|source| StoreError::CreateDirectory {
            path: directory.clone(),
            source,
        })?;

        Ok(directory)
    }

    /// Writes the attachment bytes under a timestamp-prefixed filename
    /// and reports what was stored. All-or-nothing from the caller's
    /// perspective: on failure no `StoredAttachment` is produced.
    pub fn save_attachment(
        &self,
        bytes: &[u8],
        original_filename: &str,
        sender_name: &str,
    ) -> Result<StoredAttachment, StoreError> {
        self.save_attachment_at(bytes, original_filename, sender_name, Local::now())
    }

    /// Timestamp-injected variant backing `save_attachment`; the stored
    /// filename is fully determined by its inputs.
    pub fn save_attachment_at(
        &self,
        bytes: &[u8],
        original_filename: &str,
        sender_name: &str,
        timestamp: DateTime<Local>,
    ) -> Result<StoredAttachment, StoreError> {
        let started = Instant::now();

        let directory = self.destination_directory(sender_name)?;
        let stored_filename = format!(
            "{}_{}",
            timestamp.format("%Y-%m-%d %H:%M:%S"),
            original_filename
        );
        let path = directory.join(&stored_filename);

        fs::write(&path, bytes).map_err(|source| StoreError::WriteFile {
            path: path.clone(),
            source,
        })?;

        let path = fs::canonicalize(&path).unwrap_or(path);

        self.log.info(&format!(
            "💾 Saved attachment '{}' ({} bytes) to {:?} in {:?}",
            stored_filename,
            bytes.len(),
            path,
            started.elapsed()
        ));

        Ok(StoredAttachment {
            stored_filename,
            timestamp,
            size: bytes.len() as u64,
            path,
        })
    }

}

/// Sender names become directory names: keep alphanumerics, spaces,
/// periods and hyphens, replace everything else with underscores, then
/// trim surrounding whitespace.
pub fn sanitize_sender_name(sender_name: &str) -> String {
    let sanitized: String = sender_name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == ' ' || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let trimmed = sanitized.trim();
    if trimmed.is_empty() {
        // SenderInfo is never empty, but sanitization of pure whitespace
        // could be; keep the fallback name rather than an empty path segment.
        "Unknown".to_string()
    } else {
        trimmed.to_string()
    }
}
