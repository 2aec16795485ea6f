use std::sync::Arc;

use anyhow::{Context, Result};

use crate::attachment_store::AttachmentStore;
use crate::extractor::{file_extension, MessageExtractor};
use crate::gmail_client::MailboxGateway;
use crate::ledger::{DownloadLedger, LedgerRow};
use crate::logging::{EventLog, QueryLog};

/// One search invocation: the query string, the normalized extension
/// filter, and the dry-run flag. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct Query {
    query: String,
    file_types: Vec<String>,
    dry_run: bool,
}

impl Query {
    /// `file_types` is the raw comma-separated filter (e.g. `"pdf, .DOCX"`);
    /// each entry is normalized to lower case with a leading dot. An empty
    /// or absent filter keeps every attachment.
    pub fn new(query: impl Into<String>, file_types: Option<&str>, dry_run: bool) -> Self {
        let file_types = file_types
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(normalize_extension)
            .collect();

        Query {
            query: query.into(),
            file_types,
            dry_run,
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn file_types(&self) -> &[String] {
        &self.file_types
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }
}

fn normalize_extension(entry: &str) -> String {
    let lowered = entry.to_lowercase();
    if lowered.starts_with('.') {
        lowered
    } else {
        format!(".{}", lowered)
    }
}

/// Drives the end-to-end flow: list matching messages, extract sender
/// and attachment descriptors per message, filter by type, download,
/// persist and record each surviving attachment.
///
/// A failure on one message or one attachment is logged and skipped;
/// nothing after gateway construction aborts the run. In dry-run mode
/// every step runs except the byte write and the record append.
pub struct AttachmentDownloader {
    gateway: Arc<dyn MailboxGateway>,
    extractor: MessageExtractor,
    store: AttachmentStore,
    ledger: DownloadLedger,
    query_log: QueryLog,
    log: Arc<dyn EventLog>,
}

impl AttachmentDownloader {
    pub fn new(
        gateway: Arc<dyn MailboxGateway>,
        store: AttachmentStore,
        ledger: DownloadLedger,
        query_log: QueryLog,
        log: Arc<dyn EventLog>,
    ) -> Self {
        AttachmentDownloader {
            gateway,
            extractor: MessageExtractor::new(log.clone()),
            store,
            ledger,
            query_log,
            log,
        }
    }

    /// Runs the pipeline for one query and returns how many attachments
    /// were downloaded (or, in dry-run, would have been).
    pub async fn run(&self, query: &Query) -> Result<usize> {
        if query.dry_run() {
            self.log.info("🧪 Starting dry run: nothing will be written");
        } else {
            self.ledger
                .ensure_initialized()
                .context("Unable to initialize the download record")?;
        }

        let message_ids = self
            .gateway
            .list_messages(query.query())
            .await
            .context("Error searching for messages")?;

        self.log.info(&format!(
            "Found {} message(s) for query '{}'",
            message_ids.len(),
            query.query()
        ));
        if let Err(e) = self.query_log.record(query.query(), message_ids.len()) {
            self.log
                .error(&format!("Unable to append to the query log: {}", e));
        }

        let mut processed = 0;
        for message_id in &message_ids {
            processed += self.process_message(message_id, query).await;
        }

        self.log.info(&format!(
            "Processing finished: {} attachment(s) {}",
            processed,
            if query.dry_run() {
                "would have been downloaded"
            } else {
                "downloaded"
            }
        ));

        Ok(processed)
    }

    /// Handles one message end to end, returning the number of
    /// attachments it contributed. Never propagates an error.
    async fn process_message(&self, message_id: &str, query: &Query) -> usize {
        let message = match self.gateway.get_message(message_id).await {
            Ok(message) => message,
            Err(e) => {
                self.log
                    .error(&format!("Skipping message {}: {}", message_id, e));
                return 0;
            }
        };

        let sender = self.extractor.extract_sender(&message);
        let subject = self.extractor.extract_subject(&message);

        if !self.extractor.has_attachments(&message) {
            self.log
                .info(&format!("Message {} has no attachments, skipping", message_id));
            return 0;
        }

        let descriptors = self.extractor.attachment_parts(&message);
        let descriptors = self.extractor.filter_by_type(descriptors, query.file_types());
        if descriptors.is_empty() {
            self.log.info(&format!(
                "Message {} has no attachments matching the type filter, skipping",
                message_id
            ));
            return 0;
        }

        let mut processed = 0;
        for descriptor in descriptors {
            if query.dry_run() {
                self.log.info(&format!(
                    "[dry run] Would download attachment '{}' from {} <{}> (message {})",
                    descriptor.filename, sender.name, sender.email, message_id
                ));
                processed += 1;
                continue;
            }

            let bytes = match self
                .gateway
                .get_attachment_data(message_id, &descriptor.attachment_id)
                .await
            {
                Ok(bytes) => bytes,
                Err(e) => {
                    self.log.error(&format!(
                        "Skipping attachment '{}' of message {}: {}",
                        descriptor.filename, message_id, e
                    ));
                    continue;
                }
            };

            let stored = match self
                .store
                .save_attachment(&bytes, &descriptor.filename, &sender.name)
            {
                Ok(stored) => stored,
                Err(e) => {
                    self.log.error(&format!(
                        "Unable to save attachment '{}' of message {}: {}",
                        descriptor.filename, message_id, e
                    ));
                    continue;
                }
            };

            let row = LedgerRow {
                timestamp: stored.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                message_id: message_id.to_string(),
                sender: sender.name.clone(),
                sender_email: sender.email.clone(),
                subject: subject.clone(),
                attachment_name: stored.stored_filename.clone(),
                original_filename: descriptor.filename.clone(),
                file_size: stored.size,
                file_type: file_extension(&descriptor.filename),
                download_path: stored.path.display().to_string(),
            };
            if let Err(e) = self.ledger.record(&row) {
                self.log.error(&format!(
                    "Downloaded '{}' but could not record it: {}",
                    descriptor.filename, e
                ));
            }

            processed += 1;
        }

        processed
    }
}
