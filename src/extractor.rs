use std::sync::Arc;

use google_gmail1::api::Message;

use crate::logging::EventLog;

/// Sender identity derived from the `From` header. Always populated:
/// malformed or missing headers degrade to the fixed fallback pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderInfo {
    pub name: String,
    pub email: String,
}

impl SenderInfo {
    pub fn fallback() -> Self {
        SenderInfo {
            name: "Unknown".to_string(),
            email: "unknown@example.com".to_string(),
        }
    }
}

/// One downloadable part of a message: its original filename plus the
/// attachment id used to fetch the bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentDescriptor {
    pub filename: String,
    pub attachment_id: String,
}

/// Pulls sender, subject and attachment descriptors out of a Gmail
/// message payload. Never fails: malformed input is logged and degrades
/// to documented fallbacks so one bad message cannot abort a run.
pub struct MessageExtractor {
    log: Arc<dyn EventLog>,
}

impl MessageExtractor {
    pub fn new(log: Arc<dyn EventLog>) -> Self {
        MessageExtractor { log }
    }

    /// Parses the `From` header.
    ///
    /// - `"Name <email>"` → name before `<` (trimmed; local part of the
    ///   email when empty), email inside the brackets
    /// - bare `"email"` → local part as display name
    /// - missing or unusable header → `("Unknown", "unknown@example.com")`
    pub fn extract_sender(&self, message: &Message) -> SenderInfo {
        let Some(raw) = self.header_value(message, "From") else {
            self.log
                .warn("No From header found, using fallback sender info");
            return SenderInfo::fallback();
        };

        let raw = raw.trim();
        let (name, email) = match (raw.find('<'), raw.rfind('>')) {
            (Some(open), Some(close)) if open < close => {
                let name = raw[..open].trim().trim_matches('"').trim();
                let email = raw[open + 1..close].trim();
                (name.to_string(), email.to_string())
            }
            _ => (String::new(), raw.to_string()),
        };

        if email.is_empty() {
            self.log
                .error(&format!("Malformed From header: '{}', using fallback", raw));
            return SenderInfo::fallback();
        }

        let name = if name.is_empty() {
            local_part(&email).to_string()
        } else {
            name
        };

        SenderInfo { name, email }
    }

    /// Value of the `Subject` header, or `"No Subject"` if absent.
    pub fn extract_subject(&self, message: &Message) -> String {
        self.header_value(message, "Subject")
            .unwrap_or_else(|| "No Subject".to_string())
    }

    pub fn has_attachments(&self, message: &Message) -> bool {
        !self.attachment_parts(message).is_empty()
    }

    /// Collects descriptors for every top-level part carrying both a
    /// filename and an attachment id.
    ///
    /// Nested multipart messages (attachments inside a forwarded message
    /// part) are not recursed into; this is a known scope limit.
    pub fn attachment_parts(&self, message: &Message) -> Vec<AttachmentDescriptor> {
        let Some(parts) = message
            .payload
            .as_ref()
            .and_then(|payload| payload.parts.as_ref())
        else {
            return Vec::new();
        };

        parts
            .iter()
            .filter_map(|part| {
                let filename = part.filename.as_deref().filter(|name| !name.is_empty())?;
                let attachment_id = part
                    .body
                    .as_ref()
                    .and_then(|body| body.attachment_id.as_deref())?;
                Some(AttachmentDescriptor {
                    filename: filename.to_string(),
                    attachment_id: attachment_id.to_string(),
                })
            })
            .collect()
    }

    /// Keeps descriptors whose filename extension (lower-cased, with the
    /// leading dot) is in `allowed_extensions`. An empty filter keeps
    /// everything. A filename with no dot has the empty extension and
    /// matches nothing unless `""` is explicitly in the set.
    pub fn filter_by_type(
        &self,
        descriptors: Vec<AttachmentDescriptor>,
        allowed_extensions: &[String],
    ) -> Vec<AttachmentDescriptor> {
        if allowed_extensions.is_empty() {
            return descriptors;
        }

        descriptors
            .into_iter()
            .filter(|descriptor| {
                let extension = file_extension(&descriptor.filename);
                allowed_extensions.iter().any(|allowed| *allowed == extension)
            })
            .collect()
    }

    fn header_value(&self, message: &Message, name: &str) -> Option<String> {
        message
            .payload
            .as_ref()?
            .headers
            .as_ref()?
            .iter()
            .find(|header| header.name.as_deref() == Some(name))
            .and_then(|header| header.value.clone())
    }
}

/// Lower-cased extension including the leading dot, or `""` when the
/// filename has no dot.
pub fn file_extension(filename: &str) -> String {
    match filename.rfind('.') {
        Some(index) => filename[index..].to_lowercase(),
        None => String::new(),
    }
}

fn local_part(email: &str) -> &str {
    email.split('@').next().unwrap_or(email)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::system_log;
    use google_gmail1::api::{MessagePart, MessagePartBody, MessagePartHeader};

    fn extractor() -> MessageExtractor {
        MessageExtractor::new(system_log())
    }

    fn message_with_headers(headers: Vec<(&str, &str)>) -> Message {
        Message {
            payload: Some(MessagePart {
                headers: Some(
                    headers
                        .into_iter()
                        .map(|(name, value)| MessagePartHeader {
                            name: Some(name.to_string()),
                            value: Some(value.to_string()),
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn attachment_part(filename: &str, attachment_id: Option<&str>) -> MessagePart {
        MessagePart {
            filename: Some(filename.to_string()),
            body: Some(MessagePartBody {
                attachment_id: attachment_id.map(str::to_string),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn message_with_parts(parts: Vec<MessagePart>) -> Message {
        Message {
            payload: Some(MessagePart {
                parts: Some(parts),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_extract_sender_name_and_email() {
        let message = message_with_headers(vec![("From", "Alice Martin <alice@example.com>")]);
        let sender = extractor().extract_sender(&message);
        assert_eq!(sender.name, "Alice Martin");
        assert_eq!(sender.email, "alice@example.com");
    }

    #[test]
    fn test_extract_sender_trims_whitespace() {
        let message = message_with_headers(vec![("From", "  Bob  < bob@example.com >  ")]);
        let sender = extractor().extract_sender(&message);
        assert_eq!(sender.name, "Bob");
        assert_eq!(sender.email, "bob@example.com");
    }

    #[test]
    fn test_extract_sender_bare_email() {
        let message = message_with_headers(vec![("From", "carol@example.com")]);
        let sender = extractor().extract_sender(&message);
        assert_eq!(sender.name, "carol");
        assert_eq!(sender.email, "carol@example.com");
    }

    #[test]
    fn test_extract_sender_empty_name_uses_local_part() {
        let message = message_with_headers(vec![("From", "<dave@example.com>")]);
        let sender = extractor().extract_sender(&message);
        assert_eq!(sender.name, "dave");
        assert_eq!(sender.email, "dave@example.com");
    }

    #[test]
    fn test_extract_sender_missing_header_falls_back() {
        let message = message_with_headers(vec![("Subject", "hello")]);
        let sender = extractor().extract_sender(&message);
        assert_eq!(sender, SenderInfo::fallback());
    }

    #[test]
    fn test_extract_sender_empty_brackets_falls_back() {
        let message = message_with_headers(vec![("From", "Someone <>")]);
        let sender = extractor().extract_sender(&message);
        assert_eq!(sender, SenderInfo::fallback());
    }

    #[test]
    fn test_malformed_input_is_logged_not_propagated() {
        use crate::logging::test_support::CollectingLog;

        let log = Arc::new(CollectingLog::default());
        let extractor = MessageExtractor::new(log.clone());

        let message = message_with_headers(vec![("From", "Broken <>")]);
        let sender = extractor.extract_sender(&message);
        assert_eq!(sender, SenderInfo::fallback());

        let events = log.events.lock().unwrap();
        assert!(events
            .iter()
            .any(|(level, msg)| level == "error" && msg.contains("Malformed From header")));
    }

    #[test]
    fn test_extract_subject() {
        let message = message_with_headers(vec![("Subject", "Invoice March")]);
        assert_eq!(extractor().extract_subject(&message), "Invoice March");
    }

    #[test]
    fn test_extract_subject_missing_header() {
        let message = message_with_headers(vec![("From", "x@example.com")]);
        assert_eq!(extractor().extract_subject(&message), "No Subject");
    }

    #[test]
    fn test_attachment_parts_requires_filename_and_id() {
        let message = message_with_parts(vec![
            attachment_part("report.pdf", Some("att-1")),
            attachment_part("", Some("att-2")),
            attachment_part("inline.png", None),
        ]);
        let parts = extractor().attachment_parts(&message);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].filename, "report.pdf");
        assert_eq!(parts[0].attachment_id, "att-1");
    }

    #[test]
    fn test_nested_parts_are_not_recursed() {
        let nested = MessagePart {
            parts: Some(vec![attachment_part("hidden.pdf", Some("att-9"))]),
            ..Default::default()
        };
        let message = message_with_parts(vec![nested]);
        assert!(!extractor().has_attachments(&message));
    }

    #[test]
    fn test_no_payload_means_no_attachments() {
        let message = Message::default();
        assert!(!extractor().has_attachments(&message));
        assert_eq!(extractor().extract_subject(&message), "No Subject");
        assert_eq!(extractor().extract_sender(&message), SenderInfo::fallback());
    }

    #[test]
    fn test_filter_by_type_empty_filter_keeps_all() {
        let descriptors = vec![
            AttachmentDescriptor {
                filename: "a.pdf".to_string(),
                attachment_id: "1".to_string(),
            },
            AttachmentDescriptor {
                filename: "b.txt".to_string(),
                attachment_id: "2".to_string(),
            },
        ];
        let kept = extractor().filter_by_type(descriptors.clone(), &[]);
        assert_eq!(kept, descriptors);
    }

    #[test]
    fn test_filter_by_type_keeps_matching_extensions() {
        let descriptors = vec![
            AttachmentDescriptor {
                filename: "a.PDF".to_string(),
                attachment_id: "1".to_string(),
            },
            AttachmentDescriptor {
                filename: "b.txt".to_string(),
                attachment_id: "2".to_string(),
            },
            AttachmentDescriptor {
                filename: "README".to_string(),
                attachment_id: "3".to_string(),
            },
        ];
        let kept = extractor().filter_by_type(descriptors, &[".pdf".to_string()]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].filename, "a.PDF");
    }

    #[test]
    fn test_filter_by_type_no_dot_matches_empty_extension_only() {
        let descriptors = vec![AttachmentDescriptor {
            filename: "README".to_string(),
            attachment_id: "1".to_string(),
        }];
        assert!(extractor()
            .filter_by_type(descriptors.clone(), &[".txt".to_string()])
            .is_empty());
        let kept = extractor().filter_by_type(descriptors, &[String::new()]);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension("report.PDF"), ".pdf");
        assert_eq!(file_extension("archive.tar.gz"), ".gz");
        assert_eq!(file_extension("README"), "");
    }
}
