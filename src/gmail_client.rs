use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use google_gmail1::api::Message;
use google_gmail1::{hyper, hyper_rustls, oauth2, Gmail};
use thiserror::Error;

use crate::config::{CredentialsMode, GmailConfig};
use crate::encryption::CredentialEncryptor;
use crate::logging::EventLog;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Gmail API {operation} failed: {cause}")]
    RemoteService { operation: String, cause: String },

    #[error("Gmail API {operation} returned no {missing}")]
    MissingData { operation: String, missing: String },
}

impl GatewayError {
    fn remote(operation: &str, cause: impl std::fmt::Display) -> Self {
        GatewayError::RemoteService {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }
}

/// Capability the pipeline needs from the mailbox service: list message
/// ids for a query, fetch a message's structured payload, fetch a named
/// attachment's bytes. One remote request per call, no internal retry;
/// transient and permanent failures are not distinguished.
#[async_trait]
pub trait MailboxGateway: Send + Sync {
    async fn list_messages(&self, query: &str) -> Result<Vec<String>, GatewayError>;
    async fn get_message(&self, message_id: &str) -> Result<Message, GatewayError>;
    async fn get_attachment_data(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Vec<u8>, GatewayError>;
}

pub struct GmailClient {
    hub: Gmail<hyper_rustls::HttpsConnector<hyper::client::HttpConnector>>,
    log: Arc<dyn EventLog>,
}

impl std::fmt::Debug for GmailClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GmailClient").finish_non_exhaustive()
    }
}

impl GmailClient {
    /// Connects to the Gmail API via OAuth2. Construction failure is the
    /// one gateway failure that aborts a run before listing begins.
    ///
    /// With `credentials_mode: encrypted`, the credential file is first
    /// decrypted to a temporary file (key from `GMAIL_ENCRYPTION_KEY` or
    /// a password prompt) which is removed again once the secret is read.
    pub async fn new(config: &GmailConfig, log: Arc<dyn EventLog>) -> Result<Self> {
        log.info("Connecting to Gmail API via OAuth2");

        let secret = match config.credentials_mode {
            CredentialsMode::Plain => {
                let path = config
                    .credentials_file
                    .as_deref()
                    .context("gmail.credentials_file is not configured")?;
                oauth2::read_application_secret(path)
                    .await
                    .context("Unable to read OAuth2 client credentials file")?
            }
            CredentialsMode::Encrypted => {
                let encrypted_path = config
                    .encrypted_credentials_file
                    .as_deref()
                    .context("gmail.encrypted_credentials_file is not configured")?;

                let temp_file = tempfile::NamedTempFile::new()
                    .context("Unable to create temporary file for decrypted credentials")?;
                let encryptor = CredentialEncryptor::new(log.clone());
                encryptor
                    .decrypt_file(
                        std::path::Path::new(encrypted_path),
                        Some(temp_file.path()),
                        None,
                    )
                    .context("Unable to decrypt credentials file")?;

                // A wrong key that still authenticates (key reuse across
                // files) yields garbage plaintext; reject it before the
                // OAuth2 layer produces a confusing parse error.
                let plaintext = std::fs::read(temp_file.path())
                    .context("Unable to read decrypted credentials file")?;
                serde_json::from_slice::<serde_json::Value>(&plaintext)
                    .context("Decrypted credentials are not valid JSON")?;

                // temp_file unlinks the plaintext when it goes out of scope
                oauth2::read_application_secret(temp_file.path())
                    .await
                    .context("Unable to read decrypted OAuth2 client credentials")?
            }
        };

        let auth = oauth2::InstalledFlowAuthenticator::builder(
            secret,
            oauth2::InstalledFlowReturnMethod::HTTPRedirect,
        )
        .persist_tokens_to_disk(&config.token_cache_path)
        .build()
        .await
        .context("Unable to create OAuth2 authenticator")?;

        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()?
            .https_or_http()
            .enable_http1()
            .build();

        let client = hyper::Client::builder().build(connector);
        let hub = Gmail::new(client, auth);

        log.info("✅ Gmail API connection established successfully");

        Ok(GmailClient { hub, log })
    }
}

#[async_trait]
impl MailboxGateway for GmailClient {
    async fn list_messages(&self, query: &str) -> Result<Vec<String>, GatewayError> {
        let started = Instant::now();

        let result = self
            .hub
            .users()
            .messages_list("me")
            .q(query)
            .add_scope(google_gmail1::api::Scope::Readonly)
            .doit()
            .await
            .map_err(|e| GatewayError::remote("messages.list", e))?;

        let message_ids: Vec<String> = result
            .1
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|msg| msg.id)
            .collect();

        self.log.info(&format!(
            "🔍 messages.list('{}') found {} message(s) in {:?}",
            query,
            message_ids.len(),
            started.elapsed()
        ));

        Ok(message_ids)
    }

    async fn get_message(&self, message_id: &str) -> Result<Message, GatewayError> {
        let started = Instant::now();

        let result = self
            .hub
            .users()
            .messages_get("me", message_id)
            .format("full")
            .add_scope(google_gmail1::api::Scope::Readonly)
            .doit()
            .await
            .map_err(|e| GatewayError::remote("messages.get", e))?;

        self.log.info(&format!(
            "📨 messages.get('{}') completed in {:?}",
            message_id,
            started.elapsed()
        ));

        Ok(result.1)
    }

    async fn get_attachment_data(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Vec<u8>, GatewayError> {
        let started = Instant::now();

        let result = self
            .hub
            .users()
            .messages_attachments_get("me", message_id, attachment_id)
            .add_scope(google_gmail1::api::Scope::Readonly)
            .doit()
            .await
            .map_err(|e| GatewayError::remote("messages.attachments.get", e))?;

        // The client library already decodes the base64url body
        let data = result.1.data.ok_or_else(|| GatewayError::MissingData {
            operation: "messages.attachments.get".to_string(),
            missing: "attachment data".to_string(),
        })?;

        self.log.info(&format!(
            "📎 messages.attachments.get('{}') fetched {} bytes in {:?}",
            attachment_id,
            data.len(),
            started.elapsed()
        ));

        Ok(data)
    }
}
