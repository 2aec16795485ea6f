use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub gmail: GmailConfig,
    #[serde(default)]
    pub downloads: DownloadsConfig,
    #[serde(default)]
    pub csv_record: CsvRecordConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CredentialsMode {
    Plain,
    Encrypted,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GmailConfig {
    #[serde(default = "default_credentials_mode")]
    pub credentials_mode: CredentialsMode,
    pub credentials_file: Option<String>,
    pub encrypted_credentials_file: Option<String>,
    #[serde(default = "default_token_cache")]
    pub token_cache_path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DownloadsConfig {
    #[serde(default = "default_output_directory")]
    pub output_directory: String,
    #[serde(default = "default_true")]
    pub organize_by_sender: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CsvRecordConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_record_filename")]
    pub filename: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Dedicated audit-style query log, independent of the system log.
    /// Set to an empty string to disable it.
    #[serde(default = "default_query_log_file")]
    pub query_log_file: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SearchConfig {
    pub query: Option<String>,
    /// Comma-separated extensions, e.g. ".pdf,.docx". Empty keeps everything.
    pub file_types: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
}

fn default_credentials_mode() -> CredentialsMode {
    CredentialsMode::Plain
}

fn default_token_cache() -> String {
    "./gmail-token-cache.json".to_string()
}

fn default_output_directory() -> String {
    "./downloads".to_string()
}

fn default_record_filename() -> String {
    "download_record.csv".to_string()
}

fn default_query_log_file() -> String {
    "queries.log".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for DownloadsConfig {
    fn default() -> Self {
        DownloadsConfig {
            output_directory: default_output_directory(),
            organize_by_sender: true,
        }
    }
}

impl Default for CsvRecordConfig {
    fn default() -> Self {
        CsvRecordConfig {
            enabled: true,
            filename: default_record_filename(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            query_log_file: default_query_log_file(),
        }
    }
}

impl Config {
    /// Loads the YAML configuration file, merged with `MAILHARVEST_*`
    /// environment overrides (e.g. `MAILHARVEST_SEARCH__QUERY`).
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(Path::new(path)))
            .add_source(config::Environment::with_prefix("MAILHARVEST").separator("__"))
            .build()
            .with_context(|| format!("Unable to read configuration file: {}", path))?;

        let config: Config = settings
            .try_deserialize()
            .context("Invalid configuration file structure")?;

        config.validate()?;
        Ok(config)
    }

    /// Configuration errors are the only failures allowed to abort before
    /// any processing begins.
    fn validate(&self) -> Result<()> {
        match self.gmail.credentials_mode {
            CredentialsMode::Plain => {
                if self.gmail.credentials_file.is_none() {
                    anyhow::bail!(
                        "Missing configuration key: gmail.credentials_file\n\
                         \n\
                         💡 Solutions:\n\
                         1. Point gmail.credentials_file at your OAuth2 client credentials JSON\n\
                         2. Or encrypt the credentials and set:\n\
                            gmail.credentials_mode: encrypted\n\
                            gmail.encrypted_credentials_file: /path/to/credentials.json.encrypted"
                    );
                }
            }
            CredentialsMode::Encrypted => {
                if self.gmail.encrypted_credentials_file.is_none() {
                    anyhow::bail!(
                        "Missing configuration key: gmail.encrypted_credentials_file\n\
                         \n\
                         💡 credentials_mode is 'encrypted' but no ciphertext path is set.\n\
                         Run the `encrypt` subcommand first, or switch credentials_mode to 'plain'."
                    );
                }
            }
        }
        Ok(())
    }
}

/// Rewrites the configuration file after credential encryption: sets
/// `gmail.credentials_mode: encrypted` and points
/// `gmail.encrypted_credentials_file` at the ciphertext's absolute path,
/// so subsequent runs pick up the encrypted credentials automatically.
/// All other keys are preserved.
pub fn update_for_encrypted_credentials(config_path: &str, encrypted_path: &Path) -> Result<()> {
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("Unable to read configuration file: {}", config_path))?;
    let mut document: serde_yaml::Value =
        serde_yaml::from_str(&content).context("Invalid YAML in configuration file")?;

    let mapping = document
        .as_mapping_mut()
        .context("Configuration file is not a YAML mapping")?;

    let gmail_key = serde_yaml::Value::from("gmail");
    if !mapping.contains_key(&gmail_key) {
        mapping.insert(
            gmail_key.clone(),
            serde_yaml::Value::Mapping(serde_yaml::Mapping::new()),
        );
    }
    let gmail = mapping
        .get_mut(&gmail_key)
        .and_then(|value| value.as_mapping_mut())
        .context("'gmail' section is not a YAML mapping")?;

    let absolute_path = fs::canonicalize(encrypted_path)
        .unwrap_or_else(|_| encrypted_path.to_path_buf())
        .display()
        .to_string();
    gmail.insert(
        serde_yaml::Value::from("credentials_mode"),
        serde_yaml::Value::from("encrypted"),
    );
    gmail.insert(
        serde_yaml::Value::from("encrypted_credentials_file"),
        serde_yaml::Value::from(absolute_path),
    );

    let updated = serde_yaml::to_string(&document).context("Unable to serialize configuration")?;
    fs::write(config_path, updated)
        .with_context(|| format!("Unable to write configuration file: {}", config_path))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let file = write_config("gmail:\n  credentials_file: ./credentials.json\n");
        let config = Config::load(file.path().to_str().unwrap()).unwrap();

        assert_eq!(config.gmail.credentials_mode, CredentialsMode::Plain);
        assert_eq!(config.downloads.output_directory, "./downloads");
        assert!(config.downloads.organize_by_sender);
        assert!(config.csv_record.enabled);
        assert_eq!(config.csv_record.filename, "download_record.csv");
        assert_eq!(config.logging.query_log_file, "queries.log");
        assert!(!config.search.dry_run);
    }

    #[test]
    fn test_query_log_can_be_disabled_with_empty_string() {
        let file = write_config(
            "gmail:\n  credentials_file: ./credentials.json\nlogging:\n  query_log_file: \"\"\n",
        );
        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert!(config.logging.query_log_file.is_empty());
    }

    #[test]
    fn test_update_for_encrypted_credentials_rewrites_config() {
        let file = write_config(
            "gmail:\n\
             \x20 credentials_file: ./credentials.json\n\
             downloads:\n\
             \x20 output_directory: /tmp/attachments\n",
        );
        let dir = tempfile::tempdir().unwrap();
        let ciphertext = dir.path().join("credentials.json.encrypted");
        std::fs::write(&ciphertext, b"ciphertext").unwrap();

        update_for_encrypted_credentials(file.path().to_str().unwrap(), &ciphertext).unwrap();

        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.gmail.credentials_mode, CredentialsMode::Encrypted);
        let recorded = config.gmail.encrypted_credentials_file.unwrap();
        assert!(recorded.ends_with("credentials.json.encrypted"));
        assert!(Path::new(&recorded).is_absolute());
        // Unrelated keys survive the rewrite
        assert_eq!(config.downloads.output_directory, "/tmp/attachments");
        assert_eq!(config.gmail.credentials_file.as_deref(), Some("./credentials.json"));
    }

    #[test]
    fn test_update_for_encrypted_credentials_missing_config_fails() {
        let dir = tempfile::tempdir().unwrap();
        let ciphertext = dir.path().join("c.enc");
        std::fs::write(&ciphertext, b"x").unwrap();

        let result =
            update_for_encrypted_credentials("/nonexistent/config.yaml", &ciphertext);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_credentials_file_is_fatal() {
        let file = write_config("gmail:\n  token_cache_path: ./cache.json\n");
        let result = Config::load(file.path().to_str().unwrap());
        assert!(result.is_err());
    }

    #[test]
    fn test_encrypted_mode_requires_ciphertext_path() {
        let file = write_config(
            "gmail:\n  credentials_mode: encrypted\n  credentials_file: ./credentials.json\n",
        );
        let result = Config::load(file.path().to_str().unwrap());
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("encrypted_credentials_file"));
    }

    #[test]
    fn test_full_config_round_trip() {
        let file = write_config(
            "gmail:\n\
             \x20 credentials_mode: encrypted\n\
             \x20 encrypted_credentials_file: ./credentials.json.encrypted\n\
             downloads:\n\
             \x20 output_directory: /tmp/attachments\n\
             \x20 organize_by_sender: false\n\
             csv_record:\n\
             \x20 enabled: false\n\
             \x20 filename: audit.csv\n\
             search:\n\
             \x20 query: has:attachment\n\
             \x20 file_types: .pdf,.docx\n\
             \x20 dry_run: true\n",
        );
        let config = Config::load(file.path().to_str().unwrap()).unwrap();

        assert_eq!(config.gmail.credentials_mode, CredentialsMode::Encrypted);
        assert_eq!(config.downloads.output_directory, "/tmp/attachments");
        assert!(!config.downloads.organize_by_sender);
        assert!(!config.csv_record.enabled);
        assert_eq!(config.csv_record.filename, "audit.csv");
        assert_eq!(config.search.query.as_deref(), Some("has:attachment"));
        assert_eq!(config.search.file_types.as_deref(), Some(".pdf,.docx"));
        assert!(config.search.dry_run);
    }
}
