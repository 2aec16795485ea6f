use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{error, info};

mod attachment_store;
mod config;
mod downloader;
mod encryption;
mod extractor;
mod gmail_client;
mod ledger;
mod logging;

use attachment_store::AttachmentStore;
use config::Config;
use downloader::{AttachmentDownloader, Query};
use encryption::CredentialEncryptor;
use gmail_client::GmailClient;
use ledger::DownloadLedger;
use logging::QueryLog;

#[derive(Parser)]
#[command(name = "mailharvest")]
#[command(about = "Downloads Gmail attachments matching a search query")]
#[command(version = "0.1.0")]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Search query overriding the configuration
    #[arg(short, long)]
    query: Option<String>,

    /// File types to keep (comma-separated, e.g. .pdf,.docx)
    #[arg(short = 't', long)]
    file_types: Option<String>,

    /// Dry run: report intended downloads without writing anything
    #[arg(short, long)]
    dry_run: bool,

    /// Check the configuration without connecting
    #[arg(long)]
    check_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Encrypt a file (typically the OAuth credentials) at rest
    Encrypt {
        /// Path to the file to encrypt
        #[arg(short, long)]
        file: String,

        /// Path for the encrypted output (default: <file>.encrypted)
        #[arg(short, long)]
        output: Option<String>,

        /// Directory for the key-disclosure file (default: current directory)
        #[arg(short, long)]
        key_dir: Option<String>,
    },

    /// Decrypt a previously encrypted file
    Decrypt {
        /// Path to the encrypted file
        #[arg(short, long)]
        input: String,

        /// Path for the decrypted output
        #[arg(short, long)]
        output: Option<String>,

        /// Decryption key (default: GMAIL_ENCRYPTION_KEY, then password prompt)
        #[arg(short, long)]
        key: Option<String>,
    },

    /// Generate a random encryption key
    GenerateKey,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load a .env file when present
    dotenv::dotenv().ok();

    let args = Args::parse();

    env_logger::init();

    if let Some(command) = args.command {
        return run_encryption_command(command, &args.config);
    }

    if args.dry_run {
        info!("🧪 Starting mailharvest in DRY-RUN mode");
    } else {
        info!("🚀 Starting mailharvest");
    }

    let config = Config::load(&args.config)?;

    if args.check_config {
        println!("✅ Configuration valid!");
        println!("📧 Gmail API OAuth2 ({:?} credentials)", config.gmail.credentials_mode);
        println!("📁 Output directory: {}", config.downloads.output_directory);
        println!(
            "🗂️  Organize by sender: {}",
            config.downloads.organize_by_sender
        );
        if config.csv_record.enabled {
            println!("🧾 Download record: {}", config.csv_record.filename);
        } else {
            println!("🧾 Download record: disabled");
        }
        return Ok(());
    }

    // CLI arguments take precedence over the configuration file
    let search_query = args
        .query
        .or_else(|| config.search.query.clone())
        .filter(|q| !q.is_empty());
    let Some(search_query) = search_query else {
        anyhow::bail!(
            "No search query provided. Specify search.query in the config file \
             or pass one via --query."
        );
    };
    let file_types = args.file_types.or_else(|| config.search.file_types.clone());
    let dry_run = args.dry_run || config.search.dry_run;

    let query = Query::new(search_query, file_types.as_deref(), dry_run);

    let log = logging::system_log();

    // Gateway construction is the only fatal remote failure
    let gateway = Arc::new(GmailClient::new(&config.gmail, log.clone()).await?);

    let store = AttachmentStore::new(
        &config.downloads.output_directory,
        config.downloads.organize_by_sender,
        log.clone(),
    );
    let ledger = if config.csv_record.enabled {
        DownloadLedger::new(&config.csv_record.filename, log.clone())
    } else {
        DownloadLedger::disabled(log.clone())
    };
    let query_log = if config.logging.query_log_file.is_empty() {
        QueryLog::disabled()
    } else {
        QueryLog::new(Some(PathBuf::from(&config.logging.query_log_file)))
    };

    let downloader = AttachmentDownloader::new(gateway, store, ledger, query_log, log);

    match downloader.run(&query).await {
        Ok(count) => {
            if dry_run {
                info!("✅ Dry run finished. {} attachment(s) would have been downloaded.", count);
            } else {
                info!("✅ Finished. {} attachment(s) downloaded.", count);
            }
            Ok(())
        }
        Err(e) => {
            error!("❌ Error while processing messages: {}", e);
            Err(e)
        }
    }
}

fn run_encryption_command(command: Command, config_path: &str) -> Result<()> {
    let log = logging::system_log();
    let encryptor = CredentialEncryptor::new(log);

    match command {
        Command::Encrypt {
            file,
            output,
            key_dir,
        } => {
            let (encrypted_path, key) =
                encryptor.encrypt_file(Path::new(&file), output.as_deref().map(Path::new), None)?;

            let source_name = Path::new(&file)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| file.clone());
            let key_file = encryptor.save_key_to_file(
                &key,
                &source_name,
                key_dir.as_deref().map(Path::new),
            )?;

            // Switch the configuration over to the encrypted credentials;
            // the ciphertext and key files already exist, so a failure
            // here only means the user edits the config themselves.
            match config::update_for_encrypted_credentials(config_path, &encrypted_path) {
                Ok(()) => {
                    info!(
                        "Updated config file {} with encrypted credentials path",
                        config_path
                    );
                }
                Err(e) => {
                    error!("Failed to update config file {}: {}", config_path, e);
                }
            }

            println!("\nEncryption Summary:");
            println!("Original file: {}", file);
            println!("Encrypted file: {}", encrypted_path.display());
            println!("Key file: {}", key_file.display());
            println!("\nSAVE YOUR KEY:");
            println!("==============");
            println!("{}", key);
            println!("\nYou can also set the key as an environment variable:");
            println!("export {}='{}'", encryption::KEY_ENV_VAR, key);
            Ok(())
        }
        Command::Decrypt { input, output, key } => {
            let decrypted_path = encryptor.decrypt_file(
                Path::new(&input),
                output.as_deref().map(Path::new),
                key.as_deref(),
            )?;
            println!("Decrypted to: {}", decrypted_path.display());
            Ok(())
        }
        Command::GenerateKey => {
            let key = CredentialEncryptor::generate_key()?;
            println!("{}", key);
            println!("\nSet it as an environment variable:");
            println!("export {}='{}'", encryption::KEY_ENV_VAR, key);
            Ok(())
        }
    }
}
