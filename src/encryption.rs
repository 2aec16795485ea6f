use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use chrono::Local;
use thiserror::Error;

use crate::logging::EventLog;

/// Environment variable supplying the decryption key, bypassing the
/// password prompt.
pub const KEY_ENV_VAR: &str = "GMAIL_ENCRYPTION_KEY";

/// Nonce size for AES-256-GCM (96 bits).
const NONCE_SIZE: usize = 12;

#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("File not found: {0}")]
    InputNotFound(PathBuf),

    #[error("Unable to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("Encryption failed: {0}")]
    Encrypt(String),

    #[error("Decryption failed: {0}")]
    Decrypt(String),

    #[error("Unable to read password: {0}")]
    PasswordPrompt(#[from] std::io::Error),
}

/// Encrypts and decrypts the credential file so secrets are never stored
/// in plaintext at rest.
///
/// Keys are 32 bytes, displayed and exchanged in base64url form. The
/// ciphertext layout is `<12-byte nonce><AES-256-GCM ciphertext+tag>`,
/// so tampering or a wrong key fails the integrity check instead of
/// yielding wrong bytes. Failures are always returned as errors, never
/// panics; callers decide whether they are fatal.
pub struct CredentialEncryptor {
    log: Arc<dyn EventLog>,
}

impl CredentialEncryptor {
    pub fn new(log: Arc<dyn EventLog>) -> Self {
        CredentialEncryptor { log }
    }

    /// Derives a key from a password by padding/truncating the UTF-8
    /// bytes to exactly 32 bytes (space-padded on the right).
    ///
    /// Deliberately unsalted and uniterated so the same password always
    /// yields the same key, matching the documented key format. This is
    /// not a stretching KDF; treat the password as the full secret.
    pub fn derive_key_from_password(password: &str) -> String {
        let mut key_bytes = password.as_bytes().to_vec();
        key_bytes.resize(32, b' ');
        key_bytes.truncate(32);
        URL_SAFE.encode(key_bytes)
    }

    /// Generates a cryptographically random key in the same displayable
    /// format, independent of any password.
    pub fn generate_key() -> Result<String, EncryptionError> {
        let mut key_bytes = [0u8; 32];
        getrandom::getrandom(&mut key_bytes)
            .map_err(|e| EncryptionError::Encrypt(format!("Random key generation failed: {}", e)))?;
        Ok(URL_SAFE.encode(key_bytes))
    }

    /// Encrypts `path` to `output_path` (default `<path>.encrypted`).
    ///
    /// Without a key, prompts for a password (no echo) and derives one.
    /// Returns the output path and the key in displayable form; the key
    /// is also logged prominently since it is the only copy.
    pub fn encrypt_file(
        &self,
        path: &Path,
        output_path: Option<&Path>,
        key: Option<&str>,
    ) -> Result<(PathBuf, String), EncryptionError> {
        let output_path = match output_path {
            Some(p) => p.to_path_buf(),
            None => append_extension(path, "encrypted"),
        };

        let key = match key {
            Some(k) => k.to_string(),
            None => {
                let password = rpassword::prompt_password("Enter a password for encryption: ")?;
                Self::derive_key_from_password(&password)
            }
        };

        let cipher = cipher_for_key(&key)?;
        let data = read_file(path)?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        getrandom::getrandom(&mut nonce_bytes)
            .map_err(|e| EncryptionError::Encrypt(format!("Nonce generation failed: {}", e)))?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, data.as_slice())
            .map_err(|e| EncryptionError::Encrypt(e.to_string()))?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend(ciphertext);

        fs::write(&output_path, &combined).map_err(|source| EncryptionError::Write {
            path: output_path.clone(),
            source,
        })?;

        self.log
            .info(&format!("File encrypted successfully to {:?}", output_path));
        self.log.warn(&format!(
            "IMPORTANT: Save this key in a secure location: {}\n\
             You'll need this key to decrypt the file later. There is no other copy.",
            key
        ));

        Ok((output_path, key))
    }

    /// Decrypts `encrypted_path` to `output_path` (default
    /// `temp_credentials_<pid>.json` in the working directory).
    ///
    /// Key resolution order: explicit key, then the `GMAIL_ENCRYPTION_KEY`
    /// environment variable, then a password prompt. A wrong key or a
    /// tampered ciphertext fails the GCM integrity check and is reported
    /// as a decryption error.
    pub fn decrypt_file(
        &self,
        encrypted_path: &Path,
        output_path: Option<&Path>,
        key: Option<&str>,
    ) -> Result<PathBuf, EncryptionError> {
        let output_path = match output_path {
            Some(p) => p.to_path_buf(),
            None => PathBuf::from(format!("temp_credentials_{}.json", std::process::id())),
        };

        let key = match key {
            Some(k) => k.to_string(),
            None => match std::env::var(KEY_ENV_VAR) {
                Ok(env_key) => env_key,
                Err(_) => {
                    let password = rpassword::prompt_password("Enter password for decryption: ")?;
                    Self::derive_key_from_password(&password)
                }
            },
        };

        let cipher = cipher_for_key(&key)?;
        let combined = read_file(encrypted_path)?;

        if combined.len() < NONCE_SIZE {
            return Err(EncryptionError::Decrypt(
                "Ciphertext too short".to_string(),
            ));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = cipher.decrypt(nonce, ciphertext).map_err(|_| {
            EncryptionError::Decrypt(
                "Integrity check failed (wrong key or corrupted file)".to_string(),
            )
        })?;

        fs::write(&output_path, &plaintext).map_err(|source| EncryptionError::Write {
            path: output_path.clone(),
            source,
        })?;

        self.log
            .info(&format!("File decrypted successfully to {:?}", output_path));

        Ok(output_path)
    }

    /// Writes the key-disclosure file: a clearly-labeled plaintext file
    /// carrying the key and handling instructions, separate from the
    /// ciphertext. Filename pattern `encryption_key_<YYYYMMDD_HHMMSS>.txt`.
    pub fn save_key_to_file(
        &self,
        key: &str,
        source_file_name: &str,
        output_dir: Option<&Path>,
    ) -> Result<PathBuf, EncryptionError> {
        let output_dir = output_dir.unwrap_or(Path::new("."));
        fs::create_dir_all(output_dir).map_err(|source| EncryptionError::Write {
            path: output_dir.to_path_buf(),
            source,
        })?;

        let now = Local::now();
        let key_path = output_dir.join(format!(
            "encryption_key_{}.txt",
            now.format("%Y%m%d_%H%M%S")
        ));

        let content = format!(
            "=============================================================\n\
             \x20                ENCRYPTION KEY - KEEP SECURE\n\
             =============================================================\n\
             \n\
             This file contains the encryption key for your credentials file.\n\
             IMPORTANT SECURITY NOTICE:\n\
             - Store this file in a secure location separate from the encrypted file\n\
             - Consider using a password manager to store this key\n\
             - Delete this file after saving the key elsewhere\n\
             - Anyone with this key can decrypt your credentials\n\
             \n\
             File encrypted: {}\n\
             Encryption date: {}\n\
             \n\
             ENCRYPTION KEY:\n\
             {}\n\
             \n\
             To use this key with mailharvest:\n\
             1. Set as environment variable: export {}='your-key'\n\
             2. Enter when prompted during application execution\n",
            source_file_name,
            now.format("%Y-%m-%d %H:%M:%S"),
            key,
            KEY_ENV_VAR
        );

        fs::write(&key_path, content).map_err(|source| EncryptionError::Write {
            path: key_path.clone(),
            source,
        })?;

        self.log.warn(&format!(
            "Encryption key saved to {:?}. Store it securely and delete the file \
             after saving the key elsewhere.",
            key_path
        ));

        Ok(key_path)
    }
}

fn cipher_for_key(key: &str) -> Result<Aes256Gcm, EncryptionError> {
    let key_bytes = URL_SAFE
        .decode(key)
        .map_err(|e| EncryptionError::InvalidKey(format!("Key is not valid base64url: {}", e)))?;

    if key_bytes.len() != 32 {
        return Err(EncryptionError::InvalidKey(format!(
            "Key must decode to 32 bytes, got {}",
            key_bytes.len()
        )));
    }

    Aes256Gcm::new_from_slice(&key_bytes)
        .map_err(|e| EncryptionError::InvalidKey(e.to_string()))
}

fn read_file(path: &Path) -> Result<Vec<u8>, EncryptionError> {
    match fs::read(path) {
        Ok(data) => Ok(data),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(EncryptionError::InputNotFound(path.to_path_buf()))
        }
        Err(source) => Err(EncryptionError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn append_extension(path: &Path, extension: &str) -> PathBuf {
    let mut os_string = path.as_os_str().to_os_string();
    os_string.push(".");
    os_string.push(extension);
    PathBuf::from(os_string)
}
