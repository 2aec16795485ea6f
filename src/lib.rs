// Library exports for the mailharvest crate
// This allows tests and other crates to use the modules

pub mod attachment_store;
pub mod config;
pub mod downloader;
pub mod encryption;
pub mod extractor;
pub mod gmail_client;
pub mod ledger;
pub mod logging;
