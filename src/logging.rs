use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;

/// Logging capability injected into every component at construction.
///
/// Components never reach for a process-global logger themselves; the
/// binary decides once which implementation they get. Tests inject a
/// collecting implementation to assert on emitted events.
pub trait EventLog: Send + Sync {
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// Default `EventLog` forwarding to the `log` facade (env_logger sink).
pub struct SystemLog;

impl EventLog for SystemLog {
    fn info(&self, message: &str) {
        log::info!("{}", message);
    }

    fn warn(&self, message: &str) {
        log::warn!("{}", message);
    }

    fn error(&self, message: &str) {
        log::error!("{}", message);
    }
}

/// Convenience constructor used by `main` and tests.
pub fn system_log() -> Arc<dyn EventLog> {
    Arc::new(SystemLog)
}

/// Audit-style query log, independent of the system log.
///
/// One line per pipeline run: timestamp, the search query, and how many
/// messages it matched. Opened and closed per append so no handle is
/// held across the run.
pub struct QueryLog {
    path: Option<PathBuf>,
}

impl QueryLog {
    pub fn new(path: Option<PathBuf>) -> Self {
        QueryLog { path }
    }

    /// Query logging disabled entirely.
    pub fn disabled() -> Self {
        QueryLog { path: None }
    }

    /// Appends one query record. I/O failures are reported to the caller,
    /// which treats them as non-fatal.
    pub fn record(&self, query: &str, message_count: usize) -> std::io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(
            file,
            "{} | query: {} | {} message(s) found",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            query,
            message_count
        )
    }
}

#[cfg(test)]
pub mod test_support {
    use super::EventLog;
    use std::sync::Mutex;

    /// Collects events in memory so tests can assert on log content.
    #[derive(Default)]
    pub struct CollectingLog {
        pub events: Mutex<Vec<(String, String)>>,
    }

    impl EventLog for CollectingLog {
        fn info(&self, message: &str) {
            self.events
                .lock()
                .unwrap()
                .push(("info".to_string(), message.to_string()));
        }

        fn warn(&self, message: &str) {
            self.events
                .lock()
                .unwrap()
                .push(("warn".to_string(), message.to_string()));
        }

        fn error(&self, message: &str) {
            self.events
                .lock()
                .unwrap()
                .push(("error".to_string(), message.to_string()));
        }
    }
}
