//! Logging setup
//!
//! The binary installs one global subscriber. An orchestrator run can add a
//! run-scoped dispatcher that also writes to a log file; worker threads
//! pick it up from the thread that starts the pool.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::Dispatch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use crate::Result;

/// Install the global stderr subscriber
pub fn init_tracing(verbose: bool, level: Option<&str>) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.unwrap_or("info")))
    };

    // a subscriber may already be set, e.g. by a test harness
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

/// File name for the log of one run: `<op>-<project>-<repository>.log`
pub fn log_file_name(op: &str, project: &str, repository: &str) -> String {
    let sanitize = |s: &str| -> String {
        s.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
            .collect()
    };
    format!("{}-{}-{}.log", sanitize(op), sanitize(project), sanitize(repository))
}

/// Dispatcher writing one run's events to a log file and to stderr
pub struct RunLog {
    dispatch: Dispatch,
    path: PathBuf,
}

impl RunLog {
    /// Create `log_dir` if needed and open `file_name` in it for appending
    pub fn create(log_dir: &Path, file_name: &str, level: &str) -> Result<Self> {
        fs::create_dir_all(log_dir)?;
        let path = log_dir.join(file_name);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
        let subscriber = tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter);

        Ok(Self { dispatch: Dispatch::new(subscriber), path })
    }

    /// Run `f` with this log as the current thread's dispatcher
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch, f)
    }

    /// Detach the handler. The file is closed once the last clone of the
    /// dispatcher is dropped.
    pub fn close(self) -> PathBuf {
        drop(self.dispatch);
        self.path
    }
}

/// Remove the `.log` files left by previous runs; returns how many
pub fn clear_log_dir(log_dir: &Path) -> Result<usize> {
    if !log_dir.exists() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in fs::read_dir(log_dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "log") {
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    tracing::debug!("Removed {} log files from {}", removed, log_dir.display());
    Ok(removed)
}
