//! Logging setup for processes embedding the reconciler.
//!
//! Provides structured logging via `tracing`:
//! - Always prints to stdout
//! - Optionally also writes to a log file (non-blocking writer)
//! - Configurable via the RUST_LOG environment variable (defaults to INFO)

use std::fs;
use std::io;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Guard that must be kept alive for the duration of logging.
///
/// Dropping this guard flushes and closes the log file writer.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Initializes the logging system.
///
/// When `log_file` is given, its parent directory is created and log lines
/// are written there in addition to stdout. Calling this more than once is
/// a no-op: the first subscriber wins.
///
/// # Errors
///
/// Returns an error if the log directory cannot be created or the path has
/// no file name.
pub fn init_logging(log_file: Option<&Path>) -> Result<LoggingGuard, io::Error> {
    let env_filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_guard = match log_file {
        Some(path) => {
            let file_name = path.file_name().ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "log path has no file name")
            })?;
            let dir = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => Path::new("."),
            };
            fs::create_dir_all(dir)?;

            let file_appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking_file)
                .with_ansi(false);
            let stdout_layer = tracing_subscriber::fmt::layer().with_writer(io::stdout);

            let _ = tracing_subscriber::registry()
                .with(env_filter())
                .with(file_layer)
                .with(stdout_layer)
                .try_init();

            Some(guard)
        }
        None => {
            let stdout_layer = tracing_subscriber::fmt::layer().with_writer(io::stdout);
            let _ = tracing_subscriber::registry()
                .with(env_filter())
                .with(stdout_layer)
                .try_init();
            None
        }
    };

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}
