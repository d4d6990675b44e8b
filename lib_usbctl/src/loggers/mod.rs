//! # Logging Bootstrap
//!
//! Installs the process-wide `tracing` subscriber: a coloured console layer
//! and, when a log directory is configured, a JSON layer written to a daily
//! rolling file through a non-blocking worker.
//!
//! The filter comes from `RUST_LOG` when set, otherwise from the configured
//! level. The returned [`WorkerGuard`] flushes the file writer on drop and
//! must be held by `main` for the lifetime of the process.

use std::path::PathBuf;

use thiserror::Error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Prefix of the rolling log file names.
    pub app_name: String,
    /// Directory for JSON log files. `None` logs to the console only.
    pub log_dir: Option<PathBuf>,
    /// Filter directive used when `RUST_LOG` is unset, e.g. `info`.
    pub level: String,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            app_name: String::from("usbctl"),
            log_dir: None,
            level: String::from("info"),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("failed to create log directory {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid log filter {directive:?}: {reason}")]
    Filter { directive: String, reason: String },

    #[error("global tracing subscriber already installed: {0}")]
    Init(#[from] TryInitError),
}

pub fn init_tracing(options: &LogOptions) -> Result<Option<WorkerGuard>, LoggerError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&options.level))
        .map_err(|e| LoggerError::Filter {
            directive: options.level.clone(),
            reason: e.to_string(),
        })?;

    let console_layer = fmt::layer().with_target(true).with_ansi(true);

    let (file_layer, guard) = match &options.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|source| LoggerError::Io {
                path: dir.clone(),
                source,
            })?;
            let (writer, guard) = non_blocking(rolling::daily(dir, &options.app_name));
            let layer = fmt::layer().with_ansi(false).with_writer(writer).json();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    info!(
        level = %options.level,
        log_dir = ?options.log_dir,
        "logging initialized"
    );
    Ok(guard)
}
