use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use lib_usbctl::BusId;
use lib_usbctl::configs::{ConfigRecord, ConfigStore};
use lib_usbctl::gateway::DEFAULT_COMMAND_TIMEOUT;
use lib_usbctl::loggers::LogOptions;
use tracing::warn;

/// Keep-alive comment period on idle event streams.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "usbctl", about = "USB/IP device manager with a live web view", version)]
pub struct Cli {
    #[arg(short = 'p', long, env = "USBCTL_PORT", help = "Port to listen on.")]
    pub port: Option<u16>,

    #[arg(short = 'b', long = "bind", env = "USBCTL_BIND", help = "Address to listen on.")]
    pub bind_address: Option<String>,

    #[arg(
        short = 'i',
        long = "interval",
        env = "USBCTL_POLL_INTERVAL",
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Seconds between device polls."
    )]
    pub interval_secs: Option<u64>,

    #[arg(short = 'c', long = "config", env = "USBCTL_CONFIG", help = "Path to the config file.")]
    pub config_path: Option<PathBuf>,

    #[arg(short = 'v', long, help = "Log at debug level.")]
    pub verbose: bool,

    #[arg(long, env = "USBCTL_LOG_DIR", help = "Directory for JSON log files. Console only when unset.")]
    pub log_dir: Option<PathBuf>,

    #[arg(long, env = "USBCTL_LOG_LEVEL", help = "Log filter when RUST_LOG is unset (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[arg(
        long = "command-timeout",
        env = "USBCTL_COMMAND_TIMEOUT",
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Seconds before an external command is killed."
    )]
    pub command_timeout_secs: Option<u64>,

    #[arg(
        long = "heartbeat",
        env = "USBCTL_HEARTBEAT",
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Seconds between keep-alive comments on idle event streams."
    )]
    pub heartbeat_secs: Option<u64>,
}

impl Cli {
    pub fn config_path(&self) -> PathBuf {
        self.config_path.clone().unwrap_or_else(ConfigRecord::default_path)
    }

    /// Explicit level first, then `-v`, then `info`.
    pub fn log_level(&self) -> String {
        match (&self.log_level, self.verbose) {
            (Some(level), _) => level.clone(),
            (None, true) => String::from("debug"),
            (None, false) => String::from("info"),
        }
    }

    /// Logging comes from flags and env only, so it can be installed before
    /// the config file is read and its diagnostics are not lost.
    pub fn log_options(&self) -> LogOptions {
        LogOptions {
            app_name: String::from("usbctl"),
            log_dir: self.log_dir.clone(),
            level: self.log_level(),
        }
    }
}

/// Reads the config file at `path`. An unreadable file is logged and
/// replaced by the defaults; bad values inside it are logged by the parser.
pub async fn load_record(path: &Path) -> ConfigRecord {
    match ConfigStore::load(path).await {
        Ok(record) => record,
        Err(e) => {
            warn!(error = %e, "could not read config file, continuing with defaults");
            ConfigRecord::default()
        }
    }
}

/// Effective runtime settings: built-in defaults, overridden by the config
/// file, overridden by environment and command line (clap merges those two).
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub bind_address: String,
    pub poll_interval: Duration,
    pub config_path: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub log_level: String,
    pub command_timeout: Duration,
    pub heartbeat: Duration,
    /// Devices to bind again at startup, from the config file.
    pub bound_devices: Vec<BusId>,
}

impl Settings {
    pub fn resolve(cli: Cli, file: ConfigRecord, config_path: PathBuf) -> Self {
        let log_level = cli.log_level();

        Self {
            port: cli.port.unwrap_or(file.port),
            bind_address: cli.bind_address.unwrap_or(file.bind_address),
            poll_interval: cli.interval_secs.map(Duration::from_secs).unwrap_or(file.poll_interval),
            config_path,
            log_dir: cli.log_dir,
            log_level,
            command_timeout: cli
                .command_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_COMMAND_TIMEOUT),
            heartbeat: cli.heartbeat_secs.map(Duration::from_secs).unwrap_or(DEFAULT_HEARTBEAT),
            bound_devices: file.bound_devices,
        }
    }

    /// What the config store starts from; later writes keep these server
    /// settings and replace only the bound list.
    pub fn persisted_record(&self) -> ConfigRecord {
        ConfigRecord {
            port: self.port,
            bind_address: self.bind_address.clone(),
            poll_interval: self.poll_interval,
            bound_devices: self.bound_devices.clone(),
        }
    }
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "usbctl {}", env!("CARGO_PKG_VERSION"))?;
        writeln!(f, "  listen:          {}:{}", self.bind_address, self.port)?;
        writeln!(f, "  poll interval:   {}s", self.poll_interval.as_secs())?;
        writeln!(f, "  command timeout: {}s", self.command_timeout.as_secs())?;
        writeln!(f, "  heartbeat:       {}s", self.heartbeat.as_secs())?;
        writeln!(f, "  config:          {}", self.config_path.display())?;
        match &self.log_dir {
            Some(dir) => writeln!(f, "  logs:            {} ({})", self.log_level, dir.display())?,
            None => writeln!(f, "  logs:            {} (console)", self.log_level)?,
        }
        write!(f, "  bound devices:   {}", self.bound_devices.len())
    }
}
