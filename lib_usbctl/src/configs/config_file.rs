//! # Persisted Configuration Record
//!
//! The on-disk format is line based:
//!
//! ```text
//! # usbctl configuration
//! port=11980
//! bind=0.0.0.0
//! poll_interval=3
//! bound_device=1-1.2
//! bound_device=2-1.1
//! ```
//!
//! Blank lines and `#` comments are skipped, unknown keys are ignored and a
//! value that does not parse leaves the default in place. Reading never
//! fails on content.

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::models::BusId;

pub const DEFAULT_PORT: u16 = 11980;
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

#[cfg(not(windows))]
const SYSTEM_CONFIG_PATH: &str = "/etc/usbctl/config";

/// # Config Record
///
/// Server settings plus the ordered, duplicate-free list of devices that
/// should be bound again at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigRecord {
    pub port: u16,
    pub bind_address: String,
    pub poll_interval: Duration,
    pub bound_devices: Vec<BusId>,
}

impl Default for ConfigRecord {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            bound_devices: Vec::new(),
        }
    }
}

impl ConfigRecord {
    /// Platform default location of the config file.
    pub fn default_path() -> PathBuf {
        #[cfg(windows)]
        {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("usbctl")
                .join("config")
        }
        #[cfg(not(windows))]
        {
            PathBuf::from(SYSTEM_CONFIG_PATH)
        }
    }

    pub fn parse(text: &str) -> Self {
        let mut record = ConfigRecord::default();

        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());
            let lineno = index + 1;

            match key {
                "port" => match value.parse::<u16>() {
                    Ok(port) if port > 0 => record.port = port,
                    _ => warn!(line = lineno, value, "ignoring invalid port in config"),
                },
                "bind" if !value.is_empty() => record.bind_address = value.to_string(),
                "poll_interval" => match value.parse::<u64>() {
                    Ok(secs) if secs > 0 => record.poll_interval = Duration::from_secs(secs),
                    _ => warn!(line = lineno, value, "ignoring invalid poll_interval in config"),
                },
                "bound_device" => match BusId::parse(value) {
                    Ok(id) => record.add_bound(id),
                    Err(_) => warn!(line = lineno, value, "ignoring invalid bound_device in config"),
                },
                _ => {}
            }
        }
        record
    }

    pub fn render(&self) -> String {
        let mut out = String::from("# usbctl configuration\n");
        out.push_str(&format!("port={}\n", self.port));
        out.push_str(&format!("bind={}\n", self.bind_address));
        out.push_str(&format!("poll_interval={}\n", self.poll_interval.as_secs().max(1)));
        for id in &self.bound_devices {
            out.push_str(&format!("bound_device={}\n", id));
        }
        out
    }

    /// Appends `id` unless it is already listed.
    pub fn add_bound(&mut self, id: BusId) {
        if !self.bound_devices.contains(&id) {
            self.bound_devices.push(id);
        }
    }
}
