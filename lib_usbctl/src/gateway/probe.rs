use std::path::{Path, PathBuf};

use crate::models::BusId;

/// Where the kernel lists devices claimed by the USB/IP host driver.
pub const USBIP_HOST_DRIVER_DIR: &str = "/sys/bus/usb/drivers/usbip-host";

/// Answers "is this device currently exported?" for one bus ID.
///
/// Probes are synchronous and cheap; they must never fail, an unreadable
/// source simply reports `false`.
pub trait BindProbe: Send + Sync {
    fn is_bound(&self, busid: &BusId) -> bool;

    /// `false` when the probe cannot actually observe bound state, so a
    /// `false` from [`BindProbe::is_bound`] carries no information.
    fn is_authoritative(&self) -> bool {
        true
    }
}

/// Linux probe: a device is bound when `<driver dir>/<busid>` exists.
#[derive(Debug, Clone)]
pub struct SysfsProbe {
    root: PathBuf,
}

impl SysfsProbe {
    pub fn new() -> Self {
        Self::with_root(USBIP_HOST_DRIVER_DIR)
    }

    pub fn with_root(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Default for SysfsProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl BindProbe for SysfsProbe {
    fn is_bound(&self, busid: &BusId) -> bool {
        // BusId grammar excludes separators, so the join stays inside root.
        self.root.join(busid.as_str()).exists()
    }
}

/// Probe for hosts without a bound-state source (Windows). Always `false`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnboundProbe;

impl BindProbe for UnboundProbe {
    fn is_bound(&self, _busid: &BusId) -> bool {
        false
    }

    fn is_authoritative(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sysfs_probe_follows_directory_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("1-1.2")).unwrap();

        let probe = SysfsProbe::with_root(dir.path());
        assert!(probe.is_bound(&BusId::parse("1-1.2").unwrap()));
        assert!(!probe.is_bound(&BusId::parse("2-1").unwrap()));
    }

    #[test]
    fn test_missing_root_reports_unbound() {
        let probe = SysfsProbe::with_root("/nonexistent/usbip-host");
        assert!(!probe.is_bound(&BusId::parse("1-1").unwrap()));
        assert!(!UnboundProbe.is_bound(&BusId::parse("1-1").unwrap()));
        assert!(probe.is_authoritative());
        assert!(!UnboundProbe.is_authoritative());
    }
}
