use serde::{Deserialize, Serialize};

use super::device::{BusId, Device};

/// # Snapshot
///
/// One complete, ordered device list, in the enumerator's output order.
///
/// A snapshot is immutable once built; the registry swaps whole snapshots
/// behind an `Arc`. Serializes as a plain JSON array of devices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    devices: Vec<Device>,
}

impl Snapshot {
    pub fn new(devices: Vec<Device>) -> Self {
        Self { devices }
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, busid: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.busid == busid)
    }

    /// Positional `(busid, bound)` comparison.
    ///
    /// Descriptions are ignored, and a reordering of otherwise identical
    /// devices counts as a difference.
    pub fn same_state(&self, other: &Snapshot) -> bool {
        self.devices.len() == other.devices.len()
            && self
                .devices
                .iter()
                .zip(&other.devices)
                .all(|(a, b)| a.busid == b.busid && a.bound == b.bound)
    }

    /// IDs of every bound device, in list order.
    pub fn bound_ids(&self) -> Vec<BusId> {
        self.devices
            .iter()
            .filter(|d| d.bound)
            .map(|d| d.busid.clone())
            .collect()
    }

    /// The wire representation viewers receive.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.devices).unwrap_or_else(|_| String::from("[]"))
    }
}

impl FromIterator<Device> for Snapshot {
    fn from_iter<I: IntoIterator<Item = Device>>(iter: I) -> Self {
        Self {
            devices: iter.into_iter().collect(),
        }
    }
}
