//! # Data Model
//!
//! The value types that flow between the registry, the dispatcher and the
//! transport: validated bus IDs, devices and whole-list snapshots.

/// Bus IDs and single devices.
pub mod device;
/// Ordered device lists and their change comparison.
pub mod snapshot;

pub use device::{BusId, Device, BUSID_MAX_LEN, DESCRIPTION_MAX_LEN};
pub use snapshot::Snapshot;
