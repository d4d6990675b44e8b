//! # Configuration
//!
//! The persisted key=value record and the store that owns it on disk.

/// Record type, defaults and the text format.
pub mod config_file;
/// Serialized, atomic persistence of the record.
pub mod config_store;

pub use config_file::{ConfigRecord, DEFAULT_BIND_ADDRESS, DEFAULT_POLL_INTERVAL, DEFAULT_PORT};
pub use config_store::ConfigStore;
