use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::OperationError;

/// Longest accepted bus ID, in bytes.
pub const BUSID_MAX_LEN: usize = 31;

/// Longest device description, in bytes. Longer text is cut, never rejected.
pub const DESCRIPTION_MAX_LEN: usize = 255;

static BUSID_GRAMMAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+-[0-9]+(\.[0-9]+)*$").expect("bus ID pattern is valid"));

/// # Bus ID
///
/// Canonical bus/port path of a USB device, e.g. `1-1.2`.
///
/// The only way to obtain one is through [`BusId::parse`], so any `BusId`
/// handed to the gateway already satisfies the grammar: digits, a single
/// hyphen, then dot-separated digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BusId(String);

impl BusId {
    pub fn parse(raw: &str) -> Result<Self, OperationError> {
        if Self::is_valid(raw) {
            Ok(BusId(raw.to_string()))
        } else {
            Err(OperationError::InvalidIdentifier(raw.to_string()))
        }
    }

    pub fn is_valid(raw: &str) -> bool {
        !raw.is_empty() && raw.len() <= BUSID_MAX_LEN && BUSID_GRAMMAR.is_match(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for BusId {
    type Err = OperationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BusId::parse(s)
    }
}

impl TryFrom<String> for BusId {
    type Error = OperationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if Self::is_valid(&value) {
            Ok(BusId(value))
        } else {
            Err(OperationError::InvalidIdentifier(value))
        }
    }
}

impl From<BusId> for String {
    fn from(id: BusId) -> Self {
        id.0
    }
}

impl AsRef<str> for BusId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for BusId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for BusId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl fmt::Display for BusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// # Device
///
/// One enumerable USB endpoint as published to viewers.
///
/// Serialized as `{"busid": "...", "info": "...", "bound": bool}`. Devices are
/// rebuilt from scratch on every refresh; nothing mutates a published one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub busid: BusId,
    /// Printable-ASCII description, at most [`DESCRIPTION_MAX_LEN`] bytes.
    pub info: String,
    /// Whether the device is currently exported through the sharing daemon.
    pub bound: bool,
}

impl Device {
    pub fn new(busid: BusId, info: &str) -> Self {
        let mut device = Device {
            busid,
            info: String::new(),
            bound: false,
        };
        device.append_info(info);
        device
    }

    /// Appends a description fragment, space-joined, keeping the bound on length.
    pub fn append_info(&mut self, fragment: &str) {
        let clean = sanitize_description(fragment);
        let clean = clean.trim();
        if clean.is_empty() || self.info.len() >= DESCRIPTION_MAX_LEN {
            return;
        }
        if !self.info.is_empty() {
            self.info.push(' ');
        }
        self.info.push_str(clean);
        // Printable ASCII only, so any byte index is a char boundary.
        self.info.truncate(DESCRIPTION_MAX_LEN);
    }
}

/// Maps whitespace to a plain space, then drops everything outside
/// printable ASCII (0x20..=0x7E).
pub fn sanitize_description(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .filter(|c| matches!(c, ' '..='~'))
        .collect()
}
