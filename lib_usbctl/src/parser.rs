//! # Enumerator Output Parser
//!
//! Turns the human-readable output of `usbip list -l` (or `usbipd wsl list`)
//! into an ordered list of [`Device`]s.
//!
//! The parser is a total function: it never fails. Lines it does not
//! understand are skipped, records with an invalid or repeated bus ID are
//! dropped together with their continuation lines, and descriptions are
//! bounded. `bound` is always `false` here; the registry fills it in from the
//! bind probe.
//!
//! Recognized header shapes:
//!
//! ```text
//!  - busid 1-1.2 (046d:c52b)          usbip list -l
//! busid 2-1.1                          terse usbip variants
//! 1-1    046d:c52b  Receiver  Shared   usbipd wsl list rows
//! ```
//!
//! Any indented line that is not itself a header continues the description
//! of the current record.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::models::{BusId, Device};

/// Hard cap on records taken from a single listing.
pub const MAX_DEVICES: usize = 64;

static VID_PID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-fA-F]{4}:[0-9a-fA-F]{4}$").expect("vid:pid pattern is valid"));

/// Trailing state column printed by `usbipd`.
const USBIPD_STATES: &[&str] = &[
    "Not shared",
    "Not attached",
    "Shared (forced)",
    "Shared",
    "Attached",
];

#[derive(Debug, PartialEq, Eq)]
enum Line<'a> {
    Header { busid: &'a str, info: &'a str },
    Continuation(&'a str),
    Ignored,
}

pub fn parse(text: &str) -> Vec<Device> {
    let mut devices: Vec<Device> = Vec::new();
    let mut seen: HashSet<BusId> = HashSet::new();
    let mut current: Option<Device> = None;

    for raw in text.lines() {
        match classify(raw) {
            Line::Header { busid, info } => {
                devices.extend(current.take());
                if devices.len() >= MAX_DEVICES {
                    break;
                }
                current = BusId::parse(busid)
                    .ok()
                    .filter(|id| seen.insert(id.clone()))
                    .map(|id| Device::new(id, info));
            }
            Line::Continuation(fragment) => {
                if let Some(device) = current.as_mut() {
                    device.append_info(fragment);
                }
            }
            Line::Ignored => {}
        }
    }

    if devices.len() < MAX_DEVICES {
        devices.extend(current);
    }
    devices
}

fn classify(line: &str) -> Line<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Line::Ignored;
    }
    if let Some((busid, info)) = busid_header(trimmed) {
        return Line::Header { busid, info };
    }
    let indented = line.starts_with([' ', '\t']);
    if !indented {
        if let Some((busid, info)) = usbipd_row(trimmed) {
            return Line::Header { busid, info };
        }
        return Line::Ignored;
    }
    Line::Continuation(trimmed)
}

/// `- busid 1-1.2 (046d:c52b)`, `busid 1-1.2`, `BUSID: 1-1.2`.
fn busid_header(trimmed: &str) -> Option<(&str, &str)> {
    let body = trimmed
        .strip_prefix('-')
        .map(str::trim_start)
        .unwrap_or(trimmed);
    let keyword = body.get(..5)?;
    if !keyword.eq_ignore_ascii_case("busid") {
        return None;
    }
    let rest = &body[5..];
    if !rest.starts_with([' ', '\t', ':', '=']) {
        return None;
    }
    let rest = rest.trim_start_matches([' ', '\t', ':', '=']);
    let (token, _) = split_token(rest);
    // The vid:pid suffix on the header line is redundant with the description.
    Some((token.trim_end_matches([':', '(', ')', ',']), ""))
}

/// `1-1    046d:c52b  Logitech USB Receiver   Not shared`
fn usbipd_row(trimmed: &str) -> Option<(&str, &str)> {
    let (busid, rest) = split_token(trimmed);
    let (vid_pid, rest) = split_token(rest);
    if !BusId::is_valid(busid) || !VID_PID.is_match(vid_pid) {
        return None;
    }
    let mut info = rest.trim();
    for state in USBIPD_STATES {
        if let Some(stripped) = info.strip_suffix(state) {
            info = stripped.trim_end();
            break;
        }
    }
    Some((busid, info))
}

fn split_token(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(idx) => (&s[..idx], s[idx..].trim_start()),
        None => (s, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USBIP_LIST: &str = "\
 - busid 1-1.2 (046d:c52b)
   Logitech, Inc. : Unifying Receiver (046d:c52b)

 - busid 2-1.1 (0781:5583)
   SanDisk Corp. : Ultra Fit (0781:5583)
";

    #[test]
    fn test_parses_usbip_list_in_order() {
        let devices = parse(USBIP_LIST);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].busid.as_str(), "1-1.2");
        assert_eq!(devices[0].info, "Logitech, Inc. : Unifying Receiver (046d:c52b)");
        assert_eq!(devices[1].busid.as_str(), "2-1.1");
        assert_eq!(devices[1].info, "SanDisk Corp. : Ultra Fit (0781:5583)");
        assert!(devices.iter().all(|d| !d.bound));
    }

    #[test]
    fn test_continuation_lines_are_space_joined() {
        let text = "- busid 3-2\n   Vendor Name\n\tProduct Name\n";
        let devices = parse(text);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].info, "Vendor Name Product Name");
    }

    #[test]
    fn test_parses_usbipd_table() {
        let text = "\
BUSID  VID:PID    DEVICE                                  STATE
1-1    046d:c52b  Logitech USB Input Device               Not shared
2-3    0781:5583  USB Mass Storage Device                 Shared
";
        let devices = parse(text);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].busid.as_str(), "1-1");
        assert_eq!(devices[0].info, "Logitech USB Input Device");
        assert_eq!(devices[1].busid.as_str(), "2-3");
        assert_eq!(devices[1].info, "USB Mass Storage Device");
    }

    #[test]
    fn test_invalid_and_duplicate_ids_drop_their_records() {
        let text = "\
 - busid 1-1;rm (dead:beef)
   should not attach anywhere
 - busid 1-1.2 (046d:c52b)
   First
 - busid 1-1.2 (046d:c52b)
   Duplicate
";
        let devices = parse(text);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].busid.as_str(), "1-1.2");
        assert_eq!(devices[0].info, "First");
    }

    #[test]
    fn test_garbage_never_panics() {
        for text in ["", "\n\n", "busid", "- busid", "busidx 1-1", "   orphan continuation", "\u{0}\u{ff}"] {
            let _ = parse(text);
        }
        assert!(parse("- busid").is_empty());
        assert!(parse("busidx 1-1").is_empty());
        assert!(parse("   orphan continuation").is_empty());
    }

    #[test]
    fn test_device_count_is_capped() {
        let text: String = (0..MAX_DEVICES + 10)
            .map(|i| format!(" - busid 1-{}\n   dev {}\n", i + 1, i))
            .collect();
        let devices = parse(&text);
        assert_eq!(devices.len(), MAX_DEVICES);
        assert_eq!(devices.last().unwrap().busid.as_str(), format!("1-{}", MAX_DEVICES));
    }

    #[test]
    fn test_header_variants() {
        assert_eq!(
            classify("BUSID: 4-1"),
            Line::Header { busid: "4-1", info: "" }
        );
        assert_eq!(
            classify("  - busid 1-1.2 (046d:c52b)"),
            Line::Header { busid: "1-1.2", info: "" }
        );
        assert_eq!(classify("   Logitech"), Line::Continuation("Logitech"));
        assert_eq!(classify("usbip: error: foo"), Line::Ignored);
    }
}
