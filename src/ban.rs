//! Ban List
//!
//! Addresses and address prefixes that must never be scanned or published.
//! The list is read once at startup from a newline-delimited file. An entry
//! is either a single address (exact match) or a dotted prefix standing for
//! a whole /8, /16 or /24 range.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::Ipv4Addr;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::types::NodeSet;

/// Occurrences of a range in the raw list before it is collapsed to a prefix
const COMPACT_THRESHOLD: usize = 4;

/// A single ban rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BanEntry {
    /// One address or host name
    Exact(String),

    /// Leading dotted components, e.g. `["10", "1"]` for 10.1.0.0/16
    Prefix(Vec<String>),
}

impl BanEntry {
    /// Parse one line of a ban list
    ///
    /// Accepts `a.b.c.d`, `a.b`, `a.b.c`, `a.b.*`, and CIDR on octet
    /// boundaries. Returns `None` for blank lines, comments and masks that do
    /// not fall on an octet boundary.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        if let Some((network, bits)) = line.split_once('/') {
            let network: Ipv4Addr = network.parse().ok()?;
            let octets = match bits.parse::<u8>().ok()? {
                8 => 1,
                16 => 2,
                24 => 3,
                32 => return Some(BanEntry::Exact(network.to_string())),
                _ => return None,
            };
            let parts = network.octets()[..octets]
                .iter()
                .map(|o| o.to_string())
                .collect();
            return Some(BanEntry::Prefix(parts));
        }

        let trimmed = line.trim_end_matches(".*").trim_end_matches('.');
        let parts: Vec<&str> = trimmed.split('.').collect();
        let numeric = parts.iter().all(|p| p.parse::<u8>().is_ok());

        if numeric && parts.len() < 4 {
            Some(BanEntry::Prefix(parts.into_iter().map(String::from).collect()))
        } else {
            Some(BanEntry::Exact(trimmed.to_string()))
        }
    }

    /// Whether `address` is covered by this entry
    pub fn matches(&self, address: &str) -> bool {
        match self {
            BanEntry::Exact(banned) => banned == address,
            BanEntry::Prefix(prefix) => {
                let parts: Vec<&str> = address.split('.').collect();
                parts.len() > prefix.len()
                    && prefix.iter().zip(parts.iter()).all(|(a, b)| a == b)
            }
        }
    }
}

impl fmt::Display for BanEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BanEntry::Exact(address) => write!(f, "{}", address),
            BanEntry::Prefix(parts) => write!(f, "{}.*", parts.join(".")),
        }
    }
}

/// Process-wide ban list
#[derive(Debug, Clone, Default)]
pub struct BanList {
    entries: Vec<BanEntry>,
}

impl BanList {
    pub fn new(entries: Vec<BanEntry>) -> Self {
        Self { entries }
    }

    /// Parse newline-delimited text, skipping unusable lines
    pub fn parse(text: &str) -> Self {
        let mut entries = Vec::new();
        for line in text.lines() {
            let trimmed = line.trim();
            match BanEntry::parse(trimmed) {
                Some(entry) => entries.push(entry),
                None if trimmed.is_empty() || trimmed.starts_with('#') => {}
                None => warn!("Ignoring unusable ban list entry '{}'", trimmed),
            }
        }
        Self { entries }
    }

    /// Load a ban list file, optionally collapsing crowded ranges to prefixes
    pub fn load(path: &Path, compact: bool) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;

        let list = if compact {
            let raw: Vec<String> = content.lines().map(|l| l.trim().to_string()).collect();
            Self::parse(&compact_addresses(&raw).join("\n"))
        } else {
            Self::parse(&content)
        };

        info!("🚫 Loaded {} ban entries from {:?}", list.len(), path);
        Ok(list)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First entry covering `address`, if any
    pub fn matching_entry(&self, address: &str) -> Option<&BanEntry> {
        self.entries.iter().find(|e| e.matches(address))
    }

    pub fn is_banned(&self, address: &str) -> bool {
        self.matching_entry(address).is_some()
    }

    /// Drop banned nodes, preserving the order of the rest
    pub fn filter(&self, nodes: NodeSet) -> NodeSet {
        if self.entries.is_empty() {
            return nodes;
        }

        let before = nodes.len();
        let kept: NodeSet = nodes
            .into_iter()
            .filter(|node| match self.matching_entry(&node.address) {
                Some(entry) => {
                    debug!("🚫 Skipping {} (banned by {})", node.address, entry);
                    false
                }
                None => true,
            })
            .collect();

        let removed = before - kept.len();
        if removed > 0 {
            info!("🚫 Ban list removed {} of {} node(s)", removed, before);
        }

        kept
    }
}

/// Collapse a raw list of banned addresses into /16 and /24 prefixes
///
/// A /16 replaces its addresses once `COMPACT_THRESHOLD` of them are listed
/// across at least two different /24s. Addresses outside such a /16 are
/// collapsed to their /24 once `COMPACT_THRESHOLD` share it. Whatever is
/// left stays exact. Output order follows first sighting, /16 prefixes first.
pub fn compact_addresses(raw: &[String]) -> Vec<String> {
    let raw: Vec<&str> = raw.iter().map(|s| s.trim()).filter(|s| !s.is_empty()).collect();

    let mut mask16: Vec<String> = Vec::new();
    let mut by16: HashMap<String, (usize, HashSet<String>)> = HashMap::new();
    for address in &raw {
        let (Some(m16), Some(m24)) = (prefix_of(address, 2), prefix_of(address, 3)) else {
            continue;
        };
        let (count, subnets) = by16.entry(m16.clone()).or_default();
        *count += 1;
        subnets.insert(m24);
        if *count >= COMPACT_THRESHOLD && subnets.len() >= 2 && !mask16.contains(&m16) {
            mask16.push(m16);
        }
    }

    let mut mask24: Vec<String> = Vec::new();
    let mut by24: HashMap<String, usize> = HashMap::new();
    for address in &raw {
        if prefix_of(address, 2).map_or(false, |m| mask16.contains(&m)) {
            continue;
        }
        let Some(m24) = prefix_of(address, 3) else {
            continue;
        };
        let count = by24.entry(m24.clone()).or_insert(0);
        *count += 1;
        if *count >= COMPACT_THRESHOLD && !mask24.contains(&m24) {
            mask24.push(m24);
        }
    }

    let mut out: Vec<String> = mask16.iter().chain(mask24.iter()).cloned().collect();
    for address in raw {
        let covered = prefix_of(address, 2).map_or(false, |m| mask16.contains(&m))
            || prefix_of(address, 3).map_or(false, |m| mask24.contains(&m));
        if !covered && !out.iter().any(|e| e == address) {
            out.push(address.to_string());
        }
    }

    out
}

fn prefix_of(address: &str, octets: usize) -> Option<String> {
    let ip: Ipv4Addr = address.parse().ok()?;
    Some(
        ip.octets()[..octets]
            .iter()
            .map(|o| o.to_string())
            .collect::<Vec<_>>()
            .join("."),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeRecord;
    use tempfile::tempdir;

    fn nodes(addresses: &[&str]) -> NodeSet {
        addresses.iter().map(|a| NodeRecord::new(*a)).collect()
    }

    #[test]
    fn test_exact_ban() {
        let bans = BanList::parse("1.2.3.4\n");
        let kept = bans.filter(nodes(&["1.2.3.4", "1.2.3.5", "5.6.7.8"]));

        let kept: Vec<_> = kept.addresses().map(String::from).collect();
        assert_eq!(kept, vec!["1.2.3.5", "5.6.7.8"]);
    }

    #[test]
    fn test_prefix_ban() {
        let bans = BanList::parse("10.1\n192.168.7\n");
        let kept = bans.filter(nodes(&[
            "10.1.2.3",
            "10.1.200.1",
            "10.11.0.1",
            "192.168.7.9",
            "192.168.8.9",
        ]));

        let kept: Vec<_> = kept.addresses().map(String::from).collect();
        assert_eq!(kept, vec!["10.11.0.1", "192.168.8.9"]);
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!(BanEntry::parse("  # comment"), None);
        assert_eq!(BanEntry::parse(""), None);
        assert_eq!(
            BanEntry::parse("10.1.*"),
            Some(BanEntry::Prefix(vec!["10".into(), "1".into()]))
        );
        assert_eq!(
            BanEntry::parse("172.16.5.0/24"),
            Some(BanEntry::Prefix(vec!["172".into(), "16".into(), "5".into()]))
        );
        assert_eq!(
            BanEntry::parse("8.8.8.8/32"),
            Some(BanEntry::Exact("8.8.8.8".into()))
        );
        assert_eq!(BanEntry::parse("10.0.0.0/12"), None);
        assert_eq!(
            BanEntry::parse("node.example.org"),
            Some(BanEntry::Exact("node.example.org".into()))
        );
    }

    #[test]
    fn test_compact_collapses_crowded_ranges() {
        let raw: Vec<String> = [
            // Four in 10.1.0.0/16
            "10.1.0.1", "10.1.5.1", "10.1.9.1", "10.1.9.2",
            // Four in 20.2.3.0/24, a single /24 of its /16
            "20.2.3.1", "20.2.3.2", "20.2.3.3", "20.2.3.4",
            // Lone addresses
            "30.3.3.3", "20.9.4.1",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let compacted = compact_addresses(&raw);
        assert_eq!(compacted, vec!["10.1", "20.2.3", "30.3.3.3", "20.9.4.1"]);
    }

    #[test]
    fn test_compact_below_threshold_stays_exact() {
        let raw: Vec<String> = ["10.1.0.1", "10.1.0.2", "10.1.0.3"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(compact_addresses(&raw), raw);
    }

    #[test]
    fn test_load_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ban.txt");
        std::fs::write(&path, "1.1.1.1\n\n# cluster\n2.2\n").unwrap();

        let bans = BanList::load(&path, false).unwrap();
        assert_eq!(bans.len(), 2);
        assert!(bans.is_banned("2.2.9.9"));
        assert!(!bans.is_banned("3.3.3.3"));
    }

    #[test]
    fn test_empty_list_keeps_everything() {
        let bans = BanList::default();
        assert_eq!(bans.filter(nodes(&["1.1.1.1", "2.2.2.2"])).len(), 2);
    }
}
