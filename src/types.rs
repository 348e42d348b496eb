//! Core types for the node seeder
//!
//! A `NodeRecord` is one candidate public RPC node. A `NodeSet` is the
//! ordered, deduplicated collection a reconciliation pass works on: the
//! address is the identity of a node, so a set never holds the same
//! address twice.

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ops::{Add, AddAssign};

// =============================================================================
// PRIMITIVE TYPES
// =============================================================================

/// Block height (index of the chain tip)
pub type BlockHeight = u64;

/// Default restricted RPC port exposed by public Monero nodes
pub const DEFAULT_NODE_RPC_PORT: u16 = 18089;

/// Default unrestricted RPC port of the local daemon
pub const DEFAULT_DAEMON_RPC_PORT: u16 = 18081;

// =============================================================================
// NODE RECORDS
// =============================================================================

/// Outcome of the last health check of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Validity {
    /// Not scanned yet
    #[default]
    Unknown,

    /// Reachable and in sync with the reference height
    Valid,

    /// Unreachable, malformed, or lagging behind
    Invalid,
}

impl Validity {
    pub fn from_bool(valid: bool) -> Self {
        if valid {
            Validity::Valid
        } else {
            Validity::Invalid
        }
    }

    /// Whether a scan has decided this node either way
    pub fn is_known(&self) -> bool {
        !matches!(self, Validity::Unknown)
    }
}

/// A candidate node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    /// IPv4 address or host name (unique key)
    pub address: String,

    /// RPC port the health endpoint is served on
    pub port: u16,

    /// Opaque record id, only set for records listed by a DNS provider
    pub provider_record_id: Option<String>,

    /// Last successful verification
    pub observed_at: Option<DateTime<Utc>>,

    /// Health after the last scan
    pub valid: Validity,
}

impl NodeRecord {
    /// Create an unscanned node on the default RPC port
    pub fn new(address: impl Into<String>) -> Self {
        Self::with_port(address, DEFAULT_NODE_RPC_PORT)
    }

    /// Create an unscanned node on a specific port
    pub fn with_port(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            provider_record_id: None,
            observed_at: None,
            valid: Validity::Unknown,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid == Validity::Valid
    }

    /// Record a successful verification at `at`
    pub fn mark_valid(&mut self, at: DateTime<Utc>) {
        self.valid = Validity::Valid;
        self.observed_at = Some(at);
    }

    pub fn mark_invalid(&mut self) {
        self.valid = Validity::Invalid;
    }
}

// =============================================================================
// NODE SET
// =============================================================================

/// Ordered set of nodes keyed by address
///
/// Insertion order is kept unless the set is explicitly shuffled.
/// Appending a node whose address is already present leaves the set
/// untouched and keeps the original entry.
#[derive(Debug, Clone, Default)]
pub struct NodeSet {
    nodes: Vec<NodeRecord>,
    addresses: HashSet<String>,
}

impl NodeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node; returns false (and changes nothing) if its address is known
    pub fn push(&mut self, node: NodeRecord) -> bool {
        if self.addresses.contains(&node.address) {
            return false;
        }
        self.addresses.insert(node.address.clone());
        self.nodes.push(node);
        true
    }

    /// Membership test by address
    pub fn contains(&self, address: &str) -> bool {
        self.addresses.contains(address)
    }

    pub fn get(&self, address: &str) -> Option<&NodeRecord> {
        if !self.contains(address) {
            return None;
        }
        self.nodes.iter().find(|n| n.address == address)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NodeRecord> {
        self.nodes.iter()
    }

    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.address.as_str())
    }

    /// Nodes whose validity equals `validity`, in order
    pub fn with_validity(&self, validity: Validity) -> NodeSet {
        self.nodes
            .iter()
            .filter(|n| n.valid == validity)
            .cloned()
            .collect()
    }

    /// Shorthand for `with_validity(Validity::Valid)`
    pub fn valid(&self) -> NodeSet {
        self.with_validity(Validity::Valid)
    }

    /// Keep only the nodes matching `keep`, preserving order
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&NodeRecord) -> bool,
    {
        let addresses = &mut self.addresses;
        self.nodes.retain(|n| {
            let kept = keep(n);
            if !kept {
                addresses.remove(&n.address);
            }
            kept
        });
    }

    /// Randomize the order of the set
    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.nodes.shuffle(rng);
    }

    pub fn into_vec(self) -> Vec<NodeRecord> {
        self.nodes
    }
}

impl FromIterator<NodeRecord> for NodeSet {
    fn from_iter<I: IntoIterator<Item = NodeRecord>>(iter: I) -> Self {
        let mut set = NodeSet::new();
        set.extend(iter);
        set
    }
}

impl Extend<NodeRecord> for NodeSet {
    fn extend<I: IntoIterator<Item = NodeRecord>>(&mut self, iter: I) {
        for node in iter {
            self.push(node);
        }
    }
}

impl IntoIterator for NodeSet {
    type Item = NodeRecord;
    type IntoIter = std::vec::IntoIter<NodeRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.into_iter()
    }
}

impl<'a> IntoIterator for &'a NodeSet {
    type Item = &'a NodeRecord;
    type IntoIter = std::slice::Iter<'a, NodeRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.iter()
    }
}

/// Union: nodes of `rhs` not already present are appended in order
impl Add for NodeSet {
    type Output = NodeSet;

    fn add(mut self, rhs: NodeSet) -> NodeSet {
        self += rhs;
        self
    }
}

impl AddAssign for NodeSet {
    fn add_assign(&mut self, rhs: NodeSet) {
        self.extend(rhs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn node(address: &str, valid: Validity) -> NodeRecord {
        NodeRecord {
            valid,
            ..NodeRecord::new(address)
        }
    }

    #[test]
    fn test_push_duplicate_is_noop() {
        let mut set = NodeSet::new();
        assert!(set.push(NodeRecord::with_port("1.2.3.4", 18089)));
        assert!(!set.push(NodeRecord::with_port("1.2.3.4", 18081)));

        assert_eq!(set.len(), 1);
        // Original entry retained
        assert_eq!(set.get("1.2.3.4").unwrap().port, 18089);
    }

    #[test]
    fn test_union_keeps_order_and_dedups() {
        let a: NodeSet = ["1.1.1.1", "2.2.2.2"].iter().map(|a| NodeRecord::new(*a)).collect();
        let b: NodeSet = ["2.2.2.2", "3.3.3.3"].iter().map(|a| NodeRecord::new(*a)).collect();

        let union = a + b;
        let addresses: Vec<_> = union.addresses().collect();
        assert_eq!(addresses, vec!["1.1.1.1", "2.2.2.2", "3.3.3.3"]);
    }

    #[test]
    fn test_filter_by_validity() {
        let set: NodeSet = vec![
            node("1.1.1.1", Validity::Valid),
            node("2.2.2.2", Validity::Invalid),
            node("3.3.3.3", Validity::Unknown),
            node("4.4.4.4", Validity::Valid),
        ]
        .into_iter()
        .collect();

        let valid: Vec<_> = set.valid().addresses().map(String::from).collect();
        assert_eq!(valid, vec!["1.1.1.1", "4.4.4.4"]);
        assert_eq!(set.with_validity(Validity::Unknown).len(), 1);
    }

    #[test]
    fn test_retain_updates_membership() {
        let mut set: NodeSet = ["1.1.1.1", "2.2.2.2"].iter().map(|a| NodeRecord::new(*a)).collect();
        set.retain(|n| n.address != "1.1.1.1");

        assert!(!set.contains("1.1.1.1"));
        // Removed address can be appended again
        assert!(set.push(NodeRecord::new("1.1.1.1")));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_shuffle_keeps_members() {
        let mut set: NodeSet = (0..20).map(|i| NodeRecord::new(format!("10.0.0.{}", i))).collect();
        let mut rng = StdRng::seed_from_u64(7);
        set.shuffle(&mut rng);

        assert_eq!(set.len(), 20);
        for i in 0..20 {
            assert!(set.contains(&format!("10.0.0.{}", i)));
        }
    }

    #[test]
    fn test_mark_valid_sets_timestamp() {
        let mut n = NodeRecord::new("1.2.3.4");
        assert!(!n.valid.is_known());

        let now = Utc::now();
        n.mark_valid(now);
        assert!(n.is_valid());
        assert_eq!(n.observed_at, Some(now));

        n.mark_invalid();
        assert_eq!(n.valid, Validity::Invalid);
    }
}
