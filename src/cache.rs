//! Node Cache
//!
//! JSON snapshot of the nodes verified by the last pass. The file is
//! rewritten wholesale after every scan and read wholesale at the start of
//! the next pass. Entries older than the mass scan interval are dropped on
//! load; they have to come back through peer discovery to be trusted again.
//!
//! Format: `[{"address": "1.2.3.4", "port": 18089, "observedAt": "<RFC 3339>"}]`

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::types::{NodeRecord, NodeSet};

/// Cache file errors
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Persisted form of a verified node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub address: String,
    pub port: u16,
    pub observed_at: DateTime<Utc>,
}

impl CacheEntry {
    fn from_record(node: &NodeRecord) -> Option<Self> {
        Some(Self {
            address: node.address.clone(),
            port: node.port,
            observed_at: node.observed_at?,
        })
    }

    fn into_record(self) -> NodeRecord {
        NodeRecord {
            observed_at: Some(self.observed_at),
            ..NodeRecord::with_port(self.address, self.port)
        }
    }
}

/// Snapshot file of verified nodes
pub struct NodeCache {
    path: PathBuf,
    max_age: ChronoDuration,
}

impl NodeCache {
    /// `max_age` is the mass scan interval
    pub fn new(path: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            path: path.into(),
            max_age: ChronoDuration::from_std(max_age).unwrap_or(ChronoDuration::MAX),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create an empty snapshot if none exists yet
    pub async fn ensure_exists(&self) -> Result<(), CacheError> {
        if tokio::fs::try_exists(&self.path).await? {
            return Ok(());
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, b"[]").await?;

        info!("📦 Created empty node cache at {:?}", self.path);
        Ok(())
    }

    /// Load the snapshot as of now
    pub async fn load(&self) -> NodeSet {
        self.load_at(Utc::now()).await
    }

    /// Load the snapshot, dropping entries older than `max_age` before `now`
    ///
    /// Never fails: a missing or unreadable file yields an empty set. Loaded
    /// nodes are unscanned.
    pub async fn load_at(&self, now: DateTime<Utc>) -> NodeSet {
        let entries = match self.read_entries().await {
            Ok(entries) => entries,
            Err(CacheError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("📦 No node cache at {:?}", self.path);
                return NodeSet::new();
            }
            Err(e) => {
                warn!("📦 Ignoring unreadable node cache {:?}: {}", self.path, e);
                return NodeSet::new();
            }
        };

        let total = entries.len();
        let fresh: NodeSet = entries
            .into_iter()
            .filter(|entry| now.signed_duration_since(entry.observed_at) <= self.max_age)
            .map(CacheEntry::into_record)
            .collect();

        info!(
            "📦 Loaded {} cached node(s) ({} expired)",
            fresh.len(),
            total - fresh.len()
        );
        fresh
    }

    async fn read_entries(&self) -> Result<Vec<CacheEntry>, CacheError> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Overwrite the snapshot with the valid nodes of `nodes`
    ///
    /// Returns the number of entries written.
    pub async fn save(&self, nodes: &NodeSet) -> Result<usize, CacheError> {
        let entries: Vec<CacheEntry> = nodes
            .iter()
            .filter(|n| n.is_valid())
            .filter_map(CacheEntry::from_record)
            .collect();

        let content = serde_json::to_string_pretty(&entries)?;

        // Write file atomically (write to temp, then rename)
        let temp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, &content).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;

        info!("📦 Cached {} verified node(s) to {:?}", entries.len(), self.path);
        Ok(entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Validity;
    use tempfile::tempdir;

    const INTERVAL: Duration = Duration::from_secs(1800);

    fn node(address: &str, valid: bool, at: DateTime<Utc>) -> NodeRecord {
        let mut node = NodeRecord::new(address);
        if valid {
            node.mark_valid(at);
        } else {
            node.mark_invalid();
        }
        node
    }

    #[tokio::test]
    async fn test_round_trip_keeps_only_valid() {
        let dir = tempdir().unwrap();
        let cache = NodeCache::new(dir.path().join("cached_nodes.json"), INTERVAL);
        let now = Utc::now();

        let nodes: NodeSet = vec![
            node("1.1.1.1", true, now),
            node("2.2.2.2", false, now),
            node("3.3.3.3", true, now),
            node("4.4.4.4", false, now),
            node("5.5.5.5", true, now),
        ]
        .into_iter()
        .collect();

        assert_eq!(cache.save(&nodes).await.unwrap(), 3);

        let loaded = cache.load_at(now).await;
        let addresses: Vec<_> = loaded.addresses().collect();
        assert_eq!(addresses, vec!["1.1.1.1", "3.3.3.3", "5.5.5.5"]);
        // Loaded nodes must be re-verified
        assert!(loaded.iter().all(|n| n.valid == Validity::Unknown));
        assert!(loaded.iter().all(|n| n.observed_at.is_some()));
    }

    #[tokio::test]
    async fn test_expired_entries_dropped() {
        let dir = tempdir().unwrap();
        let cache = NodeCache::new(dir.path().join("cached_nodes.json"), INTERVAL);
        let now = Utc::now();
        let interval = ChronoDuration::from_std(INTERVAL).unwrap();

        let nodes: NodeSet = vec![
            node("1.1.1.1", true, now - interval - ChronoDuration::seconds(1)),
            node("2.2.2.2", true, now - ChronoDuration::seconds(1)),
        ]
        .into_iter()
        .collect();
        cache.save(&nodes).await.unwrap();

        let loaded = cache.load_at(now).await;
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains("2.2.2.2"));
    }

    #[tokio::test]
    async fn test_missing_or_corrupt_file_is_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cached_nodes.json");
        let cache = NodeCache::new(&path, INTERVAL);

        assert!(cache.load().await.is_empty());

        std::fs::write(&path, "{not json").unwrap();
        assert!(cache.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_ensure_exists_creates_empty_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("cached_nodes.json");
        let cache = NodeCache::new(&path, INTERVAL);

        cache.ensure_exists().await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[]");

        // Existing content is left alone
        std::fs::write(&path, r#"[{"address":"1.1.1.1","port":18089,"observedAt":"2024-01-01T00:00:00Z"}]"#).unwrap();
        cache.ensure_exists().await.unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("1.1.1.1"));
    }

    #[tokio::test]
    async fn test_file_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cached_nodes.json");
        let cache = NodeCache::new(&path, INTERVAL);

        let at = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z").unwrap().with_timezone(&Utc);
        let nodes: NodeSet = vec![node("9.9.9.9", true, at)].into_iter().collect();
        cache.save(&nodes).await.unwrap();

        let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw[0]["address"], "9.9.9.9");
        assert_eq!(raw[0]["port"], 18089);
        assert_eq!(raw[0]["observedAt"], "2024-05-01T12:00:00Z");
    }
}
