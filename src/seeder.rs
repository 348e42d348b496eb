//! Reconciliation Loop
//!
//! One pass walks the states below and ends idle until the next tick:
//!
//! ```text
//! RESOLVE_HEIGHT -> LOAD_CACHE -> RESCAN_CACHE -> [DISCOVER_PEERS -> RESCAN_PEERS]
//!                -> PERSIST -> RECONCILE_DNS -> IDLE
//! ```
//!
//! - No trusted height, no pass: DNS is never touched against a guessed height
//! - Peer discovery is the expensive step. It runs when the verified set is
//!   too small to fill the record set, or once the mass scan interval has
//!   elapsed since the previous discovery
//! - An empty verified set never reaches DNS; it would depopulate the name
//!
//! Pass state lives in locals of `Seeder::pass`. The HTTP API only sees the
//! `PassReport` published when a pass ends.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::api::Metrics;
use crate::ban::BanList;
use crate::cache::NodeCache;
use crate::config::SeederConfig;
use crate::daemon::PeerDiscovery;
use crate::dns::{self, DnsProvider};
use crate::height::HeightOracle;
use crate::scanner::Scanner;
use crate::types::{BlockHeight, NodeSet};

/// How a pass ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassOutcome {
    /// DNS was reconciled (individual mutations may still have failed)
    Completed,
    /// No source produced a reference height
    HeightUnavailable,
    /// Nothing verified; DNS left alone
    NoValidNodes,
    /// The provider's record listing failed; DNS left alone
    DnsUnavailable,
}

/// Summary of one pass, published for the status API
#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: PassOutcome,
    pub reference_height: Option<BlockHeight>,
    /// Fresh, non-banned cache entries at the start of the pass
    pub cached: usize,
    /// Whether peer discovery ran
    pub discovered: bool,
    /// Health checks issued
    pub scanned: usize,
    /// Nodes verified by the end of the pass
    pub valid: usize,
    pub records_added: usize,
    pub records_deleted: usize,
    pub records_failed: usize,
}

impl PassReport {
    fn started() -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            finished_at: now,
            outcome: PassOutcome::Completed,
            reference_height: None,
            cached: 0,
            discovered: false,
            scanned: 0,
            valid: 0,
            records_added: 0,
            records_deleted: 0,
            records_failed: 0,
        }
    }

    fn finish(mut self, outcome: PassOutcome) -> Self {
        self.outcome = outcome;
        self.finished_at = Utc::now();
        self
    }
}

/// Last published pass, shared with the HTTP API
pub type LastPass = Arc<RwLock<Option<PassReport>>>;

/// Drives the pass state machine
pub struct Seeder {
    config: Arc<SeederConfig>,
    oracle: HeightOracle,
    cache: NodeCache,
    bans: BanList,
    scanner: Scanner,
    discovery: PeerDiscovery,
    provider: Arc<dyn DnsProvider>,
    rng: StdRng,

    /// When peer discovery last ran; `None` until the first one
    last_discovery: Option<Instant>,

    metrics: Arc<Metrics>,
    last_pass: LastPass,
}

impl Seeder {
    pub fn new(
        config: Arc<SeederConfig>,
        oracle: HeightOracle,
        cache: NodeCache,
        bans: BanList,
        scanner: Scanner,
        discovery: PeerDiscovery,
        provider: Arc<dyn DnsProvider>,
    ) -> Self {
        Self {
            config,
            oracle,
            cache,
            bans,
            scanner,
            discovery,
            provider,
            rng: StdRng::from_entropy(),
            last_discovery: None,
            metrics: Arc::new(Metrics::new()),
            last_pass: Arc::new(RwLock::new(None)),
        }
    }

    /// Replace the record rotation RNG
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    pub fn last_pass(&self) -> LastPass {
        self.last_pass.clone()
    }

    /// Run passes forever, sleeping `loop_interval` in between
    pub async fn run(mut self) {
        loop {
            self.run_pass().await;

            info!("💤 Next pass in {}s", self.config.loop_interval_secs);
            tokio::time::sleep(self.config.loop_interval()).await;
        }
    }

    /// Run a single pass
    pub async fn run_pass(&mut self) -> PassReport {
        let report = self.pass().await;

        info!(
            "✅ Pass finished ({:?}): {} valid, {} scanned, +{} -{} records, {} failed",
            report.outcome,
            report.valid,
            report.scanned,
            report.records_added,
            report.records_deleted,
            report.records_failed
        );

        self.metrics.record_pass(&report);
        *self.last_pass.write().await = Some(report.clone());
        report
    }

    async fn pass(&mut self) -> PassReport {
        let mut report = PassReport::started();

        // ==================== RESOLVE_HEIGHT ====================
        let height = match self.oracle.resolve(self.config.blockheight_discovery).await {
            Ok(height) => height,
            Err(e) => {
                error!("📏 No reference height, skipping pass: {}", e);
                return report.finish(PassOutcome::HeightUnavailable);
            }
        };
        report.reference_height = Some(height);

        // ==================== LOAD_CACHE / RESCAN_CACHE ====================
        let cached = self.bans.filter(self.cache.load().await);
        report.cached = cached.len();

        let checked = self.scanner.scan(cached, height).await;
        report.scanned += checked.len();
        let mut valid = checked.valid();

        // ==================== DISCOVER_PEERS / RESCAN_PEERS ====================
        if self.discovery_due(valid.len()) {
            report.discovered = true;
            self.last_discovery = Some(Instant::now());

            // Cached nodes were already checked against this height
            let candidates: NodeSet = self
                .bans
                .filter(self.discovery.discover().await)
                .into_iter()
                .filter(|node| !checked.contains(&node.address))
                .collect();

            let peers = self.scanner.scan(candidates, height).await;
            report.scanned += peers.len();
            valid += peers.valid();
        }
        report.valid = valid.len();

        if valid.is_empty() {
            error!("🔎 No valid nodes this pass, leaving DNS untouched");
            return report.finish(PassOutcome::NoValidNodes);
        }

        // ==================== PERSIST ====================
        if let Err(e) = self.cache.save(&valid).await {
            error!("📦 Could not write {}: {}", self.cache.path().display(), e);
        }

        // ==================== RECONCILE_DNS ====================
        match dns::reconcile(
            self.provider.as_ref(),
            &valid,
            self.config.max_records,
            &mut self.rng,
        )
        .await
        {
            Ok(outcome) => {
                report.records_added = outcome.added;
                report.records_deleted = outcome.deleted;
                report.records_failed = outcome.failed;
                report.finish(PassOutcome::Completed)
            }
            Err(e) => {
                warn!("🌐 Skipping DNS update of {}: {}", self.provider.full_name(), e);
                report.finish(PassOutcome::DnsUnavailable)
            }
        }
    }

    fn discovery_due(&self, valid: usize) -> bool {
        if valid <= self.config.max_records {
            return true;
        }
        self.last_discovery
            .map_or(true, |at| at.elapsed() > self.config.scan_interval())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::{DaemonError, PeerAddress, PeerSource};
    use crate::height::{HeightError, HeightSource, RetryPolicy, SourceKind};
    use crate::scanner::{HealthProbe, ProbeError};
    use crate::testing::MemoryProvider;
    use crate::types::NodeRecord;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    struct FixedHeight(Option<BlockHeight>);

    #[async_trait]
    impl HeightSource for FixedHeight {
        fn kind(&self) -> SourceKind {
            SourceKind::Daemon
        }

        async fn fetch_height(&self) -> Result<BlockHeight, HeightError> {
            self.0.ok_or(HeightError::Request("connection refused".to_string()))
        }
    }

    struct CountingPeers {
        peers: Vec<PeerAddress>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PeerSource for CountingPeers {
        async fn known_peers(&self) -> Result<Vec<PeerAddress>, DaemonError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.peers.clone())
        }
    }

    struct HeightTable(HashMap<String, BlockHeight>);

    #[async_trait]
    impl HealthProbe for HeightTable {
        async fn probe(&self, address: &str, _port: u16) -> Result<BlockHeight, ProbeError> {
            self.0
                .get(address)
                .copied()
                .ok_or(ProbeError::Request("connection refused".to_string()))
        }
    }

    struct Fixture {
        dir: TempDir,
        peers: Arc<CountingPeers>,
        provider: Arc<MemoryProvider>,
    }

    impl Fixture {
        fn new(peers: &[&str]) -> Self {
            Self {
                dir: tempdir().unwrap(),
                peers: Arc::new(CountingPeers {
                    peers: peers.iter().map(|a| PeerAddress::new(*a, 18089)).collect(),
                    calls: AtomicUsize::new(0),
                }),
                provider: Arc::new(MemoryProvider::new("node.example.com")),
            }
        }

        fn cache(&self) -> NodeCache {
            NodeCache::new(self.dir.path().join("cached_nodes.json"), Duration::from_secs(1800))
        }

        fn seeder(
            &self,
            height: Option<BlockHeight>,
            nodes: &[(&str, BlockHeight)],
            bans: &str,
            max_records: usize,
        ) -> Seeder {
            let config = Arc::new(SeederConfig {
                max_records,
                ..SeederConfig::default()
            });
            let oracle = HeightOracle::new(
                vec![Arc::new(FixedHeight(height))],
                RetryPolicy {
                    attempts: 1,
                    backoff: Duration::ZERO,
                },
            );
            let probe = HeightTable(nodes.iter().map(|(a, h)| (a.to_string(), *h)).collect());
            let scanner = Scanner::new(Arc::new(probe), 4, Duration::from_secs(2), 3);

            Seeder::new(
                config,
                oracle,
                self.cache(),
                BanList::parse(bans),
                scanner,
                PeerDiscovery::new(self.peers.clone(), vec![]),
                self.provider.clone(),
            )
            .with_rng(StdRng::seed_from_u64(1))
        }

        fn discoveries(&self) -> usize {
            self.peers.calls.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn test_first_pass_discovers_and_publishes() {
        let fx = Fixture::new(&["1.1.1.1", "2.2.2.2", "3.3.3.3"]);
        let mut seeder = fx.seeder(
            Some(100),
            &[("1.1.1.1", 100), ("2.2.2.2", 90), ("3.3.3.3", 100)],
            "3.3.3.3",
            5,
        );

        let report = seeder.run_pass().await;

        assert_eq!(report.outcome, PassOutcome::Completed);
        assert_eq!(report.reference_height, Some(100));
        assert!(report.discovered);
        assert_eq!(report.scanned, 2);
        assert_eq!(report.valid, 1);
        assert_eq!(report.records_added, 1);
        assert_eq!(fx.provider.addresses(), vec!["1.1.1.1".to_string()]);

        let cached = fx.cache().load().await;
        assert_eq!(cached.addresses().collect::<Vec<_>>(), vec!["1.1.1.1"]);
    }

    #[tokio::test]
    async fn test_height_failure_skips_pass() {
        let fx = Fixture::new(&["1.1.1.1"]);
        fx.provider.seed(&["9.9.9.9"]);
        let mut seeder = fx.seeder(None, &[("1.1.1.1", 100)], "", 5);

        let report = seeder.run_pass().await;

        assert_eq!(report.outcome, PassOutcome::HeightUnavailable);
        assert_eq!(fx.discoveries(), 0);
        assert_eq!(fx.provider.mutations(), 0);
        assert_eq!(fx.provider.addresses(), vec!["9.9.9.9".to_string()]);
    }

    #[tokio::test]
    async fn test_no_valid_nodes_keeps_records() {
        let fx = Fixture::new(&["1.1.1.1", "2.2.2.2"]);
        fx.provider.seed(&["9.9.9.9", "8.8.8.8"]);
        let mut seeder = fx.seeder(Some(100), &[("1.1.1.1", 50)], "", 5);

        let report = seeder.run_pass().await;

        assert_eq!(report.outcome, PassOutcome::NoValidNodes);
        assert_eq!(report.scanned, 2);
        assert_eq!(fx.provider.mutations(), 0);
        assert_eq!(fx.provider.addresses().len(), 2);
    }

    #[tokio::test]
    async fn test_discovery_waits_for_scan_interval() {
        let fx = Fixture::new(&["1.1.1.1", "2.2.2.2", "3.3.3.3"]);
        let nodes = [("1.1.1.1", 100), ("2.2.2.2", 100), ("3.3.3.3", 99)];
        let mut seeder = fx.seeder(Some(100), &nodes, "", 2);

        seeder.run_pass().await;
        assert_eq!(fx.discoveries(), 1);

        // Three verified nodes cover two records; the cache is enough
        let report = seeder.run_pass().await;
        assert!(!report.discovered);
        assert_eq!(report.cached, 3);
        assert_eq!(fx.discoveries(), 1);
        assert_eq!(report.records_added + report.records_deleted, 0);
        assert_eq!(fx.provider.addresses().len(), 2);
    }

    #[tokio::test]
    async fn test_discovery_runs_after_scan_interval() {
        let fx = Fixture::new(&["4.4.4.4"]);
        let nodes = [("1.1.1.1", 100), ("2.2.2.2", 100), ("3.3.3.3", 100), ("4.4.4.4", 100)];
        let mut seeder = fx.seeder(Some(100), &nodes, "", 2);
        seeder.run_pass().await;
        assert_eq!(fx.discoveries(), 1);

        let snapshot: NodeSet = ["1.1.1.1", "2.2.2.2", "3.3.3.3"]
            .into_iter()
            .map(|address| {
                let mut node = NodeRecord::new(address);
                node.mark_valid(Utc::now());
                node
            })
            .collect();
        fx.cache().save(&snapshot).await.unwrap();

        seeder.config = Arc::new(SeederConfig {
            max_records: 2,
            scan_interval_secs: 1,
            ..SeederConfig::default()
        });
        seeder.last_discovery = Instant::now().checked_sub(Duration::from_secs(2));
        assert!(seeder.last_discovery.is_some());

        // Three valid cached nodes cover two records, but the last discovery is stale
        let report = seeder.run_pass().await;
        assert!(report.discovered);
        assert_eq!(report.cached, 3);
        assert_eq!(report.valid, 4);
        assert_eq!(fx.discoveries(), 2);
    }

    #[tokio::test]
    async fn test_discovery_runs_when_cache_runs_short() {
        let fx = Fixture::new(&["1.1.1.1"]);
        let mut cached = NodeRecord::new("5.5.5.5");
        cached.mark_valid(Utc::now());
        let snapshot: NodeSet = [cached].into_iter().collect();
        fx.cache().save(&snapshot).await.unwrap();

        let mut seeder = fx.seeder(Some(100), &[("1.1.1.1", 100), ("5.5.5.5", 100)], "", 5);
        seeder.last_discovery = Some(Instant::now());

        let report = seeder.run_pass().await;

        assert!(report.discovered);
        assert_eq!(report.valid, 2);
        let mut published = fx.provider.addresses();
        published.sort();
        assert_eq!(published, vec!["1.1.1.1".to_string(), "5.5.5.5".to_string()]);
    }

    #[tokio::test]
    async fn test_listing_failure_still_persists() {
        let fx = Fixture::new(&["1.1.1.1"]);
        fx.provider.fail_list(true);
        let mut seeder = fx.seeder(Some(100), &[("1.1.1.1", 100)], "", 5);

        let report = seeder.run_pass().await;

        assert_eq!(report.outcome, PassOutcome::DnsUnavailable);
        assert_eq!(fx.provider.mutations(), 0);
        assert_eq!(fx.cache().load().await.len(), 1);
    }

    #[tokio::test]
    async fn test_report_is_published() {
        let fx = Fixture::new(&["1.1.1.1"]);
        let mut seeder = fx.seeder(Some(100), &[("1.1.1.1", 100)], "", 5);
        let last_pass = seeder.last_pass();
        let metrics = seeder.metrics();

        assert!(last_pass.read().await.is_none());
        seeder.run_pass().await;

        let published = last_pass.read().await.clone().unwrap();
        assert_eq!(published.valid, 1);
        assert_eq!(metrics.passes.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.reference_height.load(Ordering::Relaxed), 100);
    }
}
