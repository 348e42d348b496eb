//! Reference Blockheight
//!
//! Resolves the single height a pass judges nodes against. Sources are the
//! local daemon and public block explorers.
//!
//! ## Policy
//!
//! - Every source gets a fixed retry budget with a fixed pause between
//!   attempts; a source that exhausts it is skipped for this pass
//! - In `compare` mode every source is queried and the highest plausible
//!   height wins, so a lagging local daemon cannot mask the network tip
//! - If no source yields a plausible height the resolution fails and the
//!   pass must not touch DNS

mod explorer;

pub use explorer::{MoneroblocksSource, XmrchainSource};

use async_trait::async_trait;
use futures::future::join_all;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::HeightDiscovery;
use crate::types::BlockHeight;

/// Where a height sample came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// Local daemon
    Daemon,
    /// xmrchain.net explorer
    Xmrchain,
    /// moneroblocks.info explorer
    Moneroblocks,
}

impl SourceKind {
    /// Whether this source takes part in a resolution in `mode`
    pub fn selected_by(&self, mode: HeightDiscovery) -> bool {
        matches!(
            (mode, self),
            (HeightDiscovery::Compare, _)
                | (HeightDiscovery::Monerod, SourceKind::Daemon)
                | (HeightDiscovery::Xmrchain, SourceKind::Xmrchain)
                | (HeightDiscovery::Moneroblocks, SourceKind::Moneroblocks)
        )
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::Daemon => "monerod",
            SourceKind::Xmrchain => "xmrchain",
            SourceKind::Moneroblocks => "moneroblocks",
        };
        f.write_str(name)
    }
}

/// A height reported by one source during one resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeightSample {
    pub source: SourceKind,
    pub height: BlockHeight,
}

/// Height resolution errors
#[derive(Debug, thiserror::Error)]
pub enum HeightError {
    #[error("no height source yielded a usable value")]
    Unavailable,

    #[error("request failed: {0}")]
    Request(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("source reported failure: {0}")]
    Rejected(String),
}

/// A single source of the current chain height
#[async_trait]
pub trait HeightSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// One attempt at reading the height; retries are the oracle's business
    async fn fetch_height(&self) -> Result<BlockHeight, HeightError>;
}

/// Retry budget applied to every source
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff: Duration::from_secs(1),
        }
    }
}

/// Resolves the reference height from the configured sources
pub struct HeightOracle {
    sources: Vec<Arc<dyn HeightSource>>,
    retry: RetryPolicy,
}

impl HeightOracle {
    pub fn new(sources: Vec<Arc<dyn HeightSource>>, retry: RetryPolicy) -> Self {
        Self { sources, retry }
    }

    /// Resolve the reference height for one pass
    pub async fn resolve(&self, mode: HeightDiscovery) -> Result<BlockHeight, HeightError> {
        let selected: Vec<_> = self
            .sources
            .iter()
            .filter(|s| s.kind().selected_by(mode))
            .collect();

        if selected.is_empty() {
            warn!("📏 No height source configured for {:?} mode", mode);
            return Err(HeightError::Unavailable);
        }

        let samples: Vec<HeightSample> = join_all(selected.iter().map(|s| self.sample(s.as_ref())))
            .await
            .into_iter()
            .flatten()
            .collect();

        let best = samples
            .iter()
            .max_by_key(|s| s.height)
            .ok_or(HeightError::Unavailable)?;

        if samples.len() > 1 {
            info!(
                "📏 Reference height {} (from {}, {} source(s) answered)",
                best.height,
                best.source,
                samples.len()
            );
        }

        Ok(best.height)
    }

    /// Query one source within the retry budget
    async fn sample(&self, source: &dyn HeightSource) -> Option<HeightSample> {
        let kind = source.kind();

        for attempt in 1..=self.retry.attempts {
            match source.fetch_height().await {
                Ok(height) if height > 0 => {
                    info!("📏 {} height is {}", kind, height);
                    return Some(HeightSample { source: kind, height });
                }
                Ok(height) => {
                    warn!("📏 {} reported implausible height {}", kind, height);
                }
                Err(e) => {
                    warn!(
                        "📏 Fetching {} height failed (attempt {}/{}): {}",
                        kind, attempt, self.retry.attempts, e
                    );
                }
            }

            if attempt < self.retry.attempts {
                tokio::time::sleep(self.retry.backoff).await;
            }
        }

        warn!("📏 {} unavailable for this pass", kind);
        None
    }
}
