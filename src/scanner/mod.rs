//! Node Health Scanner
//!
//! Checks every candidate of a `NodeSet` against the reference height with
//! a bounded number of checks in flight. A scan is a barrier: it returns
//! once every candidate has been decided, and every returned record is
//! either valid or invalid.
//!
//! ## Validity
//!
//! A node is valid when its reported height is at most
//! `acceptable_block_offset` blocks behind the reference. Nodes ahead of the
//! reference are accepted since the reference itself may lag. Any probe
//! failure (timeout, transport error, bad status, malformed body) makes the
//! node invalid.

mod probe;

pub use probe::HttpProbe;

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::types::{BlockHeight, NodeSet, Validity};

/// Health check errors; all of them classify the node as invalid
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("request failed: {0}")]
    Request(String),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// One health request against one node
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Height reported by the node at `address:port`
    async fn probe(&self, address: &str, port: u16) -> Result<BlockHeight, ProbeError>;
}

/// Whether `reported` is close enough to `reference`
pub fn is_in_sync(reported: BlockHeight, reference: BlockHeight, offset: u64) -> bool {
    reported >= reference.saturating_sub(offset)
}

/// Bounded-concurrency scanner
pub struct Scanner {
    probe: Arc<dyn HealthProbe>,
    concurrency: usize,
    timeout: Duration,
    offset: u64,
}

impl Scanner {
    pub fn new(probe: Arc<dyn HealthProbe>, concurrency: usize, timeout: Duration, offset: u64) -> Self {
        Self {
            probe,
            concurrency: concurrency.max(1),
            timeout,
            offset,
        }
    }

    /// Decide the validity of every node in `nodes`
    ///
    /// Output order and membership equal the input. Valid nodes get a fresh
    /// `observed_at`.
    pub async fn scan(&self, nodes: NodeSet, reference: BlockHeight) -> NodeSet {
        if nodes.is_empty() {
            return nodes;
        }

        let mut nodes = nodes.into_vec();
        let targets: Vec<(String, u16)> = nodes.iter().map(|n| (n.address.clone(), n.port)).collect();

        // Undecided slots stay invalid, e.g. when a probe task panics
        let mut verdicts = vec![Validity::Invalid; targets.len()];

        let mut join_set = JoinSet::new();
        let mut next_index = 0usize;
        let mut in_flight_peak = 0usize;

        loop {
            while next_index < targets.len() && join_set.len() < self.concurrency {
                let (address, port) = targets[next_index].clone();
                let probe = self.probe.clone();
                let timeout = self.timeout;
                let index = next_index;
                join_set.spawn(async move {
                    let result = match tokio::time::timeout(timeout, probe.probe(&address, port)).await {
                        Ok(result) => result,
                        Err(_) => Err(ProbeError::Timeout(timeout)),
                    };
                    (index, address, result)
                });
                next_index += 1;
            }
            in_flight_peak = in_flight_peak.max(join_set.len());

            let Some(joined) = join_set.join_next().await else {
                break;
            };

            match joined {
                Ok((index, address, Ok(height))) => {
                    let in_sync = is_in_sync(height, reference, self.offset);
                    debug!(
                        "🔎 {} reports height {} (reference {}): {}",
                        address,
                        height,
                        reference,
                        if in_sync { "valid" } else { "lagging" }
                    );
                    verdicts[index] = Validity::from_bool(in_sync);
                }
                Ok((index, address, Err(e))) => {
                    debug!("🔎 {} failed health check: {}", address, e);
                    verdicts[index] = Validity::Invalid;
                }
                Err(e) => {
                    warn!("🔎 Health check task failed: {}", e);
                }
            }
        }

        let now = Utc::now();
        let mut valid = 0usize;
        for (node, verdict) in nodes.iter_mut().zip(verdicts) {
            match verdict {
                Validity::Valid => {
                    node.mark_valid(now);
                    valid += 1;
                }
                _ => node.mark_invalid(),
            }
        }

        info!(
            "🔎 Scanned {} node(s) against height {}: {} valid (max {} in flight)",
            nodes.len(),
            reference,
            valid,
            in_flight_peak
        );

        nodes.into_iter().collect()
    }
}
