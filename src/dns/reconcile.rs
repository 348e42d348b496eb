//! DNS reconciliation
//!
//! Brings the provider's records for the managed name in line with the
//! verified nodes:
//!
//! 1. Duplicate records of one address are deleted, the first one stays
//! 2. Records whose address is still valid stay, capped at `max_records`
//!    (most recently verified first)
//! 3. Records whose address is no longer valid are deleted
//! 4. Free slots are filled from the shuffled valid set
//!
//! Keeping still-valid records makes a pass over an unchanged valid set a
//! no-op. Adds run before deletes so the name never goes empty in between.

use rand::Rng;
use std::collections::HashSet;
use tracing::{error, info, warn};

use super::{DnsError, DnsProvider, DnsRecord};
use crate::types::NodeSet;

/// Mutations needed to converge one record set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Records left in place
    pub keep: Vec<DnsRecord>,
    /// Addresses to publish
    pub add: Vec<String>,
    /// Records to remove
    pub delete: Vec<DnsRecord>,
}

impl ReconcilePlan {
    pub fn is_noop(&self) -> bool {
        self.add.is_empty() && self.delete.is_empty()
    }
}

/// Outcome of applying a plan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: usize,
    pub deleted: usize,
    pub failed: usize,
}

/// Compute the mutations turning `current` into the target record set
///
/// `valid` must hold only verified nodes.
pub fn plan<R: Rng + ?Sized>(
    current: &[DnsRecord],
    valid: &NodeSet,
    max_records: usize,
    rng: &mut R,
) -> ReconcilePlan {
    let mut result = ReconcilePlan::default();
    let mut listed: HashSet<&str> = HashSet::new();
    let mut still_valid: Vec<&DnsRecord> = Vec::new();

    for record in current {
        if !listed.insert(record.address.as_str()) {
            result.delete.push(record.clone());
        } else if valid.contains(&record.address) {
            still_valid.push(record);
        } else {
            result.delete.push(record.clone());
        }
    }

    if still_valid.len() > max_records {
        // Newest verification first; stable so ties keep provider order
        still_valid.sort_by_key(|r| {
            std::cmp::Reverse(valid.get(&r.address).and_then(|n| n.observed_at))
        });
        for record in still_valid.drain(max_records..) {
            result.delete.push(record.clone());
        }
    }
    result.keep = still_valid.into_iter().cloned().collect();

    let vacancies = max_records - result.keep.len();
    let mut candidates = valid.clone();
    candidates.shuffle(rng);
    result.add = candidates
        .addresses()
        .filter(|a| !listed.contains(a))
        .take(vacancies)
        .map(String::from)
        .collect();

    result
}

/// Apply `plan`, adds first; every failure is logged and counted
pub async fn apply(provider: &dyn DnsProvider, plan: &ReconcilePlan) -> ReconcileReport {
    let mut report = ReconcileReport::default();

    for address in &plan.add {
        match provider.add_record(address).await {
            Ok(()) => {
                info!("🌐 Added {} -> {}", provider.full_name(), address);
                report.added += 1;
            }
            Err(e) => {
                error!("🌐 Adding record {} failed: {}", address, e);
                report.failed += 1;
            }
        }
    }

    for record in &plan.delete {
        match provider.delete_record(record).await {
            Ok(()) => {
                info!("🌐 Removed {} -> {}", provider.full_name(), record.address);
                report.deleted += 1;
            }
            Err(e) => {
                error!("🌐 Removing record {} failed: {}", record.address, e);
                report.failed += 1;
            }
        }
    }

    report
}

/// List, plan and apply against `provider`
///
/// A listing failure aborts before any mutation.
pub async fn reconcile<R: Rng + ?Sized>(
    provider: &dyn DnsProvider,
    valid: &NodeSet,
    max_records: usize,
    rng: &mut R,
) -> Result<ReconcileReport, DnsError> {
    let current = provider.list_records().await.map_err(|e| {
        warn!("🌐 Could not list records of {}: {}", provider.full_name(), e);
        e
    })?;
    info!(
        "🌐 {} has {} record(s), {} verified node(s) available",
        provider.full_name(),
        current.len(),
        valid.len()
    );

    let plan = plan(&current, valid, max_records, rng);
    if plan.is_noop() {
        info!("🌐 Records of {} are up to date", provider.full_name());
        return Ok(ReconcileReport::default());
    }

    let report = apply(provider, &plan).await;
    info!(
        "🌐 Reconciled {}: {} added, {} removed, {} failed",
        provider.full_name(),
        report.added,
        report.deleted,
        report.failed
    );
    Ok(report)
}
