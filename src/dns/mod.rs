//! DNS Record Management
//!
//! Publishes the verified nodes as A records of one managed name, e.g.
//! `node.example.com`, through a DNS provider's API.
//!
//! ## Backends
//!
//! - Cloudflare: key-authenticated REST API
//! - TransIP: SOAP API with RSA-signed requests
//!
//! Both sit behind `DnsProvider`, picked by `DnsBackend` at startup.

mod cloudflare;
mod reconcile;
mod transip;

pub use cloudflare::{CloudflareAuth, CloudflareProvider};
pub use reconcile::{plan, reconcile, ReconcilePlan, ReconcileReport};
pub use transip::TransipProvider;

use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;

use crate::config::{DnsBackend, SeederConfig};
use crate::crypto::CryptoError;
use crate::height::RetryPolicy;

/// An A record of the managed name as listed by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRecord {
    /// IPv4 address the record points at
    pub address: String,

    /// Provider's opaque record id
    pub record_id: String,
}

impl DnsRecord {
    pub fn new(address: impl Into<String>, record_id: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            record_id: record_id.into(),
        }
    }
}

/// DNS provider errors
#[derive(Debug, thiserror::Error)]
pub enum DnsError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("provider rejected the request: {0}")]
    Api(String),

    #[error("malformed provider response: {0}")]
    Malformed(String),

    #[error("zone '{0}' not found")]
    ZoneNotFound(String),

    #[error("request signing failed: {0}")]
    Signing(String),

    #[error("SOAP fault: {0}")]
    Soap(String),
}

impl From<CryptoError> for DnsError {
    fn from(e: CryptoError) -> Self {
        DnsError::Signing(e.to_string())
    }
}

impl From<reqwest::Error> for DnsError {
    fn from(e: reqwest::Error) -> Self {
        DnsError::Request(e.to_string())
    }
}

/// Record management capability of a DNS backend
///
/// Operations only ever touch A records of `full_name()`.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Fully qualified managed name
    fn full_name(&self) -> &str;

    /// Current A records; an error means the listing could not be obtained
    async fn list_records(&self) -> Result<Vec<DnsRecord>, DnsError>;

    /// Create an A record pointing at `address`
    async fn add_record(&self, address: &str) -> Result<(), DnsError>;

    /// Remove a record previously returned by `list_records`
    async fn delete_record(&self, record: &DnsRecord) -> Result<(), DnsError>;
}

/// Construct the configured backend
///
/// Fails on unusable credentials: an unknown Cloudflare zone or an
/// unreadable TransIP key.
pub async fn build_provider(config: &SeederConfig, client: Client) -> anyhow::Result<Arc<dyn DnsProvider>> {
    let retry = RetryPolicy {
        attempts: config.height_retries,
        backoff: std::time::Duration::from_secs(config.height_retry_backoff_secs),
    };

    let provider: Arc<dyn DnsProvider> = match config.dns_provider {
        DnsBackend::Cloudflare => Arc::new(
            CloudflareProvider::connect(
                client,
                cloudflare::API_BASE,
                CloudflareAuth {
                    email: config.api_email().to_string(),
                    key: config.api_key().to_string(),
                },
                config.domain(),
                &config.subdomain,
                config.record_ttl,
                retry,
            )
            .await?,
        ),
        DnsBackend::Transip => {
            let key = crate::crypto::resolve_private_key(config.api_key())?;
            Arc::new(TransipProvider::new(
                client,
                transip::API_HOST,
                config.api_email(),
                key,
                config.domain(),
                &config.subdomain,
                config.record_ttl,
            ))
        }
    };

    Ok(provider)
}
