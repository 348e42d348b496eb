//! Seeder Configuration
//!
//! Statically typed configuration, loaded once at startup from a TOML file
//! and overridden from the command line. The engine only ever receives a
//! validated `SeederConfig`.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::{DEFAULT_DAEMON_RPC_PORT, DEFAULT_NODE_RPC_PORT};

/// How the reference blockheight is obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum HeightDiscovery {
    /// Query every source and take the highest plausible height
    Compare,
    /// Local daemon only
    Monerod,
    /// xmrchain.net explorer only
    Xmrchain,
    /// moneroblocks.info explorer only
    Moneroblocks,
}

/// DNS backend managing the record set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DnsBackend {
    /// Key-authenticated REST API
    Cloudflare,
    /// Signed-request SOAP API
    Transip,
}

/// How the local daemon is reached for peers and height
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DaemonAccess {
    /// HTTP RPC (`/get_peer_list`, `/get_height`)
    Rpc,
    /// Spawn the daemon binary with a one-shot command
    Cli,
}

/// Main configuration for the seeder
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeederConfig {
    // === Timing ===

    /// Sleep between passes (seconds)
    /// Each pass re-checks cached nodes and updates DNS
    pub loop_interval_secs: u64,

    /// Mass scan interval (seconds)
    /// Peer discovery runs at least this often; cache entries older than
    /// this are dropped on load
    pub scan_interval_secs: u64,

    // === Scanning ===

    /// Maximum health checks in flight at once
    pub concurrent_scans: usize,

    /// Per-node health check timeout (seconds)
    pub probe_timeout_secs: u64,

    /// RPC port probed on discovered nodes
    pub node_rpc_port: u16,

    /// How many blocks a node may lag behind the reference height
    pub acceptable_block_offset: u64,

    // === Blockheight ===

    /// Source(s) of the reference height
    pub blockheight_discovery: HeightDiscovery,

    /// Attempts per height source before it is given up for the pass
    pub height_retries: u32,

    /// Pause between attempts (seconds)
    pub height_retry_backoff_secs: u64,

    /// Timeout of a single explorer request (seconds)
    pub height_request_timeout_secs: u64,

    // === Local daemon ===

    /// Peer list / height access mode
    pub daemon_access: DaemonAccess,

    /// Daemon executable (cli access)
    pub daemon_path: PathBuf,

    /// Daemon RPC address
    pub daemon_address: String,

    /// Daemon RPC port
    pub daemon_port: u16,

    /// Daemon RPC credentials as `user:pass`
    pub daemon_auth: Option<String>,

    /// Timeout for one spawned daemon command (seconds)
    pub daemon_command_timeout_secs: u64,

    /// Extra candidates (`address` or `address:port`) added to every discovery
    pub seed_nodes: Vec<String>,

    // === DNS ===

    /// Backend managing the records
    pub dns_provider: DnsBackend,

    /// Zone name without the subdomain, e.g. `example.com`
    pub domain: Option<String>,

    /// Managed subdomain
    pub subdomain: String,

    /// API key (Cloudflare) or path to the RSA private key (TransIP)
    pub api_key: Option<String>,

    /// API account e-mail (Cloudflare) or login (TransIP)
    pub api_email: Option<String>,

    /// Number of A records to publish
    pub max_records: usize,

    /// TTL of created records (seconds)
    pub record_ttl: u32,

    // === Files ===

    /// JSON snapshot of verified nodes
    pub cache_path: PathBuf,

    /// Newline-delimited list of banned addresses / prefixes
    pub ban_list_path: Option<PathBuf>,

    /// Collapse crowded /16 and /24 ranges of the ban list into prefixes
    pub compact_ban_list: bool,

    // === HTTP API ===

    /// Serve /health, /status and /metrics
    pub enable_api: bool,

    /// Port for the HTTP API
    pub api_port: u16,
}

impl Default for SeederConfig {
    fn default() -> Self {
        Self {
            // Timing
            loop_interval_secs: 180,   // 3 minutes
            scan_interval_secs: 1800,  // 30 minutes

            // Scanning
            concurrent_scans: 20,
            probe_timeout_secs: 2,
            node_rpc_port: DEFAULT_NODE_RPC_PORT,
            acceptable_block_offset: 3,

            // Blockheight
            blockheight_discovery: HeightDiscovery::Compare,
            height_retries: 5,
            height_retry_backoff_secs: 1,
            height_request_timeout_secs: 5,

            // Local daemon
            daemon_access: DaemonAccess::Rpc,
            daemon_path: PathBuf::from("monerod"),
            daemon_address: "127.0.0.1".to_string(),
            daemon_port: DEFAULT_DAEMON_RPC_PORT,
            daemon_auth: None,
            daemon_command_timeout_secs: 10,
            seed_nodes: vec![],

            // DNS
            dns_provider: DnsBackend::Cloudflare,
            domain: None,
            subdomain: "node".to_string(),
            api_key: None,
            api_email: None,
            max_records: 5,
            record_ttl: 120,

            // Files
            cache_path: PathBuf::from("cached_nodes.json"),
            ban_list_path: None,
            compact_ban_list: false,

            // HTTP API
            enable_api: false,
            api_port: 8080,
        }
    }
}

impl SeederConfig {
    /// Load configuration from TOML file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    // Builder-style methods for CLI overrides; `None` keeps the file value

    pub fn with_domain(mut self, domain: Option<String>) -> Self {
        if domain.is_some() {
            self.domain = domain;
        }
        self
    }

    pub fn with_subdomain(mut self, subdomain: Option<String>) -> Self {
        if let Some(subdomain) = subdomain {
            self.subdomain = subdomain;
        }
        self
    }

    pub fn with_credentials(mut self, api_key: Option<String>, api_email: Option<String>) -> Self {
        if api_key.is_some() {
            self.api_key = api_key;
        }
        if api_email.is_some() {
            self.api_email = api_email;
        }
        self
    }

    pub fn with_dns_provider(mut self, provider: Option<DnsBackend>) -> Self {
        if let Some(provider) = provider {
            self.dns_provider = provider;
        }
        self
    }

    pub fn with_max_records(mut self, max_records: Option<usize>) -> Self {
        if let Some(max_records) = max_records {
            self.max_records = max_records;
        }
        self
    }

    pub fn with_intervals(mut self, loop_secs: Option<u64>, scan_secs: Option<u64>) -> Self {
        if let Some(secs) = loop_secs {
            self.loop_interval_secs = secs;
        }
        if let Some(secs) = scan_secs {
            self.scan_interval_secs = secs;
        }
        self
    }

    pub fn with_concurrent_scans(mut self, concurrent: Option<usize>) -> Self {
        if let Some(concurrent) = concurrent {
            self.concurrent_scans = concurrent;
        }
        self
    }

    pub fn with_ban_list(mut self, path: Option<PathBuf>) -> Self {
        if path.is_some() {
            self.ban_list_path = path;
        }
        self
    }

    pub fn with_blockheight_discovery(mut self, mode: Option<HeightDiscovery>) -> Self {
        if let Some(mode) = mode {
            self.blockheight_discovery = mode;
        }
        self
    }

    pub fn with_daemon(
        mut self,
        path: Option<PathBuf>,
        address: Option<String>,
        port: Option<u16>,
        auth: Option<String>,
    ) -> Self {
        if let Some(path) = path {
            self.daemon_path = path;
        }
        if let Some(address) = address {
            self.daemon_address = address;
        }
        if let Some(port) = port {
            self.daemon_port = port;
        }
        if auth.is_some() {
            self.daemon_auth = auth;
        }
        self
    }

    pub fn with_cache_path(mut self, path: Option<PathBuf>) -> Self {
        if let Some(path) = path {
            self.cache_path = path;
        }
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.domain.as_deref().map_or(true, str::is_empty) {
            anyhow::bail!("domain is required");
        }

        if self.api_key.as_deref().map_or(true, str::is_empty) {
            anyhow::bail!("api_key is required");
        }

        if self.api_email.as_deref().map_or(true, str::is_empty) {
            anyhow::bail!("api_email is required");
        }

        if self.max_records == 0 {
            anyhow::bail!("max_records must be at least 1");
        }

        if self.concurrent_scans == 0 {
            anyhow::bail!("concurrent_scans must be at least 1");
        }

        if self.probe_timeout_secs == 0 {
            anyhow::bail!("probe_timeout_secs must be at least 1");
        }

        if self.height_retries == 0 {
            anyhow::bail!("height_retries must be at least 1");
        }

        // The daemon's RPC login uses digest authentication; only the
        // spawned binary can pass credentials on
        if self.daemon_auth.is_some() && self.daemon_access == DaemonAccess::Rpc {
            anyhow::bail!("daemon_auth requires daemon_access = \"cli\"");
        }

        if self.scan_interval_secs <= self.loop_interval_secs {
            anyhow::bail!(
                "scan_interval_secs ({}) must be greater than loop_interval_secs ({})",
                self.scan_interval_secs,
                self.loop_interval_secs
            );
        }

        Ok(())
    }

    // Accessors used by the engine once validated

    pub fn loop_interval(&self) -> Duration {
        Duration::from_secs(self.loop_interval_secs)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn domain(&self) -> &str {
        self.domain.as_deref().unwrap_or_default()
    }

    pub fn api_key(&self) -> &str {
        self.api_key.as_deref().unwrap_or_default()
    }

    pub fn api_email(&self) -> &str {
        self.api_email.as_deref().unwrap_or_default()
    }

    /// Fully qualified managed name, e.g. `node.example.com`
    pub fn full_domain(&self) -> String {
        format!("{}.{}", self.subdomain, self.domain())
    }
}
