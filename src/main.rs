// Allow dead code - some accessors are only used by tests or kept for API completeness
#![allow(dead_code)]

//! Monero DNS Seed
//!
//! Keeps the A records of one DNS name (e.g. `node.example.com`) pointing at
//! public Monero RPC nodes that are reachable and in sync with the network.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      MONERO DNS SEED                         │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Height Oracle   ←── monerod / xmrchain / moneroblocks       │
//! │  Node Cache      ←── JSON snapshot of verified nodes         │
//! │  Ban List        ←── Excludes listed addresses and ranges    │
//! │  Peer Discovery  ←── monerod peer list (RPC or CLI)          │
//! │  Scanner         ←── Bounded parallel /getheight checks      │
//! │  DNS Provider    ←── Cloudflare REST / TransIP SOAP          │
//! │  HTTP API        ←── Health, last pass and metrics           │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

mod api;
mod ban;
mod cache;
mod config;
mod crypto;
mod daemon;
mod dns;
mod height;
mod http;
mod scanner;
mod seeder;
mod types;

#[cfg(test)]
mod testing;

use ban::BanList;
use cache::NodeCache;
use config::{DnsBackend, HeightDiscovery, SeederConfig};
use daemon::{LocalDaemon, PeerDiscovery};
use height::{HeightOracle, HeightSource, MoneroblocksSource, RetryPolicy, XmrchainSource};
use scanner::{HttpProbe, Scanner};
use seeder::Seeder;

/// Timeout for DNS provider API requests
const PROVIDER_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Monero DNS Seed - publishes healthy public nodes as DNS records
#[derive(Parser, Debug)]
#[command(name = "monero-dns-seed")]
#[command(author = "Moneriote Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Keeps a DNS round-robin of healthy Monero public RPC nodes", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "monero-dns-seed.toml")]
    config: PathBuf,

    /// Zone the records live in, e.g. example.com
    #[arg(long)]
    domain: Option<String>,

    /// Managed subdomain
    #[arg(long)]
    subdomain: Option<String>,

    /// API key (Cloudflare) or RSA private key path (TransIP)
    #[arg(long)]
    api_key: Option<String>,

    /// API e-mail (Cloudflare) or login (TransIP)
    #[arg(long)]
    api_email: Option<String>,

    /// DNS backend
    #[arg(long, value_enum)]
    dns_provider: Option<DnsBackend>,

    /// Number of A records to publish
    #[arg(long)]
    max_records: Option<usize>,

    /// Seconds between passes
    #[arg(long)]
    loop_interval: Option<u64>,

    /// Seconds between peer discoveries
    #[arg(long)]
    scan_interval: Option<u64>,

    /// Health checks in flight at once
    #[arg(long)]
    concurrent_scans: Option<usize>,

    /// Ban list file
    #[arg(long)]
    ban_list: Option<PathBuf>,

    /// Reference height source(s)
    #[arg(long, value_enum)]
    blockheight_discovery: Option<HeightDiscovery>,

    /// monerod executable
    #[arg(long)]
    monerod_path: Option<PathBuf>,

    /// monerod RPC address
    #[arg(long)]
    monerod_address: Option<String>,

    /// monerod RPC port
    #[arg(long)]
    monerod_port: Option<u16>,

    /// monerod RPC login as user:pass
    #[arg(long)]
    monerod_auth: Option<String>,

    /// Node cache file
    #[arg(long)]
    cache_path: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Run a single pass and exit
    #[arg(long)]
    once: bool,

    /// Write a default configuration file to --config and exit
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into())
        )
        .init();

    info!("🌐 Monero DNS Seed v{}", env!("CARGO_PKG_VERSION"));

    if args.init_config {
        return init_config(&args.config);
    }

    // Load configuration
    let config = if args.config.exists() {
        SeederConfig::load(&args.config)?
    } else {
        warn!("Config file not found, using defaults");
        SeederConfig::default()
    };

    // Override config with CLI args
    let config = config
        .with_domain(args.domain)
        .with_subdomain(args.subdomain)
        .with_credentials(args.api_key, args.api_email)
        .with_dns_provider(args.dns_provider)
        .with_max_records(args.max_records)
        .with_intervals(args.loop_interval, args.scan_interval)
        .with_concurrent_scans(args.concurrent_scans)
        .with_ban_list(args.ban_list)
        .with_blockheight_discovery(args.blockheight_discovery)
        .with_daemon(args.monerod_path, args.monerod_address, args.monerod_port, args.monerod_auth)
        .with_cache_path(args.cache_path);

    config.validate()?;

    info!("⚙️  Configuration:");
    info!("   Managed name: {}", config.full_domain());
    info!("   DNS provider: {:?}", config.dns_provider);
    info!("   Max records: {}", config.max_records);
    info!("   Loop interval: {}s", config.loop_interval_secs);
    info!("   Scan interval: {}s", config.scan_interval_secs);
    info!("   Concurrent scans: {}", config.concurrent_scans);
    info!("   Blockheight discovery: {:?}", config.blockheight_discovery);
    info!("   Daemon: {}:{} ({:?})", config.daemon_address, config.daemon_port, config.daemon_access);

    let shared_config = Arc::new(config);

    // Node cache
    let cache = NodeCache::new(shared_config.cache_path.clone(), shared_config.scan_interval());
    cache.ensure_exists().await?;
    info!("📦 Node cache at {:?}", cache.path());

    // Ban list
    let bans = match &shared_config.ban_list_path {
        Some(path) => BanList::load(path, shared_config.compact_ban_list)
            .map_err(|e| anyhow::anyhow!("cannot read ban list {:?}: {}", path, e))?,
        None => BanList::default(),
    };

    // Local daemon
    let daemon_client = http::build_client(Duration::from_secs(shared_config.daemon_command_timeout_secs))?;
    daemon::ensure_reachable(
        &daemon_client,
        &shared_config.daemon_address,
        shared_config.daemon_port,
    )
    .await?;
    let local_daemon = Arc::new(LocalDaemon::from_config(&shared_config, daemon_client));

    // Reference height
    let explorer_client = http::build_client(Duration::from_secs(shared_config.height_request_timeout_secs))?;
    let sources: Vec<Arc<dyn HeightSource>> = vec![
        local_daemon.clone() as Arc<dyn HeightSource>,
        Arc::new(XmrchainSource::new(explorer_client.clone())),
        Arc::new(MoneroblocksSource::new(explorer_client)),
    ];
    let oracle = HeightOracle::new(
        sources,
        RetryPolicy {
            attempts: shared_config.height_retries,
            backoff: Duration::from_secs(shared_config.height_retry_backoff_secs),
        },
    );

    // Health checks
    let probe = HttpProbe::new(http::build_client(shared_config.probe_timeout())?);
    let scanner = Scanner::new(
        Arc::new(probe),
        shared_config.concurrent_scans,
        shared_config.probe_timeout(),
        shared_config.acceptable_block_offset,
    );

    let discovery = PeerDiscovery::from_config(&shared_config, local_daemon);

    // DNS provider
    let provider = dns::build_provider(&shared_config, http::build_client(PROVIDER_REQUEST_TIMEOUT)?).await?;
    info!("🌐 Managing {} through {}", provider.full_name(), provider.name());

    let mut seeder = Seeder::new(
        shared_config.clone(),
        oracle,
        cache,
        bans,
        scanner,
        discovery,
        provider,
    );

    if args.once {
        seeder.run_pass().await;
        info!("👋 Monero DNS Seed shutting down");
        return Ok(());
    }

    let api_handle = shared_config.enable_api.then(|| {
        tokio::spawn(api::run_api_server(
            shared_config.api_port,
            api::ApiState {
                full_name: shared_config.full_domain(),
                metrics: seeder.metrics(),
                last_pass: seeder.last_pass(),
            },
        ))
    });

    let seeder_handle = tokio::spawn(seeder.run());

    info!("✅ Seeder started");
    info!("   Press Ctrl+C to shutdown gracefully");

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Shutdown signal received");
        }
        result = seeder_handle => {
            error!("Seeder loop exited: {:?}", result);
        }
        Some(result) = async {
            match api_handle {
                Some(handle) => Some(handle.await),
                None => None,
            }
        } => {
            error!("HTTP API exited: {:?}", result);
        }
    }

    info!("👋 Monero DNS Seed shutting down");
    Ok(())
}

/// Write the default configuration for editing
fn init_config(path: &PathBuf) -> anyhow::Result<()> {
    if path.exists() {
        anyhow::bail!("{:?} already exists", path);
    }

    SeederConfig::default().save(path)?;

    info!("⚙️  Default configuration written to {:?}", path);
    info!("   Set domain, api_key and api_email before starting the seeder.");

    Ok(())
}
