//! Local Daemon Access
//!
//! The local `monerod` is the only source of new candidate nodes (its peer
//! list) and one of the height sources. It can be reached two ways, picked
//! by `DaemonAccess`:
//!
//! - `rpc`: HTTP requests against the daemon's RPC port
//! - `cli`: spawning the daemon binary with a one-shot command
//!
//! The rest of the seeder only sees `PeerSource` and `HeightSource`.

mod cli;
mod rpc;

pub use cli::CliDaemon;
pub use rpc::RpcDaemon;

use async_trait::async_trait;
use reqwest::Client;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{DaemonAccess, SeederConfig};
use crate::height::{HeightError, HeightSource, SourceKind};
use crate::types::{BlockHeight, NodeRecord, NodeSet};

/// Local daemon errors
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("daemon unreachable: {0}")]
    Unreachable(String),

    #[error("failed to spawn daemon command: {0}")]
    Spawn(String),

    #[error("daemon command timed out after {0:?}")]
    Timeout(Duration),

    #[error("request failed: {0}")]
    Request(String),

    #[error("malformed daemon output: {0}")]
    Malformed(String),

    #[error("daemon binary not found: {0}")]
    NotFound(PathBuf),
}

impl From<DaemonError> for HeightError {
    fn from(e: DaemonError) -> Self {
        match e {
            DaemonError::Malformed(msg) => HeightError::Malformed(msg),
            other => HeightError::Request(other.to_string()),
        }
    }
}

/// A peer advertised by the daemon or configured statically
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddress {
    pub address: String,
    pub port: u16,
}

impl PeerAddress {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    /// Parse `address` or `address:port`, defaulting to `default_port`
    pub fn parse(s: &str, default_port: u16) -> Option<Self> {
        let s = s.trim();
        let (address, port) = match s.rsplit_once(':') {
            Some((address, port)) => (address, port.parse().ok()?),
            None => (s, default_port),
        };
        if address.is_empty() || port == 0 {
            return None;
        }
        Some(Self::new(address, port))
    }

    /// Whether the address is a public IPv4 address worth publishing
    pub fn is_routable(&self) -> bool {
        match self.address.parse::<Ipv4Addr>() {
            Ok(ip) => !(ip.is_unspecified() || ip.is_private() || ip.is_loopback() || ip.is_link_local()),
            Err(_) => false,
        }
    }

    pub fn into_record(self) -> NodeRecord {
        NodeRecord::with_port(self.address, self.port)
    }
}

/// Supplier of candidate node addresses
#[async_trait]
pub trait PeerSource: Send + Sync {
    async fn known_peers(&self) -> Result<Vec<PeerAddress>, DaemonError>;
}

/// The configured local daemon, whichever way it is reached
pub enum LocalDaemon {
    Rpc(RpcDaemon),
    Cli(CliDaemon),
}

impl LocalDaemon {
    pub fn from_config(config: &SeederConfig, client: Client) -> Self {
        match config.daemon_access {
            DaemonAccess::Rpc => LocalDaemon::Rpc(RpcDaemon::new(
                client,
                &config.daemon_address,
                config.daemon_port,
                config.node_rpc_port,
            )),
            DaemonAccess::Cli => LocalDaemon::Cli(CliDaemon {
                path: config.daemon_path.clone(),
                address: config.daemon_address.clone(),
                port: config.daemon_port,
                auth: config.daemon_auth.clone(),
                timeout: Duration::from_secs(config.daemon_command_timeout_secs),
                node_rpc_port: config.node_rpc_port,
            }),
        }
    }
}

#[async_trait]
impl PeerSource for LocalDaemon {
    async fn known_peers(&self) -> Result<Vec<PeerAddress>, DaemonError> {
        match self {
            LocalDaemon::Rpc(daemon) => daemon.peer_list().await,
            LocalDaemon::Cli(daemon) => daemon.peer_list().await,
        }
    }
}

#[async_trait]
impl HeightSource for LocalDaemon {
    fn kind(&self) -> SourceKind {
        SourceKind::Daemon
    }

    async fn fetch_height(&self) -> Result<BlockHeight, HeightError> {
        let height = match self {
            LocalDaemon::Rpc(daemon) => daemon.height().await?,
            LocalDaemon::Cli(daemon) => daemon.height().await?,
        };
        Ok(height)
    }
}

/// Check that a Monero daemon answers on `address:port`
///
/// The daemon's HTTP server identifies itself with an `Epee` server header,
/// whatever the status of the response.
pub async fn ensure_reachable(client: &Client, address: &str, port: u16) -> Result<(), DaemonError> {
    let url = format!("http://{}:{}/", address, port);
    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| DaemonError::Unreachable(format!("{}: {}", url, e)))?;

    let server = response
        .headers()
        .get(reqwest::header::SERVER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !server.starts_with("Epee") {
        return Err(DaemonError::Unreachable(format!(
            "{} does not look like a Monero daemon (server '{}')",
            url, server
        )));
    }

    info!("🔗 Local daemon reachable at {}:{}", address, port);
    Ok(())
}

/// Candidate discovery: the daemon's peers plus the configured seed nodes
pub struct PeerDiscovery {
    source: Arc<dyn PeerSource>,
    seeds: Vec<PeerAddress>,
}

impl PeerDiscovery {
    pub fn new(source: Arc<dyn PeerSource>, seeds: Vec<PeerAddress>) -> Self {
        Self { source, seeds }
    }

    /// Build from configuration; unparsable seed entries are skipped
    pub fn from_config(config: &SeederConfig, source: Arc<dyn PeerSource>) -> Self {
        let seeds = config
            .seed_nodes
            .iter()
            .filter_map(|s| {
                let peer = PeerAddress::parse(s, config.node_rpc_port);
                if peer.is_none() {
                    warn!("Ignoring unusable seed node '{}'", s);
                }
                peer
            })
            .collect();
        Self::new(source, seeds)
    }

    /// Discover candidates; a daemon failure degrades to the seed nodes alone
    pub async fn discover(&self) -> NodeSet {
        let peers = match self.source.known_peers().await {
            Ok(peers) => peers,
            Err(e) => {
                warn!("🔗 Peer discovery failed, continuing without daemon peers: {}", e);
                Vec::new()
            }
        };

        let advertised = peers.len();
        let mut nodes: NodeSet = peers
            .into_iter()
            .filter(PeerAddress::is_routable)
            .map(PeerAddress::into_record)
            .collect();
        nodes.extend(self.seeds.iter().cloned().map(PeerAddress::into_record));

        info!(
            "🔗 Discovered {} candidate(s) ({} advertised by the daemon, {} seed(s))",
            nodes.len(),
            advertised,
            self.seeds.len()
        );
        nodes
    }
}
