//! Daemon access by spawning the daemon binary

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use super::{DaemonError, PeerAddress};
use crate::types::BlockHeight;

/// Local daemon queried through `monerod <command>`
pub struct CliDaemon {
    pub path: PathBuf,
    pub address: String,
    pub port: u16,
    /// `user:pass` for `--rpc-login`
    pub auth: Option<String>,
    pub timeout: Duration,
    /// Port probed on peers; `print_pl` only shows P2P ports
    pub node_rpc_port: u16,
}

impl CliDaemon {
    fn command(&self, subcommand: &str) -> Command {
        let mut command = Command::new(&self.path);
        command
            .arg("--rpc-bind-ip")
            .arg(&self.address)
            .arg("--rpc-bind-port")
            .arg(self.port.to_string());
        if let Some(auth) = &self.auth {
            command.arg("--rpc-login").arg(auth);
        }
        command
            .arg(subcommand)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    /// Run one daemon command and return its stdout
    async fn run(&self, subcommand: &str) -> Result<String, DaemonError> {
        debug!("Running {:?} {}", self.path, subcommand);

        let output = tokio::time::timeout(self.timeout, self.command(subcommand).output())
            .await
            .map_err(|_| DaemonError::Timeout(self.timeout))?
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => DaemonError::NotFound(self.path.clone()),
                _ => DaemonError::Spawn(e.to_string()),
            })?;

        if !output.status.success() {
            return Err(DaemonError::Spawn(format!(
                "`{}` exited with {}",
                subcommand, output.status
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    pub async fn peer_list(&self) -> Result<Vec<PeerAddress>, DaemonError> {
        let output = self.run("print_pl").await?;
        Ok(parse_peer_list(&output, self.node_rpc_port))
    }

    pub async fn height(&self) -> Result<BlockHeight, DaemonError> {
        let output = self.run("print_height").await?;
        parse_height(&output)
    }
}

/// Addresses of the `white` entries of `print_pl` output
///
/// Entries look like `white  <peer id>  a.b.c.d:18080  ...`.
pub fn parse_peer_list(output: &str, node_rpc_port: u16) -> Vec<PeerAddress> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            if fields.next()? != "white" {
                return None;
            }
            let _peer_id = fields.next()?;
            let (host, port) = fields.next()?.rsplit_once(':')?;
            port.parse::<u16>().ok()?;
            Some(PeerAddress::new(host, node_rpc_port))
        })
        .collect()
}

/// First all-digit line of `print_height` output
pub fn parse_height(output: &str) -> Result<BlockHeight, DaemonError> {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && line.chars().all(|c| c.is_ascii_digit()))
        .and_then(|line| line.parse().ok())
        .ok_or_else(|| DaemonError::Malformed(format!("no height in '{}'", output.trim())))
}
