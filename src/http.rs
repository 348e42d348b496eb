//! Shared HTTP client construction

use reqwest::Client;
use std::time::Duration;

/// User agent sent with every outgoing request
pub const USER_AGENT: &str = concat!("monero-dns-seed/", env!("CARGO_PKG_VERSION"));

/// Build a client whose every request is bounded by `timeout`
pub fn build_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
}
