//! Daemon access over its HTTP RPC interface

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use super::{DaemonError, PeerAddress};
use crate::types::BlockHeight;

#[derive(Debug, Deserialize)]
struct PeerListResponse {
    #[serde(default)]
    white_list: Vec<RpcPeer>,
}

#[derive(Debug, Deserialize)]
struct RpcPeer {
    host: String,
    #[serde(default)]
    rpc_port: u16,
}

#[derive(Debug, Deserialize)]
struct HeightResponse {
    height: BlockHeight,
}

/// Local daemon reached through `/get_peer_list` and `/get_height`
pub struct RpcDaemon {
    client: Client,
    base_url: String,
    node_rpc_port: u16,
}

impl RpcDaemon {
    pub fn new(client: Client, address: &str, port: u16, node_rpc_port: u16) -> Self {
        Self {
            client,
            base_url: format!("http://{}:{}", address, port),
            node_rpc_port,
        }
    }

    async fn call<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, DaemonError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self
            .client
            .post(&url)
            .json(&json!({}))
            .send()
            .await
            .map_err(|e| DaemonError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DaemonError::Request(format!("HTTP error: {}", response.status())));
        }

        let body = response
            .text()
            .await
            .map_err(|e| DaemonError::Request(e.to_string()))?;
        serde_json::from_str(&body).map_err(|e| DaemonError::Malformed(e.to_string()))
    }

    /// White-listed peers, on their advertised RPC port when they have one
    pub async fn peer_list(&self) -> Result<Vec<PeerAddress>, DaemonError> {
        let response: PeerListResponse = self.call("get_peer_list").await?;
        Ok(response
            .white_list
            .into_iter()
            .map(|peer| {
                let port = if peer.rpc_port != 0 {
                    peer.rpc_port
                } else {
                    self.node_rpc_port
                };
                PeerAddress::new(peer.host, port)
            })
            .collect())
    }

    pub async fn height(&self) -> Result<BlockHeight, DaemonError> {
        let response: HeightResponse = self.call("get_height").await?;
        Ok(response.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::build_client;
    use crate::testing::serve;
    use axum::{routing::post, Json, Router};
    use std::time::Duration;

    #[tokio::test]
    async fn test_peer_list_and_height() {
        let app = Router::new()
            .route(
                "/get_peer_list",
                post(|| async {
                    Json(json!({
                        "status": "OK",
                        "white_list": [
                            {"host": "1.2.3.4", "ip": 67305985, "port": 18080, "rpc_port": 18081},
                            {"host": "5.6.7.8", "ip": 134678021, "port": 18080, "rpc_port": 0},
                            {"host": "9.9.9.9", "port": 18080}
                        ],
                        "gray_list": [
                            {"host": "10.0.0.1", "port": 18080, "rpc_port": 18089}
                        ]
                    }))
                }),
            )
            .route(
                "/get_height",
                post(|| async { Json(json!({"height": 3100000, "status": "OK"})) }),
            );
        let addr = serve(app).await;
        let client = build_client(Duration::from_secs(2)).unwrap();
        let daemon = RpcDaemon::new(client, "127.0.0.1", addr.port(), 18089);

        let peers = daemon.peer_list().await.unwrap();
        assert_eq!(
            peers,
            vec![
                PeerAddress::new("1.2.3.4", 18081),
                PeerAddress::new("5.6.7.8", 18089),
                PeerAddress::new("9.9.9.9", 18089),
            ]
        );
        assert_eq!(daemon.height().await.unwrap(), 3100000);
    }

    #[tokio::test]
    async fn test_malformed_response() {
        let app = Router::new().route("/get_height", post(|| async { "not json" }));
        let addr = serve(app).await;
        let client = build_client(Duration::from_secs(2)).unwrap();
        let daemon = RpcDaemon::new(client, "127.0.0.1", addr.port(), 18089);

        assert!(matches!(daemon.height().await, Err(DaemonError::Malformed(_))));
    }
}
