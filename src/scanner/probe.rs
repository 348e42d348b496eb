//! HTTP health probe against a node's restricted RPC

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{HealthProbe, ProbeError};
use crate::types::BlockHeight;

#[derive(Debug, Deserialize)]
struct GetHeightResponse {
    height: BlockHeight,
}

/// `GET http://<address>:<port>/getheight`
pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    /// `client` should carry the per-node timeout
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, address: &str, port: u16) -> Result<BlockHeight, ProbeError> {
        let url = format!("http://{}:{}/getheight", address, port);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProbeError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProbeError::Request(e.to_string()))?;
        let parsed: GetHeightResponse =
            serde_json::from_str(&body).map_err(|e| ProbeError::Malformed(e.to_string()))?;

        Ok(parsed.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::build_client;
    use crate::scanner::Scanner;
    use crate::testing::serve;
    use crate::types::{NodeRecord, NodeSet};
    use axum::{http::StatusCode, routing::get, Json, Router};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    async fn node_serving(app: Router) -> NodeRecord {
        let addr = serve(app).await;
        NodeRecord::with_port("127.0.0.1", addr.port())
    }

    #[tokio::test]
    async fn test_probe_reads_height() {
        let node = node_serving(Router::new().route(
            "/getheight",
            get(|| async { Json(json!({"height": 3100000, "status": "OK", "untrusted": false})) }),
        ))
        .await;
        let probe = HttpProbe::new(build_client(Duration::from_secs(2)).unwrap());

        assert_eq!(probe.probe(&node.address, node.port).await.unwrap(), 3100000);
    }

    #[tokio::test]
    async fn test_probe_failures() {
        let probe = HttpProbe::new(build_client(Duration::from_secs(2)).unwrap());

        let forbidden = node_serving(Router::new().route(
            "/getheight",
            get(|| async { (StatusCode::FORBIDDEN, "restricted") }),
        ))
        .await;
        assert!(matches!(
            probe.probe(&forbidden.address, forbidden.port).await,
            Err(ProbeError::Status(403))
        ));

        let string_height = node_serving(Router::new().route(
            "/getheight",
            get(|| async { Json(json!({"height": "3100000"})) }),
        ))
        .await;
        assert!(matches!(
            probe.probe(&string_height.address, string_height.port).await,
            Err(ProbeError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_scan_over_http() {
        // Every in-process node shares 127.0.0.1, so give each its own host alias
        let synced = node_serving(Router::new().route(
            "/getheight",
            get(|| async { Json(json!({"height": 1000})) }),
        ))
        .await;
        let lagging = node_serving(Router::new().route(
            "/getheight",
            get(|| async { Json(json!({"height": 900})) }),
        ))
        .await;

        let nodes: NodeSet = vec![
            NodeRecord::with_port("127.0.0.1", synced.port),
            NodeRecord::with_port("localhost", lagging.port),
        ]
        .into_iter()
        .collect();

        let probe = Arc::new(HttpProbe::new(build_client(Duration::from_secs(2)).unwrap()));
        let scanner = Scanner::new(probe, 4, Duration::from_secs(2), 3);
        let result = scanner.scan(nodes, 1000).await;

        assert!(result.get("127.0.0.1").unwrap().is_valid());
        assert!(!result.get("localhost").unwrap().is_valid());
    }
}
