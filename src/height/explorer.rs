//! Public block explorer height sources

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{HeightError, HeightSource, SourceKind};
use crate::types::BlockHeight;

pub const XMRCHAIN_URL: &str = "https://xmrchain.net/api/networkinfo";
pub const MONEROBLOCKS_URL: &str = "https://moneroblocks.info/api/get_stats/";

/// `GET url` and decode the JSON body as `T`
async fn get_json<T: DeserializeOwned>(client: &Client, url: &str) -> Result<T, HeightError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| HeightError::Request(e.to_string()))?;

    if !response.status().is_success() {
        return Err(HeightError::Request(format!("HTTP error: {}", response.status())));
    }

    let body = response
        .text()
        .await
        .map_err(|e| HeightError::Request(e.to_string()))?;

    serde_json::from_str(&body).map_err(|e| HeightError::Malformed(e.to_string()))
}

// =============================================================================
// XMRCHAIN
// =============================================================================

#[derive(Debug, Deserialize)]
struct XmrchainResponse {
    status: String,
    #[serde(default)]
    data: Option<XmrchainNetworkInfo>,
}

#[derive(Debug, Deserialize)]
struct XmrchainNetworkInfo {
    height: BlockHeight,
}

/// Extract the height from an xmrchain `networkinfo` body
pub fn parse_xmrchain(body: &str) -> Result<BlockHeight, HeightError> {
    let response: XmrchainResponse =
        serde_json::from_str(body).map_err(|e| HeightError::Malformed(e.to_string()))?;
    xmrchain_height(response)
}

fn xmrchain_height(response: XmrchainResponse) -> Result<BlockHeight, HeightError> {
    if response.status != "success" {
        return Err(HeightError::Rejected(format!("status '{}'", response.status)));
    }
    response
        .data
        .map(|d| d.height)
        .ok_or_else(|| HeightError::Malformed("missing data.height".to_string()))
}

/// xmrchain.net network info endpoint
pub struct XmrchainSource {
    client: Client,
    url: String,
}

impl XmrchainSource {
    pub fn new(client: Client) -> Self {
        Self::with_url(client, XMRCHAIN_URL)
    }

    pub fn with_url(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl HeightSource for XmrchainSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Xmrchain
    }

    async fn fetch_height(&self) -> Result<BlockHeight, HeightError> {
        let response: XmrchainResponse = get_json(&self.client, &self.url).await?;
        xmrchain_height(response)
    }
}

// =============================================================================
// MONEROBLOCKS
// =============================================================================

#[derive(Debug, Deserialize)]
struct MoneroblocksStats {
    height: BlockHeight,
}

/// Extract the height from a moneroblocks `get_stats` body
pub fn parse_moneroblocks(body: &str) -> Result<BlockHeight, HeightError> {
    let stats: MoneroblocksStats =
        serde_json::from_str(body).map_err(|e| HeightError::Malformed(e.to_string()))?;
    Ok(stats.height)
}

/// moneroblocks.info stats endpoint
pub struct MoneroblocksSource {
    client: Client,
    url: String,
}

impl MoneroblocksSource {
    pub fn new(client: Client) -> Self {
        Self::with_url(client, MONEROBLOCKS_URL)
    }

    pub fn with_url(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl HeightSource for MoneroblocksSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Moneroblocks
    }

    async fn fetch_height(&self) -> Result<BlockHeight, HeightError> {
        let stats: MoneroblocksStats = get_json(&self.client, &self.url).await?;
        Ok(stats.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::build_client;
    use crate::testing::serve;
    use axum::{routing::get, Json, Router};
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_parse_xmrchain() {
        let body = r#"{"status":"success","data":{"height":3012345,"difficulty":1}}"#;
        assert_eq!(parse_xmrchain(body).unwrap(), 3012345);

        let failed = r#"{"status":"fail","data":null}"#;
        assert!(matches!(parse_xmrchain(failed), Err(HeightError::Rejected(_))));

        let missing = r#"{"status":"success"}"#;
        assert!(matches!(parse_xmrchain(missing), Err(HeightError::Malformed(_))));

        let string_height = r#"{"status":"success","data":{"height":"3012345"}}"#;
        assert!(matches!(parse_xmrchain(string_height), Err(HeightError::Malformed(_))));
    }

    #[test]
    fn test_parse_moneroblocks() {
        assert_eq!(parse_moneroblocks(r#"{"height":2999999,"hashrate":1}"#).unwrap(), 2999999);
        assert!(parse_moneroblocks("<html>busy</html>").is_err());
    }

    #[tokio::test]
    async fn test_sources_over_http() {
        let app = Router::new()
            .route(
                "/api/networkinfo",
                get(|| async { Json(json!({"status": "success", "data": {"height": 500}})) }),
            )
            .route(
                "/api/get_stats/",
                get(|| async { Json(json!({"height": 499})) }),
            );
        let addr = serve(app).await;
        let client = build_client(Duration::from_secs(2)).unwrap();

        let xmrchain = XmrchainSource::with_url(client.clone(), format!("http://{}/api/networkinfo", addr));
        assert_eq!(xmrchain.fetch_height().await.unwrap(), 500);

        let moneroblocks =
            MoneroblocksSource::with_url(client, format!("http://{}/api/get_stats/", addr));
        assert_eq!(moneroblocks.fetch_height().await.unwrap(), 499);
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let app = Router::new().route(
            "/api/networkinfo",
            get(|| async { (axum::http::StatusCode::SERVICE_UNAVAILABLE, "down") }),
        );
        let addr = serve(app).await;
        let client = build_client(Duration::from_secs(2)).unwrap();

        let source = XmrchainSource::with_url(client, format!("http://{}/api/networkinfo", addr));
        assert!(matches!(source.fetch_height().await, Err(HeightError::Request(_))));
    }
}
