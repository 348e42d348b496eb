//! Cloudflare backend (REST API v4)

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::{DnsError, DnsProvider, DnsRecord};
use crate::height::RetryPolicy;

pub const API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// "Record already exists" and "An identical record already exists"
const DUPLICATE_RECORD_ERRORS: [u32; 2] = [81057, 81058];

/// Account credentials sent with every request
#[derive(Debug, Clone)]
pub struct CloudflareAuth {
    pub email: String,
    pub key: String,
}

/// Response envelope shared by all endpoints
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: u32,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct Zone {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiRecord {
    id: String,
    #[serde(rename = "type")]
    record_type: String,
    name: String,
    content: String,
}

fn describe(errors: &[ApiMessage]) -> String {
    if errors.is_empty() {
        return "unsuccessful response".to_string();
    }
    errors
        .iter()
        .map(|e| format!("{} ({})", e.message, e.code))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Cloudflare-managed zone
pub struct CloudflareProvider {
    client: Client,
    api_base: String,
    auth: CloudflareAuth,
    zone_id: String,
    subdomain: String,
    full_name: String,
    ttl: u32,
    retry: RetryPolicy,
}

impl CloudflareProvider {
    /// Resolve the zone id of `domain` and build the provider
    pub async fn connect(
        client: Client,
        api_base: &str,
        auth: CloudflareAuth,
        domain: &str,
        subdomain: &str,
        ttl: u32,
        retry: RetryPolicy,
    ) -> Result<Self, DnsError> {
        let mut provider = Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            auth,
            zone_id: String::new(),
            subdomain: subdomain.to_string(),
            full_name: format!("{}.{}", subdomain, domain),
            ttl,
            retry,
        };

        info!("🌐 Determining Cloudflare zone id for '{}'", domain);
        let zones: Vec<Zone> = provider
            .call(provider.request(Method::GET, "/zones").query(&[("name", domain)]))
            .await?;

        provider.zone_id = zones
            .into_iter()
            .find(|z| z.name == domain)
            .map(|z| z.id)
            .ok_or_else(|| DnsError::ZoneNotFound(domain.to_string()))?;

        info!("🌐 Cloudflare zone '{}' matched to '{}'", provider.zone_id, domain);
        Ok(provider)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.api_base, path))
            .header("X-Auth-Email", &self.auth.email)
            .header("X-Auth-Key", &self.auth.key)
    }

    /// Send a request and check the response envelope
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<Envelope<T>, DnsError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        let envelope: Envelope<T> = serde_json::from_str(&body).map_err(|e| {
            DnsError::Malformed(format!("HTTP {}: {}", status, e))
        })?;

        if !envelope.success {
            return Err(DnsError::Api(describe(&envelope.errors)));
        }

        Ok(envelope)
    }

    /// Send a request whose `result` is needed
    async fn call<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, DnsError> {
        self.send(request)
            .await?
            .result
            .ok_or_else(|| DnsError::Malformed("missing result".to_string()))
    }

    async fn fetch_records(&self) -> Result<Vec<DnsRecord>, DnsError> {
        let path = format!("/zones/{}/dns_records", self.zone_id);
        let records: Vec<ApiRecord> = self
            .call(self.request(Method::GET, &path).query(&[
                ("type", "A"),
                ("name", self.full_name.as_str()),
                ("per_page", "100"),
            ]))
            .await?;

        Ok(records
            .into_iter()
            .filter(|r| r.record_type == "A" && r.name == self.full_name)
            .map(|r| {
                debug!("🌐 > A {} {}", r.name, r.content);
                DnsRecord::new(r.content, r.id)
            })
            .collect())
    }
}

fn is_duplicate(error: &DnsError) -> bool {
    match error {
        DnsError::Api(msg) => DUPLICATE_RECORD_ERRORS
            .iter()
            .any(|code| msg.contains(&format!("({})", code))),
        _ => false,
    }
}

#[async_trait]
impl DnsProvider for CloudflareProvider {
    fn name(&self) -> &'static str {
        "cloudflare"
    }

    fn full_name(&self) -> &str {
        &self.full_name
    }

    async fn list_records(&self) -> Result<Vec<DnsRecord>, DnsError> {
        let mut attempt = 1;
        loop {
            match self.fetch_records().await {
                Ok(records) => return Ok(records),
                Err(e) if attempt < self.retry.attempts => {
                    warn!(
                        "🌐 Cloudflare record listing failed (attempt {}/{}): {}",
                        attempt, self.retry.attempts, e
                    );
                    attempt += 1;
                    tokio::time::sleep(self.retry.backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn add_record(&self, address: &str) -> Result<(), DnsError> {
        let path = format!("/zones/{}/dns_records", self.zone_id);
        let body = json!({
            "type": "A",
            "name": self.subdomain,
            "content": address,
            "ttl": self.ttl,
        });

        match self
            .send::<serde_json::Value>(self.request(Method::POST, &path).json(&body))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate(&e) => {
                debug!("🌐 Record for {} already exists", address);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn delete_record(&self, record: &DnsRecord) -> Result<(), DnsError> {
        let path = format!("/zones/{}/dns_records/{}", self.zone_id, record.record_id);
        self.send::<serde_json::Value>(self.request(Method::DELETE, &path))
            .await
            .map(|_| ())
    }
}
