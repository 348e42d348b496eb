//! TransIP backend (SOAP `DomainService`)
//!
//! The API has no per-record operations: records are read with `getInfo`
//! and written back as a whole with `setDnsEntries`. Every call carries a
//! cookie signed with the account's RSA key over the call's parameters.

use async_trait::async_trait;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client;
use rsa::RsaPrivateKey;
use tracing::{debug, info};

use super::{DnsError, DnsProvider, DnsRecord};
use crate::crypto::{generate_nonce, percent_encode, percent_encode_param, sign_sha512};

pub const API_HOST: &str = "api.transip.nl";
const SERVICE: &str = "DomainService";
const NAMESPACE: &str = "http://www.transip.nl/soap";
const CLIENT_VERSION: &str = "0.4.1";

/// Access mode declared in the request cookie
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    ReadOnly,
    ReadWrite,
}

impl Mode {
    fn as_str(&self) -> &'static str {
        match self {
            Mode::ReadOnly => "readonly",
            Mode::ReadWrite => "readwrite",
        }
    }
}

/// One DNS entry of a TransIP domain, of any type
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DnsEntry {
    pub name: String,
    pub expire: u32,
    pub entry_type: String,
    pub content: String,
}

impl DnsEntry {
    pub fn a(name: &str, content: &str, expire: u32) -> Self {
        Self {
            name: name.to_string(),
            expire,
            entry_type: "A".to_string(),
            content: content.to_string(),
        }
    }

    fn is_a_record_of(&self, name: &str) -> bool {
        self.entry_type == "A" && self.name == name
    }
}

/// Parameter of a SOAP call, in signature order
pub enum Param<'a> {
    Text(&'a str),
    Entries(&'a [DnsEntry]),
}

/// String signed for a call: parameters, then the call metadata
///
/// Keys and values are percent-encoded except square brackets, e.g.
/// `0=example.com&1[0][name]=node&...&__method=setDnsEntries&...&__nonce=...`
pub fn signature_message(params: &[Param<'_>], method: &str, host: &str, timestamp: i64, nonce: &str) -> String {
    let mut pairs: Vec<(String, String)> = Vec::new();
    for (index, param) in params.iter().enumerate() {
        match param {
            Param::Text(value) => pairs.push((index.to_string(), value.to_string())),
            Param::Entries(entries) => {
                for (i, entry) in entries.iter().enumerate() {
                    let key = |field: &str| format!("{}[{}][{}]", index, i, field);
                    pairs.push((key("name"), entry.name.clone()));
                    pairs.push((key("expire"), entry.expire.to_string()));
                    pairs.push((key("type"), entry.entry_type.clone()));
                    pairs.push((key("content"), entry.content.clone()));
                }
            }
        }
    }
    pairs.push(("__method".to_string(), method.to_string()));
    pairs.push(("__service".to_string(), SERVICE.to_string()));
    pairs.push(("__hostname".to_string(), host.to_string()));
    pairs.push(("__timestamp".to_string(), timestamp.to_string()));
    pairs.push(("__nonce".to_string(), nonce.to_string()));

    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", percent_encode_param(k), percent_encode_param(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// SOAP 1.1 envelope for `method` with positional parameters
fn envelope(method: &str, params: &[Param<'_>]) -> String {
    let mut body = String::new();
    for param in params {
        match param {
            Param::Text(value) => {
                body.push_str(&format!(
                    "<domainName xsi:type=\"xsd:string\">{}</domainName>",
                    escape(*value)
                ));
            }
            Param::Entries(entries) => {
                body.push_str(&format!(
                    "<dnsEntries SOAP-ENC:arrayType=\"ns1:DnsEntry[{}]\" xsi:type=\"ns1:ArrayOfDnsEntry\">",
                    entries.len()
                ));
                for entry in entries.iter() {
                    body.push_str(&format!(
                        "<item xsi:type=\"ns1:DnsEntry\">\
                         <name xsi:type=\"xsd:string\">{}</name>\
                         <expire xsi:type=\"xsd:int\">{}</expire>\
                         <type xsi:type=\"xsd:string\">{}</type>\
                         <content xsi:type=\"xsd:string\">{}</content>\
                         </item>",
                        escape(entry.name.as_str()),
                        entry.expire,
                        escape(entry.entry_type.as_str()),
                        escape(entry.content.as_str()),
                    ));
                }
                body.push_str("</dnsEntries>");
            }
        }
    }

    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <SOAP-ENV:Envelope \
         xmlns:SOAP-ENV=\"http://schemas.xmlsoap.org/soap/envelope/\" \
         xmlns:ns1=\"{ns}\" \
         xmlns:xsd=\"http://www.w3.org/2001/XMLSchema\" \
         xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" \
         xmlns:SOAP-ENC=\"http://schemas.xmlsoap.org/soap/encoding/\" \
         SOAP-ENV:encodingStyle=\"http://schemas.xmlsoap.org/soap/encoding/\">\
         <SOAP-ENV:Body><ns1:{method}>{body}</ns1:{method}></SOAP-ENV:Body>\
         </SOAP-ENV:Envelope>",
        ns = NAMESPACE,
        method = method,
        body = body,
    )
}

/// DNS entries of a `getInfo` response, or the fault it carries
pub fn parse_entries(xml: &str) -> Result<Vec<DnsEntry>, DnsError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut path: Vec<String> = Vec::new();
    let mut entries = Vec::new();
    let mut current: Option<DnsEntry> = None;
    let mut fault: Option<String> = None;
    let mut in_fault = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if name == "Fault" {
                    in_fault = true;
                }
                if name == "item" && path.last().map(String::as_str) == Some("dnsEntries") {
                    current = Some(DnsEntry::default());
                }
                path.push(name);
            }
            Ok(Event::End(_)) => {
                let closed = path.pop();
                if closed.as_deref() == Some("item") && path.last().map(String::as_str) == Some("dnsEntries") {
                    if let Some(entry) = current.take() {
                        entries.push(entry);
                    }
                }
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| DnsError::Malformed(e.to_string()))?
                    .into_owned();
                let field = path.last().map(String::as_str).unwrap_or_default();

                if in_fault && field == "faultstring" {
                    fault = Some(text);
                } else if let Some(entry) = current.as_mut() {
                    let in_item = path.len() >= 2 && path[path.len() - 2] == "item";
                    if in_item {
                        match field {
                            "name" => entry.name = text,
                            "expire" => {
                                entry.expire = text
                                    .parse()
                                    .map_err(|_| DnsError::Malformed(format!("bad expire '{}'", text)))?
                            }
                            "type" => entry.entry_type = text,
                            "content" => entry.content = text,
                            _ => {}
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(DnsError::Malformed(e.to_string())),
        }
    }

    if in_fault {
        return Err(DnsError::Soap(fault.unwrap_or_else(|| "unknown fault".to_string())));
    }

    Ok(entries)
}

/// TransIP-managed domain
pub struct TransipProvider {
    client: Client,
    host: String,
    endpoint: String,
    login: String,
    key: RsaPrivateKey,
    domain: String,
    subdomain: String,
    full_name: String,
    ttl: u32,
}

impl TransipProvider {
    pub fn new(
        client: Client,
        host: &str,
        login: &str,
        key: RsaPrivateKey,
        domain: &str,
        subdomain: &str,
        ttl: u32,
    ) -> Self {
        Self {
            client,
            host: host.to_string(),
            endpoint: format!("https://{}/soap/?service={}", host, SERVICE),
            login: login.to_string(),
            key,
            domain: domain.to_string(),
            subdomain: subdomain.to_string(),
            full_name: format!("{}.{}", subdomain, domain),
            ttl,
        }
    }

    /// Send requests to `endpoint` instead of the public API
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn cookie(&self, method: &str, mode: Mode, params: &[Param<'_>]) -> Result<String, DnsError> {
        let timestamp = chrono::Utc::now().timestamp();
        let nonce = generate_nonce();
        let message = signature_message(params, method, &self.host, timestamp, &nonce);
        let signature = sign_sha512(&self.key, message.as_bytes())?;

        Ok(format!(
            "login={};mode={};timestamp={};nonce={};clientVersion={};signature={}",
            self.login,
            mode.as_str(),
            timestamp,
            nonce,
            CLIENT_VERSION,
            percent_encode(&signature)
        ))
    }

    async fn call(&self, method: &str, mode: Mode, params: &[Param<'_>]) -> Result<String, DnsError> {
        let cookie = self.cookie(method, mode, params)?;
        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("SOAPAction", format!("{}#{}", NAMESPACE, method))
            .header(reqwest::header::COOKIE, cookie)
            .body(envelope(method, params))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        // Faults come back as HTTP 500 with a SOAP body
        if !status.is_success() {
            parse_entries(&body)?;
            return Err(DnsError::Request(format!("HTTP error: {}", status)));
        }

        Ok(body)
    }

    /// Every entry of the domain, whatever its name or type
    async fn all_entries(&self) -> Result<Vec<DnsEntry>, DnsError> {
        let body = self
            .call("getInfo", Mode::ReadOnly, &[Param::Text(&self.domain)])
            .await?;
        parse_entries(&body)
    }

    async fn set_entries(&self, entries: &[DnsEntry]) -> Result<(), DnsError> {
        let body = self
            .call(
                "setDnsEntries",
                Mode::ReadWrite,
                &[Param::Text(&self.domain), Param::Entries(entries)],
            )
            .await?;
        parse_entries(&body).map(|_| ())
    }
}

#[async_trait]
impl DnsProvider for TransipProvider {
    fn name(&self) -> &'static str {
        "transip"
    }

    fn full_name(&self) -> &str {
        &self.full_name
    }

    async fn list_records(&self) -> Result<Vec<DnsRecord>, DnsError> {
        Ok(self
            .all_entries()
            .await?
            .into_iter()
            .filter(|e| e.is_a_record_of(&self.subdomain))
            .map(|e| DnsRecord::new(e.content.clone(), e.content))
            .collect())
    }

    async fn add_record(&self, address: &str) -> Result<(), DnsError> {
        let mut entries = self.all_entries().await?;
        if entries
            .iter()
            .any(|e| e.is_a_record_of(&self.subdomain) && e.content == address)
        {
            debug!("🌐 Record for {} already exists", address);
            return Ok(());
        }

        entries.push(DnsEntry::a(&self.subdomain, address, self.ttl));
        self.set_entries(&entries).await
    }

    async fn delete_record(&self, record: &DnsRecord) -> Result<(), DnsError> {
        let mut entries = self.all_entries().await?;
        let before = entries.len();
        entries.retain(|e| !(e.is_a_record_of(&self.subdomain) && e.content == record.record_id));

        if entries.len() == before {
            info!("🌐 Record for {} already gone", record.address);
            return Ok(());
        }
        self.set_entries(&entries).await
    }
}
