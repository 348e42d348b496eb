//! Test helpers: in-process HTTP servers standing in for nodes, explorers
//! and DNS provider APIs, and an in-memory DNS provider

use async_trait::async_trait;
use axum::Router;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Mutex;

use crate::dns::{DnsError, DnsProvider, DnsRecord};

/// Serve `app` on an ephemeral loopback port
pub async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// A successful change, in the order it reached the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Add(String),
    Delete(String),
}

#[derive(Default)]
struct MemoryState {
    records: Vec<DnsRecord>,
    next_id: u32,
    log: Vec<Mutation>,
    failing_adds: HashSet<String>,
    fail_list: bool,
}

/// DNS provider keeping its records in memory
pub struct MemoryProvider {
    full_name: String,
    state: Mutex<MemoryState>,
}

impl MemoryProvider {
    pub fn new(full_name: &str) -> Self {
        Self {
            full_name: full_name.to_string(),
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Pre-populate records without counting them as mutations
    pub fn seed(&self, addresses: &[&str]) {
        let mut state = self.state.lock().unwrap();
        for address in addresses {
            state.next_id += 1;
            let id = format!("mem-{}", state.next_id);
            state.records.push(DnsRecord::new(*address, id));
        }
    }

    pub fn fail_add(&self, address: &str) {
        self.state.lock().unwrap().failing_adds.insert(address.to_string());
    }

    pub fn fail_list(&self, fail: bool) {
        self.state.lock().unwrap().fail_list = fail;
    }

    pub fn addresses(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.records.iter().map(|r| r.address.clone()).collect()
    }

    /// Successful adds and deletes so far
    pub fn mutations(&self) -> usize {
        self.state.lock().unwrap().log.len()
    }

    pub fn log(&self) -> Vec<Mutation> {
        self.state.lock().unwrap().log.clone()
    }
}

#[async_trait]
impl DnsProvider for MemoryProvider {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn full_name(&self) -> &str {
        &self.full_name
    }

    async fn list_records(&self) -> Result<Vec<DnsRecord>, DnsError> {
        let state = self.state.lock().unwrap();
        if state.fail_list {
            return Err(DnsError::Request("connection reset".to_string()));
        }
        Ok(state.records.clone())
    }

    async fn add_record(&self, address: &str) -> Result<(), DnsError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_adds.contains(address) {
            return Err(DnsError::Api("quota exceeded".to_string()));
        }
        state.next_id += 1;
        let id = format!("mem-{}", state.next_id);
        state.records.push(DnsRecord::new(address, id));
        state.log.push(Mutation::Add(address.to_string()));
        Ok(())
    }

    async fn delete_record(&self, record: &DnsRecord) -> Result<(), DnsError> {
        let mut state = self.state.lock().unwrap();
        let before = state.records.len();
        state.records.retain(|r| r.record_id != record.record_id);
        if state.records.len() == before {
            return Err(DnsError::Api(format!("no record {}", record.record_id)));
        }
        state.log.push(Mutation::Delete(record.record_id.clone()));
        Ok(())
    }
}
