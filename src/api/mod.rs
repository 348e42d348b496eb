//! HTTP API Module
//!
//! Health, status and metrics endpoints. Reads only what the seeder
//! publishes at the end of each pass.

mod routes;
mod metrics;

pub use routes::{router, run_api_server, ApiState};
pub use metrics::Metrics;
