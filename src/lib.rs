pub mod config;
pub mod contracts;
pub mod errors;
pub mod metrics;   // Prometheus counters for retries, failovers and wallet checks
pub mod pacing;
pub mod report;
pub mod rpc;       // Endpoint pool, retry executor and the chain client seam
pub mod runner;
pub mod status;
pub mod utils;
pub mod wallets;
