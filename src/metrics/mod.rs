use crate::errors::FailureKind;
use crate::status::StatusLevel;
use ::metrics::{counter, histogram};
use anyhow::Result;
use log::info;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::{net::SocketAddr, time::Duration};

// Metrics for monitoring
const METRIC_RPC_RETRIES: &str = "rpc_retries_total";
const METRIC_RPC_EXHAUSTED: &str = "rpc_retries_exhausted_total";
const METRIC_RPC_PERMANENT: &str = "rpc_permanent_failures_total";
const METRIC_RPC_FAILOVERS: &str = "rpc_failovers_total";
const METRIC_WALLET_STATUS: &str = "wallet_status_total";
const METRIC_WALLET_CHECK_TIME: &str = "wallet_check_seconds";
const METRIC_OPERATIONS: &str = "wallet_operations_total";

/// Serves the Prometheus scrape endpoint. Must run inside the tokio runtime.
pub fn install_exporter(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    info!("Metrics exporter listening on {}", addr);
    Ok(())
}

pub fn record_retry(kind: FailureKind) {
    counter!(METRIC_RPC_RETRIES, 1, "kind" => kind.as_str());
}

pub fn record_exhausted() {
    counter!(METRIC_RPC_EXHAUSTED, 1);
}

pub fn record_permanent_failure(kind: FailureKind) {
    counter!(METRIC_RPC_PERMANENT, 1, "kind" => kind.as_str());
}

pub fn record_failover() {
    counter!(METRIC_RPC_FAILOVERS, 1);
}

pub fn record_wallet_check(level: StatusLevel, elapsed: Duration) {
    counter!(METRIC_WALLET_STATUS, 1, "status" => level.as_str());
    histogram!(METRIC_WALLET_CHECK_TIME, elapsed.as_secs_f64());
}

pub fn record_operation(operation: &'static str, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!(METRIC_OPERATIONS, 1, "operation" => operation, "outcome" => outcome);
}
