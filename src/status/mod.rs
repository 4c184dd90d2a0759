use crate::errors::{RetryError, StatusError};
use crate::metrics;
use crate::rpc::{ChainClient, EndpointPool, RetryExecutor};
use crate::utils::format_ether4;
use colored::Colorize;
use ethers::{
    types::{Address, U256},
    utils::parse_ether,
};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use tokio::time::Instant;

pub const DEFAULT_LOG_SCAN_BLOCKS: u64 = 100;

/// Wallet health buckets, ordered from healthy to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatusLevel {
    Ok,
    Low,
    Insufficient,
    Error,
}

impl StatusLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusLevel::Ok => "OK",
            StatusLevel::Low => "LOW",
            StatusLevel::Insufficient => "INSUFFICIENT",
            StatusLevel::Error => "ERROR",
        }
    }

    pub fn colored(self) -> colored::ColoredString {
        match self {
            StatusLevel::Ok => self.as_str().green(),
            StatusLevel::Low => self.as_str().yellow(),
            StatusLevel::Insufficient | StatusLevel::Error => self.as_str().red(),
        }
    }
}

impl fmt::Display for StatusLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Balance cut-offs in wei. `insufficient_floor` is strictly below `low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    insufficient_floor: U256,
    low: U256,
}

impl Thresholds {
    pub fn new(insufficient_floor: U256, low: U256) -> Result<Self, StatusError> {
        if insufficient_floor >= low {
            return Err(StatusError::InvalidThresholds);
        }
        Ok(Self {
            insufficient_floor,
            low,
        })
    }

    /// Thresholds given in whole native tokens, e.g. `("0.01", "1.0")`.
    pub fn from_ether(insufficient_floor: &str, low: &str) -> Result<Self, StatusError> {
        let parse = |raw: &str| {
            parse_ether(raw).map_err(|_| StatusError::InvalidAmount(raw.to_string()))
        };
        Self::new(parse(insufficient_floor)?, parse(low)?)
    }

    pub fn insufficient_floor(&self) -> U256 {
        self.insufficient_floor
    }

    pub fn low(&self) -> U256 {
        self.low
    }

    pub fn classify(&self, total: U256) -> StatusLevel {
        if total < self.insufficient_floor {
            StatusLevel::Insufficient
        } else if total < self.low {
            StatusLevel::Low
        } else {
            StatusLevel::Ok
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        // 0.01 and 1.0 native tokens
        Self {
            insufficient_floor: U256::exp10(16),
            low: U256::exp10(18),
        }
    }
}

/// Snapshot of one wallet. `total_balance` and `status` are derived at
/// construction and cannot be set independently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletStatus {
    address: Address,
    native_balance: U256,
    token_balance: U256,
    total_balance: U256,
    nonce: u64,
    unique_tx_count: u64,
    nft_count: u64,
    status: StatusLevel,
}

impl WalletStatus {
    pub fn new(
        address: Address,
        native_balance: U256,
        token_balance: U256,
        nonce: u64,
        unique_tx_count: u64,
        nft_count: u64,
        thresholds: &Thresholds,
    ) -> Self {
        let total_balance = native_balance.saturating_add(token_balance);
        Self {
            address,
            native_balance,
            token_balance,
            total_balance,
            nonce,
            unique_tx_count,
            nft_count,
            status: thresholds.classify(total_balance),
        }
    }

    /// Zeroed record for a wallet whose chain state could not be read.
    pub fn error(address: Address) -> Self {
        Self {
            address,
            native_balance: U256::zero(),
            token_balance: U256::zero(),
            total_balance: U256::zero(),
            nonce: 0,
            unique_tx_count: 0,
            nft_count: 0,
            status: StatusLevel::Error,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn native_balance(&self) -> U256 {
        self.native_balance
    }

    pub fn token_balance(&self) -> U256 {
        self.token_balance
    }

    pub fn total_balance(&self) -> U256 {
        self.total_balance
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn unique_tx_count(&self) -> u64 {
        self.unique_tx_count
    }

    pub fn nft_count(&self) -> u64 {
        self.nft_count
    }

    pub fn status(&self) -> StatusLevel {
        self.status
    }

    pub fn is_ok(&self) -> bool {
        self.status == StatusLevel::Ok
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NftContract {
    pub address: Address,
    pub name: String,
}

/// Gathers a [`WalletStatus`] from several independent chain queries.
#[derive(Debug, Clone)]
pub struct StatusAggregator {
    executor: RetryExecutor,
    thresholds: Thresholds,
    token: Option<Address>,
    nft_contracts: Vec<NftContract>,
    log_scan_blocks: u64,
}

impl StatusAggregator {
    pub fn new(executor: RetryExecutor, thresholds: Thresholds) -> Self {
        Self {
            executor,
            thresholds,
            token: None,
            nft_contracts: Vec::new(),
            log_scan_blocks: DEFAULT_LOG_SCAN_BLOCKS,
        }
    }

    pub fn with_token(mut self, token: Address) -> Self {
        self.token = Some(token);
        self
    }

    pub fn with_nft_contracts(mut self, contracts: Vec<NftContract>) -> Self {
        self.nft_contracts = contracts;
        self
    }

    pub fn with_log_scan_blocks(mut self, blocks: u64) -> Self {
        self.log_scan_blocks = blocks;
        self
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Never fails: when no endpoint answers, or the native balance cannot be
    /// read, the result is [`WalletStatus::error`]. Every other query degrades
    /// to zero on its own.
    pub async fn check_status(&self, address: Address, pool: &mut EndpointPool) -> WalletStatus {
        let started = Instant::now();
        let status = self.gather(address, pool).await;
        metrics::record_wallet_check(status.status(), started.elapsed());
        status
    }

    async fn gather(&self, address: Address, pool: &mut EndpointPool) -> WalletStatus {
        if let Err(err) = pool.find_live().await {
            error!("{:?}: no reachable RPC endpoint ({})", address, err);
            return WalletStatus::error(address);
        }

        let native = self
            .executor
            .execute_with_failover(pool, "native balance", |client: Arc<dyn ChainClient>| async move {
                client.native_balance(address).await
            })
            .await;
        let native = match native {
            Ok(balance) => balance,
            Err(err) => {
                error!(
                    "{:?}: native balance unavailable via {}: {}",
                    address,
                    pool.current(),
                    err
                );
                return WalletStatus::error(address);
            }
        };
        info!("{:?}: {} MON", address, format_ether4(native));

        let token = self.token_balance(address, pool).await;

        let nonce = self
            .executor
            .execute_with_failover(pool, "nonce", |client: Arc<dyn ChainClient>| async move {
                client.transaction_count(address).await
            })
            .await
            .unwrap_or_else(|err| {
                warn!("{:?}: nonce unavailable, counting 0 ({})", address, err);
                0
            });

        let unique_tx_count = self.unique_tx_count(address, nonce, pool).await;
        let nft_count = self.nft_count(address, pool).await;

        WalletStatus::new(
            address,
            native,
            token,
            nonce,
            unique_tx_count,
            nft_count,
            &self.thresholds,
        )
    }

    /// Primary through the executor, then a single try on the secondary endpoint.
    async fn token_balance(&self, address: Address, pool: &mut EndpointPool) -> U256 {
        let Some(token) = self.token else {
            return U256::zero();
        };

        let primary = match pool.client() {
            Ok(client) => {
                self.executor
                    .execute("token balance", || {
                        let client = client.clone();
                        async move { client.balance_of(token, address).await }
                    })
                    .await
            }
            Err(err) => Err(RetryError::Permanent(err)),
        };

        let err = match primary {
            Ok(balance) => return balance,
            Err(err) => err,
        };

        let Some(secondary) = pool.secondary() else {
            warn!("{:?}: token balance unavailable, counting 0 ({})", address, err);
            return U256::zero();
        };
        debug!("{:?}: token balance falling back to {}", address, secondary);

        let fallback = match pool.connect(&secondary) {
            Ok(client) => client.balance_of(token, address).await,
            Err(connect_err) => Err(connect_err),
        };
        fallback.unwrap_or_else(|fallback_err| {
            warn!(
                "{:?}: token balance unavailable, counting 0 ({}; fallback: {})",
                address, err, fallback_err
            );
            U256::zero()
        })
    }

    /// Larger of the nonce and the distinct transactions seen in recent logs.
    async fn unique_tx_count(&self, address: Address, nonce: u64, pool: &mut EndpointPool) -> u64 {
        let span = self.log_scan_blocks;
        let scanned = self
            .executor
            .execute("log scan", || {
                let client = pool.client();
                async move {
                    let client = client?;
                    let latest = client.block_number().await?;
                    let from = latest.saturating_sub(span);
                    client.log_transaction_hashes(address, from, latest).await
                }
            })
            .await;

        match scanned {
            Ok(hashes) => (hashes.len() as u64).max(nonce),
            Err(err) => {
                debug!("{:?}: log scan failed, using nonce ({})", address, err);
                nonce
            }
        }
    }

    async fn nft_count(&self, address: Address, pool: &mut EndpointPool) -> u64 {
        if self.nft_contracts.is_empty() {
            return 0;
        }
        let client = match pool.client() {
            Ok(client) => client,
            Err(err) => {
                warn!("{:?}: NFT lookup skipped ({})", address, err);
                return 0;
            }
        };

        let mut total = 0u64;
        for nft in &self.nft_contracts {
            let balance = self
                .executor
                .execute(&nft.name, || {
                    let client = client.clone();
                    async move { client.balance_of(nft.address, address).await }
                })
                .await;
            match balance {
                Ok(count) => {
                    let count = crate::rpc::saturating_u64(count);
                    if count > 0 {
                        info!("{:?}: {} x {}", address, count, nft.name.cyan());
                    }
                    total = total.saturating_add(count);
                }
                Err(err) => debug!("{:?}: {} lookup failed ({})", address, nft.name, err),
            }
        }
        total
    }
}

/// Totals across one batch of checks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub wallets: usize,
    pub ok: usize,
    pub low: usize,
    pub insufficient: usize,
    pub errors: usize,
    pub native_total: U256,
    pub token_total: U256,
    pub balance_total: U256,
}

impl BatchSummary {
    pub fn from_statuses<'a>(statuses: impl IntoIterator<Item = &'a WalletStatus>) -> Self {
        let mut summary = Self::default();
        for status in statuses {
            summary.wallets += 1;
            match status.status() {
                StatusLevel::Ok => summary.ok += 1,
                StatusLevel::Low => summary.low += 1,
                StatusLevel::Insufficient => summary.insufficient += 1,
                StatusLevel::Error => summary.errors += 1,
            }
            summary.native_total = summary.native_total.saturating_add(status.native_balance());
            summary.token_total = summary.token_total.saturating_add(status.token_balance());
            summary.balance_total = summary.balance_total.saturating_add(status.total_balance());
        }
        summary
    }

    /// Wallets with at least the low threshold.
    pub fn funded(&self) -> usize {
        self.ok
    }
}
