use crate::contracts::{ContractRegistry, ContractSpec, GasSettings, Operation};
use crate::pacing::{AmountRange, DelayRange};
use crate::rpc::{Endpoint, ProxyAuth, RetryExecutor, RetryPolicy};
use crate::status::{NftContract, StatusAggregator, Thresholds};
use crate::wallets::{pair_wallets, read_list, shuffle_wallets, WalletEntry};
use anyhow::{anyhow, Context, Result};
use ethers::types::Address;
use log::info;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::Path, time::Duration};
use tokio_util::sync::CancellationToken;
use validator::{Validate, ValidationError};

pub const MONAD_TESTNET_RPC: &str = "https://testnet-rpc.monad.xyz/";
pub const MONAD_TESTNET_EXPLORER: &str = "https://testnet.monadexplorer.com/tx/";
pub const MONAD_TESTNET_CHAIN_ID: u64 = 10143;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RunnerConfig {
    // Network
    #[validate(length(min = 1), custom = "validate_rpc_urls")]
    pub rpc_urls: Vec<String>,
    #[validate(range(min = 1))]
    pub rpc_timeout_ms: u64,
    #[validate(range(min = 1))]
    pub chain_id: u64,
    pub explorer_url: String,

    // Wallets
    pub wallets: Vec<String>,
    #[validate(custom = "validate_proxies")]
    pub proxies: Vec<String>,
    pub wallets_file: Option<String>,
    pub proxies_file: Option<String>,
    pub shuffle_wallets: bool,
    pub seed: Option<u64>,

    // Retry and pacing
    #[validate]
    pub retry: RetryPolicy,
    pub delays: DelayRange,
    pub amounts: AmountRange,
    pub refill_delays: DelayRange,

    // Balances
    pub insufficient_floor: String,
    pub min_balance: String,
    #[validate(range(min = 1))]
    pub log_scan_blocks: u64,
    #[validate(custom = "validate_nft_contracts")]
    pub nft_contracts: Vec<NftContract>,

    // Transactions
    #[validate]
    pub gas: GasSettings,
    pub contracts: BTreeMap<String, ContractSpec>,
    pub operations: Vec<Operation>,
    pub dry_run: bool,

    // Scheduling
    #[validate(range(min = 1, max = 64))]
    pub concurrency: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            rpc_urls: vec![MONAD_TESTNET_RPC.to_string()],
            rpc_timeout_ms: 30_000,
            chain_id: MONAD_TESTNET_CHAIN_ID,
            explorer_url: MONAD_TESTNET_EXPLORER.to_string(),
            wallets: Vec::new(),
            proxies: Vec::new(),
            wallets_file: None,
            proxies_file: None,
            shuffle_wallets: false,
            seed: None,
            retry: RetryPolicy::default(),
            delays: DelayRange::ACTIONS,
            amounts: AmountRange::default(),
            refill_delays: DelayRange::TRANSFERS,
            insufficient_floor: "0.01".to_string(),
            min_balance: "1.0".to_string(),
            log_scan_blocks: crate::status::DEFAULT_LOG_SCAN_BLOCKS,
            nft_contracts: Vec::new(),
            gas: GasSettings::default(),
            contracts: BTreeMap::new(),
            operations: Operation::ALL.to_vec(),
            dry_run: false,
            concurrency: 1,
        }
    }
}

impl RunnerConfig {
    /// Reads a JSON config file; missing fields keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    /// `MONAD_RPC_URLS`, `MONAD_DRY_RUN` and `MONAD_CONCURRENCY` win over the file.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(urls) = lookup("MONAD_RPC_URLS") {
            self.rpc_urls = urls
                .split(',')
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(flag) = lookup("MONAD_DRY_RUN") {
            self.dry_run = matches!(flag.trim().to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(workers) = lookup("MONAD_CONCURRENCY") {
            self.concurrency = workers
                .trim()
                .parse()
                .map_err(|_| anyhow!("MONAD_CONCURRENCY must be a positive integer, got {:?}", workers))?;
        }
        Ok(())
    }

    pub fn validate_all(&self) -> Result<()> {
        if let Err(e) = self.validate() {
            return Err(anyhow!("Configuration validation failed: {}", e));
        }

        // Checks spanning more than one field
        self.validate_pacing()?;
        self.validate_balances()?;
        self.validate_contracts()?;
        Ok(())
    }

    fn validate_pacing(&self) -> Result<()> {
        DelayRange::new(self.delays.min_seconds(), self.delays.max_seconds())
            .context("delays")?;
        DelayRange::new(self.refill_delays.min_seconds(), self.refill_delays.max_seconds())
            .context("refill_delays")?;
        AmountRange::new(self.amounts.min(), self.amounts.max()).context("amounts")?;
        Ok(())
    }

    fn validate_balances(&self) -> Result<()> {
        self.thresholds()?;
        Ok(())
    }

    fn validate_contracts(&self) -> Result<()> {
        let registry = self.registry();
        for name in registry.names() {
            let spec = registry.get(name)?;
            validate_address(&spec.address)
                .map_err(|_| anyhow!("contract {} has a zero address", name))?;
            registry.abi(name)?;
        }
        Ok(())
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn thresholds(&self) -> Result<Thresholds> {
        Ok(Thresholds::from_ether(&self.insufficient_floor, &self.min_balance)?)
    }

    pub fn registry(&self) -> ContractRegistry {
        ContractRegistry::monad_testnet().with_overrides(&self.contracts)
    }

    /// Endpoints in configured order, all routed through `proxy`.
    pub fn endpoints(&self, proxy: Option<&ProxyAuth>) -> Result<Vec<Endpoint>> {
        self.rpc_urls
            .iter()
            .map(|url| {
                Endpoint::new(url, self.rpc_timeout())
                    .map(|endpoint| endpoint.with_proxy(proxy.cloned()))
                    .with_context(|| format!("invalid RPC URL {}", url))
            })
            .collect()
    }

    pub fn executor(&self, cancellation: CancellationToken) -> RetryExecutor {
        RetryExecutor::new(self.retry).with_cancellation(cancellation)
    }

    pub fn aggregator(&self, cancellation: CancellationToken) -> Result<StatusAggregator> {
        let registry = self.registry();
        let mut aggregator = StatusAggregator::new(self.executor(cancellation), self.thresholds()?)
            .with_nft_contracts(self.nft_contracts.clone())
            .with_log_scan_blocks(self.log_scan_blocks);
        if let Ok(wmon) = registry.address(crate::contracts::WMON) {
            aggregator = aggregator.with_token(wmon);
        }
        Ok(aggregator)
    }

    /// Keys and proxies from the config plus any list files, paired and
    /// optionally shuffled.
    pub fn load_wallets(&self) -> Result<Vec<WalletEntry>> {
        let mut keys = self.wallets.clone();
        if let Some(path) = &self.wallets_file {
            keys.extend(read_list(path)?);
        }
        let mut proxies = self.proxies.clone();
        if let Some(path) = &self.proxies_file {
            proxies.extend(read_list(path)?);
        }
        if keys.is_empty() {
            return Err(anyhow!("no wallets configured"));
        }

        let mut wallets = pair_wallets(&keys, &proxies, self.chain_id)?;
        if self.shuffle_wallets {
            shuffle_wallets(&mut wallets, self.seed);
        }
        info!("Loaded {} wallet(s), {} proxy(ies)", wallets.len(), proxies.len());
        Ok(wallets)
    }
}

// Custom validators
fn validate_rpc_urls(urls: &[String]) -> Result<(), ValidationError> {
    urls.iter().try_for_each(|url| validate_rpc_url(url))
}

fn validate_rpc_url(url: &str) -> Result<(), ValidationError> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ValidationError::new("invalid_rpc_url"));
    }
    url::Url::parse(url).map_err(|_| ValidationError::new("invalid_rpc_url"))?;
    Ok(())
}

fn validate_proxies(proxies: &[String]) -> Result<(), ValidationError> {
    if proxies.iter().any(|proxy| proxy.parse::<ProxyAuth>().is_err()) {
        return Err(ValidationError::new("invalid_proxy"));
    }
    Ok(())
}

fn validate_nft_contracts(contracts: &[NftContract]) -> Result<(), ValidationError> {
    contracts
        .iter()
        .try_for_each(|nft| validate_address(&nft.address))
}

fn validate_address(address: &Address) -> Result<(), ValidationError> {
    if address == &Address::zero() {
        return Err(ValidationError::new("zero_address"));
    }
    Ok(())
}
