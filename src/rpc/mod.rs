pub mod endpoint;
pub mod retry;

pub use endpoint::{Endpoint, EndpointPool, ProbeReport, ProxyAuth};
pub use retry::{RetryExecutor, RetryPolicy};

use crate::errors::{FailureKind, RpcFailure};
use async_trait::async_trait;
use ethers::{
    contract::abigen,
    providers::{Http, Middleware, Provider},
    types::{Address, Filter, H256, U256},
};
use std::{collections::HashSet, sync::Arc, time::Duration};

// ERC-20 and ERC-721 share this selector, so one binding serves both.
abigen!(
    BalanceOf,
    r#"[
        function balanceOf(address owner) external view returns (uint256)
    ]"#
);

/// Read-only chain queries used by the status aggregator and the pool probe.
/// Errors come back already classified.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn endpoint(&self) -> &Endpoint;

    async fn block_number(&self) -> Result<u64, RpcFailure>;

    async fn native_balance(&self, owner: Address) -> Result<U256, RpcFailure>;

    async fn balance_of(&self, contract: Address, owner: Address) -> Result<U256, RpcFailure>;

    async fn transaction_count(&self, owner: Address) -> Result<u64, RpcFailure>;

    /// Distinct transaction hashes among logs emitted by `address` in the
    /// inclusive block range.
    async fn log_transaction_hashes(
        &self,
        address: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<H256>, RpcFailure>;

    async fn gas_price(&self) -> Result<U256, RpcFailure>;
}

/// Builds a client for an endpoint.
#[cfg_attr(test, mockall::automock)]
pub trait Connector: Send + Sync {
    fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn ChainClient>, RpcFailure>;
}

/// reqwest client honoring the endpoint's timeout and proxy.
pub fn http_client(endpoint: &Endpoint) -> Result<reqwest::Client, RpcFailure> {
    let mut builder = reqwest::Client::builder().timeout(endpoint.timeout());
    if let Some(proxy) = endpoint.proxy() {
        let mut reqwest_proxy = reqwest::Proxy::all(proxy.proxy_url())
            .map_err(|e| RpcFailure::new(FailureKind::InvalidArgument, e.to_string()))?;
        if let Some((user, pass)) = &proxy.credentials {
            reqwest_proxy = reqwest_proxy.basic_auth(user, pass);
        }
        builder = builder.proxy(reqwest_proxy);
    }
    builder
        .build()
        .map_err(|e| RpcFailure::new(FailureKind::InvalidArgument, e.to_string()))
}

pub struct EthersClient {
    endpoint: Endpoint,
    provider: Provider<Http>,
}

impl EthersClient {
    pub fn connect(endpoint: &Endpoint) -> Result<Self, RpcFailure> {
        let client = http_client(endpoint)?;
        let transport = Http::new_with_client(endpoint.url().clone(), client);
        let provider = Provider::new(transport).interval(Duration::from_millis(500));
        Ok(Self {
            endpoint: endpoint.clone(),
            provider,
        })
    }

    pub fn provider(&self) -> &Provider<Http> {
        &self.provider
    }

    fn fail(&self, err: RpcFailure) -> RpcFailure {
        err.at(&self.endpoint)
    }
}

#[async_trait]
impl ChainClient for EthersClient {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn block_number(&self) -> Result<u64, RpcFailure> {
        self.provider
            .get_block_number()
            .await
            .map(|n| n.as_u64())
            .map_err(|e| self.fail(RpcFailure::from_provider(&e)))
    }

    async fn native_balance(&self, owner: Address) -> Result<U256, RpcFailure> {
        self.provider
            .get_balance(owner, None)
            .await
            .map_err(|e| self.fail(RpcFailure::from_provider(&e)))
    }

    async fn balance_of(&self, contract: Address, owner: Address) -> Result<U256, RpcFailure> {
        let binding = BalanceOf::new(contract, Arc::new(self.provider.clone()));
        binding
            .balance_of(owner)
            .call()
            .await
            .map_err(|e| self.fail(RpcFailure::from_contract(&e)))
    }

    async fn transaction_count(&self, owner: Address) -> Result<u64, RpcFailure> {
        let count = self
            .provider
            .get_transaction_count(owner, None)
            .await
            .map_err(|e| self.fail(RpcFailure::from_provider(&e)))?;
        Ok(saturating_u64(count))
    }

    async fn log_transaction_hashes(
        &self,
        address: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<H256>, RpcFailure> {
        let filter = Filter::new()
            .address(address)
            .from_block(from_block)
            .to_block(to_block);
        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| self.fail(RpcFailure::from_provider(&e)))?;

        let mut seen = HashSet::new();
        Ok(logs
            .into_iter()
            .filter_map(|log| log.transaction_hash)
            .filter(|hash| seen.insert(*hash))
            .collect())
    }

    async fn gas_price(&self) -> Result<U256, RpcFailure> {
        self.provider
            .get_gas_price()
            .await
            .map_err(|e| self.fail(RpcFailure::from_provider(&e)))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HttpConnector;

impl Connector for HttpConnector {
    fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn ChainClient>, RpcFailure> {
        Ok(Arc::new(EthersClient::connect(endpoint)?))
    }
}

pub fn saturating_u64(value: U256) -> u64 {
    if value > U256::from(u64::MAX) {
        u64::MAX
    } else {
        value.as_u64()
    }
}
