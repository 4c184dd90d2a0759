#![allow(dead_code)]

use async_trait::async_trait;
use ethers::{
    types::{Address, H256, U256},
    utils::parse_ether,
};
use monad_runner::{
    errors::{FailureKind, RpcFailure},
    rpc::{ChainClient, Connector, Endpoint, EndpointPool},
};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

pub fn ether(value: &str) -> U256 {
    parse_ether(value).unwrap()
}

pub fn endpoint(url: &str) -> Endpoint {
    Endpoint::new(url, Duration::from_secs(2)).unwrap()
}

/// Scripted chain state behind one endpoint.
#[derive(Debug, Clone)]
pub struct Behaviour {
    pub alive: bool,
    pub hang: bool,
    pub block: u64,
    pub native: U256,
    pub token: Option<U256>,
    pub nonce: Option<u64>,
    pub log_hashes: Option<usize>,
    pub nfts: HashMap<Address, Option<U256>>,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            alive: true,
            hang: false,
            block: 1_000,
            native: U256::zero(),
            token: Some(U256::zero()),
            nonce: Some(0),
            log_hashes: Some(0),
            nfts: HashMap::new(),
        }
    }
}

impl Behaviour {
    pub fn dead() -> Self {
        Self {
            alive: false,
            ..Self::default()
        }
    }

    pub fn with_native(mut self, native: U256) -> Self {
        self.native = native;
        self
    }
}

#[derive(Debug, Default)]
pub struct Calls {
    pub total: AtomicUsize,
    pub token: AtomicUsize,
}

pub struct FakeClient {
    endpoint: Endpoint,
    behaviour: Behaviour,
    calls: Arc<Calls>,
}

impl FakeClient {
    fn check(&self) -> Result<(), RpcFailure> {
        self.calls.total.fetch_add(1, Ordering::SeqCst);
        if self.behaviour.alive {
            Ok(())
        } else {
            Err(RpcFailure::new(FailureKind::ServerError, "503 Service Unavailable").at(&self.endpoint))
        }
    }

    fn missing(&self, what: &str) -> RpcFailure {
        RpcFailure::new(FailureKind::Timeout, format!("{} timed out", what)).at(&self.endpoint)
    }
}

#[async_trait]
impl ChainClient for FakeClient {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn block_number(&self) -> Result<u64, RpcFailure> {
        if self.behaviour.hang {
            std::future::pending::<()>().await;
        }
        self.check()?;
        Ok(self.behaviour.block)
    }

    async fn native_balance(&self, _owner: Address) -> Result<U256, RpcFailure> {
        self.check()?;
        Ok(self.behaviour.native)
    }

    async fn balance_of(&self, contract: Address, _owner: Address) -> Result<U256, RpcFailure> {
        self.check()?;
        if let Some(nft) = self.behaviour.nfts.get(&contract) {
            return (*nft).ok_or_else(|| self.missing("nft"));
        }
        self.calls.token.fetch_add(1, Ordering::SeqCst);
        self.behaviour.token.ok_or_else(|| self.missing("token"))
    }

    async fn transaction_count(&self, _owner: Address) -> Result<u64, RpcFailure> {
        self.check()?;
        self.behaviour.nonce.ok_or_else(|| self.missing("nonce"))
    }

    async fn log_transaction_hashes(
        &self,
        _address: Address,
        _from_block: u64,
        _to_block: u64,
    ) -> Result<Vec<H256>, RpcFailure> {
        self.check()?;
        let count = self.behaviour.log_hashes.ok_or_else(|| self.missing("logs"))?;
        Ok((0..count).map(|i| H256::from_low_u64_be(i as u64 + 1)).collect())
    }

    async fn gas_price(&self) -> Result<U256, RpcFailure> {
        self.check()?;
        Ok(U256::from(50_000_000_000u64))
    }
}

/// Hands out [`FakeClient`]s keyed by the endpoint's display form, which
/// distinguishes proxied from direct connections. Unknown endpoints are dead.
#[derive(Default)]
pub struct FakeConnector {
    behaviours: HashMap<String, Behaviour>,
    pub calls: Arc<Calls>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, endpoint: &Endpoint, behaviour: Behaviour) -> Self {
        self.behaviours.insert(endpoint.to_string(), behaviour);
        self
    }
}

impl Connector for FakeConnector {
    fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn ChainClient>, RpcFailure> {
        let behaviour = self
            .behaviours
            .get(&endpoint.to_string())
            .cloned()
            .unwrap_or_else(Behaviour::dead);
        Ok(Arc::new(FakeClient {
            endpoint: endpoint.clone(),
            behaviour,
            calls: self.calls.clone(),
        }))
    }
}

pub fn pool(endpoints: Vec<Endpoint>, connector: FakeConnector) -> (EndpointPool, Arc<Calls>) {
    let calls = connector.calls.clone();
    (EndpointPool::new(endpoints, Arc::new(connector)).unwrap(), calls)
}
