use crate::errors::{FailureKind, OperationError, RpcFailure};
use crate::utils::format_ether4;
use clap::ValueEnum;
use ethers::{
    abi::{parse_abi, Abi, Detokenize, Tokenize},
    contract::{builders::ContractCall, Contract},
    providers::Middleware,
    types::{
        transaction::eip2718::TypedTransaction, Address, TransactionReceipt, TransactionRequest,
        H160, H256, U256, U64,
    },
};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, sync::Arc};
use validator::{Validate, ValidationError};

pub const WMON: &str = "wmon";
pub const MAGMA: &str = "magma";
pub const APRIORI: &str = "apriori";

pub const WMON_ADDRESS: Address = H160([
    0x76, 0x0a, 0xfe, 0x86, 0xe5, 0xde, 0x5f, 0xa0, 0xee, 0x54,
    0x2f, 0xc7, 0xb7, 0xb7, 0x13, 0xe1, 0xc5, 0x42, 0x57, 0x01,
]);
pub const MAGMA_ADDRESS: Address = H160([
    0x2c, 0x9c, 0x95, 0x95, 0x16, 0xe9, 0xaa, 0xed, 0xb2, 0xc7,
    0x48, 0x22, 0x4a, 0x41, 0x24, 0x92, 0x02, 0xca, 0x8b, 0xe7,
]);
pub const APRIORI_ADDRESS: Address = H160([
    0xb2, 0xf8, 0x2d, 0x0f, 0x38, 0xdc, 0x45, 0x3d, 0x59, 0x6a,
    0xd4, 0x0a, 0x37, 0x79, 0x94, 0x46, 0xcc, 0x89, 0x27, 0x4a,
]);

/// Address plus human-readable ABI fragments for one deployed contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractSpec {
    pub address: Address,
    pub abi: Vec<String>,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    "1".to_string()
}

impl ContractSpec {
    pub fn new(address: Address, abi: &[&str]) -> Self {
        Self {
            address,
            abi: abi.iter().map(|fragment| fragment.to_string()).collect(),
            version: default_version(),
        }
    }
}

/// Deployed contracts keyed by logical name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractRegistry {
    contracts: BTreeMap<String, ContractSpec>,
}

impl ContractRegistry {
    /// Monad testnet deployments used by the built-in operations.
    pub fn monad_testnet() -> Self {
        let mut contracts = BTreeMap::new();
        contracts.insert(
            WMON.to_string(),
            ContractSpec::new(
                WMON_ADDRESS,
                &[
                    "function deposit() payable",
                    "function withdraw(uint256 amount)",
                    "function approve(address spender, uint256 amount) returns (bool)",
                    "function balanceOf(address owner) view returns (uint256)",
                ],
            ),
        );
        contracts.insert(
            MAGMA.to_string(),
            ContractSpec::new(MAGMA_ADDRESS, &["function depositMon() payable"]),
        );
        contracts.insert(
            APRIORI.to_string(),
            ContractSpec::new(
                APRIORI_ADDRESS,
                &["function deposit(uint256 assets, address receiver) payable returns (uint256)"],
            ),
        );
        Self { contracts }
    }

    /// Entries in `overrides` replace built-ins of the same name.
    pub fn with_overrides(mut self, overrides: &BTreeMap<String, ContractSpec>) -> Self {
        for (name, spec) in overrides {
            self.contracts.insert(name.to_lowercase(), spec.clone());
        }
        self
    }

    pub fn get(&self, name: &str) -> Result<&ContractSpec, OperationError> {
        self.contracts
            .get(name)
            .ok_or_else(|| OperationError::UnknownContract(name.to_string()))
    }

    pub fn address(&self, name: &str) -> Result<Address, OperationError> {
        Ok(self.get(name)?.address)
    }

    pub fn abi(&self, name: &str) -> Result<Abi, OperationError> {
        let spec = self.get(name)?;
        let fragments: Vec<&str> = spec.abi.iter().map(String::as_str).collect();
        parse_abi(&fragments).map_err(|e| OperationError::InvalidAbi {
            name: name.to_string(),
            message: e.to_string(),
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.contracts.keys().map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    /// MON -> WMON
    Wrap,
    /// WMON -> MON
    Unwrap,
    /// Stake MON with Magma
    MagmaStake,
    /// Stake MON with aPriori
    AprioriStake,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::Wrap,
        Operation::Unwrap,
        Operation::MagmaStake,
        Operation::AprioriStake,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Wrap => "wrap",
            Operation::Unwrap => "unwrap",
            Operation::MagmaStake => "magma-stake",
            Operation::AprioriStake => "apriori-stake",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome {
    Confirmed { hash: H256, block: Option<U64> },
    /// Dry run: the transaction was estimated, never sent.
    Simulated { gas_estimate: U256 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
pub struct GasSettings {
    #[validate(range(min = 21_000))]
    pub default_gas_limit: u64,
    #[validate(custom = "validate_gas_multiplier")]
    pub gas_multiplier: f64,
}

fn validate_gas_multiplier(multiplier: f64) -> Result<(), ValidationError> {
    if !(multiplier.is_finite() && multiplier > 0.0) {
        return Err(ValidationError::new("invalid_gas_multiplier"));
    }
    Ok(())
}

impl Default for GasSettings {
    fn default() -> Self {
        Self {
            default_gas_limit: 500_000,
            gas_multiplier: 1.2,
        }
    }
}

impl GasSettings {
    pub fn scale(&self, estimate: U256) -> U256 {
        let per_mille = (self.gas_multiplier * 1000.0).round().max(0.0) as u64;
        estimate.saturating_mul(U256::from(per_mille)) / U256::from(1000u64)
    }
}

/// Sends the one-shot transactions of [`Operation`] from one wallet.
pub struct ContractManager<M> {
    client: Arc<M>,
    owner: Address,
    registry: ContractRegistry,
    gas: GasSettings,
    explorer_url: String,
    dry_run: bool,
}

impl<M: Middleware + 'static> ContractManager<M> {
    pub fn new(client: Arc<M>, owner: Address, registry: ContractRegistry, gas: GasSettings) -> Self {
        Self {
            client,
            owner,
            registry,
            gas,
            explorer_url: String::new(),
            dry_run: false,
        }
    }

    pub fn with_explorer(mut self, explorer_url: impl Into<String>) -> Self {
        self.explorer_url = explorer_url.into();
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn client(&self) -> &Arc<M> {
        &self.client
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub async fn perform(&self, operation: Operation, amount: U256) -> Result<TxOutcome, OperationError> {
        info!(
            "{} {} MON from {:?}{}",
            operation,
            format_ether4(amount),
            self.owner,
            if self.dry_run { " (dry run)" } else { "" }
        );
        match operation {
            Operation::Wrap => self.wrap_native(amount).await,
            Operation::Unwrap => self.unwrap_native(amount).await,
            Operation::MagmaStake => self.magma_stake(amount).await,
            Operation::AprioriStake => self.apriori_stake(amount).await,
        }
    }

    pub async fn wrap_native(&self, amount: U256) -> Result<TxOutcome, OperationError> {
        let call = self.method::<_, ()>(WMON, "deposit", ())?.value(amount);
        self.submit(WMON, call).await
    }

    pub async fn unwrap_native(&self, amount: U256) -> Result<TxOutcome, OperationError> {
        let call = self.method::<_, ()>(WMON, "withdraw", amount)?;
        self.submit(WMON, call).await
    }

    pub async fn magma_stake(&self, amount: U256) -> Result<TxOutcome, OperationError> {
        let call = self.method::<_, ()>(MAGMA, "depositMon", ())?.value(amount);
        self.submit(MAGMA, call).await
    }

    pub async fn apriori_stake(&self, amount: U256) -> Result<TxOutcome, OperationError> {
        let call = self
            .method::<_, U256>(APRIORI, "deposit", (amount, self.owner))?
            .value(amount);
        self.submit(APRIORI, call).await
    }

    /// Plain value transfer, used to top up other wallets.
    pub async fn transfer_native(&self, to: Address, amount: U256) -> Result<TxOutcome, OperationError> {
        let tx: TypedTransaction = TransactionRequest::new()
            .from(self.owner)
            .to(to)
            .value(amount)
            .into();
        let estimate = self
            .client
            .estimate_gas(&tx, None)
            .await
            .map_err(|e| RpcFailure::from_middleware(&e));
        let gas = self.gas_limit("transfer", estimate)?;
        if self.dry_run {
            return Ok(TxOutcome::Simulated { gas_estimate: gas });
        }

        let mut tx = tx;
        tx.set_gas(gas);
        let pending = self
            .client
            .send_transaction(tx, None)
            .await
            .map_err(|e| RpcFailure::from_middleware(&e))?;
        let hash = *pending;
        self.log_link(hash);
        let receipt = pending.await.map_err(|e| RpcFailure::from_provider(&e))?;
        confirmed(hash, receipt)
    }

    fn method<T: Tokenize, D: Detokenize>(
        &self,
        contract: &str,
        name: &str,
        args: T,
    ) -> Result<ContractCall<M, D>, OperationError> {
        let address = self.registry.address(contract)?;
        let abi = self.registry.abi(contract)?;
        Contract::new(address, abi, self.client.clone())
            .method::<T, D>(name, args)
            .map_err(|e| OperationError::Encoding {
                name: contract.to_string(),
                message: e.to_string(),
            })
    }

    async fn submit<D: Detokenize>(
        &self,
        contract: &str,
        call: ContractCall<M, D>,
    ) -> Result<TxOutcome, OperationError> {
        let estimate = call.estimate_gas().await.map_err(|e| RpcFailure::from_contract(&e));
        let gas = self.gas_limit(contract, estimate)?;
        if self.dry_run {
            info!("{}: estimated {} gas, not sending", contract, gas);
            return Ok(TxOutcome::Simulated { gas_estimate: gas });
        }

        let call = call.gas(gas);
        let pending = call.send().await.map_err(|e| RpcFailure::from_contract(&e))?;
        let hash = *pending;
        self.log_link(hash);
        let receipt = pending.await.map_err(|e| RpcFailure::from_provider(&e))?;
        confirmed(hash, receipt)
    }

    /// Scaled estimate. A transient estimation failure falls back to the
    /// configured limit; a permanent one (revert, no funds) stops the send.
    fn gas_limit(&self, label: &str, estimate: Result<U256, RpcFailure>) -> Result<U256, OperationError> {
        match estimate {
            Ok(estimate) => Ok(self.gas.scale(estimate)),
            Err(err) if err.is_transient() => {
                warn!(
                    "{}: gas estimation failed ({}), using {}",
                    label, err, self.gas.default_gas_limit
                );
                Ok(U256::from(self.gas.default_gas_limit))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn log_link(&self, hash: H256) {
        if self.explorer_url.is_empty() {
            info!("Transaction sent: {:?}", hash);
        } else {
            info!("Transaction sent: {}{:?}", self.explorer_url, hash);
        }
    }
}

fn confirmed(hash: H256, receipt: Option<TransactionReceipt>) -> Result<TxOutcome, OperationError> {
    let receipt = receipt.ok_or(OperationError::Dropped(hash))?;
    if receipt.status == Some(U64::zero()) {
        return Err(RpcFailure::new(
            FailureKind::Revert,
            format!("transaction {:?} reverted in block {:?}", hash, receipt.block_number),
        )
        .into());
    }
    info!("Transaction confirmed in block {:?}", receipt.block_number);
    Ok(TxOutcome::Confirmed {
        hash,
        block: receipt.block_number,
    })
}
