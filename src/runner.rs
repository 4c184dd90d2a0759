use crate::config::RunnerConfig;
use crate::contracts::{ContractManager, Operation, TxOutcome};
use crate::errors::PacingError;
use crate::metrics;
use crate::pacing::pause_or_cancel;
use crate::rpc::{Connector, EndpointPool, EthersClient, ProbeReport, ProxyAuth};
use crate::status::{StatusAggregator, StatusLevel, WalletStatus};
use crate::utils::{format_address, format_ether4};
use crate::wallets::WalletEntry;
use anyhow::{anyhow, Result};
use colored::Colorize;
use ethers::{
    middleware::SignerMiddleware,
    providers::{Http, Middleware, Provider},
    signers::{LocalWallet, Signer},
    types::{Address, U256},
};
use futures::{stream, StreamExt};
use indicatif::ProgressBar;
use log::{error, info, warn};
use rand::seq::SliceRandom;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResult {
    pub operation: Operation,
    pub success: bool,
    pub simulated: bool,
}

#[derive(Debug, Clone)]
pub struct WalletReport {
    pub index: usize,
    pub status: WalletStatus,
    pub operations: Vec<OperationResult>,
}

impl WalletReport {
    pub fn succeeded(&self) -> usize {
        self.operations.iter().filter(|op| op.success).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefillResult {
    pub index: usize,
    pub address: Address,
    pub amount: U256,
    pub success: bool,
}

/// Drives checks, operations and refills across wallets.
///
/// Wallets run one at a time unless `concurrency > 1`. Every wallet gets its
/// own [`EndpointPool`]; nothing else is shared between wallets.
pub struct BatchRunner {
    config: RunnerConfig,
    connector: Arc<dyn Connector>,
    aggregator: StatusAggregator,
    cancellation: CancellationToken,
    progress: Option<ProgressBar>,
}

impl BatchRunner {
    pub fn new(
        config: RunnerConfig,
        connector: Arc<dyn Connector>,
        cancellation: CancellationToken,
    ) -> Result<Self> {
        let aggregator = config.aggregator(cancellation.clone())?;
        Ok(Self {
            config,
            connector,
            aggregator,
            cancellation,
            progress: None,
        })
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    fn pool(&self, proxy: Option<&ProxyAuth>) -> Result<EndpointPool> {
        let endpoints = self.config.endpoints(proxy)?;
        Ok(EndpointPool::new(endpoints, self.connector.clone())?)
    }

    pub async fn check_wallet(&self, wallet: &WalletEntry) -> WalletStatus {
        let status = match self.pool(wallet.proxy.as_ref()) {
            Ok(mut pool) => self.aggregator.check_status(wallet.address(), &mut pool).await,
            Err(err) => {
                error!("{}: cannot build endpoint pool: {}", wallet.label(), err);
                WalletStatus::error(wallet.address())
            }
        };
        self.tick();
        status
    }

    /// Statuses in wallet order. Stops starting new wallets once cancelled.
    pub async fn check_all(&self, wallets: &[WalletEntry]) -> Vec<WalletStatus> {
        let workers = self.config.concurrency.max(1);
        if workers == 1 {
            let mut statuses = Vec::with_capacity(wallets.len());
            for wallet in wallets {
                if self.is_cancelled() {
                    warn!("Cancelled; {} wallet(s) not checked", wallets.len() - statuses.len());
                    break;
                }
                statuses.push(self.check_wallet(wallet).await);
            }
            return statuses;
        }

        stream::iter(wallets.iter().take_while(|_| !self.is_cancelled()))
            .map(|wallet| self.check_wallet(wallet))
            .buffered(workers)
            .collect()
            .await
    }

    /// Checks each wallet, then runs the configured operations in random order
    /// on wallets whose status is OK.
    pub async fn run_operations(&self, wallets: &[WalletEntry]) -> Vec<WalletReport> {
        let workers = self.config.concurrency.max(1);
        if workers > 1 {
            return stream::iter(wallets.iter().take_while(|_| !self.is_cancelled()))
                .map(|wallet| self.process_wallet(wallet))
                .buffered(workers)
                .collect()
                .await;
        }

        let mut reports = Vec::with_capacity(wallets.len());
        for (position, wallet) in wallets.iter().enumerate() {
            if self.is_cancelled() {
                break;
            }
            reports.push(self.process_wallet(wallet).await);
            if position + 1 < wallets.len() && self.pause().await.is_err() {
                break;
            }
        }
        reports
    }

    async fn process_wallet(&self, wallet: &WalletEntry) -> WalletReport {
        let address = wallet.address();
        info!(
            "{}",
            format!("=== {} ({}) ===", wallet.label(), format_address(address)).cyan()
        );

        let mut pool = match self.pool(wallet.proxy.as_ref()) {
            Ok(pool) => pool,
            Err(err) => {
                error!("{}: cannot build endpoint pool: {}", wallet.label(), err);
                self.tick();
                return WalletReport {
                    index: wallet.index,
                    status: WalletStatus::error(address),
                    operations: Vec::new(),
                };
            }
        };

        let status = self.aggregator.check_status(address, &mut pool).await;
        let mut report = WalletReport {
            index: wallet.index,
            status: status.clone(),
            operations: Vec::new(),
        };
        if !status.is_ok() {
            warn!(
                "{}: status {} ({} MON total), skipping operations",
                wallet.label(),
                status.status(),
                format_ether4(status.total_balance())
            );
            self.tick();
            return report;
        }

        let manager = match self.manager(&pool, wallet.signer.clone()) {
            Ok(manager) => manager,
            Err(err) => {
                error!("{}: cannot connect signer via {}: {}", wallet.label(), pool.current(), err);
                self.tick();
                return report;
            }
        };

        let mut operations = self.config.operations.clone();
        operations.shuffle(&mut rand::thread_rng());

        for (position, operation) in operations.iter().copied().enumerate() {
            if self.is_cancelled() {
                break;
            }
            let Some(amount) = self.amount_for(operation, &status, wallet) else {
                continue;
            };

            let outcome = manager.perform(operation, amount).await;
            let result = match outcome {
                Ok(TxOutcome::Confirmed { hash, .. }) => {
                    info!("{}: {} confirmed ({:?})", wallet.label(), operation, hash);
                    OperationResult {
                        operation,
                        success: true,
                        simulated: false,
                    }
                }
                Ok(TxOutcome::Simulated { gas_estimate }) => {
                    info!(
                        "{}: {} simulated, estimated gas {}",
                        wallet.label(),
                        operation,
                        gas_estimate
                    );
                    OperationResult {
                        operation,
                        success: true,
                        simulated: true,
                    }
                }
                Err(err) => {
                    error!(
                        "{}: {} failed via {}: {}",
                        wallet.label(),
                        operation,
                        pool.current(),
                        err
                    );
                    OperationResult {
                        operation,
                        success: false,
                        simulated: false,
                    }
                }
            };
            metrics::record_operation(operation.as_str(), result.success);
            report.operations.push(result);

            if position + 1 < operations.len() && self.pause().await.is_err() {
                break;
            }
        }

        info!(
            "{}: {}/{} operation(s) succeeded",
            wallet.label(),
            report.succeeded(),
            report.operations.len()
        );
        self.tick();
        report
    }

    fn amount_for(&self, operation: Operation, status: &WalletStatus, wallet: &WalletEntry) -> Option<U256> {
        let amount = match self.config.amounts.random_amount() {
            Ok(amount) => amount,
            Err(err) => {
                error!("{}: {}: {}", wallet.label(), operation, err);
                return None;
            }
        };
        if operation != Operation::Unwrap {
            return Some(amount);
        }
        let amount = amount.min(status.token_balance());
        if amount.is_zero() {
            info!("{}: no WMON to unwrap", wallet.label());
            return None;
        }
        Some(amount)
    }

    /// Tops up LOW and INSUFFICIENT wallets to the low threshold from `funder`.
    /// The funder always keeps at least the low threshold for itself.
    pub async fn refill(&self, funder: LocalWallet, wallets: &[WalletEntry]) -> Result<Vec<RefillResult>> {
        let funder_address = funder.address();
        let mut funder_pool = self.pool(None)?;
        let funder_status = self.aggregator.check_status(funder_address, &mut funder_pool).await;
        if funder_status.status() == StatusLevel::Error {
            return Err(anyhow!("funder {:?} balance could not be read", funder_address));
        }
        info!(
            "Funder {} holds {} MON, sending via {}",
            format_address(funder_address),
            format_ether4(funder_status.native_balance()),
            funder_pool.current()
        );
        let manager = self.manager(&funder_pool, funder)?;
        Ok(self.top_up(&manager, funder_status.native_balance(), wallets).await)
    }

    /// Transfer loop of [`refill`](Self::refill), spending at most
    /// `available - low threshold` through `manager`.
    pub async fn top_up<M: Middleware + 'static>(
        &self,
        manager: &ContractManager<M>,
        mut available: U256,
        wallets: &[WalletEntry],
    ) -> Vec<RefillResult> {
        let target = self.aggregator.thresholds().low();
        info!(
            "Refilling up to {} MON from {}",
            format_ether4(target),
            format_address(manager.owner())
        );
        let statuses = self.check_all(wallets).await;
        let mut results = Vec::new();
        for (wallet, status) in wallets.iter().zip(statuses) {
            if self.is_cancelled() {
                break;
            }
            if !matches!(status.status(), StatusLevel::Low | StatusLevel::Insufficient) {
                continue;
            }
            let needed = target.saturating_sub(status.total_balance());
            if available < needed.saturating_add(target) {
                warn!(
                    "Funder balance {} MON too low to send {} MON to {}; stopping",
                    format_ether4(available),
                    format_ether4(needed),
                    wallet.label()
                );
                break;
            }

            if !results.is_empty() && self.pause_between_transfers().await.is_err() {
                break;
            }

            let success = match manager.transfer_native(wallet.address(), needed).await {
                Ok(outcome) => {
                    info!(
                        "{}: refilled {} MON{}",
                        wallet.label(),
                        format_ether4(needed),
                        if matches!(outcome, TxOutcome::Simulated { .. }) { " (simulated)" } else { "" }
                    );
                    available = available.saturating_sub(needed);
                    true
                }
                Err(err) => {
                    error!(
                        "{}: refill of {} MON failed: {}",
                        wallet.label(),
                        format_ether4(needed),
                        err
                    );
                    false
                }
            };
            metrics::record_operation("refill", success);
            results.push(RefillResult {
                index: wallet.index,
                address: wallet.address(),
                amount: needed,
                success,
            });
        }
        results
    }

    /// Latency ranking of the configured endpoints through `proxy`.
    pub async fn probe_endpoints(&self, proxy: Option<&ProxyAuth>) -> Result<Vec<ProbeReport>> {
        Ok(self.pool(proxy)?.rank().await)
    }

    fn manager(&self, pool: &EndpointPool, signer: LocalWallet) -> Result<ContractManager<SignerClient>> {
        let client = EthersClient::connect(pool.current())?;
        let owner = signer.address();
        let middleware = SignerMiddleware::new(client.provider().clone(), signer);
        Ok(ContractManager::new(
            Arc::new(middleware),
            owner,
            self.config.registry(),
            self.config.gas,
        )
        .with_explorer(self.config.explorer_url.clone())
        .dry_run(self.config.dry_run))
    }

    async fn pause(&self) -> Result<(), PacingError> {
        pause_or_cancel(&self.config.delays, &self.cancellation)
            .await
            .map(|_| ())
    }

    async fn pause_between_transfers(&self) -> Result<(), PacingError> {
        pause_or_cancel(&self.config.refill_delays, &self.cancellation)
            .await
            .map(|_| ())
    }

    fn tick(&self) {
        if let Some(progress) = &self.progress {
            progress.inc(1);
        }
    }
}
