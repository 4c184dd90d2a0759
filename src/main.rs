use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn, LevelFilter};
use std::{env, path::PathBuf, sync::Arc};
use tokio_util::sync::CancellationToken;

use monad_runner::{
    config::RunnerConfig,
    contracts::Operation,
    metrics,
    report,
    rpc::HttpConnector,
    runner::BatchRunner,
    status::BatchSummary,
    utils::setup_logger,
    wallets::parse_private_key,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-wallet automation for Monad testnet", long_about = None)]
struct Cli {
    /// JSON config file; defaults apply when it is absent
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Estimate gas only, never send transactions
    #[arg(long, global = true)]
    dry_run: bool,

    /// Wallets processed at the same time
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Serve Prometheus metrics on this port
    #[arg(long, global = true)]
    metrics_port: Option<u16>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print balance, nonce, activity and status for every wallet
    Check {
        /// Also write the table to a CSV file
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Run the configured operations on every healthy wallet
    Run {
        /// Restrict to these operations
        #[arg(long, value_enum, value_delimiter = ',')]
        operations: Vec<Operation>,
    },
    /// Rank the configured RPC endpoints by latency
    CheckRpc,
    /// Probe the first endpoint through every configured proxy
    CheckProxies,
    /// Top up LOW and INSUFFICIENT wallets from FUNDER_PRIVATE_KEY
    Refill,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    setup_logger(if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    })?;

    let config = load_config(&cli)?;
    config.validate_all()?;

    if let Some(port) = cli.metrics_port {
        metrics::install_exporter(port)?;
    }

    let cancellation = CancellationToken::new();
    tokio::spawn({
        let cancellation = cancellation.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl-C received, finishing current step and stopping");
                cancellation.cancel();
            }
        }
    });

    let runner = BatchRunner::new(config, Arc::new(HttpConnector), cancellation)?;

    match cli.command {
        Command::Check { csv } => {
            let wallets = runner.config().load_wallets()?;
            let runner = runner.with_progress(progress_bar(wallets.len()));
            let statuses = runner.check_all(&wallets).await;
            report::print_status_table(&statuses);
            report::print_summary(&BatchSummary::from_statuses(&statuses));
            if let Some(path) = csv {
                report::write_csv(&path, &statuses)?;
                info!("Status written to {}", path.display());
            }
        }
        Command::Run { .. } => {
            let wallets = runner.config().load_wallets()?;
            let runner = runner.with_progress(progress_bar(wallets.len()));
            let reports = runner.run_operations(&wallets).await;
            report::print_operation_reports(&reports);
            let statuses: Vec<_> = reports.iter().map(|r| r.status.clone()).collect();
            report::print_summary(&BatchSummary::from_statuses(&statuses));
        }
        Command::CheckRpc => {
            let reports = runner.probe_endpoints(None).await?;
            report::print_probe_reports("RPC ENDPOINTS", &reports);
        }
        Command::CheckProxies => {
            let wallets = runner.config().load_wallets()?;
            let mut seen = Vec::new();
            for wallet in &wallets {
                let Some(proxy) = &wallet.proxy else { continue };
                if seen.contains(proxy) {
                    continue;
                }
                seen.push(proxy.clone());
                let reports = runner.probe_endpoints(Some(proxy)).await?;
                report::print_probe_reports(&format!("PROXY {}", proxy.redacted()), &reports);
            }
            if seen.is_empty() {
                warn!("No proxies configured");
            }
        }
        Command::Refill => {
            let key = env::var("FUNDER_PRIVATE_KEY")
                .map_err(|_| anyhow!("FUNDER_PRIVATE_KEY is not set"))?;
            let funder = parse_private_key(&key, 0, runner.config().chain_id)?;
            let wallets = runner.config().load_wallets()?;
            let results = runner.refill(funder, &wallets).await?;
            report::print_refills(&results);
            if results.iter().any(|r| !r.success) {
                error!("Some refills failed");
            }
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<RunnerConfig> {
    let mut config = if cli.config.exists() {
        RunnerConfig::load(&cli.config)?
    } else {
        info!("{} not found, using Monad testnet defaults", cli.config.display());
        RunnerConfig::default()
    };
    config.apply_env()?;

    if cli.dry_run {
        config.dry_run = true;
    }
    if let Some(workers) = cli.concurrency {
        config.concurrency = workers;
    }
    if let Command::Run { operations } = &cli.command {
        if !operations.is_empty() {
            config.operations = operations.clone();
        }
    }
    if config.dry_run {
        info!("Dry run: transactions are estimated, never sent");
    }
    Ok(config)
}

fn progress_bar(len: usize) -> ProgressBar {
    let bar = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} wallets") {
        bar.set_style(style);
    }
    bar
}
