use crate::rpc::ProbeReport;
use crate::runner::{RefillResult, WalletReport};
use crate::status::{BatchSummary, WalletStatus};
use crate::utils::format_ether4;
use anyhow::Result;
use colored::Colorize;
use std::{io::Write, path::Path};

const RULE: &str = "+------+--------------------------------------------+--------------+--------------+--------------+--------+--------+------+--------------+";

pub fn print_status_table(statuses: &[WalletStatus]) {
    println!("\n{}", "=== WALLET STATUS ===".bold().green());
    println!("{}", RULE);
    println!(
        "| {:<4} | {:<42} | {:<12} | {:<12} | {:<12} | {:<6} | {:<6} | {:<4} | {:<12} |",
        "#", "Address", "MON", "WMON", "Total", "Nonce", "Tx", "NFT", "Status"
    );
    println!("{}", RULE);
    for (position, status) in statuses.iter().enumerate() {
        println!(
            "| {:<4} | {:<42} | {:<12} | {:<12} | {:<12} | {:<6} | {:<6} | {:<4} | {} |",
            (position + 1).to_string().yellow(),
            format!("{:?}", status.address()),
            format_ether4(status.native_balance()),
            format_ether4(status.token_balance()),
            format_ether4(status.total_balance()),
            status.nonce(),
            status.unique_tx_count(),
            status.nft_count(),
            format!("{:<12}", status.status().as_str()).color(status_color(status)),
        );
    }
    println!("{}", RULE);
}

fn status_color(status: &WalletStatus) -> colored::Color {
    use crate::status::StatusLevel;
    match status.status() {
        StatusLevel::Ok => colored::Color::Green,
        StatusLevel::Low => colored::Color::Yellow,
        StatusLevel::Insufficient | StatusLevel::Error => colored::Color::Red,
    }
}

pub fn print_summary(summary: &BatchSummary) {
    println!("\n{}", "=== SUMMARY ===".bold().green());
    println!("{} {}", "Wallets checked:".cyan(), summary.wallets);
    println!(
        "{} {}  {} {}  {} {}  {} {}",
        "OK:".cyan(),
        summary.ok.to_string().green(),
        "LOW:".cyan(),
        summary.low.to_string().yellow(),
        "INSUFFICIENT:".cyan(),
        summary.insufficient.to_string().red(),
        "ERROR:".cyan(),
        summary.errors.to_string().red()
    );
    println!("{} {} MON", "Total MON:".cyan(), format_ether4(summary.native_total));
    println!("{} {} WMON", "Total WMON:".cyan(), format_ether4(summary.token_total));
    println!(
        "{} {} MON",
        "Total (MON + WMON):".cyan(),
        format_ether4(summary.balance_total).green()
    );
    println!("{} {}", "Wallets with enough balance:".cyan(), summary.funded());
}

pub fn print_operation_reports(reports: &[WalletReport]) {
    println!("\n{}", "=== OPERATIONS ===".bold().green());
    for report in reports {
        let outcomes: Vec<String> = report
            .operations
            .iter()
            .map(|op| {
                let mark = match (op.success, op.simulated) {
                    (true, true) => "simulated".yellow(),
                    (true, false) => "ok".green(),
                    (false, _) => "failed".red(),
                };
                format!("{} {}", op.operation, mark)
            })
            .collect();
        let outcomes = if outcomes.is_empty() {
            format!("skipped ({})", report.status.status())
        } else {
            outcomes.join(", ")
        };
        println!("wallet #{:<4} {:?}  {}", report.index + 1, report.status.address(), outcomes);
    }
}

pub fn print_refills(results: &[RefillResult]) {
    println!("\n{}", "=== REFILLS ===".bold().green());
    if results.is_empty() {
        println!("{}", "No wallets needed a refill".cyan());
        return;
    }
    for result in results {
        let mark = if result.success { "ok".green() } else { "failed".red() };
        println!(
            "wallet #{:<4} {:?}  {} MON  {}",
            result.index + 1,
            result.address,
            format_ether4(result.amount),
            mark
        );
    }
}

pub fn print_probe_reports(title: &str, reports: &[ProbeReport]) {
    println!("\n{}", format!("=== {} ===", title).bold().green());
    for (position, report) in reports.iter().enumerate() {
        match report.latency {
            Some(latency) => println!(
                "{}. {} {} block {} gas {}",
                position + 1,
                report.endpoint,
                format!("{}ms", latency.as_millis()).green(),
                report.block_number.unwrap_or_default(),
                report
                    .gas_price
                    .map(|price| price.to_string())
                    .unwrap_or_else(|| "-".to_string())
            ),
            None => println!(
                "{}. {} {} {}",
                position + 1,
                report.endpoint,
                "unreachable".red(),
                report.error.as_deref().unwrap_or_default()
            ),
        }
    }
}

pub fn write_csv(path: impl AsRef<Path>, statuses: &[WalletStatus]) -> Result<()> {
    let writer = csv::Writer::from_path(path)?;
    write_rows(writer, statuses)
}

fn write_rows<W: Write>(mut writer: csv::Writer<W>, statuses: &[WalletStatus]) -> Result<()> {
    writer.write_record([
        "address",
        "native_balance",
        "token_balance",
        "total_balance",
        "nonce",
        "unique_tx_count",
        "nft_count",
        "status",
    ])?;
    for status in statuses {
        writer.serialize(csv_row(status))?;
    }
    writer.flush()?;
    Ok(())
}

fn csv_row(status: &WalletStatus) -> (String, String, String, String, u64, u64, u64, &'static str) {
    (
        format!("{:?}", status.address()),
        format_ether4(status.native_balance()),
        format_ether4(status.token_balance()),
        format_ether4(status.total_balance()),
        status.nonce(),
        status.unique_tx_count(),
        status.nft_count(),
        status.status().as_str(),
    )
}
