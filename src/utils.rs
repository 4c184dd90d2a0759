use anyhow::Result;
use ethers::{
    types::{Address, U256},
    utils::format_ether,
};
use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;

pub const PROJECT_NAME: &str = "monad_runner";

pub fn setup_logger(level: LevelFilter) -> Result<()> {
    let colors = ColoredLevelConfig {
        trace: Color::Cyan,
        debug: Color::Magenta,
        info: Color::Green,
        warn: Color::Yellow,
        error: Color::Red,
    };

    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{}[{}] {}",
                chrono::Local::now().format("[%H:%M:%S]"),
                colors.color(record.level()),
                message
            ))
        })
        .chain(std::io::stdout())
        .level(LevelFilter::Warn)
        .level_for(PROJECT_NAME, level)
        .apply()?;

    Ok(())
}

/// `0x1234...abcd`
pub fn format_address(address: Address) -> String {
    let full = format!("{:?}", address);
    format!("{}...{}", &full[..6], &full[full.len() - 4..])
}

/// Wei rendered as native units with four decimals.
pub fn format_ether4(wei: U256) -> String {
    let text = format_ether(wei);
    match text.split_once('.') {
        Some((whole, fraction)) => {
            let mut fraction: String = fraction.chars().take(4).collect();
            while fraction.len() < 4 {
                fraction.push('0');
            }
            format!("{}.{}", whole, fraction)
        }
        None => format!("{}.0000", text),
    }
}
