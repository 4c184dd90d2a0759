//! Randomized pacing between wallet actions and randomized transaction amounts.

use crate::errors::PacingError;
use colored::Colorize;
use ethers::{types::U256, utils::parse_ether};
use log::info;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Inclusive bounds, in whole seconds, for a random pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRange {
    min_seconds: u64,
    max_seconds: u64,
}

impl DelayRange {
    /// Pause between wallet actions.
    pub const ACTIONS: DelayRange = DelayRange {
        min_seconds: 60,
        max_seconds: 600,
    };
    /// Pause between funding transfers.
    pub const TRANSFERS: DelayRange = DelayRange {
        min_seconds: 1,
        max_seconds: 3,
    };

    pub fn new(min_seconds: u64, max_seconds: u64) -> Result<Self, PacingError> {
        if min_seconds > max_seconds {
            return Err(PacingError::InvalidRange {
                min: min_seconds.to_string(),
                max: max_seconds.to_string(),
            });
        }
        Ok(Self {
            min_seconds,
            max_seconds,
        })
    }

    pub fn min_seconds(&self) -> u64 {
        self.min_seconds
    }

    pub fn max_seconds(&self) -> u64 {
        self.max_seconds
    }

    /// Uniform pick in `[min, max]` at millisecond resolution.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let min_ms = self.min_seconds.saturating_mul(1000);
        let max_ms = self.max_seconds.saturating_mul(1000);
        Duration::from_millis(rng.gen_range(min_ms..=max_ms))
    }
}

/// Waits a random duration in `[min_seconds, max_seconds]`.
///
/// An inverted range is rejected before anything is awaited.
pub async fn delay(min_seconds: u64, max_seconds: u64) -> Result<Duration, PacingError> {
    let range = DelayRange::new(min_seconds, max_seconds)?;
    Ok(pause(&range).await)
}

pub async fn pause(range: &DelayRange) -> Duration {
    let chosen = range.sample(&mut rand::thread_rng());
    announce(chosen);
    sleep(chosen).await;
    info!("{}", "Delay completed".green());
    chosen
}

/// [`pause`] that ends early with [`PacingError::Cancelled`] when the token fires.
pub async fn pause_or_cancel(
    range: &DelayRange,
    token: &CancellationToken,
) -> Result<Duration, PacingError> {
    let chosen = range.sample(&mut rand::thread_rng());
    announce(chosen);
    tokio::select! {
        _ = token.cancelled() => Err(PacingError::Cancelled),
        _ = sleep(chosen) => {
            info!("{}", "Delay completed".green());
            Ok(chosen)
        }
    }
}

fn announce(chosen: Duration) {
    info!(
        "{}",
        format!("Waiting for {:.1} seconds...", chosen.as_secs_f64()).yellow()
    );
}

/// Bounds, in whole native tokens, for a random transaction amount.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AmountRange {
    min: f64,
    max: f64,
}

impl Default for AmountRange {
    fn default() -> Self {
        Self {
            min: 0.01,
            max: 0.05,
        }
    }
}

/// 0.0001 of the native unit.
const AMOUNT_STEP_WEI: u128 = 100_000_000_000_000;

impl AmountRange {
    pub fn new(min: f64, max: f64) -> Result<Self, PacingError> {
        if !min.is_finite() || !max.is_finite() || min <= 0.0 || max <= 0.0 {
            return Err(PacingError::InvalidAmount);
        }
        if min > max {
            return Err(PacingError::InvalidRange {
                min: min.to_string(),
                max: max.to_string(),
            });
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    /// Uniform amount in wei within the bounds, rounded down to four decimals
    /// of the native unit unless that would drop it below `min`.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<U256, PacingError> {
        let min = to_wei(self.min)?;
        let max = to_wei(self.max)?;
        let picked = if min == max { min } else { rng.gen_range(min..=max) };
        let rounded = picked - picked % AMOUNT_STEP_WEI;
        Ok(U256::from(if rounded >= min { rounded } else { picked }))
    }

    pub fn random_amount(&self) -> Result<U256, PacingError> {
        self.sample(&mut rand::thread_rng())
    }
}

fn to_wei(value: f64) -> Result<u128, PacingError> {
    let wei = parse_ether(format!("{:.18}", value)).map_err(|e| PacingError::Conversion(e.to_string()))?;
    if wei > U256::from(u128::MAX) {
        return Err(PacingError::Conversion(format!("{} is out of range", value)));
    }
    Ok(wei.as_u128())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_inverted_delay_range_is_rejected() {
        assert!(matches!(
            DelayRange::new(10, 5),
            Err(PacingError::InvalidRange { .. })
        ));
        assert!(DelayRange::new(5, 5).is_ok());
    }

    #[test]
    fn test_delay_sample_stays_in_bounds() {
        let range = DelayRange::new(60, 600).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let chosen = range.sample(&mut rng);
            assert!(chosen >= Duration::from_secs(60));
            assert!(chosen <= Duration::from_secs(600));
        }
    }

    #[test]
    fn test_amount_sample_stays_in_bounds() {
        let range = AmountRange::new(0.01, 0.05).unwrap();
        let low = parse_ether("0.01").unwrap();
        let high = parse_ether("0.05").unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..500 {
            let amount = range.sample(&mut rng).unwrap();
            assert!(amount >= low && amount <= high, "{amount}");
        }
    }

    #[test]
    fn test_amount_sample_is_four_decimals() {
        let range = AmountRange::default();
        let step = U256::from(AMOUNT_STEP_WEI);
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..200 {
            let amount = range.sample(&mut rng).unwrap();
            assert!((amount % step).is_zero(), "{amount}");
        }
    }

    #[test]
    fn test_tiny_amounts_are_never_zero() {
        let range = AmountRange::new(0.00001, 0.00004).unwrap();
        let low = parse_ether("0.00001").unwrap();
        let high = parse_ether("0.00004").unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..500 {
            let amount = range.sample(&mut rng).unwrap();
            assert!(!amount.is_zero());
            assert!(amount >= low && amount <= high, "{amount}");
        }
    }

    #[test]
    fn test_amount_range_validation() {
        assert!(matches!(
            AmountRange::new(0.05, 0.01),
            Err(PacingError::InvalidRange { .. })
        ));
        assert_eq!(AmountRange::new(-1.0, 1.0), Err(PacingError::InvalidAmount));
        assert_eq!(AmountRange::new(0.0, 0.0), Err(PacingError::InvalidAmount));
        assert_eq!(AmountRange::new(0.01, f64::NAN), Err(PacingError::InvalidAmount));
    }

    #[test]
    fn test_fixed_amount() {
        let range = AmountRange::new(0.02, 0.02).unwrap();
        assert_eq!(range.random_amount().unwrap(), parse_ether("0.02").unwrap());
    }
}
