use anyhow::Result;
use monad_runner::{
    errors::PacingError,
    pacing::{delay, pause_or_cancel, DelayRange},
};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[test_log::test(tokio::test(start_paused = true))]
async fn test_delay_waits_within_bounds() -> Result<()> {
    for (min, max) in [(0, 0), (1, 1), (60, 600), (2, 5)] {
        let started = Instant::now();
        let chosen = delay(min, max).await?;
        let elapsed = started.elapsed();
        assert!(chosen >= Duration::from_secs(min) && chosen <= Duration::from_secs(max));
        assert!(elapsed >= Duration::from_secs(min), "{elapsed:?} < {min}s");
        assert!(elapsed <= Duration::from_secs(max) + Duration::from_millis(5), "{elapsed:?} > {max}s");
    }
    Ok(())
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_inverted_range_fails_without_waiting() -> Result<()> {
    let started = Instant::now();
    let err = delay(10, 1).await.unwrap_err();
    assert!(matches!(err, PacingError::InvalidRange { .. }));
    assert_eq!(started.elapsed(), Duration::ZERO);
    Ok(())
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_pause_ends_early_on_cancel() -> Result<()> {
    let token = CancellationToken::new();
    let range = DelayRange::new(100, 100)?;
    let started = Instant::now();

    let canceller = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            token.cancel();
        })
    };

    let result = pause_or_cancel(&range, &token).await;
    canceller.await?;
    assert_eq!(result, Err(PacingError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(100));
    Ok(())
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_pause_completes_without_cancel() -> Result<()> {
    let token = CancellationToken::new();
    let range = DelayRange::new(1, 2)?;
    let chosen = pause_or_cancel(&range, &token).await?;
    assert!(chosen >= Duration::from_secs(1) && chosen <= Duration::from_secs(2));
    Ok(())
}
