mod common;

use anyhow::Result;
use common::{endpoint, ether, pool, Behaviour, FakeConnector};
use ethers::types::{Address, U256};
use monad_runner::{
    rpc::{ProxyAuth, RetryExecutor, RetryPolicy},
    status::{NftContract, StatusAggregator, StatusLevel, Thresholds, WalletStatus},
};
use std::{collections::HashMap, sync::atomic::Ordering, time::Duration};

const WMON: Address = Address::repeat_byte(0x76);

fn owner() -> Address {
    Address::repeat_byte(0x42)
}

fn aggregator() -> StatusAggregator {
    let executor = RetryExecutor::new(RetryPolicy::new(2, Duration::from_millis(500)).unwrap());
    StatusAggregator::new(executor, Thresholds::from_ether("0.01", "1.0").unwrap()).with_token(WMON)
}

async fn check_single(behaviour: Behaviour) -> WalletStatus {
    let rpc = endpoint("https://rpc.example/");
    let (mut pool, _) = pool(vec![rpc.clone()], FakeConnector::new().with(&rpc, behaviour));
    aggregator().check_status(owner(), &mut pool).await
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_status_scenarios() -> Result<()> {
    for (native, expected) in [
        ("0.005", StatusLevel::Insufficient),
        ("0.5", StatusLevel::Low),
        ("2.0", StatusLevel::Ok),
    ] {
        let status = check_single(Behaviour::default().with_native(ether(native))).await;
        assert_eq!(status.status(), expected, "native {}", native);
        assert_eq!(status.native_balance(), ether(native));
        assert_eq!(status.token_balance(), U256::zero());
        assert_eq!(status.address(), owner());
    }
    Ok(())
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_token_balance_counts_toward_total() -> Result<()> {
    let status = check_single(Behaviour {
        native: ether("0.6"),
        token: Some(ether("0.5")),
        ..Behaviour::default()
    })
    .await;
    assert_eq!(status.total_balance(), ether("1.1"));
    assert_eq!(
        status.total_balance(),
        status.native_balance() + status.token_balance()
    );
    assert_eq!(status.status(), StatusLevel::Ok);
    Ok(())
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_all_endpoints_down_yields_error_record() -> Result<()> {
    let endpoints = vec![endpoint("https://a.example/"), endpoint("https://b.example/")];
    let (mut pool, _) = pool(endpoints, FakeConnector::new());

    let status = aggregator().check_status(owner(), &mut pool).await;
    assert_eq!(status, WalletStatus::error(owner()));
    assert_eq!(status.status(), StatusLevel::Error);
    assert_eq!(status.native_balance(), U256::zero());
    assert_eq!(status.token_balance(), U256::zero());
    assert_eq!(status.total_balance(), U256::zero());
    assert_eq!(status.nonce(), 0);
    assert_eq!(status.unique_tx_count(), 0);
    assert_eq!(status.nft_count(), 0);
    Ok(())
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_dead_primary_fails_over_to_backup() -> Result<()> {
    let primary = endpoint("https://a.example/");
    let backup = endpoint("https://b.example/");
    let connector = FakeConnector::new()
        .with(&primary, Behaviour::dead())
        .with(&backup, Behaviour::default().with_native(ether("3")));
    let (mut pool, _) = pool(vec![primary, backup.clone()], connector);

    let status = aggregator().check_status(owner(), &mut pool).await;
    assert_eq!(status.status(), StatusLevel::Ok);
    assert_eq!(pool.current(), &backup);
    Ok(())
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_token_falls_back_to_direct_connection() -> Result<()> {
    let proxy: ProxyAuth = "user:pass@10.0.0.9:8080".parse()?;
    let proxied = endpoint("https://rpc.example/").with_proxy(Some(proxy));
    let direct = proxied.without_proxy();
    let connector = FakeConnector::new()
        .with(
            &proxied,
            Behaviour {
                native: ether("0.7"),
                token: None,
                ..Behaviour::default()
            },
        )
        .with(
            &direct,
            Behaviour {
                token: Some(ether("0.4")),
                ..Behaviour::default()
            },
        );
    let (mut pool, calls) = pool(vec![proxied.clone()], connector);

    let status = aggregator().check_status(owner(), &mut pool).await;
    assert_eq!(status.token_balance(), ether("0.4"));
    assert_eq!(status.total_balance(), ether("1.1"));
    assert_eq!(status.status(), StatusLevel::Ok);
    // two attempts on the proxy, one on the direct connection
    assert_eq!(calls.token.load(Ordering::SeqCst), 3);
    assert_eq!(pool.current(), &proxied);
    Ok(())
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_token_failure_everywhere_counts_zero() -> Result<()> {
    let status = check_single(Behaviour {
        native: ether("2"),
        token: None,
        ..Behaviour::default()
    })
    .await;
    assert_eq!(status.token_balance(), U256::zero());
    assert_eq!(status.status(), StatusLevel::Ok);
    Ok(())
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_unique_tx_count_is_max_of_logs_and_nonce() -> Result<()> {
    let more_logs = check_single(Behaviour {
        nonce: Some(3),
        log_hashes: Some(8),
        ..Behaviour::default()
    })
    .await;
    assert_eq!(more_logs.nonce(), 3);
    assert_eq!(more_logs.unique_tx_count(), 8);

    let more_nonce = check_single(Behaviour {
        nonce: Some(12),
        log_hashes: Some(5),
        ..Behaviour::default()
    })
    .await;
    assert_eq!(more_nonce.unique_tx_count(), 12);

    let no_logs = check_single(Behaviour {
        nonce: Some(4),
        log_hashes: None,
        ..Behaviour::default()
    })
    .await;
    assert_eq!(no_logs.unique_tx_count(), 4);
    Ok(())
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_nonce_failure_counts_zero() -> Result<()> {
    let status = check_single(Behaviour {
        native: ether("1.5"),
        nonce: None,
        log_hashes: Some(2),
        ..Behaviour::default()
    })
    .await;
    assert_eq!(status.nonce(), 0);
    assert_eq!(status.unique_tx_count(), 2);
    assert_eq!(status.status(), StatusLevel::Ok);
    Ok(())
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_nft_failures_are_isolated() -> Result<()> {
    let good = Address::repeat_byte(1);
    let broken = Address::repeat_byte(2);
    let other = Address::repeat_byte(3);
    let mut nfts = HashMap::new();
    nfts.insert(good, Some(U256::from(2)));
    nfts.insert(broken, None);
    nfts.insert(other, Some(U256::from(1)));

    let rpc = endpoint("https://rpc.example/");
    let connector = FakeConnector::new().with(
        &rpc,
        Behaviour {
            nfts,
            ..Behaviour::default()
        },
    );
    let (mut pool, _) = pool(vec![rpc], connector);

    let contracts = [good, broken, other]
        .iter()
        .enumerate()
        .map(|(i, address)| NftContract {
            address: *address,
            name: format!("Collection {}", i + 1),
        })
        .collect();
    let status = aggregator()
        .with_nft_contracts(contracts)
        .check_status(owner(), &mut pool)
        .await;
    assert_eq!(status.nft_count(), 3);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_status_is_monotonic_in_balance() -> Result<()> {
    let thresholds = Thresholds::default();
    let mut previous = StatusLevel::Ok;
    // walk the balance down from 3 MON to 0 in 0.001 steps
    for step in (0..=3000u64).rev() {
        let native = U256::from(step) * U256::exp10(15);
        let status = WalletStatus::new(owner(), native, U256::zero(), 0, 0, 0, &thresholds);
        assert!(status.status() >= previous, "{} wei", native);
        previous = status.status();
    }
    assert_eq!(previous, StatusLevel::Insufficient);
    Ok(())
}
