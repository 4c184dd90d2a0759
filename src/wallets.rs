use crate::errors::WalletError;
use crate::rpc::ProxyAuth;
use ethers::{
    signers::{LocalWallet, Signer},
    types::Address,
};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use std::{fs, path::Path};

/// A signer with the proxy its traffic is routed through.
#[derive(Debug, Clone)]
pub struct WalletEntry {
    pub index: usize,
    pub signer: LocalWallet,
    pub proxy: Option<ProxyAuth>,
}

impl WalletEntry {
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// 1-based position, as shown to the operator.
    pub fn label(&self) -> String {
        format!("wallet #{}", self.index + 1)
    }
}

/// Parses a 32-byte hex key with an optional `0x` prefix.
pub fn parse_private_key(raw: &str, index: usize, chain_id: u64) -> Result<LocalWallet, WalletError> {
    let trimmed = raw.trim();
    let hex_part = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if hex_part.len() != 64 {
        return Err(WalletError::InvalidKeyLength { index });
    }
    let bytes = hex::decode(hex_part).map_err(|source| WalletError::InvalidHex { index, source })?;
    let wallet = LocalWallet::from_bytes(&bytes)
        .map_err(|source| WalletError::InvalidKey { index, source })?;
    Ok(wallet.with_chain_id(chain_id))
}

/// Non-empty, non-comment lines of a list file.
pub fn read_list(path: impl AsRef<Path>) -> Result<Vec<String>, WalletError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| WalletError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Pairs every key with `proxies[i % proxies.len()]`.
pub fn pair_wallets(
    keys: &[String],
    proxies: &[String],
    chain_id: u64,
) -> Result<Vec<WalletEntry>, WalletError> {
    let proxies = proxies
        .iter()
        .map(|raw| raw.parse::<ProxyAuth>())
        .collect::<Result<Vec<_>, _>>()?;

    keys.iter()
        .enumerate()
        .map(|(index, key)| {
            let signer = parse_private_key(key, index, chain_id)?;
            let proxy = if proxies.is_empty() {
                None
            } else {
                Some(proxies[index % proxies.len()].clone())
            };
            Ok(WalletEntry {
                index,
                signer,
                proxy,
            })
        })
        .collect()
}

/// Shuffles processing order; each wallet keeps its proxy.
pub fn shuffle_wallets(wallets: &mut [WalletEntry], seed: Option<u64>) {
    match seed {
        Some(seed) => wallets.shuffle(&mut StdRng::seed_from_u64(seed)),
        None => wallets.shuffle(&mut rand::thread_rng()),
    }
}
