//! Spending key loading.
//!
//! The key comes from an environment variable as WIF, is held in a
//! zeroizing buffer while parsed, and is never logged.

use anyhow::{Context, Result};
use bitcoin::{Network, NetworkKind, PrivateKey};
use tapmemo_core::KeyMaterial;
use zeroize::Zeroizing;

use crate::config::TapmemoConfig;

/// Parse a WIF key and check it was encoded for `network`.
pub fn keys_from_wif(wif: &str, network: Network) -> Result<KeyMaterial> {
    let key = PrivateKey::from_wif(wif.trim()).map_err(|e| anyhow::anyhow!("invalid WIF key: {}", e))?;

    anyhow::ensure!(
        key.network == NetworkKind::from(network),
        "WIF key is for {:?} but the configured network is {}",
        key.network,
        network
    );

    Ok(KeyMaterial::from_secret_key(key.inner))
}

/// Load the key named by `wallet.wif_env`.
pub fn load_keys(config: &TapmemoConfig) -> Result<KeyMaterial> {
    let var = &config.wallet.wif_env;
    let wif = Zeroizing::new(
        std::env::var(var).with_context(|| format!("{} is not set", var))?,
    );
    keys_from_wif(&wif, config.network()?).with_context(|| format!("Failed to load key from {}", var))
}
