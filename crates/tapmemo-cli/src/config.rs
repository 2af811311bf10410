//! CLI configuration, parsed from TOML file + environment variable overrides.
//!
//! Priority: environment variables > config file > defaults.
//!
//! The spending key is never part of this file. `wallet.wif_env` names the
//! environment variable it is read from. Every table refuses unknown keys,
//! so a key pasted anywhere in the file is an error rather than ignored.

use anyhow::{Context, Result};
use bitcoin::Network;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use tapmemo_core::{FeeEstimator, FeePriority, PlanPolicy, SendOptions, TAPROOT_DUST_LIMIT};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TapmemoConfig {
    /// Network and backend settings
    #[serde(default)]
    pub bitcoin: BitcoinSection,

    /// Fee selection
    #[serde(default)]
    pub fees: FeesSection,

    #[serde(default)]
    pub logging: LoggingSection,

    /// Where to find the spending key
    #[serde(default)]
    pub wallet: WalletSection,
}

/// Which chain backend to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Esplora,
    Electrum,
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "esplora" | "mempool" => Ok(Backend::Esplora),
            "electrum" => Ok(Backend::Electrum),
            other => anyhow::bail!("unknown backend: {}", other),
        }
    }
}

/// A network as far as server selection is concerned. testnet3 and testnet4
/// share address encoding (`Network::Testnet`) but are different chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chain {
    Bitcoin,
    Testnet3,
    Testnet4,
    Signet,
    Regtest,
}

impl FromStr for Chain {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bitcoin" | "mainnet" => Ok(Chain::Bitcoin),
            "testnet" | "testnet4" => Ok(Chain::Testnet4),
            "testnet3" => Ok(Chain::Testnet3),
            "signet" => Ok(Chain::Signet),
            "regtest" => Ok(Chain::Regtest),
            other => anyhow::bail!("unknown network: {}", other),
        }
    }
}

impl Chain {
    pub fn network(self) -> Network {
        match self {
            Chain::Bitcoin => Network::Bitcoin,
            Chain::Testnet3 | Chain::Testnet4 => Network::Testnet,
            Chain::Signet => Network::Signet,
            Chain::Regtest => Network::Regtest,
        }
    }

    fn default_esplora_url(self) -> &'static str {
        match self {
            Chain::Testnet3 => tapmemo_esplora::TESTNET3_URL,
            other => tapmemo_esplora::default_url(other.network()),
        }
    }

    fn default_electrum_url(self) -> &'static str {
        match self {
            Chain::Testnet3 => tapmemo_electrum::TESTNET3_SERVER,
            other => tapmemo_electrum::default_server(other.network()),
        }
    }
}

/// Bitcoin network settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BitcoinSection {
    /// Bitcoin network: "bitcoin", "testnet4" (alias "testnet"), "testnet3",
    /// "signet", "regtest"
    #[serde(default = "default_network")]
    pub network: String,

    #[serde(default)]
    pub backend: Backend,

    /// Esplora API base URL (default: mempool.space for the network)
    #[serde(default)]
    pub esplora_url: Option<String>,

    /// Electrum server URL (default: Blockstream for the network)
    #[serde(default)]
    pub electrum_url: Option<String>,

    /// Network timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for BitcoinSection {
    fn default() -> Self {
        Self {
            network: default_network(),
            backend: Backend::default(),
            esplora_url: None,
            electrum_url: None,
            timeout_secs: default_timeout(),
        }
    }
}

/// Fee settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeesSection {
    #[serde(default)]
    pub priority: FeePriority,

    /// Highest fee rate (sat/vB) the backend may quote before we refuse
    #[serde(default = "default_max_fee_rate")]
    pub max_fee_rate: f64,

    /// Change below this is added to the fee instead
    #[serde(default = "default_change_dust")]
    pub change_dust_sats: u64,

    /// Charge this size instead of computing it
    #[serde(default)]
    pub fixed_vbytes: Option<u64>,
}

impl Default for FeesSection {
    fn default() -> Self {
        Self {
            priority: FeePriority::default(),
            max_fee_rate: default_max_fee_rate(),
            change_dust_sats: default_change_dust(),
            fixed_vbytes: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Key location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WalletSection {
    /// Environment variable holding the WIF-encoded key
    #[serde(default = "default_wif_env")]
    pub wif_env: String,
}

impl Default for WalletSection {
    fn default() -> Self {
        Self {
            wif_env: default_wif_env(),
        }
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_network() -> String {
    "testnet".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_max_fee_rate() -> f64 {
    tapmemo_core::DEFAULT_MAX_FEE_RATE
}

fn default_change_dust() -> u64 {
    TAPROOT_DUST_LIMIT.to_sat()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_wif_env() -> String {
    "TAPMEMO_WIF".to_string()
}

// ============================================================================
// Loading & environment override
// ============================================================================

impl TapmemoConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: TapmemoConfig =
            toml::from_str(&contents).with_context(|| "Failed to parse TOML config")?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Supported env vars:
    /// - `TAPMEMO_NETWORK`
    /// - `TAPMEMO_BACKEND`
    /// - `TAPMEMO_ESPLORA_URL`
    /// - `TAPMEMO_ELECTRUM_URL`
    /// - `TAPMEMO_FEE_PRIORITY`
    /// - `TAPMEMO_LOG_LEVEL`
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var("TAPMEMO_NETWORK") {
            self.bitcoin.network = v;
        }
        if let Ok(v) = std::env::var("TAPMEMO_BACKEND") {
            self.bitcoin.backend = v.parse().context("TAPMEMO_BACKEND")?;
        }
        if let Ok(v) = std::env::var("TAPMEMO_ESPLORA_URL") {
            self.bitcoin.esplora_url = Some(v);
        }
        if let Ok(v) = std::env::var("TAPMEMO_ELECTRUM_URL") {
            self.bitcoin.electrum_url = Some(v);
        }
        if let Ok(v) = std::env::var("TAPMEMO_FEE_PRIORITY") {
            self.fees.priority = v
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .context("TAPMEMO_FEE_PRIORITY")?;
        }
        if let Ok(v) = std::env::var("TAPMEMO_LOG_LEVEL") {
            self.logging.level = v;
        }
        Ok(())
    }

    pub fn chain(&self) -> Result<Chain> {
        self.bitcoin.network.parse()
    }

    /// Parse the bitcoin network string to a `bitcoin::Network`.
    pub fn network(&self) -> Result<Network> {
        Ok(self.chain()?.network())
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.bitcoin.timeout_secs)
    }

    /// Esplora base URL: configured, or the public default for the chain.
    pub fn esplora_url(&self) -> Result<String> {
        Ok(match &self.bitcoin.esplora_url {
            Some(url) => url.clone(),
            None => self.chain()?.default_esplora_url().to_string(),
        })
    }

    pub fn electrum_url(&self) -> Result<String> {
        Ok(match &self.bitcoin.electrum_url {
            Some(url) => url.clone(),
            None => self.chain()?.default_electrum_url().to_string(),
        })
    }

    /// Fee and change settings for the send pipeline.
    pub fn send_options(&self) -> SendOptions {
        let mut estimator = FeeEstimator::new(self.fees.max_fee_rate);
        if let Some(vbytes) = self.fees.fixed_vbytes {
            estimator = estimator.with_fixed_vbytes(vbytes);
        }
        SendOptions {
            estimator,
            policy: PlanPolicy {
                change_dust_limit: bitcoin::Amount::from_sat(self.fees.change_dust_sats),
            },
            priority: self.fees.priority,
        }
    }

    /// Validate that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        self.network()?;

        anyhow::ensure!(
            self.bitcoin.timeout_secs > 0,
            "bitcoin.timeout_secs must be > 0"
        );

        if let Some(ref url) = self.bitcoin.esplora_url {
            anyhow::ensure!(
                url.starts_with("http://") || url.starts_with("https://"),
                "bitcoin.esplora_url must be an http(s) URL"
            );
        }
        if let Some(ref url) = self.bitcoin.electrum_url {
            anyhow::ensure!(!url.is_empty(), "bitcoin.electrum_url must not be empty");
        }

        anyhow::ensure!(
            self.fees.max_fee_rate.is_finite() && self.fees.max_fee_rate > 0.0,
            "fees.max_fee_rate must be a positive number"
        );

        // Change below the P2TR dust limit would not relay
        anyhow::ensure!(
            self.fees.change_dust_sats >= TAPROOT_DUST_LIMIT.to_sat(),
            "fees.change_dust_sats must be >= {}",
            TAPROOT_DUST_LIMIT.to_sat()
        );

        if let Some(vbytes) = self.fees.fixed_vbytes {
            anyhow::ensure!(vbytes > 0, "fees.fixed_vbytes must be > 0");
        }

        log::LevelFilter::from_str(&self.logging.level)
            .map_err(|_| anyhow::anyhow!("logging.level is not a log level: {}", self.logging.level))?;

        anyhow::ensure!(
            !self.wallet.wif_env.is_empty(),
            "wallet.wif_env must not be empty"
        );

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
