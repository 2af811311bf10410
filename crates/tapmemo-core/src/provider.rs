//! Interfaces to the outside world.
//!
//! The core never talks to the network itself. Adapters (Electrum, Esplora)
//! implement these traits; tests use in-memory fakes.

use bitcoin::{Address, Transaction, Txid};
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::utxo::Utxo;

/// How quickly the caller wants the transaction confirmed.
///
/// Mirrors the tiers of mempool.space's `/v1/fees/recommended`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeePriority {
    /// Next block
    Fastest,
    /// ~3 blocks
    HalfHour,
    /// ~6 blocks
    Hour,
    /// ~1 day
    #[default]
    Economy,
    /// Relay minimum
    Minimum,
}

impl FeePriority {
    /// Confirmation target in blocks, for backends that estimate by target.
    pub fn target_blocks(self) -> usize {
        match self {
            FeePriority::Fastest => 1,
            FeePriority::HalfHour => 3,
            FeePriority::Hour => 6,
            FeePriority::Economy => 144,
            FeePriority::Minimum => 1008,
        }
    }
}

impl std::str::FromStr for FeePriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "fastest" => Ok(FeePriority::Fastest),
            "half_hour" | "halfhour" => Ok(FeePriority::HalfHour),
            "hour" => Ok(FeePriority::Hour),
            "economy" => Ok(FeePriority::Economy),
            "minimum" => Ok(FeePriority::Minimum),
            other => Err(format!("unknown fee priority: {}", other)),
        }
    }
}

/// Source of unspent outputs for an address.
pub trait UtxoProvider {
    /// All unspent outputs paying to `address`. An address with no outputs
    /// yields an empty vector, not an error.
    fn get_unspent_outputs(&self, address: &Address) -> Result<Vec<Utxo>, ProviderError>;
}

/// Source of current fee rates.
pub trait FeeRateSource {
    /// Fee rate in sat/vB for `priority`.
    fn get_fee_rate(&self, priority: FeePriority) -> Result<f64, ProviderError>;
}

/// Relays signed transactions to the network.
pub trait Broadcaster {
    /// Submit raw transaction bytes. Returns the txid the backend reports.
    fn submit(&self, raw_tx: &[u8]) -> Result<Txid, ProviderError>;
}

/// Looks up confirmed or mempool transactions by id.
pub trait TransactionSource {
    fn get_transaction(&self, txid: &Txid) -> Result<Transaction, ProviderError>;
}
