//! Esplora / mempool.space response types.

use std::collections::HashMap;

use bitcoin::{Address, Amount, OutPoint, Txid};
use serde::Deserialize;
use tapmemo_core::{FeePriority, Utxo};

use crate::Error;

/// Confirmation status attached to outputs and transactions.
#[derive(Debug, Clone, Deserialize)]
pub struct TxStatus {
    pub confirmed: bool,
    #[serde(default)]
    pub block_height: Option<u32>,
}

/// One entry of `GET /address/{address}/utxo`.
#[derive(Debug, Clone, Deserialize)]
pub struct EsploraUtxo {
    pub txid: String,
    pub vout: u32,
    pub value: u64,
    pub status: TxStatus,
}

impl EsploraUtxo {
    /// Convert to a core UTXO paying to `address`.
    ///
    /// Esplora omits the script from this endpoint; it is the queried
    /// address's script by definition.
    pub fn into_utxo(self, address: &Address) -> Result<Utxo, Error> {
        let txid: Txid = self
            .txid
            .parse()
            .map_err(|e| Error::InvalidResponse(format!("txid {}: {}", self.txid, e)))?;

        Ok(Utxo {
            outpoint: OutPoint {
                txid,
                vout: self.vout,
            },
            value: Amount::from_sat(self.value),
            script_pubkey: address.script_pubkey(),
            height: if self.status.confirmed {
                self.status.block_height.unwrap_or(0)
            } else {
                0
            },
        })
    }
}

/// `GET /v1/fees/recommended` (mempool.space only), in sat/vB.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedFees {
    pub fastest_fee: f64,
    pub half_hour_fee: f64,
    pub hour_fee: f64,
    pub economy_fee: f64,
    pub minimum_fee: f64,
}

impl RecommendedFees {
    pub fn rate(&self, priority: FeePriority) -> f64 {
        match priority {
            FeePriority::Fastest => self.fastest_fee,
            FeePriority::HalfHour => self.half_hour_fee,
            FeePriority::Hour => self.hour_fee,
            FeePriority::Economy => self.economy_fee,
            FeePriority::Minimum => self.minimum_fee,
        }
    }
}

/// Pick a rate from `GET /fee-estimates` (confirmation target in blocks ->
/// sat/vB).
///
/// Uses the estimate for the largest available target not above `target`,
/// or the smallest target if all are above it.
pub fn rate_for_target(estimates: &HashMap<String, f64>, target: usize) -> Option<f64> {
    let mut parsed: Vec<(usize, f64)> = estimates
        .iter()
        .filter_map(|(k, v)| k.parse::<usize>().ok().map(|k| (k, *v)))
        .filter(|(_, v)| v.is_finite() && *v > 0.0)
        .collect();
    parsed.sort_by_key(|(k, _)| *k);

    parsed
        .iter()
        .rev()
        .find(|(k, _)| *k <= target)
        .or_else(|| parsed.first())
        .map(|(_, v)| *v)
}
