//! Spendable outputs for one address.

use std::collections::HashSet;

use bitcoin::{Address, Amount, OutPoint, ScriptBuf, TxOut};

use crate::error::TxError;
use crate::provider::UtxoProvider;

/// A UTXO (unspent transaction output) owned by the source address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    /// The outpoint (txid:vout)
    pub outpoint: OutPoint,
    /// Value in satoshis
    pub value: Amount,
    /// The script pubkey being spent
    pub script_pubkey: ScriptBuf,
    /// Block height where this was confirmed (0 if unconfirmed)
    pub height: u32,
}

impl Utxo {
    /// The spent output, as committed to by a Taproot sighash.
    pub fn txout(&self) -> TxOut {
        TxOut {
            value: self.value,
            script_pubkey: self.script_pubkey.clone(),
        }
    }
}

/// The UTXOs known for one address, in provider order.
///
/// An empty set is valid; spending from it fails later with
/// [`TxError::NoUtxos`].
#[derive(Debug, Clone)]
pub struct UtxoSet {
    address: Address,
    utxos: Vec<Utxo>,
}

impl UtxoSet {
    /// Build a set from already-fetched outputs.
    ///
    /// Rejects outputs whose script is not the address's script, and
    /// duplicated outpoints, as [`TxError::CorruptData`].
    pub fn new(address: Address, utxos: Vec<Utxo>) -> Result<Self, TxError> {
        let expected = address.script_pubkey();
        let mut seen = HashSet::with_capacity(utxos.len());

        for (i, utxo) in utxos.iter().enumerate() {
            if utxo.script_pubkey != expected {
                return Err(TxError::CorruptData(format!(
                    "utxo {} ({}) does not pay to {}",
                    i, utxo.outpoint, address
                )));
            }
            if !seen.insert(utxo.outpoint) {
                return Err(TxError::CorruptData(format!(
                    "utxo {} repeats outpoint {}",
                    i, utxo.outpoint
                )));
            }
        }

        Ok(Self { address, utxos })
    }

    /// Query `provider` for the outputs of `address`.
    ///
    /// Either the whole set is returned or an error; a failed fetch never
    /// yields a partial set.
    pub fn fetch<P: UtxoProvider + ?Sized>(provider: &P, address: &Address) -> Result<Self, TxError> {
        let utxos = provider.get_unspent_outputs(address)?;
        log::debug!("Fetched {} UTXO(s) for {}", utxos.len(), address);
        Self::new(address.clone(), utxos)
    }

    /// The address these outputs pay to.
    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn utxos(&self) -> &[Utxo] {
        &self.utxos
    }

    pub fn len(&self) -> usize {
        self.utxos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Utxo> {
        self.utxos.iter()
    }

    /// Sum of all output values.
    ///
    /// Fails with [`TxError::CorruptData`] if the sum overflows or exceeds the
    /// 21M BTC supply cap, which no honest provider can report.
    pub fn total_value(&self) -> Result<Amount, TxError> {
        let mut total = Amount::ZERO;
        for utxo in &self.utxos {
            total = total
                .checked_add(utxo.value)
                .filter(|t| *t <= Amount::MAX_MONEY)
                .ok_or_else(|| {
                    TxError::CorruptData(format!(
                        "total value exceeds supply cap at {}",
                        utxo.outpoint
                    ))
                })?;
        }
        Ok(total)
    }
}
