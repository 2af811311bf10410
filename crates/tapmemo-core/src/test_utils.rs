//! Shared test utilities for tapmemo-core tests.
//!
//! Deterministic keys, hand-made UTXOs, and an in-memory chain that stands in
//! for the Electrum and Esplora backends.

use std::cell::RefCell;
use std::collections::HashMap;

use bitcoin::hashes::Hash;
use bitcoin::{consensus, Address, Amount, Network, OutPoint, Transaction, Txid};

use crate::error::{ProviderError, RejectReason};
use crate::keys::KeyMaterial;
use crate::provider::{Broadcaster, FeePriority, FeeRateSource, TransactionSource, UtxoProvider};
use crate::utxo::Utxo;

/// Deterministic secret from a seed byte.
///
/// The secret key is `[0x01, 0x00, ..., 0x00, seed]` (32 bytes).
pub fn test_secret(seed_byte: u8) -> [u8; 32] {
    let mut secret_bytes = [0u8; 32];
    secret_bytes[31] = seed_byte;
    secret_bytes[0] = 0x01;
    secret_bytes
}

pub fn test_keys(seed_byte: u8) -> KeyMaterial {
    KeyMaterial::derive(&test_secret(seed_byte)).unwrap()
}

/// A testnet P2TR address no test wallet owns.
pub fn recipient_address() -> Address {
    test_keys(0xEE).output_address(Network::Testnet)
}

/// An unconfirmed UTXO paying `value` sats to `address`.
pub fn make_utxo(address: &Address, txid_byte: u8, vout: u32, value: u64) -> Utxo {
    Utxo {
        outpoint: OutPoint {
            txid: Txid::from_byte_array([txid_byte; 32]),
            vout,
        },
        value: Amount::from_sat(value),
        script_pubkey: address.script_pubkey(),
        height: 0,
    }
}

/// In-memory chain backend.
pub struct MockChain {
    pub utxos: Vec<Utxo>,
    pub fee_rate: f64,
    pub offline: bool,
    pub reject: Option<RejectReason>,
    /// Txid the fake node claims on submit, instead of the real one.
    pub reported_txid: Option<Txid>,
    pub broadcasts: RefCell<Vec<Vec<u8>>>,
    pub transactions: RefCell<HashMap<Txid, Transaction>>,
}

impl Default for MockChain {
    fn default() -> Self {
        Self {
            utxos: Vec::new(),
            fee_rate: 1.0,
            offline: false,
            reject: None,
            reported_txid: None,
            broadcasts: RefCell::new(Vec::new()),
            transactions: RefCell::new(HashMap::new()),
        }
    }
}

impl MockChain {
    pub fn with_utxos(mut self, utxos: Vec<Utxo>) -> Self {
        self.utxos = utxos;
        self
    }

    pub fn offline(mut self) -> Self {
        self.offline = true;
        self
    }

    pub fn fee_rate(mut self, rate: f64) -> Self {
        self.fee_rate = rate;
        self
    }

    pub fn rejecting(mut self, reason: RejectReason) -> Self {
        self.reject = Some(reason);
        self
    }

    pub fn insert_transaction(&self, tx: Transaction) {
        self.transactions.borrow_mut().insert(tx.compute_txid(), tx);
    }

    fn check_online(&self) -> Result<(), ProviderError> {
        if self.offline {
            Err(ProviderError::Unavailable("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

impl UtxoProvider for MockChain {
    fn get_unspent_outputs(&self, address: &Address) -> Result<Vec<Utxo>, ProviderError> {
        self.check_online()?;
        let spk = address.script_pubkey();
        Ok(self
            .utxos
            .iter()
            .filter(|u| u.script_pubkey == spk)
            .cloned()
            .collect())
    }
}

impl FeeRateSource for MockChain {
    fn get_fee_rate(&self, _priority: FeePriority) -> Result<f64, ProviderError> {
        self.check_online()?;
        Ok(self.fee_rate)
    }
}

impl Broadcaster for MockChain {
    fn submit(&self, raw_tx: &[u8]) -> Result<Txid, ProviderError> {
        self.check_online()?;
        if let Some(reason) = &self.reject {
            return Err(ProviderError::Rejected(reason.clone()));
        }
        let tx: Transaction = consensus::deserialize(raw_tx)
            .map_err(|_| ProviderError::Rejected(RejectReason::Malformed))?;
        let txid = tx.compute_txid();
        self.broadcasts.borrow_mut().push(raw_tx.to_vec());
        self.insert_transaction(tx);
        Ok(self.reported_txid.unwrap_or(txid))
    }
}

impl TransactionSource for MockChain {
    fn get_transaction(&self, txid: &Txid) -> Result<Transaction, ProviderError> {
        self.check_online()?;
        self.transactions
            .borrow()
            .get(txid)
            .cloned()
            .ok_or_else(|| ProviderError::Unavailable(format!("transaction {} not found", txid)))
    }
}
