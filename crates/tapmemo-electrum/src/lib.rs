//! TapMemo Electrum Backend
//!
//! Implements the core provider traits over the Electrum protocol:
//! - UTXO discovery (`blockchain.scripthash.listunspent`)
//! - Fee estimation (`blockchain.estimatefee`, falling back to `blockchain.relayfee`)
//! - Transaction lookup and broadcast
//!
//! # Security
//!
//! - Always use SSL/TLS connections (ssl:// or tcp+tls://)
//! - Validate all data received from server
//! - Never send private keys over the wire
//!
//! # Example
//!
//! ```ignore
//! use tapmemo_electrum::ElectrumClient;
//! use tapmemo_core::{FeePriority, FeeRateSource};
//! use bitcoin::Network;
//!
//! let client = ElectrumClient::new("ssl://electrum.blockstream.info:60002", Network::Bitcoin)?;
//! let rate = client.get_fee_rate(FeePriority::Hour)?;
//! println!("Fee rate: {} sat/vB", rate);
//! ```

use std::time::Duration;

use bitcoin::{Address, Amount, Network, OutPoint, Script, Transaction, Txid};
use electrum_client::{ConfigBuilder, ElectrumApi, Error as ElectrumError, ListUnspentRes};
use tapmemo_core::{
    Broadcaster, FeePriority, FeeRateSource, ProviderError, RejectReason, TransactionSource, Utxo,
    UtxoProvider,
};
use thiserror::Error;

// Re-export the raw client for direct usage
pub use electrum_client::Client as RawClient;

/// Default socket timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from Electrum operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Electrum protocol error: {0}")]
    Protocol(#[from] ElectrumError),

    #[error("Transaction not found: {0}")]
    TxNotFound(Txid),

    #[error("Broadcast rejected: {0}")]
    BroadcastRejected(RejectReason),

    #[error("Server returned invalid data: {0}")]
    InvalidResponse(String),
}

impl From<Error> for ProviderError {
    fn from(e: Error) -> Self {
        match e {
            Error::BroadcastRejected(reason) => ProviderError::Rejected(reason),
            Error::InvalidResponse(msg) => ProviderError::CorruptData(msg),
            other => ProviderError::Unavailable(other.to_string()),
        }
    }
}

/// Electrum reports fee rates in BTC/kvB. `None` when the server has no
/// estimate (it answers -1).
pub fn btc_per_kvb_to_sat_per_vb(rate: f64) -> Option<f64> {
    if !rate.is_finite() || rate <= 0.0 {
        return None;
    }
    // 1 BTC/kvB = 100_000_000 sat / 1000 vB
    Some(rate * 100_000.0)
}

/// Map a broadcast failure to a rejection when the server actually refused
/// the transaction, or to a connection error otherwise.
fn broadcast_error(e: ElectrumError) -> Error {
    match e {
        ElectrumError::Protocol(value) => {
            Error::BroadcastRejected(RejectReason::classify(&value.to_string()))
        }
        other => Error::Protocol(other),
    }
}

/// Map a `transaction_get` failure. Only a server reply saying the
/// transaction is unknown becomes `TxNotFound`; transport failures keep
/// their cause.
fn transaction_get_error(txid: &Txid, e: ElectrumError) -> Error {
    match e {
        ElectrumError::Protocol(value) => {
            let msg = value.to_string().to_lowercase();
            if msg.contains("no such") || msg.contains("not found") {
                Error::TxNotFound(*txid)
            } else {
                Error::Protocol(ElectrumError::Protocol(value))
            }
        }
        other => Error::Protocol(other),
    }
}

fn utxo_from_unspent(script: &Script, u: ListUnspentRes) -> Result<Utxo, Error> {
    let vout = u32::try_from(u.tx_pos)
        .map_err(|_| Error::InvalidResponse(format!("output index {} out of range", u.tx_pos)))?;
    let height = u32::try_from(u.height)
        .map_err(|_| Error::InvalidResponse(format!("block height {} out of range", u.height)))?;
    Ok(Utxo {
        outpoint: OutPoint {
            txid: u.tx_hash,
            vout,
        },
        value: Amount::from_sat(u.value),
        height,
        script_pubkey: script.to_owned(),
    })
}

/// Electrum client for Bitcoin network operations
pub struct ElectrumClient {
    client: electrum_client::Client,
    network: Network,
}

impl ElectrumClient {
    /// Create a new Electrum client with the default timeout
    ///
    /// # Arguments
    /// * `url` - Electrum server URL (e.g., "ssl://electrum.blockstream.info:60002")
    /// * `network` - Bitcoin network (Mainnet, Testnet, Signet, Regtest)
    ///
    /// # Security
    /// Always use SSL URLs in production. Plaintext connections can be MITM'd.
    pub fn new(url: &str, network: Network) -> Result<Self, Error> {
        Self::with_timeout(url, network, DEFAULT_TIMEOUT)
    }

    /// Create a client whose socket operations give up after `timeout`.
    pub fn with_timeout(url: &str, network: Network, timeout: Duration) -> Result<Self, Error> {
        // Warn if not using SSL
        if !url.starts_with("ssl://") && !url.contains("tls") {
            log::warn!("Connecting to Electrum without SSL - insecure for mainnet!");
        }

        let secs = timeout.as_secs().clamp(1, u8::MAX as u64) as u8;
        let config = ConfigBuilder::new().timeout(Some(secs)).build();
        let client = electrum_client::Client::from_config(url, config)
            .map_err(|e: ElectrumError| Error::Connection(e.to_string()))?;

        log::debug!("Connected to Electrum server {} ({})", url, network);
        Ok(Self { client, network })
    }

    /// Get UTXOs for a script
    pub fn get_utxos_for_script(&self, script: &Script) -> Result<Vec<Utxo>, Error> {
        let unspent = self.client.script_list_unspent(script)?;

        let utxos = unspent
            .into_iter()
            .map(|u| utxo_from_unspent(script, u))
            .collect::<Result<Vec<_>, Error>>()?;

        Ok(utxos)
    }

    /// Get UTXOs for an address
    pub fn get_utxos(&self, address: &Address) -> Result<Vec<Utxo>, Error> {
        self.get_utxos_for_script(address.script_pubkey().as_script())
    }

    /// Fee rate in sat/vB to confirm within `blocks`.
    pub fn fee_rate_for_target(&self, blocks: usize) -> Result<f64, Error> {
        let estimate = self.client.estimate_fee(blocks)?;
        if let Some(rate) = btc_per_kvb_to_sat_per_vb(estimate) {
            return Ok(rate);
        }

        log::info!(
            "Server has no fee estimate for {} blocks, using relay fee",
            blocks
        );
        let relay = self.client.relay_fee()?;
        btc_per_kvb_to_sat_per_vb(relay)
            .ok_or_else(|| Error::InvalidResponse(format!("relay fee {} BTC/kvB", relay)))
    }

    /// Get a transaction by txid
    pub fn get_transaction(&self, txid: &Txid) -> Result<Transaction, Error> {
        self.client
            .transaction_get(txid)
            .map_err(|e| transaction_get_error(txid, e))
    }

    /// Broadcast raw transaction bytes
    ///
    /// # Returns
    /// The txid the server reports
    pub fn broadcast_raw(&self, raw_tx: &[u8]) -> Result<Txid, Error> {
        self.client
            .transaction_broadcast_raw(raw_tx)
            .map_err(broadcast_error)
    }

    /// Get the network this client is configured for
    pub fn network(&self) -> Network {
        self.network
    }
}

impl UtxoProvider for ElectrumClient {
    fn get_unspent_outputs(&self, address: &Address) -> Result<Vec<Utxo>, ProviderError> {
        Ok(self.get_utxos(address)?)
    }
}

impl FeeRateSource for ElectrumClient {
    fn get_fee_rate(&self, priority: FeePriority) -> Result<f64, ProviderError> {
        Ok(self.fee_rate_for_target(priority.target_blocks())?)
    }
}

impl Broadcaster for ElectrumClient {
    fn submit(&self, raw_tx: &[u8]) -> Result<Txid, ProviderError> {
        Ok(self.broadcast_raw(raw_tx)?)
    }
}

impl TransactionSource for ElectrumClient {
    fn get_transaction(&self, txid: &Txid) -> Result<Transaction, ProviderError> {
        Ok(ElectrumClient::get_transaction(self, txid)?)
    }
}

/// testnet3 shares `Network::Testnet` with testnet4 but has its own servers.
pub const TESTNET3_SERVER: &str = "ssl://electrum.blockstream.info:60004";

/// Default Electrum servers for each network. `Network::Testnet` means
/// testnet4, matching the Esplora default.
pub fn default_server(network: Network) -> &'static str {
    match network {
        Network::Bitcoin => "ssl://electrum.blockstream.info:60002",
        Network::Testnet => "ssl://mempool.space:40002",
        Network::Signet => "ssl://mempool.space:60602",
        Network::Regtest => "tcp://127.0.0.1:60401",
        _ => "ssl://electrum.blockstream.info:60002",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_servers() {
        assert!(default_server(Network::Bitcoin).contains("60002"));
        assert_eq!(default_server(Network::Testnet), "ssl://mempool.space:40002");
        assert!(TESTNET3_SERVER.contains("60004"));
        assert!(default_server(Network::Regtest).starts_with("tcp://"));
    }

    #[test]
    fn test_fee_unit_conversion() {
        // 0.00001 BTC/kvB = 1 sat/vB
        let rate = btc_per_kvb_to_sat_per_vb(0.00001).unwrap();
        assert!((rate - 1.0).abs() < 1e-9);
        let rate = btc_per_kvb_to_sat_per_vb(0.0002).unwrap();
        assert!((rate - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_estimate() {
        assert!(btc_per_kvb_to_sat_per_vb(-1.0).is_none());
        assert!(btc_per_kvb_to_sat_per_vb(0.0).is_none());
        assert!(btc_per_kvb_to_sat_per_vb(f64::NAN).is_none());
    }

    #[test]
    fn test_server_refusal_is_rejection() {
        let e = broadcast_error(ElectrumError::Protocol(serde_json::json!({
            "code": 1,
            "message": "the transaction was rejected by network rules.\n\nmin relay fee not met, 100 < 154"
        })));
        assert!(matches!(
            ProviderError::from(e),
            ProviderError::Rejected(RejectReason::InsufficientFee)
        ));

        let e = broadcast_error(ElectrumError::Protocol(serde_json::json!(
            "bad-txns-inputs-missingorspent"
        )));
        assert!(matches!(
            ProviderError::from(e),
            ProviderError::Rejected(RejectReason::InputAlreadySpent)
        ));
    }

    #[test]
    fn test_transport_failure_is_unavailable() {
        let e = broadcast_error(ElectrumError::IOError(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "timed out",
        )));
        assert!(matches!(
            ProviderError::from(e),
            ProviderError::Unavailable(_)
        ));
    }

    #[test]
    fn test_unspent_height_out_of_range() {
        let script = bitcoin::ScriptBuf::new_op_return([0u8; 4]);
        let txid: Txid = "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b"
            .parse()
            .unwrap();
        let unspent = |height: usize| ListUnspentRes {
            height,
            tx_hash: txid,
            tx_pos: 1,
            value: 5_000,
        };

        let utxo = utxo_from_unspent(&script, unspent(850_000)).unwrap();
        assert_eq!(utxo.height, 850_000);
        assert_eq!(utxo.outpoint.vout, 1);

        if let Ok(huge) = usize::try_from(u64::from(u32::MAX) + 1) {
            assert!(matches!(
                utxo_from_unspent(&script, unspent(huge)),
                Err(Error::InvalidResponse(_))
            ));
        }
    }

    #[test]
    fn test_unknown_transaction_is_not_found() {
        let txid: Txid = "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b"
            .parse()
            .unwrap();
        let e = transaction_get_error(
            &txid,
            ElectrumError::Protocol(serde_json::json!({
                "code": 2,
                "message": "daemon error: DaemonError({'code': -5, 'message': 'No such mempool or blockchain transaction.'})"
            })),
        );
        assert!(matches!(e, Error::TxNotFound(t) if t == txid));
    }

    #[test]
    fn test_transaction_get_transport_failure_is_unavailable() {
        let txid: Txid = "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b"
            .parse()
            .unwrap();
        let e = transaction_get_error(
            &txid,
            ElectrumError::IOError(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "timed out",
            )),
        );
        assert!(!matches!(e, Error::TxNotFound(_)));
        assert!(matches!(
            ProviderError::from(e),
            ProviderError::Unavailable(_)
        ));
    }

    // Integration tests require network access
    // Run with: cargo test --package tapmemo-electrum -- --ignored

    #[test]
    #[ignore = "requires network access"]
    fn test_connect_testnet() {
        let client = ElectrumClient::new(default_server(Network::Testnet), Network::Testnet);
        assert!(client.is_ok());
    }

    #[test]
    #[ignore = "requires network access"]
    fn test_fee_rate_testnet() {
        let client =
            ElectrumClient::new(default_server(Network::Testnet), Network::Testnet).unwrap();
        let rate = client.get_fee_rate(FeePriority::Economy).unwrap();
        assert!(rate > 0.0);
        println!("Current testnet economy rate: {} sat/vB", rate);
    }

    #[test]
    #[ignore = "requires network access"]
    fn test_empty_address_has_no_utxos() {
        let client =
            ElectrumClient::new(default_server(Network::Testnet), Network::Testnet).unwrap();
        // Output key of secret 0x01..0x42, never funded
        let mut secret = [0u8; 32];
        secret[0] = 0x01;
        secret[31] = 0x42;
        let keys = tapmemo_core::KeyMaterial::derive(&secret).unwrap();
        let utxos = client
            .get_unspent_outputs(&keys.output_address(Network::Testnet))
            .unwrap();
        assert!(utxos.is_empty());
    }
}
