//! TapMemo Esplora Backend
//!
//! Blocking client for the Esplora REST API (Blockstream, mempool.space):
//! - UTXOs: `GET /address/{address}/utxo`
//! - Fee rates: `GET /v1/fees/recommended`, falling back to `GET /fee-estimates`
//! - Broadcast: `POST /tx`
//! - Lookup: `GET /tx/{txid}/hex`

pub mod types;

use std::collections::HashMap;
use std::time::Duration;

use bitcoin::consensus::encode::deserialize_hex;
use bitcoin::hex::DisplayHex;
use bitcoin::{Address, Network, Transaction, Txid};
use reqwest::blocking::{Client, Response};
use tapmemo_core::{
    Broadcaster, FeePriority, FeeRateSource, ProviderError, RejectReason, TransactionSource, Utxo,
    UtxoProvider,
};
use thiserror::Error;

use crate::types::{rate_for_target, EsploraUtxo, RecommendedFees};

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from Esplora requests.
#[derive(Debug, Error)]
pub enum Error {
    #[error("API request failed: {0}")]
    Request(String),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Broadcast rejected: {0}")]
    BroadcastRejected(RejectReason),
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

/// testnet3 shares `Network::Testnet` with testnet4 but lives at its own API.
pub const TESTNET3_URL: &str = "https://mempool.space/testnet/api";

/// Default API base for each network. `Network::Testnet` means testnet4.
pub fn default_url(network: Network) -> &'static str {
    match network {
        Network::Bitcoin => "https://mempool.space/api",
        Network::Testnet => "https://mempool.space/testnet4/api",
        Network::Signet => "https://mempool.space/signet/api",
        Network::Regtest => "http://127.0.0.1:3002",
        _ => "https://mempool.space/api",
    }
}

/// Classify a failed `POST /tx`.
///
/// 4xx means the node refused the transaction; anything else is the service
/// failing.
fn broadcast_error(status: u16, body: String) -> Error {
    if (400..500).contains(&status) {
        Error::BroadcastRejected(RejectReason::classify(&body))
    } else {
        Error::Api { status, body }
    }
}

/// Esplora API client.
pub struct EsploraClient {
    base_url: String,
    client: Client,
}

impl EsploraClient {
    /// Client for `base_url` with the default timeout.
    pub fn new(base_url: &str) -> Result<Self, Error> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, Error> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Request(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Client for the public mempool.space instance of `network`.
    pub fn for_network(network: Network) -> Result<Self, Error> {
        Self::new(default_url(network))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get(&self, path: &str) -> Result<Response, Error> {
        let url = format!("{}{}", self.base_url, path);
        log::debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| Error::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            return Err(Error::Api { status, body });
        }
        Ok(response)
    }

    /// UTXOs paying to `address`.
    pub fn get_utxos(&self, address: &Address) -> Result<Vec<Utxo>, Error> {
        let list: Vec<EsploraUtxo> = self
            .get(&format!("/address/{}/utxo", address))?
            .json()
            .map_err(|e| Error::InvalidResponse(e.to_string()))?;

        list.into_iter().map(|u| u.into_utxo(address)).collect()
    }

    pub fn get_recommended_fees(&self) -> Result<RecommendedFees, Error> {
        self.get("/v1/fees/recommended")?
            .json()
            .map_err(|e| Error::InvalidResponse(e.to_string()))
    }

    pub fn get_fee_estimates(&self) -> Result<HashMap<String, f64>, Error> {
        self.get("/fee-estimates")?
            .json()
            .map_err(|e| Error::InvalidResponse(e.to_string()))
    }

    /// Fee rate in sat/vB for `priority`.
    ///
    /// Plain Esplora servers lack the mempool.space recommendation endpoint,
    /// so a failure there falls back to the per-target estimates.
    pub fn fee_rate(&self, priority: FeePriority) -> Result<f64, Error> {
        match self.get_recommended_fees() {
            Ok(fees) => return Ok(fees.rate(priority)),
            Err(e) => log::debug!("No recommended fees ({}), trying /fee-estimates", e),
        }

        let estimates = self.get_fee_estimates()?;
        rate_for_target(&estimates, priority.target_blocks())
            .ok_or_else(|| Error::InvalidResponse("empty fee estimates".into()))
    }

    /// Submit a raw transaction. Returns the txid the server reports.
    pub fn broadcast_raw(&self, raw_tx: &[u8]) -> Result<Txid, Error> {
        let url = format!("{}/tx", self.base_url);
        let tx_hex = raw_tx.to_lower_hex_string();

        let response = self
            .client
            .post(&url)
            .body(tx_hex)
            .send()
            .map_err(|e| Error::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            return Err(broadcast_error(status, body));
        }

        // Response is just the txid as plain text
        let text = response
            .text()
            .map_err(|e| Error::InvalidResponse(e.to_string()))?;
        text.trim()
            .parse()
            .map_err(|e| Error::InvalidResponse(format!("txid {}: {}", text.trim(), e)))
    }

    pub fn get_transaction(&self, txid: &Txid) -> Result<Transaction, Error> {
        let hex = self
            .get(&format!("/tx/{}/hex", txid))?
            .text()
            .map_err(|e| Error::InvalidResponse(e.to_string()))?;

        deserialize_hex(hex.trim()).map_err(|e| Error::InvalidResponse(format!("tx {}: {}", txid, e)))
    }
}

impl UtxoProvider for EsploraClient {
    fn get_unspent_outputs(&self, address: &Address) -> Result<Vec<Utxo>, ProviderError> {
        Ok(self.get_utxos(address)?)
    }
}

impl FeeRateSource for EsploraClient {
    fn get_fee_rate(&self, priority: FeePriority) -> Result<f64, ProviderError> {
        Ok(self.fee_rate(priority)?)
    }
}

impl Broadcaster for EsploraClient {
    fn submit(&self, raw_tx: &[u8]) -> Result<Txid, ProviderError> {
        Ok(self.broadcast_raw(raw_tx)?)
    }
}

impl TransactionSource for EsploraClient {
    fn get_transaction(&self, txid: &Txid) -> Result<Transaction, ProviderError> {
        Ok(EsploraClient::get_transaction(self, txid)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_urls() {
        assert_eq!(default_url(Network::Bitcoin), "https://mempool.space/api");
        assert!(default_url(Network::Testnet).contains("testnet4"));
        assert!(!TESTNET3_URL.contains("testnet4"));
        assert!(default_url(Network::Signet).contains("signet"));
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let client = EsploraClient::new("https://mempool.space/api/").unwrap();
        assert_eq!(client.base_url(), "https://mempool.space/api");
    }

    #[test]
    fn test_node_refusal_is_rejection() {
        let body = r#"sendrawtransaction RPC error: {"code":-26,"message":"min relay fee not met, 100 < 154"}"#;
        assert!(matches!(
            ProviderError::from(broadcast_error(400, body.into())),
            ProviderError::Rejected(RejectReason::InsufficientFee)
        ));

        let body = r#"sendrawtransaction RPC error: {"code":-25,"message":"bad-txns-inputs-missingorspent"}"#;
        assert!(matches!(
            ProviderError::from(broadcast_error(400, body.into())),
            ProviderError::Rejected(RejectReason::InputAlreadySpent)
        ));

        let body = r#"sendrawtransaction RPC error: {"code":-22,"message":"TX decode failed"}"#;
        assert!(matches!(
            ProviderError::from(broadcast_error(400, body.into())),
            ProviderError::Rejected(RejectReason::Malformed)
        ));
    }

    #[test]
    fn test_server_error_is_unavailable() {
        assert!(matches!(
            ProviderError::from(broadcast_error(503, "maintenance".into())),
            ProviderError::Unavailable(_)
        ));
    }

    // Integration tests require network access
    // Run with: cargo test --package tapmemo-esplora -- --ignored

    #[test]
    #[ignore = "requires network access"]
    fn test_fee_rate_testnet() {
        let client = EsploraClient::for_network(Network::Testnet).unwrap();
        let rate = client.get_fee_rate(FeePriority::Economy).unwrap();
        assert!(rate > 0.0);
        println!("Current testnet4 economy rate: {} sat/vB", rate);
    }

    #[test]
    #[ignore = "requires network access"]
    fn test_unknown_tx_is_unavailable() {
        use bitcoin::hashes::Hash;

        let client = EsploraClient::for_network(Network::Testnet).unwrap();
        let result = TransactionSource::get_transaction(&client, &Txid::from_byte_array([0x11; 32]));
        assert!(matches!(result, Err(ProviderError::Unavailable(_))));
    }
}
