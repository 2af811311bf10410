//! Error taxonomy for the transaction pipeline.
//!
//! Nothing here is retried internally. Transient provider failures are the
//! caller's to retry with backoff.

use bitcoin::Amount;
use thiserror::Error;

use crate::builder::BuilderState;

/// Why a broadcaster refused a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Fee below the node's relay or mempool minimum.
    InsufficientFee,
    /// An input is already spent or unknown to the node.
    InputAlreadySpent,
    /// The transaction failed to decode or violated script/consensus rules.
    Malformed,
    /// Anything the backend reported that we could not classify.
    Other(String),
}

impl RejectReason {
    /// Classify a backend error message.
    ///
    /// Matches the reject strings Bitcoin Core relays through Electrum and
    /// Esplora servers (`min relay fee not met`, `bad-txns-inputs-missingorspent`,
    /// `TX decode failed`, ...).
    pub fn classify(message: &str) -> Self {
        let msg = message.to_ascii_lowercase();
        if msg.contains("min relay fee")
            || msg.contains("insufficient fee")
            || msg.contains("mempool min fee")
            || msg.contains("fee not met")
        {
            RejectReason::InsufficientFee
        } else if msg.contains("missingorspent")
            || msg.contains("missing-inputs")
            || msg.contains("missing inputs")
            || msg.contains("txn-mempool-conflict")
            || msg.contains("already spent")
        {
            RejectReason::InputAlreadySpent
        } else if msg.contains("decode failed")
            || msg.contains("script-verify-flag")
            || msg.contains("bad-txns")
            || msg.contains("scriptpubkey")
            || msg.contains("dust")
        {
            RejectReason::Malformed
        } else {
            RejectReason::Other(message.trim().to_string())
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::InsufficientFee => write!(f, "insufficient fee"),
            RejectReason::InputAlreadySpent => write!(f, "input already spent"),
            RejectReason::Malformed => write!(f, "malformed transaction"),
            RejectReason::Other(msg) => write!(f, "{}", msg),
        }
    }
}

/// Errors reported by external collaborators (UTXO provider, fee source,
/// broadcaster).
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Provider returned invalid data: {0}")]
    CorruptData(String),

    #[error("Broadcast rejected: {0}")]
    Rejected(RejectReason),
}

/// Errors from building, signing and submitting a transaction.
#[derive(Error, Debug)]
pub enum TxError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("No UTXOs available to spend")]
    NoUtxos,

    #[error("Insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: Amount, available: Amount },

    #[error("Fee {fee} exceeds the {remaining} left after the send amount")]
    FeeExceedsAmount { fee: Amount, remaining: Amount },

    #[error("Output {index} amount {amount} is below the dust limit {limit}")]
    DustOutput {
        index: usize,
        amount: Amount,
        limit: Amount,
    },

    #[error("Invalid fee rate: {0} sat/vB")]
    InvalidFeeRate(f64),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Corrupt data: {0}")]
    CorruptData(String),

    #[error("Signing input {input} failed: {reason}")]
    SigningFailed { input: usize, reason: String },

    #[error("Cannot {operation} in state {state:?}")]
    InvalidStateTransition {
        operation: &'static str,
        state: BuilderState,
    },

    #[error("Broadcast rejected: {0}")]
    BroadcastRejected(RejectReason),
}

impl From<ProviderError> for TxError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Unavailable(msg) => TxError::ProviderUnavailable(msg),
            ProviderError::CorruptData(msg) => TxError::CorruptData(msg),
            ProviderError::Rejected(reason) => TxError::BroadcastRejected(reason),
        }
    }
}
