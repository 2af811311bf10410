//! TapMemo Core
//!
//! Builds, signs and serializes Bitcoin transactions that spend Taproot
//! key-path outputs, optionally carrying a memo in an `OP_RETURN` output.
//!
//! # Pipeline
//!
//! ```text
//! KeyMaterial -> UtxoSet -> FeeEstimator -> TransactionPlan -> TransactionBuilder -> Broadcaster
//! ```
//!
//! Everything up to the builder is pure. Network access goes through the
//! traits in [`provider`], implemented by the Electrum and Esplora adapter
//! crates.

pub mod builder;
pub mod error;
pub mod fee;
pub mod keys;
pub mod memo;
pub mod plan;
pub mod provider;
pub mod send;
pub mod utxo;

#[cfg(test)]
pub(crate) mod test_utils;

pub use builder::{sign_plan, BuilderState, SignedTransaction, TransactionBuilder};
pub use error::{ProviderError, RejectReason, TxError};
pub use fee::{FeeEstimator, TxShape, DEFAULT_MAX_FEE_RATE};
pub use keys::{tap_tweak, DerivedAddresses, KeyMaterial};
pub use memo::{decode_memo, decode_memo_text, fetch_memo, memo_output, MAX_RELAY_MEMO_LEN};
pub use plan::{dust_limit, Payment, PlanPolicy, TransactionPlan, TAPROOT_DUST_LIMIT};
pub use provider::{Broadcaster, FeePriority, FeeRateSource, TransactionSource, UtxoProvider};
pub use send::{
    broadcast, parse_recipient, prepare_transfer, PreparedTransfer, SendOptions, TransferRequest,
};
pub use utxo::{Utxo, UtxoSet};
