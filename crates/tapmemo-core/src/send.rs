//! End-to-end send pipeline: fetch, price, plan, sign, and broadcast.

use bitcoin::address::NetworkUnchecked;
use bitcoin::{Address, Amount, Network, Txid};

use crate::builder::{sign_plan, SignedTransaction};
use crate::error::TxError;
use crate::fee::{FeeEstimator, TxShape};
use crate::keys::KeyMaterial;
use crate::memo::{self, MAX_RELAY_MEMO_LEN};
use crate::plan::{PlanPolicy, TransactionPlan};
use crate::provider::{Broadcaster, FeePriority, FeeRateSource, UtxoProvider};
use crate::utxo::UtxoSet;

/// Parse `s` as an address on `network`.
pub fn parse_recipient(s: &str, network: Network) -> Result<Address, TxError> {
    let unchecked: Address<NetworkUnchecked> = s
        .parse()
        .map_err(|e| TxError::InvalidAddress(format!("{}: {}", s, e)))?;
    unchecked
        .require_network(network)
        .map_err(|e| TxError::InvalidAddress(format!("{}: {}", s, e)))
}

/// What to send, and to whom.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub recipient: Address,
    pub amount: Amount,
    pub memo: Option<Vec<u8>>,
}

impl TransferRequest {
    pub fn new(recipient: Address, amount: Amount) -> Self {
        Self {
            recipient,
            amount,
            memo: None,
        }
    }

    pub fn with_memo(mut self, memo: impl Into<Vec<u8>>) -> Self {
        self.memo = Some(memo.into());
        self
    }
}

/// Knobs for fee and change handling.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub estimator: FeeEstimator,
    pub policy: PlanPolicy,
    pub priority: FeePriority,
}

/// A signed transaction that has not been broadcast yet.
#[derive(Debug, Clone)]
pub struct PreparedTransfer {
    pub plan: TransactionPlan,
    pub signed: SignedTransaction,
    /// Rate the fee was computed at (sat/vB)
    pub fee_rate: f64,
}

impl PreparedTransfer {
    pub fn txid(&self) -> Txid {
        self.signed.txid()
    }
}

/// Build and sign a transfer from the key's own Taproot address.
///
/// Spends every UTXO of the address. The fee is sized for a transaction that
/// carries a change output; if change turns out to be dust it is dropped and
/// the fee absorbs it. When the remainder cannot pay for the change output at
/// all, the fee is re-priced for the smaller transaction without one.
pub fn prepare_transfer<P, F>(
    keys: &KeyMaterial,
    network: Network,
    provider: &P,
    fee_source: &F,
    request: &TransferRequest,
    options: &SendOptions,
) -> Result<PreparedTransfer, TxError>
where
    P: UtxoProvider + ?Sized,
    F: FeeRateSource + ?Sized,
{
    let source = keys.output_address(network);
    log::info!("Source address: {}", source);

    let utxos = UtxoSet::fetch(provider, &source)?;
    log::info!(
        "Found {} UTXO(s) totalling {}",
        utxos.len(),
        utxos.total_value()?
    );
    if utxos.is_empty() {
        return Err(TxError::NoUtxos);
    }

    let fee_rate = fee_source.get_fee_rate(options.priority)?;
    log::debug!("Fee rate for {:?}: {} sat/vB", options.priority, fee_rate);

    let memo = request.memo.as_deref().filter(|m| !m.is_empty());
    let mut shape = TxShape::new(utxos.len()).with_output(request.recipient.script_pubkey().len());
    if let Some(data) = memo {
        if data.len() > MAX_RELAY_MEMO_LEN {
            log::warn!(
                "Memo is {} bytes; most nodes will not relay data carriers above {} bytes",
                data.len(),
                MAX_RELAY_MEMO_LEN
            );
        }
        shape = shape.with_output(memo::memo_script(data)?.len());
    }
    let with_change = shape.clone().with_output(keys.output_script().len());

    let vbytes = options.estimator.size_for(&with_change);
    let fee = options.estimator.estimate_fee(fee_rate, vbytes)?;
    log::info!("Estimated fee: {} ({} vB at {} sat/vB)", fee, vbytes, fee_rate);

    let plan = match TransactionPlan::build(
        &utxos,
        &request.recipient,
        request.amount,
        memo,
        fee,
        &options.policy,
    ) {
        Err(TxError::FeeExceedsAmount { .. }) => {
            // Without a change output the transaction is smaller; whatever
            // is left over after that fee goes to the miner.
            let vbytes = options.estimator.size_for(&shape);
            let fee = options.estimator.estimate_fee(fee_rate, vbytes)?;
            log::info!(
                "No room for change, re-priced without it: {} ({} vB)",
                fee,
                vbytes
            );
            let no_change = PlanPolicy {
                change_dust_limit: Amount::MAX_MONEY,
            };
            TransactionPlan::build(
                &utxos,
                &request.recipient,
                request.amount,
                memo,
                fee,
                &no_change,
            )?
        }
        other => other?,
    };
    if plan.dust_absorbed() > Amount::ZERO {
        log::info!("Change of {} is dust, added to fee", plan.dust_absorbed());
    }

    let signed = sign_plan(&plan, keys)?;
    log::info!("Signed transaction {} ({} vB)", signed.txid(), signed.vsize());

    Ok(PreparedTransfer {
        plan,
        signed,
        fee_rate,
    })
}

/// Submit a prepared transfer. Returns the locally computed txid.
pub fn broadcast<B>(prepared: &PreparedTransfer, broadcaster: &B) -> Result<Txid, TxError>
where
    B: Broadcaster + ?Sized,
{
    let local = prepared.txid();
    let reported = broadcaster.submit(prepared.signed.raw_bytes())?;
    if reported != local {
        log::warn!(
            "Backend reported txid {} but the transaction hashes to {}",
            reported,
            local
        );
    }
    log::info!("Broadcast {}", local);
    Ok(local)
}
