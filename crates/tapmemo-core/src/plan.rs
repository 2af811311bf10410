//! Output planning.
//!
//! Given the spendable outputs, a send amount and a fee, decide the exact
//! outputs of the transaction. Pure: no keys, no network.
//!
//! # Policy
//!
//! - Every known UTXO is spent.
//! - The fee is additive: the recipient receives exactly the requested
//!   amount and the fee comes out of the remainder.
//! - Change goes back to the source address. Change below the dust limit is
//!   not created; it is added to the fee and reported as `dust_absorbed`.
//! - Output order is recipient, memo, change.

use bitcoin::{Address, Amount, Script, TxOut};

use crate::error::TxError;
use crate::fee::TxShape;
use crate::memo::memo_output;
use crate::utxo::{Utxo, UtxoSet};

/// Smallest change output we create for a Taproot source address.
pub const TAPROOT_DUST_LIMIT: Amount = Amount::from_sat(330);

/// Dust limit for an output paying to `script`, at the default 3 sat/vB
/// dust relay fee.
pub fn dust_limit(script: &Script) -> Amount {
    if script.is_p2tr() || script.is_p2wsh() {
        TAPROOT_DUST_LIMIT
    } else if script.is_p2wpkh() {
        Amount::from_sat(294)
    } else if script.is_p2sh() {
        Amount::from_sat(540)
    } else {
        Amount::from_sat(546)
    }
}

/// Knobs for [`TransactionPlan::build`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanPolicy {
    /// Change below this is folded into the fee.
    pub change_dust_limit: Amount,
}

impl Default for PlanPolicy {
    fn default() -> Self {
        Self {
            change_dust_limit: TAPROOT_DUST_LIMIT,
        }
    }
}

/// An output paying value to an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    pub address: Address,
    pub value: Amount,
}

impl Payment {
    pub fn txout(&self) -> TxOut {
        TxOut {
            value: self.value,
            script_pubkey: self.address.script_pubkey(),
        }
    }
}

/// The concrete inputs and outputs of one transaction.
#[derive(Debug, Clone)]
pub struct TransactionPlan {
    inputs: Vec<Utxo>,
    total_input: Amount,
    recipient: Payment,
    memo: Option<Vec<u8>>,
    memo_output: Option<TxOut>,
    change: Option<Payment>,
    fee: Amount,
    dust_absorbed: Amount,
}

impl TransactionPlan {
    /// Plan a payment of `send_amount` to `recipient`.
    ///
    /// An empty `memo` is treated as no memo.
    pub fn build(
        utxos: &UtxoSet,
        recipient: &Address,
        send_amount: Amount,
        memo: Option<&[u8]>,
        fee: Amount,
        policy: &PlanPolicy,
    ) -> Result<Self, TxError> {
        if utxos.is_empty() {
            return Err(TxError::NoUtxos);
        }
        let total_input = utxos.total_value()?;

        let recipient_limit = dust_limit(&recipient.script_pubkey());
        if send_amount < recipient_limit {
            return Err(TxError::DustOutput {
                index: 0,
                amount: send_amount,
                limit: recipient_limit,
            });
        }

        let remaining = total_input
            .checked_sub(send_amount)
            .ok_or(TxError::InsufficientFunds {
                needed: send_amount,
                available: total_input,
            })?;

        let leftover = remaining
            .checked_sub(fee)
            .ok_or(TxError::FeeExceedsAmount { fee, remaining })?;

        let (change, fee, dust_absorbed) = if leftover == Amount::ZERO {
            (None, fee, Amount::ZERO)
        } else if leftover < policy.change_dust_limit {
            log::debug!(
                "Change {} below dust limit {}; adding it to the fee",
                leftover,
                policy.change_dust_limit
            );
            (None, fee + leftover, leftover)
        } else {
            let change = Payment {
                address: utxos.address().clone(),
                value: leftover,
            };
            (Some(change), fee, Amount::ZERO)
        };

        let memo = memo.filter(|m| !m.is_empty()).map(<[u8]>::to_vec);
        let memo_txout = memo.as_deref().map(memo_output).transpose()?;

        let plan = Self {
            inputs: utxos.utxos().to_vec(),
            total_input,
            recipient: Payment {
                address: recipient.clone(),
                value: send_amount,
            },
            memo,
            memo_output: memo_txout,
            change,
            fee,
            dust_absorbed,
        };
        debug_assert!(plan.conserves_value());
        Ok(plan)
    }

    pub fn inputs(&self) -> &[Utxo] {
        &self.inputs
    }

    pub fn total_input(&self) -> Amount {
        self.total_input
    }

    pub fn recipient(&self) -> &Payment {
        &self.recipient
    }

    pub fn memo(&self) -> Option<&[u8]> {
        self.memo.as_deref()
    }

    pub fn change(&self) -> Option<&Payment> {
        self.change.as_ref()
    }

    /// Total fee, including any absorbed dust change.
    pub fn fee(&self) -> Amount {
        self.fee
    }

    /// Change that was too small to create and went to the fee instead.
    pub fn dust_absorbed(&self) -> Amount {
        self.dust_absorbed
    }

    /// Outputs in transaction order: recipient, memo, change.
    pub fn outputs(&self) -> Vec<TxOut> {
        let mut outputs = vec![self.recipient.txout()];
        outputs.extend(self.memo_output.iter().cloned());
        outputs.extend(self.change.iter().map(Payment::txout));
        outputs
    }

    /// Shape of the signed transaction, for size checks.
    pub fn shape(&self) -> TxShape {
        self.outputs()
            .iter()
            .fold(TxShape::new(self.inputs.len()), |shape, o| {
                shape.with_output(o.script_pubkey.len())
            })
    }

    /// `total_input == recipient + fee + change`
    pub fn conserves_value(&self) -> bool {
        let change = self.change.as_ref().map_or(Amount::ZERO, |c| c.value);
        self.recipient
            .value
            .checked_add(self.fee)
            .and_then(|v| v.checked_add(change))
            == Some(self.total_input)
    }
}
