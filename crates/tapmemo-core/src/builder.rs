//! Transaction assembly and Taproot key-path signing.
//!
//! The builder is an explicit state machine:
//!
//! ```text
//! Empty -> InputsAdded -> OutputsAdded -> Signed -> Finalized -> Serialized
//! ```
//!
//! Calls out of sequence fail with [`TxError::InvalidStateTransition`], so a
//! transaction can never be signed and then grow outputs the signature does
//! not cover. Any failure once signing has started moves the builder to
//! `Discarded` and drops every signature; a half-signed transaction is never
//! handed out.

use bitcoin::absolute::LockTime;
use bitcoin::consensus;
use bitcoin::hashes::Hash as _;
use bitcoin::hex::DisplayHex;
use bitcoin::secp256k1::{Message, Secp256k1};
use bitcoin::sighash::{Prevouts, SighashCache, TapSighashType};
use bitcoin::taproot::Signature as TapSignature;
use bitcoin::transaction::Version;
use bitcoin::{OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};

use crate::error::TxError;
use crate::keys::KeyMaterial;
use crate::plan::TransactionPlan;
use crate::utxo::Utxo;

/// Where a [`TransactionBuilder`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderState {
    Empty,
    InputsAdded,
    OutputsAdded,
    Signed,
    Finalized,
    Serialized,
    /// Terminal. Entered when signing or finalizing fails.
    Discarded,
}

/// A finalized transaction in wire format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    raw_bytes: Vec<u8>,
    txid: Txid,
    tx: Transaction,
}

impl SignedTransaction {
    /// Consensus-serialized bytes, witness included.
    pub fn raw_bytes(&self) -> &[u8] {
        &self.raw_bytes
    }

    /// Double-SHA256 of the non-witness serialization.
    pub fn txid(&self) -> Txid {
        self.txid
    }

    pub fn hex(&self) -> String {
        self.raw_bytes.to_lower_hex_string()
    }

    pub fn transaction(&self) -> &Transaction {
        &self.tx
    }

    pub fn vsize(&self) -> usize {
        self.tx.vsize()
    }
}

/// Builds, signs and serializes one transaction.
///
/// Each build owns its builder; it has no internal synchronization.
#[derive(Debug)]
pub struct TransactionBuilder {
    state: BuilderState,
    tx: Transaction,
    /// Spent outputs, one per input. The Taproot sighash commits to all of them.
    prevouts: Vec<TxOut>,
    signatures: Vec<Option<TapSignature>>,
    serialized: Option<SignedTransaction>,
}

impl Default for TransactionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionBuilder {
    pub fn new() -> Self {
        Self {
            state: BuilderState::Empty,
            tx: Transaction {
                version: Version::TWO,
                lock_time: LockTime::ZERO,
                input: Vec::new(),
                output: Vec::new(),
            },
            prevouts: Vec::new(),
            signatures: Vec::new(),
            serialized: None,
        }
    }

    /// A builder holding every input and output of `plan`, ready to sign.
    pub fn from_plan(plan: &TransactionPlan) -> Result<Self, TxError> {
        let mut builder = Self::new();
        for utxo in plan.inputs() {
            builder.add_input(utxo)?;
        }
        for output in plan.outputs() {
            builder.add_output(output)?;
        }
        Ok(builder)
    }

    pub fn state(&self) -> BuilderState {
        self.state
    }

    /// The transaction as currently assembled (witnesses empty until finalized).
    pub fn unsigned_tx(&self) -> &Transaction {
        &self.tx
    }

    fn invalid(&self, operation: &'static str) -> TxError {
        TxError::InvalidStateTransition {
            operation,
            state: self.state,
        }
    }

    fn discard(&mut self) {
        self.state = BuilderState::Discarded;
        self.signatures.iter_mut().for_each(|s| *s = None);
        for input in &mut self.tx.input {
            input.witness = Witness::default();
        }
        self.serialized = None;
    }

    /// Spend `utxo`. Records its script and value for the sighash.
    pub fn add_input(&mut self, utxo: &Utxo) -> Result<(), TxError> {
        match self.state {
            BuilderState::Empty | BuilderState::InputsAdded => {}
            _ => return Err(self.invalid("add input")),
        }

        self.tx.input.push(TxIn {
            previous_output: OutPoint {
                txid: utxo.outpoint.txid,
                vout: utxo.outpoint.vout,
            },
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            witness: Witness::default(),
        });
        self.prevouts.push(utxo.txout());
        self.signatures.push(None);
        self.state = BuilderState::InputsAdded;
        Ok(())
    }

    pub fn add_output(&mut self, output: TxOut) -> Result<(), TxError> {
        match self.state {
            BuilderState::InputsAdded | BuilderState::OutputsAdded => {}
            _ => return Err(self.invalid("add output")),
        }

        self.tx.output.push(output);
        self.state = BuilderState::OutputsAdded;
        Ok(())
    }

    /// Sign input `input_index` with the tweaked key of `keys`.
    ///
    /// Uses `SIGHASH_DEFAULT` over all prevouts. Fails with
    /// [`TxError::SigningFailed`] if the key does not control the spent
    /// output, which would otherwise yield a signature no node accepts.
    pub fn sign(&mut self, input_index: usize, keys: &KeyMaterial) -> Result<(), TxError> {
        match self.state {
            BuilderState::OutputsAdded | BuilderState::Signed => {}
            _ => return Err(self.invalid("sign")),
        }

        match self.compute_signature(input_index, keys) {
            Ok(signature) => {
                self.signatures[input_index] = Some(signature);
                self.state = BuilderState::Signed;
                Ok(())
            }
            Err(e) => {
                log::warn!("Discarding transaction: {}", e);
                self.discard();
                Err(e)
            }
        }
    }

    /// Sign every input with the same key.
    pub fn sign_all(&mut self, keys: &KeyMaterial) -> Result<(), TxError> {
        for index in 0..self.tx.input.len() {
            self.sign(index, keys)?;
        }
        Ok(())
    }

    fn compute_signature(&self, index: usize, keys: &KeyMaterial) -> Result<TapSignature, TxError> {
        let failed = |reason: String| TxError::SigningFailed {
            input: index,
            reason,
        };

        let prevout = self
            .prevouts
            .get(index)
            .ok_or_else(|| failed(format!("no such input ({} inputs)", self.prevouts.len())))?;

        if prevout.script_pubkey != keys.output_script() {
            return Err(failed("key does not control the spent output".into()));
        }
        if !keys.is_consistent() {
            return Err(failed("tweaked key does not match output key".into()));
        }

        let sighash = SighashCache::new(&self.tx)
            .taproot_key_spend_signature_hash(
                index,
                &Prevouts::All(&self.prevouts),
                TapSighashType::Default,
            )
            .map_err(|e| failed(format!("sighash: {}", e)))?;

        let secp = Secp256k1::new();
        let msg = Message::from_digest(sighash.to_byte_array());
        let signature = secp.sign_schnorr(&msg, &keys.signing_key().to_inner());

        secp.verify_schnorr(&signature, &msg, &keys.output_key().to_inner())
            .map_err(|e| failed(format!("signature does not verify: {}", e)))?;

        Ok(TapSignature {
            signature,
            sighash_type: TapSighashType::Default,
        })
    }

    /// Attach the key-path witness (signature only) to every input.
    ///
    /// Finalizing an already finalized transaction is a no-op.
    pub fn finalize(&mut self) -> Result<(), TxError> {
        match self.state {
            BuilderState::Signed => {}
            BuilderState::Finalized | BuilderState::Serialized => return Ok(()),
            _ => return Err(self.invalid("finalize")),
        }

        if let Some(missing) = self.signatures.iter().position(Option::is_none) {
            let e = TxError::SigningFailed {
                input: missing,
                reason: "input not signed".into(),
            };
            log::warn!("Discarding transaction: {}", e);
            self.discard();
            return Err(e);
        }

        for (input, signature) in self.tx.input.iter_mut().zip(&self.signatures) {
            if let Some(signature) = signature {
                input.witness = Witness::p2tr_key_spend(signature);
            }
        }
        self.state = BuilderState::Finalized;
        Ok(())
    }

    /// Wire bytes of the finalized transaction. Every call returns the same bytes.
    pub fn serialize(&mut self) -> Result<SignedTransaction, TxError> {
        match self.state {
            BuilderState::Finalized => {}
            BuilderState::Serialized => {
                if let Some(signed) = &self.serialized {
                    return Ok(signed.clone());
                }
            }
            _ => return Err(self.invalid("serialize")),
        }

        let signed = SignedTransaction {
            raw_bytes: consensus::serialize(&self.tx),
            txid: self.tx.compute_txid(),
            tx: self.tx.clone(),
        };
        self.serialized = Some(signed.clone());
        self.state = BuilderState::Serialized;
        Ok(signed)
    }
}

/// Assemble, sign, finalize and serialize `plan` in one go.
pub fn sign_plan(plan: &TransactionPlan, keys: &KeyMaterial) -> Result<SignedTransaction, TxError> {
    let mut builder = TransactionBuilder::from_plan(plan)?;
    builder.sign_all(keys)?;
    builder.finalize()?;
    builder.serialize()
}
