//! Memo data-carrier outputs (`OP_RETURN <data>`).

use bitcoin::script::{Instruction, PushBytes};
use bitcoin::{Amount, Script, ScriptBuf, Transaction, TxOut, Txid};

use crate::error::TxError;
use crate::provider::TransactionSource;

/// Largest memo standard relay policy forwards. Not enforced here.
pub const MAX_RELAY_MEMO_LEN: usize = 80;

/// Whether `data` is larger than default relay policy allows.
pub fn exceeds_relay_limit(data: &[u8]) -> bool {
    data.len() > MAX_RELAY_MEMO_LEN
}

/// `OP_RETURN` followed by a single push of `data`, verbatim.
pub fn memo_script(data: &[u8]) -> Result<ScriptBuf, TxError> {
    let push = <&PushBytes>::try_from(data)
        .map_err(|e| TxError::CorruptData(format!("memo too large to push: {}", e)))?;
    Ok(ScriptBuf::new_op_return(push))
}

/// A zero-value output carrying `data`.
pub fn memo_output(data: &[u8]) -> Result<TxOut, TxError> {
    Ok(TxOut {
        value: Amount::ZERO,
        script_pubkey: memo_script(data)?,
    })
}

/// Pushed bytes of an `OP_RETURN` script, concatenated.
///
/// Returns `None` if the script is not a data carrier or contains anything
/// other than pushes after the `OP_RETURN`.
pub fn extract_memo(script: &Script) -> Option<Vec<u8>> {
    if !script.is_op_return() {
        return None;
    }

    let mut data = Vec::new();
    for instruction in script.instructions().skip(1) {
        match instruction.ok()? {
            Instruction::PushBytes(bytes) => data.extend_from_slice(bytes.as_bytes()),
            Instruction::Op(_) => return None,
        }
    }
    Some(data)
}

/// The memo of the first data-carrier output in `tx`, if any.
pub fn decode_memo(tx: &Transaction) -> Option<Vec<u8>> {
    tx.output
        .iter()
        .find(|o| o.script_pubkey.is_op_return())
        .and_then(|o| extract_memo(&o.script_pubkey))
}

/// The memo as UTF-8 text. `None` if there is no memo or it isn't UTF-8.
pub fn decode_memo_text(tx: &Transaction) -> Option<String> {
    decode_memo(tx).and_then(|bytes| String::from_utf8(bytes).ok())
}

/// Look up `txid` and return its memo.
pub fn fetch_memo<S: TransactionSource + ?Sized>(
    source: &S,
    txid: &Txid,
) -> Result<Option<Vec<u8>>, TxError> {
    let tx = source.get_transaction(txid)?;
    if tx.compute_txid() != *txid {
        return Err(TxError::CorruptData(format!(
            "asked for {} but got {}",
            txid,
            tx.compute_txid()
        )));
    }
    Ok(decode_memo(&tx))
}
