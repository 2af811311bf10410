//! Consensus verification of signed transactions.
//!
//! Every signed transaction is checked against libbitcoinconsensus (Bitcoin
//! Core's script interpreter) with the full set of spent outputs, which is
//! what Taproot sighashes commit to.

use bitcoin::hashes::Hash;
use bitcoin::{Address, Amount, Network, OutPoint, Transaction, TxOut, Txid};
use tapmemo_core::{
    decode_memo_text, sign_plan, KeyMaterial, PlanPolicy, SignedTransaction, TransactionBuilder,
    TransactionPlan, TxError, Utxo, UtxoSet,
};

fn test_keys(seed_byte: u8) -> KeyMaterial {
    let mut secret_bytes = [0u8; 32];
    secret_bytes[31] = seed_byte;
    secret_bytes[0] = 0x01;
    KeyMaterial::derive(&secret_bytes).unwrap()
}

fn utxo(address: &Address, txid_byte: u8, vout: u32, value: u64) -> Utxo {
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

/// Verify every input of `tx` against `spent`, in input order.
fn consensus_verify(tx: &Transaction, spent: &[TxOut]) -> Result<(), String> {
    let tx_bytes = bitcoin::consensus::serialize(tx);
    let all_utxos: Vec<bitcoinconsensus::Utxo> = spent
        .iter()
        .map(|o| bitcoinconsensus::Utxo {
            script_pubkey: o.script_pubkey.as_bytes().as_ptr(),
            script_pubkey_len: o.script_pubkey.len() as u32,
            value: o.value.to_sat() as i64,
        })
        .collect();

    for (idx, out) in spent.iter().enumerate() {
        bitcoinconsensus::verify(
            out.script_pubkey.as_bytes(),
            out.value.to_sat(),
            &tx_bytes,
            Some(&all_utxos),
            idx,
        )
        .map_err(|e| format!("input {}: {:?}", idx, e))?;
    }
    Ok(())
}

fn plan_and_sign(
    keys: &KeyMaterial,
    values: &[u64],
    send: u64,
    memo: Option<&[u8]>,
    fee: u64,
) -> (TransactionPlan, SignedTransaction) {
    let addr = keys.output_address(Network::Testnet);
    let utxos = values
        .iter()
        .enumerate()
        .map(|(i, &v)| utxo(&addr, 0x10 + i as u8, i as u32, v))
        .collect();
    let set = UtxoSet::new(addr, utxos).unwrap();
    let recipient = test_keys(0xEE).output_address(Network::Testnet);

    let plan = TransactionPlan::build(
        &set,
        &recipient,
        Amount::from_sat(send),
        memo,
        Amount::from_sat(fee),
        &PlanPolicy::default(),
    )
    .unwrap();
    let signed = sign_plan(&plan, keys).unwrap();
    (plan, signed)
}

fn spent_outputs(plan: &TransactionPlan) -> Vec<TxOut> {
    plan.inputs().iter().map(Utxo::txout).collect()
}

#[test]
fn test_keypath_spend_with_memo_passes_consensus() {
    let keys = test_keys(1);
    let (plan, signed) = plan_and_sign(
        &keys,
        &[100_000],
        2_000,
        Some(b"Test transaction with memo".as_slice()),
        500,
    );

    let result = consensus_verify(signed.transaction(), &spent_outputs(&plan));
    assert!(result.is_ok(), "consensus verification failed: {:?}", result);
    assert_eq!(
        decode_memo_text(signed.transaction()).as_deref(),
        Some("Test transaction with memo")
    );
}

#[test]
fn test_keypath_spend_without_change_passes_consensus() {
    let keys = test_keys(2);
    // 10_000 - 9_800 - 100 leaves 100 sat of dust change
    let (plan, signed) = plan_and_sign(&keys, &[10_000], 9_800, None, 100);
    assert!(plan.change().is_none());

    let result = consensus_verify(signed.transaction(), &spent_outputs(&plan));
    assert!(result.is_ok(), "consensus verification failed: {:?}", result);
}

#[test]
fn test_multi_input_spend_passes_consensus() {
    let keys = test_keys(3);
    let (plan, signed) = plan_and_sign(
        &keys,
        &[30_000, 40_000, 5_000],
        60_000,
        Some(b"three inputs".as_slice()),
        800,
    );
    assert_eq!(signed.transaction().input.len(), 3);

    let result = consensus_verify(signed.transaction(), &spent_outputs(&plan));
    assert!(result.is_ok(), "consensus verification failed: {:?}", result);
}

#[test]
fn test_wrong_prevout_value_fails_consensus() {
    // A builder told the wrong amount signs happily; the network does not.
    let keys = test_keys(4);
    let addr = keys.output_address(Network::Testnet);
    let real = utxo(&addr, 0x42, 0, 50_000);
    let mut lied = real.clone();
    lied.value = Amount::from_sat(60_000);

    let mut builder = TransactionBuilder::new();
    builder.add_input(&lied).unwrap();
    builder
        .add_output(TxOut {
            value: Amount::from_sat(49_000),
            script_pubkey: test_keys(0xEE).output_script(),
        })
        .unwrap();
    builder.sign(0, &keys).unwrap();
    builder.finalize().unwrap();
    let signed = builder.serialize().unwrap();

    assert!(consensus_verify(signed.transaction(), &[real.txout()]).is_err());
    assert!(consensus_verify(signed.transaction(), &[lied.txout()]).is_ok());
}

#[test]
fn test_foreign_witness_utxo_fails_signing() {
    let keys = test_keys(5);
    let foreign = test_keys(6).output_address(Network::Testnet);

    let mut builder = TransactionBuilder::new();
    builder.add_input(&utxo(&foreign, 0x43, 0, 50_000)).unwrap();
    builder
        .add_output(TxOut {
            value: Amount::from_sat(49_000),
            script_pubkey: test_keys(0xEE).output_script(),
        })
        .unwrap();

    assert!(matches!(
        builder.sign(0, &keys),
        Err(TxError::SigningFailed { input: 0, .. })
    ));
}

#[test]
fn test_raw_bytes_parse_back_to_same_transaction() {
    let keys = test_keys(7);
    let (plan, signed) = plan_and_sign(&keys, &[100_000], 2_000, Some(b"bytes".as_slice()), 500);

    let parsed: Transaction = bitcoin::consensus::deserialize(signed.raw_bytes()).unwrap();
    assert_eq!(&parsed, signed.transaction());
    assert_eq!(parsed.compute_txid(), signed.txid());
    assert_eq!(parsed.output, plan.outputs());
    assert_eq!(hex::encode(signed.raw_bytes()), signed.hex());
}
