//! Subcommands: `address`, `send`, `decode-memo`.

use anyhow::{Context, Result};
use bitcoin::hex::{DisplayHex, FromHex};
use bitcoin::{Amount, Txid};
use tapmemo_core::{
    broadcast, fetch_memo, parse_recipient, prepare_transfer, Broadcaster, FeePriority,
    FeeRateSource, TransactionSource, TransferRequest, UtxoProvider,
};
use tapmemo_electrum::ElectrumClient;
use tapmemo_esplora::EsploraClient;

use crate::config::{Backend, TapmemoConfig};
use crate::wallet;

/// Everything a command needs from the chain.
pub trait ChainBackend: UtxoProvider + FeeRateSource + Broadcaster + TransactionSource {}

impl<T> ChainBackend for T where T: UtxoProvider + FeeRateSource + Broadcaster + TransactionSource {}

/// Connect to the configured backend.
pub fn connect(config: &TapmemoConfig) -> Result<Box<dyn ChainBackend>> {
    let network = config.network()?;
    match config.bitcoin.backend {
        Backend::Esplora => {
            let url = config.esplora_url()?;
            log::info!("Using Esplora backend at {}", url);
            let client = EsploraClient::with_timeout(&url, config.timeout())
                .context("Failed to create Esplora client")?;
            Ok(Box::new(client))
        }
        Backend::Electrum => {
            let url = config.electrum_url()?;
            log::info!("Connecting to Electrum server {}", url);
            let client = ElectrumClient::with_timeout(&url, network, config.timeout())
                .with_context(|| format!("Failed to connect to {}", url))?;
            Ok(Box::new(client))
        }
    }
}

/// Arguments of `send`.
#[derive(Debug, Clone, PartialEq)]
pub struct SendArgs {
    pub to: String,
    pub amount: Amount,
    pub memo: Option<Vec<u8>>,
    pub priority: Option<FeePriority>,
    pub dry_run: bool,
}

impl SendArgs {
    pub fn parse(args: &[String]) -> Result<Self> {
        let mut to = None;
        let mut amount = None;
        let mut memo = None;
        let mut priority = None;
        let mut dry_run = false;

        let mut i = 0;
        while i < args.len() {
            let flag = args[i].as_str();
            match flag {
                "--dry-run" => {
                    dry_run = true;
                    i += 1;
                    continue;
                }
                "--to" | "--amount" | "--memo" | "--memo-hex" | "--priority" => {}
                other => anyhow::bail!("Unknown send argument: {}", other),
            }

            let value = args
                .get(i + 1)
                .with_context(|| format!("{} requires a value", flag))?;
            match flag {
                "--to" => to = Some(value.clone()),
                "--amount" => {
                    let sats: u64 = value
                        .parse()
                        .with_context(|| format!("--amount must be whole satoshis: {}", value))?;
                    amount = Some(Amount::from_sat(sats));
                }
                "--memo" => memo = Some(value.as_bytes().to_vec()),
                "--memo-hex" => {
                    memo = Some(
                        Vec::<u8>::from_hex(value)
                            .map_err(|e| anyhow::anyhow!("--memo-hex: {}", e))?,
                    )
                }
                "--priority" => {
                    priority = Some(value.parse().map_err(|e: String| anyhow::anyhow!(e))?)
                }
                _ => {}
            }
            i += 2;
        }

        Ok(Self {
            to: to.context("send requires --to <address>")?,
            amount: amount.context("send requires --amount <sats>")?,
            memo,
            priority,
            dry_run,
        })
    }
}

/// How a memo is shown: the text if it is UTF-8, else hex.
pub fn format_memo(memo: &[u8]) -> String {
    match std::str::from_utf8(memo) {
        Ok(text) => text.to_string(),
        Err(_) => format!("hex:{}", memo.to_lower_hex_string()),
    }
}

/// Print the addresses of the configured key. Works offline.
pub fn address(config: &TapmemoConfig) -> Result<()> {
    let network = config.network()?;
    let keys = wallet::load_keys(config)?;
    let addrs = keys.addresses(network);

    println!("Network:       {}", network);
    println!("Internal key:  {}", keys.internal_public_key());
    println!("P2TR:          {}", addrs.p2tr);
    println!("P2WPKH:        {}", addrs.p2wpkh);
    println!("P2SH-P2WPKH:   {}", addrs.p2sh_p2wpkh);
    println!("P2PKH:         {}", addrs.p2pkh);
    Ok(())
}

/// Build, sign and (unless `dry_run`) broadcast a transfer.
pub fn send(config: &TapmemoConfig, args: &SendArgs) -> Result<()> {
    let network = config.network()?;
    let keys = wallet::load_keys(config)?;
    let recipient = parse_recipient(&args.to, network)?;

    let mut options = config.send_options();
    if let Some(priority) = args.priority {
        options.priority = priority;
    }

    let mut request = TransferRequest::new(recipient, args.amount);
    if let Some(memo) = &args.memo {
        request = request.with_memo(memo.clone());
    }

    let backend = connect(config)?;
    let prepared = prepare_transfer(
        &keys,
        network,
        backend.as_ref(),
        backend.as_ref(),
        &request,
        &options,
    )
    .context("Failed to build transaction")?;

    let plan = &prepared.plan;
    println!("From:     {}", keys.output_address(network));
    println!("To:       {} ({})", plan.recipient().address, plan.recipient().value);
    if let Some(memo) = plan.memo() {
        println!("Memo:     {}", format_memo(memo));
    }
    if let Some(change) = plan.change() {
        println!("Change:   {}", change.value);
    }
    println!(
        "Fee:      {} ({} sat/vB, {} vB)",
        plan.fee(),
        prepared.fee_rate,
        prepared.signed.vsize()
    );
    println!("Txid:     {}", prepared.txid());

    if args.dry_run {
        println!("{}", prepared.signed.hex());
        log::info!("Dry run, not broadcasting");
        return Ok(());
    }

    let txid = broadcast(&prepared, backend.as_ref()).context("Broadcast failed")?;
    println!("✅ Broadcast {}", txid);
    Ok(())
}

/// Print the memo carried by `txid`.
pub fn decode_memo(config: &TapmemoConfig, txid: &str) -> Result<()> {
    let txid: Txid = txid
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid txid {}: {}", txid, e))?;
    let backend = connect(config)?;

    match fetch_memo(backend.as_ref(), &txid)? {
        Some(memo) => println!("{}", format_memo(&memo)),
        None => println!("No memo in {}", txid),
    }
    Ok(())
}
