//! TapMemo: send bitcoin from a Taproot key-path address with an OP_RETURN memo
//!
//! # Usage
//!
//! ```bash
//! TAPMEMO_WIF=... tapmemo address
//! TAPMEMO_WIF=... tapmemo send --to tb1p... --amount 2000 --memo "hello"
//! tapmemo decode-memo <txid>
//! tapmemo --config tapmemo.toml --validate
//! ```

mod commands;
mod config;
mod memory;
mod wallet;

use anyhow::{Context, Result};
use std::path::PathBuf;

use commands::SendArgs;
use config::TapmemoConfig;

/// What the user asked for.
#[derive(Debug, Clone, PartialEq)]
enum Command {
    Address,
    Send(SendArgs),
    DecodeMemo(String),
}

#[derive(Debug, Default)]
struct Invocation {
    config_path: Option<PathBuf>,
    validate_only: bool,
    help: bool,
    version: bool,
    command: Option<Command>,
}

// Parse CLI args (hand-rolled, no clap)
fn parse_args(args: &[String]) -> Result<Invocation> {
    let mut inv = Invocation::default();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                if i < args.len() {
                    inv.config_path = Some(PathBuf::from(&args[i]));
                } else {
                    anyhow::bail!("--config requires a path argument");
                }
            }
            "--validate" => {
                inv.validate_only = true;
            }
            "--help" | "-h" => {
                inv.help = true;
            }
            "--version" | "-V" => {
                inv.version = true;
            }
            "address" => {
                inv.command = Some(Command::Address);
            }
            "send" => {
                // Everything after the subcommand belongs to it
                inv.command = Some(Command::Send(SendArgs::parse(&args[i + 1..])?));
                break;
            }
            "decode-memo" => {
                i += 1;
                let txid = args
                    .get(i)
                    .context("decode-memo requires a txid argument")?;
                inv.command = Some(Command::DecodeMemo(txid.clone()));
            }
            other => {
                anyhow::bail!("Unknown argument: {}", other);
            }
        }
        i += 1;
    }

    Ok(inv)
}

fn main() -> Result<()> {
    // Security hardening: disable core dumps to prevent key material leaking to disk
    memory::disable_core_dumps();

    // Initialize rustls CryptoProvider before any TLS connection (Electrum over SSL).
    rustls::crypto::ring::default_provider()
        .install_default()
        .ok();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let inv = parse_args(&args)?;

    if inv.help {
        print_help();
        return Ok(());
    }
    if inv.version {
        println!("tapmemo {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Load config
    let mut config = match &inv.config_path {
        Some(path) => TapmemoConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => TapmemoConfig::default(),
    };

    // Apply env overrides
    config
        .apply_env_overrides()
        .context("Invalid environment override")?;

    // Validate
    config
        .validate()
        .context("Configuration validation failed")?;

    // Init logger
    env_logger::Builder::new()
        .parse_filters(&config.logging.level)
        .init();

    if inv.validate_only {
        println!("✅ Configuration is valid.");
        println!("  Network:       {}", config.bitcoin.network);
        println!("  Backend:       {:?}", config.bitcoin.backend);
        println!("  Esplora:       {}", config.esplora_url()?);
        println!("  Electrum:      {}", config.electrum_url()?);
        println!("  Fee priority:  {:?}", config.fees.priority);
        println!("  Max fee rate:  {} sat/vB", config.fees.max_fee_rate);
        println!("  Key variable:  {}", config.wallet.wif_env);
        return Ok(());
    }

    match inv.command {
        Some(Command::Address) => commands::address(&config),
        Some(Command::Send(ref send_args)) => commands::send(&config, send_args),
        Some(Command::DecodeMemo(ref txid)) => commands::decode_memo(&config, txid),
        None => {
            print_help();
            anyhow::bail!("No command given");
        }
    }
}

fn print_help() {
    println!(
        r#"TapMemo: Taproot key-path transfers with an OP_RETURN memo

USAGE:
    tapmemo [OPTIONS] <COMMAND>

COMMANDS:
    address                         Show the addresses of the configured key
    send --to <ADDR> --amount <SATS> [--memo <TEXT> | --memo-hex <HEX>]
         [--priority <TIER>] [--dry-run]
                                    Build, sign and broadcast a transfer
    decode-memo <TXID>              Print the memo carried by a transaction

OPTIONS:
    -c, --config <PATH>   Config file path (default: built-in defaults)
    --validate            Validate configuration and exit
    -h, --help            Show this help message
    -V, --version         Show version

FEE PRIORITY TIERS:
    fastest, half_hour, hour, economy (default), minimum

ENVIRONMENT VARIABLES (override config file):
    TAPMEMO_WIF               Spending key, WIF (name set by wallet.wif_env)
    TAPMEMO_NETWORK           Bitcoin network (bitcoin/testnet4/testnet3/signet/regtest)
    TAPMEMO_BACKEND           esplora or electrum
    TAPMEMO_ESPLORA_URL       Esplora API base URL
    TAPMEMO_ELECTRUM_URL      Electrum server URL
    TAPMEMO_FEE_PRIORITY      Fee priority tier
    TAPMEMO_LOG_LEVEL         Log level (error/warn/info/debug/trace)

EXAMPLES:
    # Preview a transfer without broadcasting it
    tapmemo send --to tb1p... --amount 2000 --memo "invoice 42" --dry-run

    # Read the memo back
    tapmemo decode-memo 4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b
"#
    );
}
