//! Fee estimation.
//!
//! The fee is `ceil(rate * vsize)`. The vsize is computed from the planned
//! shape of the transaction rather than guessed: a Taproot key-path input
//! always carries exactly one 64-byte signature, so for our transactions
//! the estimate equals the final size.

use bitcoin::{Amount, Weight};

use crate::error::TxError;

/// Maximum fee rate we'll accept (sat/vB). Protects against malicious fee data.
pub const DEFAULT_MAX_FEE_RATE: f64 = 500.0;

/// Version, locktime, input/output counts and the segwit marker + flag.
const OVERHEAD_WU: u64 = (4 + 4 + 1 + 1) * 4 + 2;

/// Outpoint, empty script_sig, sequence; plus witness item count, length
/// byte and a 64-byte Schnorr signature (SIGHASH_DEFAULT).
const TAPROOT_KEYPATH_INPUT_WU: u64 = (36 + 1 + 4) * 4 + (1 + 1 + 64);

fn compact_size_len(n: u64) -> u64 {
    match n {
        0..=0xFC => 1,
        0xFD..=0xFFFF => 3,
        0x1_0000..=0xFFFF_FFFF => 5,
        _ => 9,
    }
}

/// The shape of a transaction, enough to compute its weight before signing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxShape {
    /// Number of Taproot key-path inputs
    pub inputs: usize,
    /// Script pubkey length of each output
    pub output_script_lens: Vec<usize>,
}

impl TxShape {
    pub fn new(inputs: usize) -> Self {
        Self {
            inputs,
            output_script_lens: Vec::new(),
        }
    }

    /// Add an output with a script of `script_len` bytes.
    pub fn with_output(mut self, script_len: usize) -> Self {
        self.output_script_lens.push(script_len);
        self
    }

    /// Weight of the signed transaction.
    pub fn weight(&self) -> Weight {
        let inputs = self.inputs as u64;
        let outputs = self.output_script_lens.len() as u64;

        // Counts above 252 need wider varints than OVERHEAD_WU assumes
        let count_extra = (compact_size_len(inputs) - 1 + compact_size_len(outputs) - 1) * 4;

        let output_wu: u64 = self
            .output_script_lens
            .iter()
            .map(|&len| {
                let len = len as u64;
                (8 + compact_size_len(len) + len) * 4
            })
            .sum();

        Weight::from_wu(OVERHEAD_WU + count_extra + TAPROOT_KEYPATH_INPUT_WU * inputs + output_wu)
    }

    /// Virtual size, rounded up.
    pub fn vsize(&self) -> u64 {
        self.weight().to_vbytes_ceil()
    }
}

/// Turns a fee rate and a size into an absolute fee.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeEstimator {
    max_fee_rate: f64,
    fixed_vbytes: Option<u64>,
}

impl Default for FeeEstimator {
    fn default() -> Self {
        Self {
            max_fee_rate: DEFAULT_MAX_FEE_RATE,
            fixed_vbytes: None,
        }
    }
}

impl FeeEstimator {
    pub fn new(max_fee_rate: f64) -> Self {
        Self {
            max_fee_rate,
            fixed_vbytes: None,
        }
    }

    /// Use a configured size instead of computing it from the shape.
    pub fn with_fixed_vbytes(mut self, vbytes: u64) -> Self {
        self.fixed_vbytes = Some(vbytes);
        self
    }

    pub fn max_fee_rate(&self) -> f64 {
        self.max_fee_rate
    }

    /// Size to charge for `shape`: the configured override if any, else the
    /// computed vsize.
    pub fn size_for(&self, shape: &TxShape) -> u64 {
        self.fixed_vbytes.unwrap_or_else(|| shape.vsize())
    }

    /// `ceil(rate * vbytes)` satoshis.
    ///
    /// The rate is rounded up to the next 0.001 sat/vB before multiplying.
    /// Float noise below 1e-9 sat/vB is trimmed first so that a rate like
    /// 1.1 is not bumped to 1.101.
    pub fn estimate_fee(&self, fee_rate: f64, vbytes: u64) -> Result<Amount, TxError> {
        if !fee_rate.is_finite() || fee_rate <= 0.0 || fee_rate > self.max_fee_rate {
            return Err(TxError::InvalidFeeRate(fee_rate));
        }

        let rate_millisat = (fee_rate * 1000.0 - 1e-6).ceil().max(1.0) as u64;
        let fee_millisat = rate_millisat
            .checked_mul(vbytes)
            .ok_or(TxError::InvalidFeeRate(fee_rate))?;

        Ok(Amount::from_sat(fee_millisat.div_ceil(1000)))
    }
}
