//! Taproot key material.
//!
//! From one secret scalar we derive:
//! - the x-only internal key `P` (parity byte dropped)
//! - the tweak `t = H_TapTweak(P)` (no script tree, so no merkle root)
//! - the output key `Q = P + t*G` and its bech32m address
//! - the tweaked secret `d' = d + t` (negated first when `P` has odd y),
//!   which is the only key that can sign for `Q`
//!
//! Everything is a pure function of the secret. The tweaked secret is only
//! handed out for signing and is never logged.

use bitcoin::key::{TapTweak, TweakedKeypair, TweakedPublicKey, UntweakedPublicKey};
use bitcoin::secp256k1::{Keypair, Secp256k1, SecretKey, XOnlyPublicKey};
use bitcoin::taproot::{TapNodeHash, TapTweakHash};
use bitcoin::{Address, CompressedPublicKey, Network, ScriptBuf};

use crate::error::TxError;

/// Compute the BIP-341 tweak for an internal key.
///
/// `merkle_root` is `None` for key-path-only outputs, which is all this
/// crate produces. It is accepted so the tweak can be checked against
/// reference vectors that commit to a script tree.
pub fn tap_tweak(internal_key: UntweakedPublicKey, merkle_root: Option<TapNodeHash>) -> TapTweakHash {
    TapTweakHash::from_key_and_tweak(internal_key, merkle_root)
}

/// Addresses for one key across the standard script types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedAddresses {
    /// Legacy pay-to-pubkey-hash
    pub p2pkh: Address,
    /// Native segwit wrapped in P2SH
    pub p2sh_p2wpkh: Address,
    /// Native segwit v0
    pub p2wpkh: Address,
    /// Taproot key-path (segwit v1)
    pub p2tr: Address,
}

/// A spending key and everything derived from it for Taproot key-path spends.
pub struct KeyMaterial {
    keypair: Keypair,
    internal_key: XOnlyPublicKey,
    tweak: TapTweakHash,
    signing_key: TweakedKeypair,
    output_key: TweakedPublicKey,
}

impl KeyMaterial {
    /// Derive key material from a 32-byte secret scalar.
    ///
    /// Fails with [`TxError::InvalidKey`] if the bytes are not exactly 32 long
    /// or do not encode a scalar in `[1, n)`.
    pub fn derive(secret: &[u8]) -> Result<Self, TxError> {
        let secret_key =
            SecretKey::from_slice(secret).map_err(|e| TxError::InvalidKey(e.to_string()))?;
        Ok(Self::from_secret_key(secret_key))
    }

    /// Derive key material from an already-parsed secret key.
    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let secp = Secp256k1::new();
        let keypair = Keypair::from_secret_key(&secp, &secret_key);
        let (internal_key, _parity) = keypair.x_only_public_key();

        let tweak = tap_tweak(internal_key, None);
        let signing_key = keypair.tap_tweak(&secp, None);
        let (output_key, _) = internal_key.tap_tweak(&secp, None);

        Self {
            keypair,
            internal_key,
            tweak,
            signing_key,
            output_key,
        }
    }

    /// The untweaked x-only key committed to by the output.
    pub fn internal_public_key(&self) -> XOnlyPublicKey {
        self.internal_key
    }

    /// The tweak applied to the internal key.
    pub fn tweak(&self) -> TapTweakHash {
        self.tweak
    }

    /// The tweaked output key that appears on chain.
    pub fn output_key(&self) -> TweakedPublicKey {
        self.output_key
    }

    /// The Taproot address for `network`.
    pub fn output_address(&self, network: Network) -> Address {
        Address::p2tr_tweaked(self.output_key, network)
    }

    /// The `OP_1 <Q>` script pubkey of the output address.
    pub fn output_script(&self) -> ScriptBuf {
        ScriptBuf::new_p2tr_tweaked(self.output_key)
    }

    /// Tweaked keypair for key-path Schnorr signatures.
    ///
    /// Must never be persisted or logged.
    pub fn signing_key(&self) -> &TweakedKeypair {
        &self.signing_key
    }

    /// Whether the tweaked signing key matches the output key.
    ///
    /// Holds for every key built through [`KeyMaterial::derive`]; checked
    /// again by the signer before producing a signature.
    pub fn is_consistent(&self) -> bool {
        let (signing_xonly, _) = self.signing_key.to_inner().x_only_public_key();
        signing_xonly == self.output_key.to_inner()
    }

    /// Legacy, wrapped segwit, native segwit and Taproot addresses for this key.
    pub fn addresses(&self, network: Network) -> DerivedAddresses {
        let compressed = CompressedPublicKey(self.keypair.public_key());
        DerivedAddresses {
            p2pkh: Address::p2pkh(compressed.pubkey_hash(), network),
            p2sh_p2wpkh: Address::p2shwpkh(&compressed, network),
            p2wpkh: Address::p2wpkh(&compressed, network),
            p2tr: self.output_address(network),
        }
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("internal_key", &self.internal_key)
            .field("output_key", &self.output_key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_keys, test_secret};

    #[test]
    fn test_derive_rejects_zero_scalar() {
        assert!(matches!(
            KeyMaterial::derive(&[0u8; 32]),
            Err(TxError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_derive_rejects_scalar_above_order() {
        assert!(matches!(
            KeyMaterial::derive(&[0xFF; 32]),
            Err(TxError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_derive_rejects_wrong_length() {
        assert!(KeyMaterial::derive(&[0x01; 31]).is_err());
        assert!(KeyMaterial::derive(&[0x01; 33]).is_err());
    }

    #[test]
    fn test_generator_internal_key() {
        // d = 1 gives P = G
        let mut secret = [0u8; 32];
        secret[31] = 1;
        let keys = KeyMaterial::derive(&secret).unwrap();
        assert_eq!(
            hex::encode(keys.internal_public_key().serialize()),
            "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798"
        );
    }

    #[test]
    fn test_address_is_deterministic() {
        let a = test_keys(7).output_address(Network::Testnet);
        let b = KeyMaterial::derive(&test_secret(7))
            .unwrap()
            .output_address(Network::Testnet);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn test_address_matches_rust_bitcoin_p2tr() {
        let secp = Secp256k1::new();
        for seed in 1..=16u8 {
            let keys = test_keys(seed);
            let expected =
                Address::p2tr(&secp, keys.internal_public_key(), None, Network::Testnet);
            assert_eq!(keys.output_address(Network::Testnet), expected);
        }
    }

    #[test]
    fn test_address_prefixes() {
        let keys = test_keys(3);
        let testnet = keys.output_address(Network::Testnet).to_string();
        let mainnet = keys.output_address(Network::Bitcoin).to_string();
        let regtest = keys.output_address(Network::Regtest).to_string();
        assert!(testnet.starts_with("tb1p"), "{}", testnet);
        assert!(mainnet.starts_with("bc1p"), "{}", mainnet);
        assert!(regtest.starts_with("bcrt1p"), "{}", regtest);
        assert_eq!(mainnet.len(), 62);
    }

    #[test]
    fn test_signing_key_matches_output_key() {
        // Covers both parities of the internal key
        for seed in 1..=32u8 {
            assert!(test_keys(seed).is_consistent(), "seed {}", seed);
        }
    }

    #[test]
    fn test_tweak_is_pure_function_of_internal_key() {
        let keys = test_keys(5);
        assert_eq!(tap_tweak(keys.internal_public_key(), None), keys.tweak());
        assert_ne!(tap_tweak(test_keys(6).internal_public_key(), None), keys.tweak());
    }

    #[test]
    fn test_tweak_commits_to_merkle_root() {
        use bitcoin::hashes::Hash;
        let internal = test_keys(5).internal_public_key();
        let root = TapNodeHash::from_byte_array([0x11; 32]);
        assert_ne!(tap_tweak(internal, Some(root)), tap_tweak(internal, None));
    }

    #[test]
    fn test_output_key_is_internal_plus_tweak() {
        let secp = Secp256k1::new();
        let keys = test_keys(9);
        let (expected, _) = keys
            .internal_public_key()
            .add_tweak(&secp, &keys.tweak().to_scalar())
            .unwrap();
        assert_eq!(keys.output_key().to_inner(), expected);
    }

    #[test]
    fn test_output_script_matches_address() {
        let keys = test_keys(4);
        assert_eq!(
            keys.output_script(),
            keys.output_address(Network::Testnet).script_pubkey()
        );
        assert!(keys.output_script().is_p2tr());
    }

    #[test]
    fn test_all_address_types() {
        let addrs = test_keys(2).addresses(Network::Testnet);
        assert!(addrs.p2pkh.to_string().starts_with('m') || addrs.p2pkh.to_string().starts_with('n'));
        assert!(addrs.p2sh_p2wpkh.to_string().starts_with('2'));
        assert!(addrs.p2wpkh.to_string().starts_with("tb1q"));
        assert!(addrs.p2tr.to_string().starts_with("tb1p"));

        let main = test_keys(2).addresses(Network::Bitcoin);
        assert!(main.p2pkh.to_string().starts_with('1'));
        assert!(main.p2sh_p2wpkh.to_string().starts_with('3'));
        assert!(main.p2wpkh.to_string().starts_with("bc1q"));
    }

    #[test]
    fn test_debug_hides_secret() {
        let secret = test_secret(8);
        let keys = KeyMaterial::derive(&secret).unwrap();
        let debug = format!("{:?}", keys);
        assert!(!debug.contains(&hex::encode(secret)));
        assert!(debug.contains("internal_key"));
    }
}
